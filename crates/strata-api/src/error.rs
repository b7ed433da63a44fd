use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<strata_store::StoreError> for ApiError {
    fn from(e: strata_store::StoreError) -> Self {
        match e {
            strata_store::StoreError::NotFound(_) => ApiError::not_found(e.to_string()),
            strata_store::StoreError::Conflict(_) => {
                ApiError { status: StatusCode::CONFLICT, message: e.to_string() }
            }
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<strata_scheduler::SchedulerError> for ApiError {
    fn from(e: strata_scheduler::SchedulerError) -> Self {
        match e {
            strata_scheduler::SchedulerError::EmptyPlan => ApiError::bad_request(e.to_string()),
            strata_scheduler::SchedulerError::RunNotFound(_) => ApiError::not_found(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

impl From<strata_graph::GraphError> for ApiError {
    fn from(e: strata_graph::GraphError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}
