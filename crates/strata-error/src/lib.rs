//! Shared error classification used by the store and the scheduler.
//!
//! Every failure that crosses a component boundary is represented as an
//! [`EngineError`]: a class, an optional fixed code, a message, optional
//! resource/operation context, and a chained cause. Two errors compare
//! equal iff they share class and code — message and context are
//! informational only, so retry logic and tests can match on shape
//! without caring about wording.

use std::fmt;

/// Coarse classification driving retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Likely to succeed on retry with no special handling (network blip, timeout).
    Transient,
    /// Retry but back off further than a plain transient error (rate limiting).
    Throttled,
    /// Retry after the conflicting state resolves (lock held, optimistic check failed).
    Conflict,
    /// Will not succeed on retry without external intervention.
    Permanent,
}

impl ErrorClass {
    pub fn transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    pub fn throttled(self) -> bool {
        matches!(self, ErrorClass::Throttled)
    }

    pub fn conflict(self) -> bool {
        matches!(self, ErrorClass::Conflict)
    }

    pub fn permanent(self) -> bool {
        matches!(self, ErrorClass::Permanent)
    }

    pub fn retryable(self) -> bool {
        self.transient() || self.throttled() || self.conflict()
    }
}

/// Fixed set of machine-readable codes. Not every error carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Timeout,
    RateLimited,
    Conflict,
    InternalError,
    ProviderFailed,
    DependencyFailed,
}

/// Context naming the resource and/or operation an error occurred under.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorContext {
    pub resource: Option<String>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// The classified error type shared across the engine's components.
#[derive(Debug)]
pub struct EngineError {
    pub class: ErrorClass,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub context: ErrorContext,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EngineError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: None,
            message: message.into(),
            context: ErrorContext::new(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Throttled, message).with_code(ErrorCode::RateLimited)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, message).with_code(ErrorCode::Conflict)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message).with_code(ErrorCode::NotFound)
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.context.resource = Some(resource.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn transient_p(&self) -> bool {
        self.class.transient()
    }

    pub fn throttled_p(&self) -> bool {
        self.class.throttled()
    }

    pub fn conflict_p(&self) -> bool {
        self.class.conflict()
    }

    pub fn permanent_p(&self) -> bool {
        self.class.permanent()
    }

    pub fn retryable(&self) -> bool {
        self.class.retryable()
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.code == other.code
    }
}

impl Eq for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.class)?;
        if let Some(code) = self.code {
            write!(f, "[{:?}]", code)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(resource) = &self.context.resource {
            write!(f, " (resource={resource})")?;
        }
        if let Some(operation) = &self.context.operation {
            write!(f, " (operation={operation})")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::permanent(err.to_string()).with_code(ErrorCode::ValidationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_covers_transient_throttled_conflict() {
        assert!(EngineError::transient("x").retryable());
        assert!(EngineError::throttled("x").retryable());
        assert!(EngineError::conflict("x").retryable());
        assert!(!EngineError::permanent("x").retryable());
    }

    #[test]
    fn equality_ignores_message_and_context() {
        let a = EngineError::permanent("timed out talking to provider")
            .with_code(ErrorCode::Timeout)
            .with_resource("vm-1");
        let b = EngineError::permanent("completely different wording")
            .with_code(ErrorCode::Timeout)
            .with_resource("vm-2");
        assert_eq!(a, b);
    }

    #[test]
    fn different_code_is_not_equal() {
        let a = EngineError::permanent("x").with_code(ErrorCode::NotFound);
        let b = EngineError::permanent("x").with_code(ErrorCode::AlreadyExists);
        assert_ne!(a, b);
    }

    #[test]
    fn not_found_is_permanent_and_not_retryable() {
        let err = EngineError::not_found("run abc123");
        assert!(err.permanent_p());
        assert!(!err.retryable());
        assert_eq!(err.code, Some(ErrorCode::NotFound));
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::conflict("lock held")
            .with_resource("vm-1")
            .with_operation("apply");
        let rendered = err.to_string();
        assert!(rendered.contains("vm-1"));
        assert!(rendered.contains("apply"));
    }
}
