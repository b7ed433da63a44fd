pub mod build;
pub mod diff;
pub mod error;

pub use build::{build_plan, optimize_plan, validate_plan};
pub use diff::{compute_diff, DiffResult, ResourceDiff};
pub use error::PlannerError;
