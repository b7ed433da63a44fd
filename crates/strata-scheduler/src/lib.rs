pub mod backoff;
pub mod cancellation;
pub mod error;
pub mod executor;
pub mod scheduler;

pub use backoff::compute_backoff;
pub use cancellation::CancellationToken;
pub use error::SchedulerError;
pub use executor::{UnitOutcome, UnitResult};
pub use scheduler::{ScheduleOptions, Scheduler};
