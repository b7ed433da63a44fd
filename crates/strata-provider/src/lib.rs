pub mod driver;
pub mod error;
pub mod local;
pub mod registry;

pub use driver::{
    ApplyResult, DestroyResult, PlanResult, Provider, ProviderMetadata, ReadRequest, ReadResult,
};
pub use error::ProviderError;
pub use local::NullProvider;
pub use registry::ProviderRegistry;
