pub mod error;
pub mod memory;
pub mod sqlite_store;
pub mod store;

pub use error::{map_sqlx_err, StoreError};
pub use memory::InMemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{EventFilter, StateStore};
