//! Persistence for service configuration records.
//!
//! The store only knows records keyed by service ID; turning a record back
//! into a live service is the caller's job.

mod error;
mod file;
mod locks;
mod store;
mod types;

pub use error::StoreError;
pub use file::FileStore;
pub use locks::{KeyedGuard, KeyedLocks};
pub use store::{MemoryStore, ServiceStore};
pub use types::*;
