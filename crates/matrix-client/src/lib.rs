//! Matrix client-server API client and the chat capability used by services.

mod client;
mod error;
mod receiver;
mod types;

pub use client::{ChatClient, MatrixClient};
pub use error::MatrixError;
pub use receiver::{extract_items, SyncReceiver};
pub use types::*;
