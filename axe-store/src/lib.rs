//! Durable state: permission rules and per-project conversation history.

mod history;
mod permissions;

pub use history::{HistoryStore, Record};
pub use permissions::{PermissionStore, Rule};

/// Errors from the on-disk stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serialize(String),

    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("no history found")]
    NoHistory,

    #[error("invalid index {index} (1-{len})")]
    InvalidIndex { index: usize, len: usize },
}
