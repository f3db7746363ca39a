//! Process-local diagnostics: debug pages server and singleton claims.

pub mod pages;
pub mod server;
pub mod singleton;

pub use pages::DebugPages;
pub use server::{DebugServer, DebugServerConfig};
pub use singleton::{SingletonGuard, SingletonRegistry};

use thiserror::Error;

/// Errors from diagnostic components.
#[derive(Debug, Error)]
pub enum DiagError {
    /// The singleton slot is held by another owner.
    #[error("singleton slot {0:?} is already claimed")]
    AlreadyClaimed(String),

    /// Pages can only be registered before the server starts.
    #[error("cannot register debug pages after the server has started")]
    AlreadyStarted,

    /// Page prefixes are absolute paths.
    #[error("page prefix must start with '/': {0:?}")]
    InvalidPrefix(String),

    /// The router rejected the registration (duplicate or overlapping path).
    #[error("conflicting page registration: {0}")]
    RouteConflict(String),
}
