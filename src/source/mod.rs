//! Config source and session contracts.
//!
//! A `Source` is a named backend capability registered before resolution
//! begins. It manufactures `Session` objects: stateful handles created
//! lazily on the first reference to the source and reused for every later
//! reference within the same resolution pass. Sessions own backend
//! resources (network clients, background renewal tasks) and are closed
//! exactly once when the manager closes.

pub mod registry;

pub use registry::SourceRegistry;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Backend failures reported by sources and sessions.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The selected value does not exist (unset variable, missing secret).
    #[error("value not found: {0}")]
    NotFound(String),

    /// Anything else the backend can get wrong: connection failures,
    /// malformed responses, bad selectors.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Terminal outcomes of a watch.
///
/// `NotSupported` and `SessionClosed` are load-bearing sentinels: the watch
/// coordinator consumes them silently instead of surfacing them as failures.
/// Anything else, including a plain `Ok(())` from the watch future meaning
/// the value may have changed, is handed to the caller, who is
/// expected to re-run resolution.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WatchError {
    /// Watching is not supported for this retrieved value.
    #[error("watching is not supported for this value")]
    NotSupported,

    /// The session that produced this watch is closing.
    #[error("session closed")]
    SessionClosed,

    /// The watch itself failed; the retrieved value can no longer be trusted.
    #[error("watch failed: {0}")]
    Failed(String),
}

/// A watch: blocks until the retrieved value may have changed, the owning
/// session closes, or watching turns out to be unsupported.
pub type WatchFuture = BoxFuture<'static, Result<(), WatchError>>;

/// A value retrieved from a config source, plus its watch.
pub struct Retrieved {
    /// The value to substitute into the configuration. Not constrained to a
    /// scalar: sources may return sequences or mappings.
    pub value: Value,
    /// Watch for this retrieval; polled at most once.
    pub watch: WatchFuture,
}

impl Retrieved {
    /// A retrieved value that cannot be watched.
    pub fn unwatched(value: Value) -> Self {
        Self {
            value,
            watch: Box::pin(async { Err(WatchError::NotSupported) }),
        }
    }

    /// A retrieved value whose watch blocks on the given future.
    pub fn watched(value: Value, watch: WatchFuture) -> Self {
        Self { value, watch }
    }
}

impl std::fmt::Debug for Retrieved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrieved")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// A named backend capability able to manufacture sessions.
#[async_trait]
pub trait Source: Send + Sync {
    /// Create a new session for one resolution pass.
    async fn new_session(&self) -> Result<Arc<dyn Session>, SourceError>;
}

/// A stateful per-source handle used to retrieve values.
///
/// Lifecycle: created lazily during resolve, notified once via
/// `retrieve_end` when the pass completes (success or failure), closed
/// exactly once when the manager closes.
#[async_trait]
pub trait Session: Send + Sync {
    /// Retrieve the value for a selector, along with its watch.
    async fn retrieve(
        &self,
        selector: &str,
        params: Option<&Value>,
    ) -> Result<Retrieved, SourceError>;

    /// End-of-batch notification: no more retrievals will happen in the
    /// current resolution pass.
    async fn retrieve_end(&self) -> Result<(), SourceError>;

    /// Release backend resources and unblock any outstanding watches.
    async fn close(&self) -> Result<(), SourceError>;
}
