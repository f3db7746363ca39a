//! Debug page registration.
//!
//! Components add their own pages to the debug server before it starts;
//! everything is served under the `/debug` prefix. The underlying router
//! signals a conflicting registration by panicking, so the merge runs
//! inside a guarded region that converts the panic into a normal error
//! before it crosses the component boundary.

use crate::diag::DiagError;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Path prefix all debug pages are served under.
pub const DEBUG_PATH_PREFIX: &str = "/debug";

/// Collects page routers from components until the debug server starts.
///
/// Clone-cheap; all clones share one registration state, which is how the
/// server and the registering components coordinate.
#[derive(Clone)]
pub struct DebugPages {
    inner: Arc<PagesInner>,
}

struct PagesInner {
    router: Mutex<Router>,
    started: AtomicBool,
}

impl DebugPages {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PagesInner {
                router: Mutex::new(Router::new().route("/", get(index))),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Register a component's pages under `prefix`.
    ///
    /// Must happen before the debug server starts. A prefix that collides
    /// with an earlier registration is reported as an error, not a panic.
    pub fn register(&self, prefix: &str, pages: Router) -> Result<(), DiagError> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(DiagError::AlreadyStarted);
        }
        if !prefix.starts_with('/') {
            return Err(DiagError::InvalidPrefix(prefix.to_string()));
        }

        let mut slot = self.inner.router.lock();
        // The router panics on overlapping paths instead of returning an
        // error; merge a clone inside catch_unwind so the previous state
        // survives a rejected registration.
        let base = slot.clone();
        let prefix = prefix.to_string();
        let merged = catch_unwind(AssertUnwindSafe(move || base.nest(&prefix, pages)))
            .map_err(|payload| DiagError::RouteConflict(panic_message(payload)))?;
        *slot = merged;
        Ok(())
    }

    /// Freeze registrations and produce the router the server will serve.
    pub(crate) fn freeze(&self) -> Router {
        self.inner.started.store(true, Ordering::Release);
        let pages = self.inner.router.lock().clone();
        Router::new().nest(DEBUG_PATH_PREFIX, pages)
    }

    /// Re-open registrations once the server has shut down.
    pub(crate) fn reopen(&self) {
        self.inner.started.store(false, Ordering::Release);
    }
}

impl Default for DebugPages {
    fn default() -> Self {
        Self::new()
    }
}

async fn index() -> &'static str {
    "confsource debug pages"
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pages() -> Router {
        Router::new().route("/pathz", get(|| async { "Ok" }))
    }

    #[test]
    fn register_merges_pages() {
        let pages = DebugPages::new();
        pages.register("/compz", sample_pages()).unwrap();
        pages.register("/other", sample_pages()).unwrap();
    }

    #[test]
    fn conflicting_prefix_becomes_error_not_panic() {
        let pages = DebugPages::new();
        pages.register("/compz", sample_pages()).unwrap();
        let err = pages.register("/compz", sample_pages()).unwrap_err();
        assert!(matches!(err, DiagError::RouteConflict(_)));
    }

    #[test]
    fn registration_survives_rejected_merge() {
        let pages = DebugPages::new();
        pages.register("/compz", sample_pages()).unwrap();
        let _ = pages.register("/compz", sample_pages());
        // Previous registrations are intact; an unrelated prefix still works.
        pages.register("/fresh", sample_pages()).unwrap();
    }

    #[test]
    fn relative_prefix_is_rejected() {
        let pages = DebugPages::new();
        let err = pages.register("compz", sample_pages()).unwrap_err();
        assert!(matches!(err, DiagError::InvalidPrefix(_)));
    }

    #[test]
    fn register_after_start_is_rejected() {
        let pages = DebugPages::new();
        let _router = pages.freeze();
        let err = pages.register("/late", sample_pages()).unwrap_err();
        assert!(matches!(err, DiagError::AlreadyStarted));

        pages.reopen();
        pages.register("/late", sample_pages()).unwrap();
    }
}
