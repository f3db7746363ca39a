//! Config source resolution and watching.
//!
//! A configuration document may reference values held by external backends
//! (secret stores, the process environment) instead of embedding them:
//!
//! ```yaml
//! component:
//!   logs_dir: $env:LOGS_DIR
//!   api_key: $vault:data.api_key
//! ```
//!
//! The [`manager::Manager`] resolves those references into live values and
//! then watches the retrieved values for staleness, so the hosting process
//! can re-resolve when a secret is rotated or a credential expires.
//!
//! Call sequence: build a [`source::SourceRegistry`], create a manager,
//! `resolve` the document, spawn `watch_for_update`, `wait_for_watcher`,
//! and finally `close`.

pub mod diag;
pub mod error;
pub mod extension;
pub mod infra;
pub mod logging;
pub mod manager;
pub mod reference;
pub mod source;
pub mod sources;

pub use error::Error;
pub use manager::Manager;
pub use reference::Reference;
pub use source::{
    Retrieved, Session, Source, SourceError, SourceRegistry, WatchError, WatchFuture,
};
