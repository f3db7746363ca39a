//! Resolution manager.
//!
//! The manager injects data from config sources into a configuration
//! document and then watches for updates on the injected values. Its
//! methods follow a fixed sequence, each called at most once:
//!
//! 1. `Manager::new` with a populated [`SourceRegistry`];
//! 2. `resolve` to rewrite the document with retrieved values;
//! 3. `watch_for_update` on a spawned task to wait for changes;
//! 4. `wait_for_watcher` to confirm the watchers are in place;
//! 5. `close` to tear everything down.
//!
//! The sessions map and the watcher list are only mutated during the
//! single-threaded resolve pass and are read-only afterwards.

use crate::error::{Aggregate, Error};
use crate::infra::CloseSignal;
use crate::reference::Reference;
use crate::source::{Session, SourceRegistry, WatchError, WatchFuture};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resolves config source references in a document and watches the results.
pub struct Manager {
    sources: SourceRegistry,
    /// Sessions created so far, keyed by source name.
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
    /// Watches collected during resolve, drained by `watch_for_update`.
    watchers: Mutex<Vec<WatchFuture>>,
    /// Watcher tasks to drain on close.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    resolved: AtomicBool,
    watch_started: AtomicBool,
    /// Fires once all watcher tasks have been launched.
    watching: CloseSignal,
    /// Fires when the manager is closing.
    close: CloseSignal,
}

impl Manager {
    pub fn new(sources: SourceRegistry) -> Self {
        Self {
            sources,
            sessions: Mutex::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            resolved: AtomicBool::new(false),
            watch_started: AtomicBool::new(false),
            watching: CloseSignal::new(),
            close: CloseSignal::new(),
        }
    }

    /// Resolve every reference in the document, returning a fully
    /// substituted copy. Single-pass: at most one call per manager.
    ///
    /// On the first retrieval failure the whole pass aborts; no partially
    /// substituted document is ever returned. Either way, every session
    /// created so far is notified that retrieval has ended.
    pub async fn resolve(&self, config: &Value) -> Result<Value, Error> {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyResolved);
        }

        let resolved = match self.expand(config).await {
            Ok(value) => value,
            Err(err) => {
                // Notify sessions used so far, but the retrieval error takes
                // precedence over any end-of-batch failure.
                for end_err in self.retrieve_end_all_sessions().await {
                    debug!(error = %end_err, "retrieve_end failed during aborted resolve");
                }
                return Err(err);
            }
        };

        let errs = self.retrieve_end_all_sessions().await;
        if !errs.is_empty() {
            return Err(Error::Lifecycle(Aggregate(errs)));
        }

        debug!(
            watchers = self.watchers.lock().len(),
            sessions = self.sessions.lock().len(),
            "resolve complete"
        );
        Ok(resolved)
    }

    /// Recursive, structure-preserving rewrite. Only scalar strings are
    /// candidates for substitution; sequence order and mapping keys are
    /// untouched.
    fn expand<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, Error>> {
        Box::pin(async move {
            match value {
                Value::String(s) => self.expand_reference(s).await,
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.expand(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key.clone(), self.expand(item).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        })
    }

    /// Substitute a single scalar string if it parses as a reference.
    async fn expand_reference(&self, raw: &str) -> Result<Value, Error> {
        let Some(reference) = Reference::parse(raw)? else {
            return Ok(Value::String(raw.to_string()));
        };

        let session = self.session_for(&reference.source).await?;
        let retrieved = session
            .retrieve(&reference.selector, reference.params.as_ref())
            .await
            .map_err(|source| Error::Retrieve {
                name: reference.source.clone(),
                source,
            })?;

        self.watchers.lock().push(retrieved.watch);
        Ok(retrieved.value)
    }

    /// The session for a source name, created lazily on first use.
    async fn session_for(&self, name: &str) -> Result<Arc<dyn Session>, Error> {
        if let Some(session) = self.sessions.lock().get(name) {
            return Ok(Arc::clone(session));
        }

        let source = self
            .sources
            .get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))?;
        let session = source
            .new_session()
            .await
            .map_err(|source| Error::NewSession {
                name: name.to_string(),
                source,
            })?;
        self.sessions
            .lock()
            .insert(name.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn retrieve_end_all_sessions(&self) -> Vec<crate::source::SourceError> {
        let sessions: Vec<Arc<dyn Session>> =
            self.sessions.lock().values().cloned().collect();
        let mut errs = Vec::new();
        for session in sessions {
            if let Err(err) = session.retrieve_end().await {
                errs.push(err);
            }
        }
        errs
    }

    /// Run every collected watch concurrently and block until the first
    /// actionable outcome, or until the manager is asked to close.
    ///
    /// `NotSupported` and `SessionClosed` outcomes end their watcher task
    /// silently. Any other outcome, including a clean "value may have
    /// changed", is returned to the caller, who should re-run resolution.
    /// Returns `Err(WatchError::SessionClosed)` once `close` fires, which
    /// also covers the case where every watcher exited silently.
    pub async fn watch_for_update(&self) -> Result<(), WatchError> {
        if self.watch_started.swap(true, Ordering::SeqCst) {
            return Err(WatchError::Failed(
                "watch_for_update may only be called once per manager".into(),
            ));
        }

        // Single-slot result channel: the first watcher outcome wins, later
        // offers fall through try_send and the losing tasks just exit.
        let (tx, mut rx) = mpsc::channel::<Result<(), WatchError>>(1);

        let watchers = std::mem::take(&mut *self.watchers.lock());
        {
            let mut tasks = self.tasks.lock();
            for watch in watchers {
                let tx = tx.clone();
                tasks.push(tokio::spawn(async move {
                    match watch.await {
                        Err(WatchError::NotSupported) | Err(WatchError::SessionClosed) => {}
                        outcome => {
                            let _ = tx.try_send(outcome);
                        }
                    }
                }));
            }
        }
        drop(tx);

        // All watcher tasks are launched (not necessarily running); callers
        // blocked in wait_for_watcher may proceed.
        self.watching.fire();

        tokio::select! {
            Some(outcome) = rx.recv() => outcome,
            _ = self.close.wait() => Err(WatchError::SessionClosed),
        }
    }

    /// Block until `watch_for_update` has launched all watcher tasks.
    pub async fn wait_for_watcher(&self) {
        self.watching.wait().await;
    }

    /// Close every created session, unblock any in-flight watcher task and
    /// wait for them all to finish.
    ///
    /// Per-session close errors do not stop the teardown; they are collected
    /// and surfaced as one combined error. Safe to call even if
    /// `watch_for_update` was never started.
    pub async fn close(&self) -> Result<(), Error> {
        let sessions: Vec<(String, Arc<dyn Session>)> =
            self.sessions.lock().drain().collect();
        let mut errs = Vec::new();
        for (name, session) in sessions {
            if let Err(err) = session.close().await {
                warn!(source = %name, error = %err, "session close failed");
                errs.push(err);
            }
        }

        self.close.fire();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Lifecycle(Aggregate(errs)))
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("sources", &self.sources)
            .field("resolved", &self.resolved.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
