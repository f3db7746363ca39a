//! Secret store config source.
//!
//! A session is bound to one secret path; selectors pull individual keys
//! out of the same fetched document, so the secret is read once per session
//! and every selector shares one underlying lease lifecycle. The first
//! selector that watches triggers construction of a single shared watcher:
//! for renewable secrets that means one background renewal task whose
//! terminal outcome is broadcast to every current and future waiter.

pub mod client;

pub use client::{HttpSecretClient, Renewal, RenewalStream, Secret, SecretClient};

use crate::infra::{CloseSignal, FanoutCell};
use crate::source::{Retrieved, Session, Source, SourceError, WatchError, WatchFuture};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Config source backed by a remote secret store.
///
/// Bound to a single secret path: references using this source select keys
/// within that one document. Separate paths need separate source
/// registrations, even when they share credentials.
pub struct SecretStoreSource {
    client: Arc<dyn SecretClient>,
    path: String,
}

impl SecretStoreSource {
    pub fn new(client: Arc<dyn SecretClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    /// Convenience constructor wiring up the HTTP client.
    pub fn connect(
        address: &str,
        token: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let client = HttpSecretClient::new(address, token)?;
        Ok(Self::new(Arc::new(client), path))
    }
}

#[async_trait]
impl Source for SecretStoreSource {
    async fn new_session(&self) -> Result<Arc<dyn Session>, SourceError> {
        Ok(Arc::new(SecretStoreSession::new(
            Arc::clone(&self.client),
            self.path.clone(),
        )))
    }
}

/// Per-pass session against one secret path.
pub struct SecretStoreSession {
    client: Arc<dyn SecretClient>,
    path: String,
    state: Mutex<SessionState>,
    close: CloseSignal,
    /// Watches handed out during the current pass; fixed by `retrieve_end`.
    registered_watches: AtomicUsize,
}

#[derive(Default)]
struct SessionState {
    /// The secret is fetched at most once per session.
    secret: Option<Arc<Secret>>,
    /// Terminal outcome of the shared renewal watcher, if one was built.
    outcome: Option<FanoutCell<Result<(), WatchError>>>,
    /// Background renewal consumer, joined on close.
    tasks: Vec<JoinHandle<()>>,
}

impl SecretStoreSession {
    pub fn new(client: Arc<dyn SecretClient>, path: String) -> Self {
        Self {
            client,
            path,
            state: Mutex::new(SessionState::default()),
            close: CloseSignal::new(),
            registered_watches: AtomicUsize::new(0),
        }
    }

    async fn fetch_once(&self, state: &mut SessionState) -> Result<Arc<Secret>, SourceError> {
        if let Some(secret) = &state.secret {
            return Ok(Arc::clone(secret));
        }

        let secret = self
            .client
            .read(&self.path)
            .await?
            .ok_or_else(|| SourceError::NotFound(format!("no secret found at {:?}", self.path)))?;

        if !secret.data.is_object() || secret.data.as_object().is_some_and(|m| m.is_empty()) {
            return Err(SourceError::NotFound(format!(
                "no data at {:?}, warnings: {:?}",
                self.path, secret.warnings
            )));
        }

        let secret = Arc::new(secret);
        state.secret = Some(Arc::clone(&secret));
        Ok(secret)
    }

    /// Build (or join) the shared watcher for this session's secret.
    ///
    /// Renewable secrets get one background renewal consumer whose terminal
    /// outcome fans out to every waiter. Anything else gets a best-effort
    /// watch that blocks until the session closes; periodic re-polling of
    /// non-renewable leases is future work.
    async fn shared_watch(
        &self,
        state: &mut SessionState,
        secret: &Arc<Secret>,
    ) -> Result<WatchFuture, SourceError> {
        if !secret.renewable {
            let close = self.close.clone();
            return Ok(Box::pin(async move {
                close.wait().await;
                Err(WatchError::SessionClosed)
            }));
        }

        // First and every later watcher share the same terminal outcome.
        let cell = match &state.outcome {
            Some(cell) => cell.clone(),
            None => {
                let stream = self.client.renew(secret, self.close.clone()).await?;
                let cell = FanoutCell::new();
                state.tasks.push(spawn_renewal_consumer(
                    stream,
                    cell.clone(),
                    self.close.clone(),
                    self.path.clone(),
                ));
                state.outcome = Some(cell.clone());
                cell
            }
        };
        Ok(Box::pin(async move { cell.wait().await }))
    }
}

/// Consume renewal events until a terminal outcome, then broadcast it.
fn spawn_renewal_consumer(
    stream: RenewalStream,
    cell: FanoutCell<Result<(), WatchError>>,
    close: CloseSignal,
    path: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let RenewalStream {
            mut renewals,
            mut done,
            driver,
        } = stream;

        loop {
            tokio::select! {
                Some(renewal) = renewals.recv() => {
                    debug!(path = %path, lease_duration = renewal.lease_duration, "secret renewed");
                }
                result = &mut done => {
                    // Renewal stopped; error or not, the host needs to
                    // refetch the configuration.
                    let outcome = match result {
                        Ok(Some(message)) => Err(WatchError::Failed(message)),
                        Ok(None) | Err(_) => Ok(()),
                    };
                    cell.set(outcome);
                    break;
                }
                _ = close.wait() => {
                    cell.set(Err(WatchError::SessionClosed));
                    break;
                }
            }
        }

        let _ = driver.await;
    })
}

#[async_trait]
impl Session for SecretStoreSession {
    async fn retrieve(
        &self,
        selector: &str,
        _params: Option<&Value>,
    ) -> Result<Retrieved, SourceError> {
        let mut state = self.state.lock().await;
        let secret = self.fetch_once(&mut state).await?;

        // A selector miss yields null rather than an error. Known caveat:
        // the resolved document then carries a null where a value was
        // expected, surfacing the problem at config validation instead.
        let value = traverse_to_key(&secret.data, selector);
        if value.is_null() {
            debug!(path = %self.path, selector = %selector, "selector matched no key in secret data");
        }

        let watch = self.shared_watch(&mut state, &secret).await?;
        self.registered_watches.fetch_add(1, Ordering::SeqCst);
        Ok(Retrieved::watched(value, watch))
    }

    async fn retrieve_end(&self) -> Result<(), SourceError> {
        // The set of watchers for this pass is final from here on.
        debug!(
            path = %self.path,
            watchers = self.registered_watches.load(Ordering::SeqCst),
            "retrieve batch ended"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.close.fire();
        let tasks = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Walk the secret data by dotted selector segments.
fn traverse_to_key(data: &Value, selector: &str) -> Value {
    let mut current = data;
    for segment in selector.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    /// In-memory client with a scripted secret and hand-driven renewals.
    struct FakeClient {
        secret: Option<Secret>,
        reads: AtomicUsize,
        renewals_started: AtomicUsize,
    }

    impl FakeClient {
        fn with_secret(secret: Secret) -> Self {
            Self {
                secret: Some(secret),
                reads: AtomicUsize::new(0),
                renewals_started: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                secret: None,
                reads: AtomicUsize::new(0),
                renewals_started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecretClient for FakeClient {
        async fn read(&self, _path: &str) -> Result<Option<Secret>, SourceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.secret.clone())
        }

        async fn renew(
            &self,
            _secret: &Secret,
            stop: CloseSignal,
        ) -> Result<RenewalStream, SourceError> {
            self.renewals_started.fetch_add(1, Ordering::SeqCst);
            let (_renewal_tx, renewal_rx) = mpsc::channel(1);
            let (done_tx, done_rx) = oneshot::channel::<Option<String>>();
            let driver = tokio::spawn(async move {
                stop.wait().await;
                let _ = done_tx.send(None);
            });
            Ok(RenewalStream {
                renewals: renewal_rx,
                done: done_rx,
                driver,
            })
        }
    }

    fn renewable_secret() -> Secret {
        Secret {
            data: json!({"data": {"foo": "world", "bar": 7}}),
            renewable: true,
            lease_id: "lease-1".into(),
            lease_duration: 300,
            warnings: vec![],
        }
    }

    fn static_secret() -> Secret {
        Secret {
            data: json!({"foo": "world"}),
            renewable: false,
            ..Secret::default()
        }
    }

    #[tokio::test]
    async fn retrieve_extracts_key_by_selector() {
        let session = SecretStoreSession::new(
            Arc::new(FakeClient::with_secret(renewable_secret())),
            "secret/data/hello".into(),
        );
        let retrieved = session.retrieve("data.foo", None).await.unwrap();
        assert_eq!(retrieved.value, json!("world"));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn secret_is_fetched_once_for_multiple_selectors() {
        let client = Arc::new(FakeClient::with_secret(renewable_secret()));
        let session =
            SecretStoreSession::new(Arc::clone(&client) as Arc<dyn SecretClient>, "p".into());

        session.retrieve("data.foo", None).await.unwrap();
        session.retrieve("data.bar", None).await.unwrap();
        assert_eq!(client.reads.load(Ordering::SeqCst), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_secret_is_hard_error_naming_path() {
        let session =
            SecretStoreSession::new(Arc::new(FakeClient::empty()), "secret/absent".into());
        let err = session.retrieve("data.foo", None).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
        assert!(err.to_string().contains("secret/absent"));
    }

    #[tokio::test]
    async fn secret_without_data_is_hard_error() {
        let secret = Secret {
            data: json!({}),
            ..Secret::default()
        };
        let session =
            SecretStoreSession::new(Arc::new(FakeClient::with_secret(secret)), "p".into());
        let err = session.retrieve("data.foo", None).await.unwrap_err();
        assert!(err.to_string().contains("no data"));
    }

    #[tokio::test]
    async fn selector_miss_yields_null() {
        let session = SecretStoreSession::new(
            Arc::new(FakeClient::with_secret(renewable_secret())),
            "p".into(),
        );
        let retrieved = session.retrieve("data.nope.deep", None).await.unwrap();
        assert_eq!(retrieved.value, Value::Null);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn renewal_task_starts_once_for_many_watchers() {
        let client = Arc::new(FakeClient::with_secret(renewable_secret()));
        let session =
            SecretStoreSession::new(Arc::clone(&client) as Arc<dyn SecretClient>, "p".into());

        session.retrieve("data.foo", None).await.unwrap();
        session.retrieve("data.bar", None).await.unwrap();
        session.retrieve_end().await.unwrap();
        assert_eq!(client.renewals_started.load(Ordering::SeqCst), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn all_watchers_observe_terminal_close_outcome() {
        // Both selectors watch the same renewable secret; closing the
        // session must unblock both, not just the first to subscribe.
        let session = Arc::new(SecretStoreSession::new(
            Arc::new(FakeClient::with_secret(renewable_secret())),
            "p".into(),
        ));

        let first = session.retrieve("data.foo", None).await.unwrap();
        let second = session.retrieve("data.bar", None).await.unwrap();
        session.retrieve_end().await.unwrap();

        let a = tokio::spawn(first.watch);
        let b = tokio::spawn(second.watch);
        tokio::task::yield_now().await;

        session.close().await.unwrap();

        let a = timeout(Duration::from_secs(2), a).await.unwrap().unwrap();
        let b = timeout(Duration::from_secs(2), b).await.unwrap().unwrap();
        assert_eq!(a, Err(WatchError::SessionClosed));
        assert_eq!(b, Err(WatchError::SessionClosed));
    }

    #[tokio::test]
    async fn watcher_subscribing_after_close_still_observes_outcome() {
        let session = Arc::new(SecretStoreSession::new(
            Arc::new(FakeClient::with_secret(renewable_secret())),
            "p".into(),
        ));

        let first = session.retrieve("data.foo", None).await.unwrap();
        let second = session.retrieve("data.bar", None).await.unwrap();
        session.retrieve_end().await.unwrap();

        // First watcher runs up front; the second only polls its watch after
        // the terminal outcome was already published.
        let a = tokio::spawn(first.watch);
        tokio::task::yield_now().await;
        session.close().await.unwrap();
        assert_eq!(a.await.unwrap(), Err(WatchError::SessionClosed));

        let late = timeout(Duration::from_secs(2), second.watch)
            .await
            .expect("late watcher must observe the broadcast outcome");
        assert_eq!(late, Err(WatchError::SessionClosed));
    }

    #[tokio::test]
    async fn non_renewable_watch_blocks_until_close() {
        let session = Arc::new(SecretStoreSession::new(
            Arc::new(FakeClient::with_secret(static_secret())),
            "p".into(),
        ));
        let retrieved = session.retrieve("foo", None).await.unwrap();
        assert_eq!(retrieved.value, json!("world"));

        let watch = tokio::spawn(retrieved.watch);
        tokio::task::yield_now().await;
        session.close().await.unwrap();

        let outcome = timeout(Duration::from_secs(2), watch).await.unwrap().unwrap();
        assert_eq!(outcome, Err(WatchError::SessionClosed));
    }

    #[tokio::test]
    async fn renewal_failure_reaches_watcher() {
        struct FailingRenewClient;

        #[async_trait]
        impl SecretClient for FailingRenewClient {
            async fn read(&self, _path: &str) -> Result<Option<Secret>, SourceError> {
                Ok(Some(renewable_secret()))
            }

            async fn renew(
                &self,
                _secret: &Secret,
                _stop: CloseSignal,
            ) -> Result<RenewalStream, SourceError> {
                let (_renewal_tx, renewal_rx) = mpsc::channel(1);
                let (done_tx, done_rx) = oneshot::channel();
                let driver = tokio::spawn(async move {
                    let _ = done_tx.send(Some("lease expired".to_string()));
                });
                Ok(RenewalStream {
                    renewals: renewal_rx,
                    done: done_rx,
                    driver,
                })
            }
        }

        let session =
            SecretStoreSession::new(Arc::new(FailingRenewClient), "p".into());
        let retrieved = session.retrieve("data.foo", None).await.unwrap();

        let outcome = timeout(Duration::from_secs(2), retrieved.watch)
            .await
            .unwrap();
        assert_eq!(outcome, Err(WatchError::Failed("lease expired".into())));
        session.close().await.unwrap();
    }

    #[test]
    fn traverse_handles_nested_and_missing_keys() {
        let data = json!({"a": {"b": {"c": 42}}});
        assert_eq!(traverse_to_key(&data, "a.b.c"), json!(42));
        assert_eq!(traverse_to_key(&data, "a.b"), json!({"c": 42}));
        assert_eq!(traverse_to_key(&data, "a.x"), Value::Null);
    }
}
