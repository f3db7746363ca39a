//! Narrow client contract for the secret store backend.
//!
//! The session only needs two capabilities from the remote store: read a
//! secret document by path, and keep a renewable secret's lease alive while
//! reporting renewal events. `HttpSecretClient` implements the contract
//! against a Vault-style HTTP API; tests substitute an in-memory fake.

use crate::infra::CloseSignal;
use crate::source::SourceError;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// A secret document read from the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secret {
    /// Arbitrary key/value payload; selectors traverse this.
    #[serde(default)]
    pub data: Value,
    /// Whether the backing lease supports renewal.
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub lease_id: String,
    /// Lease validity in seconds; drives the renewal cadence.
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// One successful lease renewal.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub lease_duration: u64,
}

/// Event stream produced by a background renewal driver.
///
/// `renewals` carries one event per successful renewal; `done` fires once
/// with the terminal outcome (`Some(message)` for a renewal failure, `None`
/// for a natural stop). The driver exits when `done` fires or the stop
/// signal it was given is fired.
#[derive(Debug)]
pub struct RenewalStream {
    pub renewals: mpsc::Receiver<Renewal>,
    pub done: oneshot::Receiver<Option<String>>,
    pub driver: JoinHandle<()>,
}

/// What the secret store session needs from the remote store.
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Read the secret at `path`. A missing path is `Ok(None)`, not an error.
    async fn read(&self, path: &str) -> Result<Option<Secret>, SourceError>;

    /// Start a background renewal driver for a renewable secret. The driver
    /// must honor `stop` and report its terminal outcome through the stream.
    async fn renew(&self, secret: &Secret, stop: CloseSignal)
        -> Result<RenewalStream, SourceError>;
}

/// Minimum pause between renewal attempts, for leases short enough that
/// half the duration rounds to zero.
const MIN_RENEW_WAIT: Duration = Duration::from_secs(1);

/// `SecretClient` against a Vault-style HTTP API.
///
/// Reads go to `GET /v1/<path>`; renewals go to `PUT /v1/sys/leases/renew`.
/// The client holds no connection state and needs no close.
pub struct HttpSecretClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpSecretClient {
    pub fn new(address: &str, token: impl Into<String>) -> Result<Self, SourceError> {
        let base = Url::parse(address)
            .with_context(|| format!("invalid secret store address {address:?}"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base
            .join(&format!("v1/{}", path.trim_start_matches('/')))
            .with_context(|| format!("invalid secret path {path:?}"))
            .map_err(SourceError::from)
    }

    async fn renew_lease(
        http: &reqwest::Client,
        base: &Url,
        token: &str,
        lease_id: &str,
        increment: u64,
    ) -> anyhow::Result<u64> {
        let endpoint = base.join("v1/sys/leases/renew")?;
        let response = http
            .put(endpoint)
            .header("X-Vault-Token", token)
            .json(&json!({ "lease_id": lease_id, "increment": increment }))
            .send()
            .await
            .context("lease renewal request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "lease renewal returned status {}",
                response.status()
            ));
        }

        let renewed: Secret = response
            .json()
            .await
            .context("malformed lease renewal response")?;
        Ok(renewed.lease_duration)
    }
}

#[async_trait]
impl SecretClient for HttpSecretClient {
    async fn read(&self, path: &str) -> Result<Option<Secret>, SourceError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("failed to read secret at {path:?}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SourceError::Backend(anyhow!(
                "secret store returned status {} for {path:?}",
                response.status()
            )));
        }

        let secret: Secret = response
            .json()
            .await
            .with_context(|| format!("malformed secret response for {path:?}"))?;
        Ok(Some(secret))
    }

    async fn renew(
        &self,
        secret: &Secret,
        stop: CloseSignal,
    ) -> Result<RenewalStream, SourceError> {
        if secret.lease_id.is_empty() {
            return Err(SourceError::Backend(anyhow!(
                "secret is renewable but has no lease id"
            )));
        }

        let (renewal_tx, renewal_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        let http = self.http.clone();
        let base = self.base.clone();
        let token = self.token.clone();
        let lease_id = secret.lease_id.clone();
        let mut lease_duration = secret.lease_duration;

        let driver = tokio::spawn(async move {
            loop {
                // Renew at half the lease validity, like a heartbeat.
                let wait = Duration::from_secs(lease_duration / 2).max(MIN_RENEW_WAIT);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop.wait() => {
                        let _ = done_tx.send(None);
                        return;
                    }
                }

                match Self::renew_lease(&http, &base, &token, &lease_id, lease_duration).await {
                    Ok(duration) => {
                        lease_duration = duration;
                        debug!(lease_id = %lease_id, lease_duration, "lease renewed");
                        if renewal_tx.send(Renewal { lease_duration }).await.is_err() {
                            // Listener is gone, stop renewing.
                            let _ = done_tx.send(None);
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = done_tx.send(Some(err.to_string()));
                        return;
                    }
                }
            }
        });

        Ok(RenewalStream {
            renewals: renewal_rx,
            done: done_rx,
            driver,
        })
    }
}
