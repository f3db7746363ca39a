//! Debug pages HTTP server extension.
//!
//! Serves everything registered in [`DebugPages`] under `/debug`. The
//! listening port and the page registrations are process-global resources,
//! so the server claims a singleton slot on start; a second running
//! instance in the same process is a start error.

use crate::diag::pages::DebugPages;
use crate::diag::singleton::{self, SingletonGuard, SingletonRegistry};
use crate::extension::Extension;
use crate::infra::CloseSignal;
use anyhow::Context;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

const DEBUG_SERVER_SLOT: &str = "debug-server";

#[derive(Debug, Clone)]
pub struct DebugServerConfig {
    /// Listen address, e.g. `127.0.0.1:55679`. Port 0 picks an ephemeral
    /// port (tests).
    pub endpoint: String,
}

/// The debug pages server.
pub struct DebugServer {
    config: DebugServerConfig,
    pages: DebugPages,
    registry: SingletonRegistry,
    guard: Option<SingletonGuard>,
    shutdown: CloseSignal,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl DebugServer {
    /// Server using the process-wide singleton registry.
    pub fn new(config: DebugServerConfig, pages: DebugPages) -> Self {
        Self::with_registry(config, pages, singleton::global().clone())
    }

    /// Server with an explicit registry; used by tests to stay isolated
    /// from the process-wide instance.
    pub fn with_registry(
        config: DebugServerConfig,
        pages: DebugPages,
        registry: SingletonRegistry,
    ) -> Self {
        Self {
            config,
            pages,
            registry,
            guard: None,
            shutdown: CloseSignal::new(),
            task: None,
            local_addr: None,
        }
    }

    /// The bound address, available after a successful start.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Extension for DebugServer {
    async fn start(&mut self) -> anyhow::Result<()> {
        // Claim the slot first; dropping the guard on any early return
        // releases it again.
        let guard = self.registry.claim(DEBUG_SERVER_SLOT)?;

        // Bind here so a port in use fails the start, not the background
        // task.
        let listener = TcpListener::bind(&self.config.endpoint)
            .await
            .with_context(|| format!("failed to bind debug server to {}", self.config.endpoint))?;
        let addr = listener.local_addr()?;

        let router = self.pages.freeze();
        info!(endpoint = %addr, "starting debug pages server");

        self.shutdown = CloseSignal::new();
        let shutdown = self.shutdown.clone();
        self.task = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait().await });
            if let Err(err) = serve.await {
                error!(error = %err, "debug pages server failed");
            }
        }));

        self.local_addr = Some(addr);
        self.guard = Some(guard);
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.shutdown.fire();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.pages.reopen();
        self.local_addr = None;
        self.guard = None;
        Ok(())
    }
}
