//! Environment variable config source.
//!
//! Resolves `$env:VAR_NAME` references by reading from the process
//! environment. Values never change for the lifetime of the process, so
//! watching is not supported.

use crate::source::{Retrieved, Session, Source, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Config source backed by process environment variables.
#[derive(Debug, Default)]
pub struct EnvSource;

impl EnvSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Source for EnvSource {
    async fn new_session(&self) -> Result<Arc<dyn Session>, SourceError> {
        Ok(Arc::new(EnvSession))
    }
}

struct EnvSession;

#[async_trait]
impl Session for EnvSession {
    async fn retrieve(
        &self,
        selector: &str,
        _params: Option<&Value>,
    ) -> Result<Retrieved, SourceError> {
        match std::env::var(selector) {
            Ok(value) => Ok(Retrieved::unwatched(Value::String(value))),
            Err(_) => Err(SourceError::NotFound(format!(
                "environment variable {selector:?} is not set"
            ))),
        }
    }

    async fn retrieve_end(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}
