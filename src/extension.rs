//! Extension lifecycle contract.
//!
//! Diagnostic extensions (debug pages, future profiling endpoints) are
//! process-local components with a start/shutdown lifecycle owned by the
//! hosting process. The `verify_lifecycle` helper exercises the contract
//! the way the host does: build, start, build a replacement, shut down the
//! old instance, start the new one.

use async_trait::async_trait;

/// A component with a start/shutdown lifecycle.
///
/// `start` must release anything it claimed (ports, singleton slots) before
/// returning an error. `shutdown` must be safe after a failed start.
#[async_trait]
pub trait Extension: Send {
    async fn start(&mut self) -> anyhow::Result<()>;
    async fn shutdown(&mut self) -> anyhow::Result<()>;
}

/// Drive an extension factory through two start/shutdown generations.
///
/// Catches the common lifecycle bugs: resources not released on shutdown
/// (the second generation fails to start) and shutdown assuming a
/// successful start.
pub async fn verify_lifecycle<E, F>(mut build: F) -> anyhow::Result<()>
where
    E: Extension,
    F: FnMut() -> E,
{
    let mut active: Option<E> = None;

    for _ in 0..2 {
        let mut built = build();

        if let Some(mut previous) = active.take() {
            previous.shutdown().await?;
        }

        built.start().await?;
        active = Some(built);

        // The extension may spawn background tasks; let them run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    if let Some(mut extension) = active {
        extension.shutdown().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingExtension {
        starts: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Extension for CountingExtension {
        async fn start(&mut self) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&mut self) -> anyhow::Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn lifecycle_runs_two_generations() {
        let starts = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));

        verify_lifecycle(|| CountingExtension {
            starts: Arc::clone(&starts),
            shutdowns: Arc::clone(&shutdowns),
        })
        .await
        .unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }
}
