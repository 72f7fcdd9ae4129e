//! Explicit object-graph construction and connect/ready/shutdown event
//! propagation, replacing the original system's dynamic module registry
//! with a hand-wired `Vec<Arc<dyn LifecycleHandler>>` built in `main.rs`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("connect handler failed: {0} (key336)")]
    ConnectFailed(String),
    #[error("connect phase failed (key337)")]
    ConnectPhaseFailed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A component participating in printer startup/shutdown. Every method has
/// a no-op default so a handler only needs to implement the phases it
/// cares about.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Runs during the connect phase, in registration order. The first
    /// error aborts the remaining handlers.
    async fn on_connect(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Runs after every handler's `on_connect` has succeeded.
    async fn on_ready(&self) {}

    /// Runs during shutdown. A failing handler is logged and does not
    /// prevent the remaining handlers from running (see `shutdown`).
    async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
        Ok(())
    }
}

/// What a single run of the lifecycle ended with; used by the restart loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exit,
    ErrorExit,
    Restart,
}

/// Cooperative restart request: any component can call `request()`; `run`
/// wakes up and re-enters the loop instead of exiting.
#[derive(Clone, Default)]
pub struct RestartHandle(Arc<tokio::sync::Notify>);

impl RestartHandle {
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    pub fn request(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await;
    }
}

pub struct PrinterLifecycle {
    handlers: Vec<Arc<dyn LifecycleHandler>>,
    printer_index: String,
}

impl PrinterLifecycle {
    pub fn new(printer_index: impl Into<String>) -> Self {
        Self { handlers: Vec::new(), printer_index: printer_index.into() }
    }

    /// Registers a handler. Callers should register in dependency order:
    /// checkpoint store and print stats before the executor, the executor
    /// before the pause/resume controller, the web layer last.
    pub fn register(&mut self, handler: Arc<dyn LifecycleHandler>) {
        self.handlers.push(handler);
    }

    pub async fn connect(&self) -> Result<(), LifecycleError> {
        for handler in &self.handlers {
            handler.on_connect().await.map_err(|e| LifecycleError::ConnectFailed(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn ready(&self) {
        for handler in &self.handlers {
            handler.on_ready().await;
        }
    }

    /// Runs every handler's `on_shutdown`. A failing handler is logged and
    /// skipped so the remaining handlers still get a chance to clean up.
    pub async fn shutdown(&self, reason: &str) {
        for handler in &self.handlers {
            if let Err(e) = handler.on_shutdown(reason).await {
                tracing::error!("shutdown handler failed (continuing): {}", e);
            }
        }
    }

    /// Writes the liveness token file announced at startup.
    pub async fn write_liveness_token(&self, path: &std::path::Path) -> Result<(), LifecycleError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, b"0").await?;
        Ok(())
    }

    pub fn printer_index(&self) -> &str {
        &self.printer_index
    }

    /// The restart loop: builds a fresh object graph via `builder`, runs
    /// `connect` then `ready`, then waits for either Ctrl+C or a restart
    /// request. On a requested restart, shuts the current graph down and
    /// loops to build a fresh one — matching the original system's policy
    /// of constructing a fresh reactor+Printer every restart iteration.
    pub async fn run<B, Fut>(mut builder: B, restart: RestartHandle, liveness_path: std::path::PathBuf) -> ExitOutcome
    where
        B: FnMut() -> Fut,
        Fut: Future<Output = Result<PrinterLifecycle, LifecycleError>>,
    {
        loop {
            let lifecycle = match builder().await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("failed to construct printer object graph: {}", e);
                    return ExitOutcome::ErrorExit;
                }
            };

            if let Err(e) = lifecycle.connect().await {
                tracing::error!("connect phase failed: {}", e);
                lifecycle.shutdown("connect_failed").await;
                return ExitOutcome::ErrorExit;
            }

            if let Err(e) = lifecycle.write_liveness_token(&liveness_path).await {
                tracing::warn!("failed to write liveness token: {}", e);
            }

            lifecycle.ready().await;
            tracing::info!("printer lifecycle ready (index {})", lifecycle.printer_index());

            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            tracing::info!("shutdown signal received");
                            lifecycle.shutdown("exit").await;
                            return ExitOutcome::Exit;
                        }
                        Err(e) => {
                            tracing::warn!("signal handler error: {}", e);
                            lifecycle.shutdown("error").await;
                            return ExitOutcome::ErrorExit;
                        }
                    }
                }
                _ = restart.notified() => {
                    tracing::info!("restart requested");
                    lifecycle.shutdown("restart").await;
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        connects: Arc<AtomicUsize>,
        readies: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
        fail_connect: bool,
    }

    #[async_trait]
    impl LifecycleHandler for CountingHandler {
        async fn on_connect(&self) -> Result<(), LifecycleError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(LifecycleError::ConnectFailed("boom".to_string()));
            }
            Ok(())
        }
        async fn on_ready(&self) {
            self.readies.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_runs_handlers_in_order_and_ready_follows() {
        let connects = Arc::new(AtomicUsize::new(0));
        let readies = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = PrinterLifecycle::new("1");
        lifecycle.register(Arc::new(CountingHandler {
            connects: connects.clone(),
            readies: readies.clone(),
            shutdowns: shutdowns.clone(),
            fail_connect: false,
        }));
        lifecycle.register(Arc::new(CountingHandler {
            connects: connects.clone(),
            readies: readies.clone(),
            shutdowns: shutdowns.clone(),
            fail_connect: false,
        }));
        lifecycle.connect().await.unwrap();
        lifecycle.ready().await;
        lifecycle.shutdown("test").await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(readies.load(Ordering::SeqCst), 2);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_connect_aborts_remaining_handlers() {
        let connects = Arc::new(AtomicUsize::new(0));
        let readies = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = PrinterLifecycle::new("1");
        lifecycle.register(Arc::new(CountingHandler {
            connects: connects.clone(),
            readies: readies.clone(),
            shutdowns: shutdowns.clone(),
            fail_connect: true,
        }));
        lifecycle.register(Arc::new(CountingHandler {
            connects: connects.clone(),
            readies: readies.clone(),
            shutdowns: shutdowns.clone(),
            fail_connect: false,
        }));
        assert!(lifecycle.connect().await.is_err());
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    struct FailingShutdownHandler;

    #[async_trait]
    impl LifecycleHandler for FailingShutdownHandler {
        async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
            Err(LifecycleError::ConnectPhaseFailed)
        }
    }

    struct MarkerHandler {
        ran_after: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LifecycleHandler for MarkerHandler {
        async fn on_shutdown(&self, _reason: &str) -> Result<(), LifecycleError> {
            self.ran_after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_shutdown_handler_does_not_block_the_rest() {
        let ran_after = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = PrinterLifecycle::new("1");
        lifecycle.register(Arc::new(FailingShutdownHandler));
        lifecycle.register(Arc::new(MarkerHandler { ran_after: ran_after.clone() }));
        lifecycle.shutdown("test").await;
        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn liveness_token_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer1_stat");
        let lifecycle = PrinterLifecycle::new("1");
        lifecycle.write_liveness_token(&path).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "0");
    }
}
