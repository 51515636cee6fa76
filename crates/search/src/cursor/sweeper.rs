//! Background removal of expired paging state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::manager::NextUrlManager;
use crate::error::ConfigurationError;

/// Periodically runs [`NextUrlManager::sweep_expired`].
pub struct ExpirySweeper {
    manager: Arc<NextUrlManager>,

    /// Time between sweeps.
    interval: Duration,

    /// Shutdown channel.
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ExpirySweeper {
    /// Creates a sweeper using the manager's configured interval.
    pub fn new(manager: Arc<NextUrlManager>) -> Self {
        let interval = manager.config().sweep_interval;
        Self {
            manager,
            interval,
            shutdown_tx: None,
        }
    }

    /// Overrides the sweep interval, which must not be zero.
    pub fn with_interval(mut self, interval: Duration) -> Result<Self, ConfigurationError> {
        if interval.is_zero() {
            return Err(ConfigurationError::InvalidPagingConfig {
                errors: vec!["Sweep interval cannot be 0".to_string()],
            });
        }
        self.interval = interval;
        Ok(self)
    }

    /// Returns true while the background task is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Starts background sweeping.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::channel(1);
        self.shutdown_tx = Some(tx);

        let manager = Arc::clone(&self.manager);
        let interval = self.interval;
        tokio::spawn(async move {
            Self::sweep_loop(rx, manager, interval).await;
        })
    }

    /// Stops the sweeper.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Background sweep loop.
    async fn sweep_loop(
        mut shutdown_rx: mpsc::Receiver<()>,
        manager: Arc<NextUrlManager>,
        interval: Duration,
    ) {
        let mut interval = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Expiry sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = manager.sweep_expired().await {
                        warn!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
