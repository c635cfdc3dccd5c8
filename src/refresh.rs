//! Background cache warm-up
//!
//! At startup a proxy can preload a list of items (timezone names) so the
//! first real requests are cache hits. The walk runs on its own task, spaced
//! out to stay under the upstream's rate limits, and can be stopped through
//! its handle at any point.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::Adapter;
use crate::config::PreloadConfig;
use crate::proxy::ResilientProxy;

/// Items between longer pauses
const BATCH_SIZE: usize = 10;

/// Outcome of a warm-up run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    /// Items now in the cache
    pub warmed: usize,
    /// Items the adapter rejected or the upstream failed on
    pub failed: usize,
    /// Whether the run was stopped before the end of the list
    pub cancelled: bool,
}

/// Pause after item `index` of `total`
///
/// # Arguments
/// * `index` - Zero-based position of the item just fetched
/// * `total` - Number of items in the list
/// * `base` - Configured spacing
///
/// # Returns
/// * `None` after the last item
/// * `Some(base * 2)` after every 10th item
/// * `Some(base)` otherwise
pub fn delay_after(index: usize, total: usize, base: Duration) -> Option<Duration> {
    if index + 1 >= total {
        None
    } else if (index + 1) % BATCH_SIZE == 0 {
        Some(base.saturating_mul(2))
    } else {
        Some(base)
    }
}

/// Handle for controlling the background warm-up
///
/// Dropping the handle stops the walk at its next step.
pub struct WarmupHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<WarmupReport>,
}

impl WarmupHandle {
    /// Spawns the warm-up task
    ///
    /// # Arguments
    /// * `proxy` - Proxy whose cache is warmed
    /// * `adapter` - Builds the request for each item
    /// * `config` - Items and spacing
    pub fn spawn(proxy: ResilientProxy, adapter: Arc<dyn Adapter>, config: PreloadConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut report = WarmupReport::default();
            let total = config.items.len();
            if total == 0 {
                return report;
            }
            info!(proxy = %proxy.name(), items = total, "Preloading cache");

            for (index, item) in config.items.iter().enumerate() {
                match adapter.preload_request(item) {
                    None => {
                        warn!(proxy = %proxy.name(), item = %item, "Preload not supported for item");
                        report.failed += 1;
                    }
                    Some(request) => {
                        tokio::select! {
                            result = proxy.fetch_through(&request.key, &request.spec, false) => {
                                match result {
                                    Ok(_) => {
                                        debug!(proxy = %proxy.name(), item = %item, "Preloaded");
                                        report.warmed += 1;
                                    }
                                    Err(e) => {
                                        warn!(
                                            proxy = %proxy.name(),
                                            item = %item,
                                            error = %e,
                                            "Preload failed"
                                        );
                                        report.failed += 1;
                                    }
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                report.cancelled = true;
                                break;
                            }
                        }
                    }
                }

                if let Some(pause) = delay_after(index, total, config.delay) {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown_rx.recv() => {
                            report.cancelled = true;
                            break;
                        }
                    }
                }
            }

            info!(
                proxy = %proxy.name(),
                warmed = report.warmed,
                failed = report.failed,
                cancelled = report.cancelled,
                "Preload finished"
            );
            report
        });

        Self { shutdown_tx, task }
    }

    /// Whether the walk has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the walk to end on its own
    pub async fn finished(self) -> WarmupReport {
        let Self { shutdown_tx, task } = self;
        let report = task.await.unwrap_or_default();
        drop(shutdown_tx);
        report
    }

    /// Stops the walk and returns what it achieved
    pub async fn shutdown(self) -> WarmupReport {
        let _ = self.shutdown_tx.send(()).await;
        self.task.await.unwrap_or_default()
    }
}
