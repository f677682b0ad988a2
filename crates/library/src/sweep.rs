//! Periodic removal of expired trash.

use crate::engine::WeakEngine;
use serde::Serialize;
use std::time::Duration;
use tagd_catalog::FileId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Files whose retention expired and that are now gone for good.
    pub deleted: Vec<FileId>,
    /// Expired files that could not be deleted; the next pass retries them.
    pub failed: Vec<FileId>,
}

/// Background task running [`Engine::sweep`](crate::Engine::sweep) every
/// interval until stopped.
///
/// The task only holds a weak reference to the engine, and a pass that has
/// started always runs to completion before cancellation is noticed.
pub struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub(crate) fn spawn(engine: WeakEngine, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                let Some(engine) = engine.upgrade() else {
                    debug!("engine dropped, stopping trash sweep");
                    break;
                };
                let report = engine.sweep().await;
                if !report.deleted.is_empty() || !report.failed.is_empty() {
                    info!(deleted = report.deleted.len(), failed = report.failed.len(), "trash sweep finished");
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "trash sweep scheduled");
        Self { cancel, handle }
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!(error = %err, "trash sweep task did not shut down cleanly");
        }
    }
}
