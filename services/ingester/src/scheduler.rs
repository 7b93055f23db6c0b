//! Interval scheduler driving one ingestion cycle at a time.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::pipeline::SharedPipeline;

pub struct Scheduler {
    pipeline: SharedPipeline,
    interval: Duration,
}

impl Scheduler {
    pub fn new(pipeline: SharedPipeline, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Run cycles until `shutdown` fires.
    ///
    /// A cycle starts every `interval` measured from the previous start; a
    /// cycle that overruns delays the next one instead of overlapping it.
    /// Shutdown during a cycle abandons the in-flight fetches; stations
    /// already published stay as they are.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            let started = Instant::now();

            tokio::select! {
                _ = shutdown.recv() => {
                    warn!("Shutdown requested mid-cycle, abandoning in-flight fetches");
                    break;
                }
                report = self.pipeline.run_once(Utc::now()) => {
                    if report.failed > 0 {
                        info!(
                            failed = report.failed,
                            failures = ?report.failures_by_kind,
                            "Cycle finished with station failures"
                        );
                    }
                }
            }

            let wait = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Ok(())
    }
}
