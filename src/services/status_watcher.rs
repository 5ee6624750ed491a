//! Status watcher.
//!
//! Background tasks that keep the derived build status moving:
//! - an event loop that recomputes the status of every build named by a
//!   build event and logs transitions;
//! - a periodic sweep that announces builds whose batch timeout elapsed and
//!   resumes finalizations interrupted by a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::BuildStatus;
use crate::services::build_pipeline::BuildPipeline;

/// Configuration for the status watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// How often to look for expired builds
    pub sweep_interval: Duration,
    /// Time a build may wait for its next batch
    pub expiration_timeout: Duration,
}

/// Last known status per build, used to log only real transitions.
///
/// Only builds still on their way to a conclusion are kept. A concluded build
/// that changes again (a validation verdict) is reported without a previous
/// status.
#[derive(Debug, Default)]
pub struct StatusTracker {
    known: HashMap<Uuid, BuildStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `build_id` and return the previous status when it
    /// changed. Builds that concluded or failed are forgotten.
    pub fn observe(
        &mut self,
        build_id: Uuid,
        status: BuildStatus,
    ) -> Option<(Option<BuildStatus>, BuildStatus)> {
        let previous = if status.is_terminal_failure() || status.is_concluded() {
            self.known.remove(&build_id)
        } else {
            self.known.insert(build_id, status)
        };

        (previous != Some(status)).then_some((previous, status))
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Window of last activity times the next sweep must examine.
///
/// Builds idle since `to` or earlier have exceeded the timeout. The window
/// starts where the previous sweep ended, or one extra timeout back on the
/// first sweep so builds that expired during downtime are announced.
pub fn sweep_window(
    previous_to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
    let to = now - timeout;
    let from = previous_to.unwrap_or(to - timeout).min(to);
    (from, to)
}

/// Start the status watcher background tasks.
pub fn start_status_watcher(pipeline: Arc<BuildPipeline>, config: WatcherConfig) {
    let events = pipeline.clone();
    tokio::spawn(async move {
        run_event_loop(events).await;
    });

    tokio::spawn(async move {
        info!(
            "Starting expiration sweep (timeout: {} seconds, interval: {} seconds)",
            config.expiration_timeout.as_secs(),
            config.sweep_interval.as_secs()
        );

        let mut ticker = interval(config.sweep_interval);
        let mut previous_to = None;

        loop {
            ticker.tick().await;

            let now = Utc::now();
            let (from, to) = sweep_window(previous_to, now, config.expiration_timeout);
            match pipeline.sweep_expired(from, to, now).await {
                Ok(expired) => {
                    previous_to = Some(to);
                    if !expired.is_empty() {
                        info!("Expiration sweep: {} builds expired", expired.len());
                    }
                }
                Err(e) => error!("Expiration sweep error: {}", e),
            }

            let settled = chrono::Duration::from_std(config.sweep_interval)
                .map(|interval| now - interval)
                .unwrap_or(now);
            match pipeline.resume_stalled(settled).await {
                Ok(0) => {}
                Ok(count) => info!("Resumed finalization of {} builds", count),
                Err(e) => error!("Failed to resume stalled builds: {}", e),
            }
        }
    });
}

async fn run_event_loop(pipeline: Arc<BuildPipeline>) {
    let mut receiver = pipeline.broadcaster().subscribe();
    let mut tracker = StatusTracker::new();

    loop {
        match receiver.recv().await {
            Ok(message) => {
                let build_id = message.event.build_id();
                match pipeline.status_of(build_id).await {
                    Ok(status) => {
                        if let Some((previous, status)) = tracker.observe(build_id, status) {
                            match previous {
                                Some(previous) => {
                                    info!("Build {} status {} -> {}", build_id, previous, status)
                                }
                                None => info!("Build {} status {}", build_id, status),
                            }
                        }
                    }
                    Err(e) => warn!("Failed to recompute status of build {}: {}", build_id, e),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Status watcher lagged, {} build events skipped", skipped);
            }
            Err(RecvError::Closed) => {
                info!("Build event channel closed, status watcher stopping");
                break;
            }
        }
    }
}
