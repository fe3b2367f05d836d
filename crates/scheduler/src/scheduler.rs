//! The ticker: scans due jobs and fires them as system-origin inbound
//! messages through the bus.
//!
//! Firing goes through the bounded inbound queue, so a saturated loop
//! applies backpressure to the scheduler too. A failed publish is
//! recorded as an error run and backs the job off; the ticker itself
//! never aborts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use janus_bus::MessageBus;
use janus_domain::{InboundMessage, Result};

use crate::job::backoff_satisfied;
use crate::store::CronStore;

/// Scan cadence.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

pub struct Scheduler {
    /// `None` when the relational store failed to open: scheduling is
    /// disabled but the runtime keeps working.
    store: Option<CronStore>,
    bus: Arc<MessageBus>,
}

impl Scheduler {
    pub fn new(store: Option<CronStore>, bus: Arc<MessageBus>) -> Self {
        if store.is_none() {
            tracing::warn!("durable scheduling disabled (no database)");
        }
        Self { store, bus }
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&CronStore> {
        self.store.as_ref()
    }

    /// Run until the token fires. Stopping is idempotent: a cancelled
    /// scheduler just returns.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.store.is_none() {
            return;
        }
        tracing::info!("scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    if let Err(e) = self.tick(Utc::now(), &cancel).await {
                        if e.is_cancelled() {
                            return;
                        }
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// One scan: fire every due job whose backoff window has passed.
    /// Returns the number of jobs fired.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut fired = 0;
        for job in store.due_jobs(now).await? {
            if !backoff_satisfied(&job, now) {
                tracing::debug!(job = %job.name, errors = job.consecutive_errors, "job in backoff window");
                continue;
            }

            let started = Utc::now();
            let message = InboundMessage::system(
                format!("cron:{}", job.id),
                format!("[Cron job: {}]\n\n{}", job.name, job.task),
            );

            let publish_result = self.bus.publish_inbound(message, cancel).await;
            let duration = (Utc::now() - started)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            match publish_result {
                Ok(()) => {
                    tracing::info!(job = %job.name, "cron job fired");
                    store.record_result(&job, started, duration, None).await?;
                    fired += 1;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(job = %job.name, error = %e, "cron job failed to fire");
                    store
                        .record_result(&job, started, duration, Some(e.to_string()))
                        .await?;
                }
            }
        }
        Ok(fired)
    }
}
