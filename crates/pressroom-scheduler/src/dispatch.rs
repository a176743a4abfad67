use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pressroom_channels::Transport;
use pressroom_core::config::DispatchConfig;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    store::RecordStore,
    types::{DeliveryOutcome, DeliveryStatus, DispatchReport, JobOutcome, NotificationJob},
};

/// Delivers one notification job at a time to all of its recipients, paced to
/// stay under the provider's throttle, then writes the terminal status.
///
/// Pacing for a job with R recipients and batch size B:
/// - recipients go out in list order, `ceil(R / B)` batches;
/// - `recipient_delay` between consecutive recipients of a batch (none after
///   a batch's last recipient);
/// - `batch_delay` between batches (none after the last), i.e.
///   `ceil(R / B) - 1` batch pauses.
///
/// A job is "processed" once every recipient has been attempted once, whatever
/// the individual outcomes; it is never retried as a whole. If the terminal
/// write fails the job stays `Scheduled` and the next tick re-sends it to
/// everyone.
pub struct DispatchQueue {
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    recipient_delay: Duration,
    batch_delay: Duration,
    /// Held for the whole of a job so jobs never interleave on the shared pacing.
    lane: Mutex<()>,
}

impl DispatchQueue {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            transport,
            batch_size: config.effective_batch_size(),
            recipient_delay: config.recipient_delay(),
            batch_delay: config.batch_delay(),
            lane: Mutex::new(()),
        }
    }

    /// Deliver `job` to every recipient and record the result.
    pub async fn dispatch(&self, job: &NotificationJob) -> JobOutcome {
        let _lane = self.lane.lock().await;

        if job.recipients.is_empty() {
            warn!(job_id = %job.id, title = %job.title, "notification has no recipients; skipping");
            return JobOutcome::NoRecipients;
        }

        info!(
            job_id = %job.id,
            title = %job.title,
            recipients = job.recipients.len(),
            batch_size = self.batch_size,
            transport = %self.transport.name(),
            "dispatching notification"
        );

        let report = self.deliver_all(job).await;

        match self.store.mark_sent(&job.id, Utc::now(), report.counts()) {
            Ok(true) => {
                info!(
                    job_id = %job.id,
                    delivered = report.delivered,
                    failed = report.failed,
                    total = report.attempted,
                    "notification sent"
                );
                JobOutcome::Sent(report)
            }
            Ok(false) => {
                warn!(job_id = %job.id, "notification row vanished before it could be marked sent");
                JobOutcome::Unsettled(report)
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    error = %e,
                    delivered = report.delivered,
                    failed = report.failed,
                    "failed to mark notification sent; it will be re-dispatched next tick"
                );
                JobOutcome::Unsettled(report)
            }
        }
    }

    /// Attempt every recipient once, in order, with batch pacing.
    async fn deliver_all(&self, job: &NotificationJob) -> DispatchReport {
        let mut report = DispatchReport {
            job_id: job.id.clone(),
            ..DispatchReport::default()
        };

        for (batch_index, batch) in job.recipients.chunks(self.batch_size).enumerate() {
            if batch_index > 0 {
                pause(self.batch_delay).await;
                report.inter_batch_pauses += 1;
            }
            report.batches += 1;
            debug!(job_id = %job.id, batch = batch_index + 1, size = batch.len(), "starting batch");

            for (i, recipient) in batch.iter().enumerate() {
                if i > 0 {
                    pause(self.recipient_delay).await;
                }

                let outcome = match self.transport.deliver(recipient, &job.payload).await {
                    Ok(()) => {
                        debug!(job_id = %job.id, to = %recipient.address, "delivered");
                        DeliveryOutcome {
                            address: recipient.address.clone(),
                            status: DeliveryStatus::Delivered,
                            reason: None,
                        }
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, to = %recipient.address, error = %e, "delivery failed");
                        DeliveryOutcome {
                            address: recipient.address.clone(),
                            status: DeliveryStatus::Failed,
                            reason: Some(e.to_string()),
                        }
                    }
                };
                report.record(outcome);
            }
        }

        report
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
