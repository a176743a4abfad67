use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pressroom_channels::Transport;
use pressroom_core::config::{DispatchConfig, SchedulerConfig};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::DispatchQueue,
    publish::PublicationTransitioner,
    resolver::DueItemResolver,
    store::RecordStore,
    types::{JobOutcome, TickReport},
};

/// One tick's worth of work: the content pass, then the notification pass.
///
/// Holds no loop state of its own, so it can be driven by [`Scheduler`] or
/// run once from the CLI.
pub struct SchedulerEngine {
    resolver: DueItemResolver,
    transitioner: PublicationTransitioner,
    queue: DispatchQueue,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn Transport>,
        dispatch: &DispatchConfig,
    ) -> Self {
        Self {
            resolver: DueItemResolver::new(Arc::clone(&store), dispatch.effective_page_size()),
            transitioner: PublicationTransitioner::new(Arc::clone(&store)),
            queue: DispatchQueue::new(store, transport, dispatch),
        }
    }

    /// Run one tick against the current time.
    pub async fn run_tick(&self, shutdown: Option<&watch::Receiver<bool>>) -> TickReport {
        self.run_tick_at(Utc::now(), shutdown).await
    }

    /// Run one tick as if the clock read `now`.
    ///
    /// Errors never escape: each pass logs its own failures into the report.
    /// When `shutdown` flips to `true` the tick finishes the step it is in
    /// (the content pass, or the notification job currently being delivered)
    /// and skips the rest.
    pub async fn run_tick_at(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> TickReport {
        let mut report = TickReport::default();

        self.content_pass(now, &mut report);

        if stop_requested(shutdown) {
            report.interrupted = true;
            return report;
        }

        self.notification_pass(now, &mut report, shutdown).await;
        report
    }

    fn content_pass(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let due = match self.resolver.due_content(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-content query failed; content skipped this tick");
                report.resolver_errors += 1;
                return;
            }
        };
        report.content_due = saturating_count(due.len());
        if due.is_empty() {
            return;
        }

        info!(count = due.len(), "publishing scheduled content");
        let summary = self.transitioner.publish_all(&due, now);
        report.published = summary.published;
        report.already_published = summary.already_published;
        report.publish_failed = summary.failed;
    }

    async fn notification_pass(
        &self,
        now: DateTime<Utc>,
        report: &mut TickReport,
        shutdown: Option<&watch::Receiver<bool>>,
    ) {
        let due = match self.resolver.due_notifications(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-notification query failed; notifications skipped this tick");
                report.resolver_errors += 1;
                return;
            }
        };
        report.notifications_due = saturating_count(due.len());
        if due.is_empty() {
            return;
        }

        info!(count = due.len(), "dispatching scheduled notifications");
        for job in &due {
            if stop_requested(shutdown) {
                warn!(job_id = %job.id, "shutdown requested; leaving remaining notifications for later");
                report.interrupted = true;
                return;
            }

            match self.queue.dispatch(job).await {
                JobOutcome::Sent(r) => {
                    report.notifications_sent += 1;
                    report.recipients_delivered += r.delivered;
                    report.recipients_failed += r.failed;
                }
                JobOutcome::NoRecipients => report.notifications_skipped += 1,
                JobOutcome::Unsettled(r) => {
                    report.notifications_unsettled += 1;
                    report.recipients_delivered += r.delivered;
                    report.recipients_failed += r.failed;
                }
            }
        }
    }
}

fn saturating_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn stop_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

/// Process-wide owner of the polling loop.
///
/// Construct one per process, call [`start`](Self::start) during startup and
/// [`stop`](Self::stop) during shutdown. Ticks never overlap: a single
/// background task runs them back to back, and `ticking` only reports which
/// phase it is in.
pub struct Scheduler {
    engine: Arc<SchedulerEngine>,
    poll_interval: Duration,
    ticking: Arc<AtomicBool>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(engine: SchedulerEngine, config: &SchedulerConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            poll_interval: config.poll_interval(),
            ticking: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// True while a tick is executing.
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Spawn the polling loop. The first tick runs immediately.
    ///
    /// No-op when already running. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            info!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let ticking = Arc::clone(&self.ticking);
        let period = self.poll_interval;

        self.handle = Some(tokio::spawn(run_loop(engine, period, ticking, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        info!(interval_secs = period.as_secs(), "scheduler started");
    }

    /// Stop the loop and wait for the in-flight step to finish.
    ///
    /// No-op when not running. No tick is started after this returns.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            info!("scheduler not running");
            return;
        };

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Err(e) = handle.await {
            error!("scheduler task ended abnormally: {e}");
        }
        self.ticking.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    /// Signal the loop so a scheduler dropped without `stop()` does not leave
    /// it running detached. The in-flight step still runs to completion.
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

/// Main loop. Ticks every `period` until `shutdown` broadcasts `true`.
async fn run_loop(
    engine: Arc<SchedulerEngine>,
    period: Duration,
    ticking: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("scheduler loop started");

    let mut interval = tokio::time::interval(period);
    // A long dispatch pushes the next tick back instead of bunching ticks up.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                ticking.store(true, Ordering::SeqCst);
                let report = engine.run_tick(Some(&shutdown)).await;
                ticking.store(false, Ordering::SeqCst);
                log_tick(&report);
            }
        }
    }

    info!("scheduler loop shutting down");
}

fn log_tick(report: &TickReport) {
    if report.is_idle() {
        debug!("tick: nothing due");
        return;
    }
    info!(
        content_due = report.content_due,
        published = report.published,
        already_published = report.already_published,
        publish_failed = report.publish_failed,
        notifications_due = report.notifications_due,
        sent = report.notifications_sent,
        skipped = report.notifications_skipped,
        unsettled = report.notifications_unsettled,
        delivered = report.recipients_delivered,
        failed = report.recipients_failed,
        resolver_errors = report.resolver_errors,
        interrupted = report.interrupted,
        "tick complete"
    );
}
