//! End-to-end ticks against an in-memory SQLite store.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pressroom_channels::{DeliveryError, Transport};
use pressroom_core::config::{DispatchConfig, SchedulerConfig};
use pressroom_core::{Payload, Recipient};
use pressroom_scheduler::{
    ContentRef, DeliveryCounts, NewContent, NewNotification, NotificationJob, NotificationStatus,
    Page, PageCursor, RecordStore, Result, Scheduler, SchedulerEngine, SchedulerError,
    SqliteStore,
};
use tokio::sync::watch;

// ---- test doubles ----

/// Wraps a real store; can fail selected operations and counts due queries.
struct FlakyStore {
    inner: Arc<SqliteStore>,
    fail_content_query: AtomicBool,
    fail_mark_sent: AtomicUsize,
    content_queries: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_content_query: AtomicBool::new(false),
            fail_mark_sent: AtomicUsize::new(0),
            content_queries: AtomicUsize::new(0),
        }
    }
}

impl RecordStore for FlakyStore {
    fn query_due_content(&self, now: DateTime<Utc>, cursor: &PageCursor) -> Result<Page<ContentRef>> {
        self.content_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_content_query.load(Ordering::SeqCst) {
            return Err(SchedulerError::LockPoisoned);
        }
        self.inner.query_due_content(now, cursor)
    }

    fn try_publish(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.inner.try_publish(id, now)
    }

    fn query_due_notifications(
        &self,
        now: DateTime<Utc>,
        cursor: &PageCursor,
    ) -> Result<Page<NotificationJob>> {
        self.inner.query_due_notifications(now, cursor)
    }

    fn mark_sent(&self, id: &str, now: DateTime<Utc>, counts: DeliveryCounts) -> Result<bool> {
        let remaining = self.fail_mark_sent.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_mark_sent.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::LockPoisoned);
        }
        self.inner.mark_sent(id, now, counts)
    }
}

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<String>>,
}

impl Recording {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, r: &Recipient, _p: &Payload) -> std::result::Result<(), DeliveryError> {
        self.seen.lock().unwrap().push(r.address.clone());
        Ok(())
    }
}

// ---- helpers ----

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

fn no_pacing() -> DispatchConfig {
    DispatchConfig {
        recipient_delay_ms: 0,
        batch_delay_ms: 0,
        ..DispatchConfig::default()
    }
}

fn add_post(store: &SqliteStore, slug: &str, when: Option<DateTime<Utc>>) -> String {
    store
        .insert_content(&NewContent {
            title: slug.replace('-', " "),
            slug: slug.into(),
            scheduled_at: when,
        })
        .unwrap()
        .id
}

fn add_notification(store: &SqliteStore, when: DateTime<Utc>, recipients: usize) -> String {
    store
        .insert_notification(&NewNotification {
            title: "Release notes".into(),
            status: NotificationStatus::Scheduled,
            scheduled_at: Some(when),
            payload: Payload::new("v2 is out", "<p>changelog</p>"),
            recipients: (1..=recipients)
                .map(|i| Recipient::new(format!("reader{i}@example.com")))
                .collect(),
        })
        .unwrap()
        .id
}

// ---- content ----

#[tokio::test]
async fn content_publishes_once_its_time_arrives() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let id = add_post(&store, "new-year", Some(at(0, 1)));
    let draft = add_post(&store, "someday", None);
    let engine = SchedulerEngine::new(store.clone(), Arc::new(Recording::default()), &no_pacing());

    let early = engine.run_tick_at(at(0, 0), None).await;
    assert_eq!(early.content_due, 0);
    assert!(!store.get_content(&id).unwrap().published);

    let on_time = engine.run_tick_at(at(0, 1), None).await;
    assert_eq!(on_time.content_due, 1);
    assert_eq!(on_time.published, 1);
    let post = store.get_content(&id).unwrap();
    assert!(post.published);
    assert_eq!(post.updated_at, at(0, 1));

    let later = engine.run_tick_at(at(0, 2), None).await;
    assert!(later.is_idle());
    assert!(!store.get_content(&draft).unwrap().published);
}

#[tokio::test]
async fn manually_published_content_is_not_republished() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let id = add_post(&store, "early-bird", Some(at(0, 5)));
    assert!(store.publish_now(&id).unwrap());
    let before = store.get_content(&id).unwrap().updated_at;

    let engine = SchedulerEngine::new(store.clone(), Arc::new(Recording::default()), &no_pacing());
    let report = engine.run_tick_at(at(0, 10), None).await;

    assert_eq!(report.content_due, 0);
    assert_eq!(report.published, 0);
    assert_eq!(store.get_content(&id).unwrap().updated_at, before);
}

#[tokio::test]
async fn small_pages_still_drain_everything_due() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    for i in 0..7 {
        add_post(&store, &format!("post-{i}"), Some(at(0, 0)));
    }
    let config = DispatchConfig {
        page_size: 2,
        ..no_pacing()
    };
    let engine = SchedulerEngine::new(store.clone(), Arc::new(Recording::default()), &config);

    let report = engine.run_tick_at(at(0, 0), None).await;
    assert_eq!(report.content_due, 7);
    assert_eq!(report.published, 7);
}

// ---- failure isolation ----

#[tokio::test]
async fn content_query_failure_does_not_block_notifications() {
    let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
    let post = add_post(&sqlite, "stuck", Some(at(0, 0)));
    let job = add_notification(&sqlite, at(0, 0), 2);
    let store = Arc::new(FlakyStore::new(sqlite.clone()));
    store.fail_content_query.store(true, Ordering::SeqCst);
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store.clone(), transport.clone(), &no_pacing());

    let report = engine.run_tick_at(at(0, 0), None).await;
    assert_eq!(report.resolver_errors, 1);
    assert_eq!(report.notifications_sent, 1);
    assert_eq!(transport.seen().len(), 2);
    assert_eq!(sqlite.get_notification(&job).unwrap().status, NotificationStatus::Sent);
    assert!(!sqlite.get_content(&post).unwrap().published);

    // The next tick picks the content up once the store recovers.
    store.fail_content_query.store(false, Ordering::SeqCst);
    let report = engine.run_tick_at(at(0, 1), None).await;
    assert_eq!(report.published, 1);
    assert_eq!(report.notifications_due, 0);
}

#[tokio::test]
async fn failed_terminal_write_redispatches_next_tick() {
    let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
    let job = add_notification(&sqlite, at(0, 0), 3);
    let store = Arc::new(FlakyStore::new(sqlite.clone()));
    store.fail_mark_sent.store(1, Ordering::SeqCst);
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store, transport.clone(), &no_pacing());

    let first = engine.run_tick_at(at(0, 0), None).await;
    assert_eq!(first.notifications_unsettled, 1);
    assert_eq!(first.recipients_delivered, 3);
    assert_eq!(sqlite.get_notification(&job).unwrap().status, NotificationStatus::Scheduled);

    let second = engine.run_tick_at(at(0, 1), None).await;
    assert_eq!(second.notifications_sent, 1);
    // Every recipient hears from us twice: the whole job is re-sent.
    assert_eq!(transport.seen().len(), 6);

    let stored = sqlite.get_notification(&job).unwrap();
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert_eq!(stored.delivered_count, Some(3));
}

// ---- notifications ----

#[tokio::test(start_paused = true)]
async fn large_job_reaches_every_recipient() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let job = add_notification(&store, at(0, 0), 25);
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store.clone(), transport.clone(), &DispatchConfig::default());

    let report = engine.run_tick_at(at(0, 0), None).await;
    assert_eq!(report.notifications_sent, 1);
    assert_eq!(report.recipients_delivered, 25);

    let expected: Vec<String> = (1..=25).map(|i| format!("reader{i}@example.com")).collect();
    assert_eq!(transport.seen(), expected);
    assert_eq!(store.get_notification(&job).unwrap().status, NotificationStatus::Sent);
}

#[tokio::test]
async fn drafts_and_empty_jobs_are_left_alone() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let empty = add_notification(&store, at(0, 0), 0);
    let draft = store
        .insert_notification(&NewNotification {
            title: "Unfinished".into(),
            status: NotificationStatus::Draft,
            scheduled_at: Some(at(0, 0)),
            payload: Payload::new("wip", "wip"),
            recipients: vec![Recipient::new("someone@example.com")],
        })
        .unwrap();
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store.clone(), transport.clone(), &no_pacing());

    let report = engine.run_tick_at(at(1, 0), None).await;
    assert_eq!(report.notifications_due, 1);
    assert_eq!(report.notifications_skipped, 1);
    assert!(transport.seen().is_empty());
    assert_eq!(store.get_notification(&empty).unwrap().status, NotificationStatus::Scheduled);
    assert_eq!(store.get_notification(&draft.id).unwrap().status, NotificationStatus::Draft);
}

#[tokio::test]
async fn shutdown_before_notifications_skips_them() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let post = add_post(&store, "last-call", Some(at(0, 0)));
    let job = add_notification(&store, at(0, 0), 1);
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store.clone(), transport.clone(), &no_pacing());
    let (_tx, rx) = watch::channel(true);

    let report = engine.run_tick_at(at(0, 0), Some(&rx)).await;
    assert!(report.interrupted);
    assert_eq!(report.published, 1);
    assert!(store.get_content(&post).unwrap().published);
    assert!(transport.seen().is_empty());
    assert_eq!(store.get_notification(&job).unwrap().status, NotificationStatus::Scheduled);
}

// ---- loop lifecycle ----

#[tokio::test(start_paused = true)]
async fn scheduler_ticks_immediately_then_every_interval_until_stopped() {
    let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
    let store = Arc::new(FlakyStore::new(sqlite));
    let engine = SchedulerEngine::new(store.clone(), Arc::new(Recording::default()), &no_pacing());
    let mut scheduler = Scheduler::new(engine, &SchedulerConfig { poll_interval_secs: 60 });
    assert!(!scheduler.is_running());

    scheduler.start();
    scheduler.start();
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.content_queries.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.content_queries.load(Ordering::SeqCst), 2);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert!(!scheduler.is_ticking());

    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(store.content_queries.load(Ordering::SeqCst), 2);

    // Stopping twice is harmless.
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_mid_delivery_finishes_the_job_and_starts_no_other() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut jobs = vec![
        add_notification(&store, at(0, 0), 25),
        add_notification(&store, at(0, 0), 25),
    ];
    // Jobs are dispatched in id order.
    jobs.sort();
    let transport = Arc::new(Recording::default());
    let engine = SchedulerEngine::new(store.clone(), transport.clone(), &DispatchConfig::default());
    let mut scheduler = Scheduler::new(engine, &SchedulerConfig { poll_interval_secs: 60 });

    scheduler.start();
    // 25 recipients at the default pacing take 15s; 3s in, the first job is mid-batch.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(scheduler.is_ticking());

    scheduler.stop().await;
    assert!(!scheduler.is_ticking());
    assert!(!scheduler.is_running());

    assert_eq!(store.get_notification(&jobs[0]).unwrap().status, NotificationStatus::Sent);
    assert_eq!(store.get_notification(&jobs[1]).unwrap().status, NotificationStatus::Scheduled);
    assert_eq!(transport.seen().len(), 25);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_scheduler_ends_the_loop() {
    let sqlite = Arc::new(SqliteStore::open_in_memory().unwrap());
    let store = Arc::new(FlakyStore::new(sqlite));
    let engine = SchedulerEngine::new(store.clone(), Arc::new(Recording::default()), &no_pacing());
    let mut scheduler = Scheduler::new(engine, &SchedulerConfig { poll_interval_secs: 60 });

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.content_queries.load(Ordering::SeqCst), 1);

    drop(scheduler);
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(store.content_queries.load(Ordering::SeqCst), 1);
}
