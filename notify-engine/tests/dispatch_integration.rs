//! End-to-end dispatch behaviour across stores, channels and the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notify_engine::Error;
use notify_engine::channel::{Channel, PushChannel, PushError};
use notify_engine::config::EngineConfig;
use notify_engine::database;
use notify_engine::dispatch::{ErrorListener, ProcessOutcome, PushDispatcher, PushResult};
use notify_engine::model::{
    Dispatch, MessageKind, Notification, NotificationType, Preferences, PushChannelPreferences,
    PushState, PushStatus, Version,
};
use notify_engine::render::{MemoryTemplateRenderer, NotificationRenderService};
use notify_engine::services::ServiceContainer;
use notify_engine::store::{MemoryStore, NotificationStore, PreferencesStore, SqliteStore};
use notify_params::Params;
use parking_lot::Mutex;

/// Channel returning a fixed result, counting calls and detecting
/// overlapping pushes.
struct TestChannel {
    id: &'static str,
    result: Result<(), PushError>,
    delay: Duration,
    calls: AtomicU32,
    active: AtomicU32,
    overlapped: AtomicBool,
}

impl TestChannel {
    fn new(id: &'static str, result: Result<(), PushError>) -> Arc<Self> {
        Self::with_delay(id, result, Duration::ZERO)
    }

    fn with_delay(id: &'static str, result: Result<(), PushError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            result,
            delay,
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            overlapped: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Channel for TestChannel {
    fn id(&self) -> &str {
        self.id
    }

    fn notification_types(&self) -> &[NotificationType] {
        NotificationType::ALL
    }

    fn is_configured(&self, _params: &Params) -> bool {
        true
    }
}

#[async_trait]
impl PushChannel for TestChannel {
    fn new_default_preferences(&self) -> Option<PushChannelPreferences> {
        Some(PushChannelPreferences::new())
    }

    async fn push(&self, _notification: &Notification, _dispatch: &Dispatch) -> Result<(), PushError> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn producer() -> Arc<NotificationRenderService> {
    let renderer = MemoryTemplateRenderer::new();
    renderer.register(
        "welcome",
        Version::Long,
        MessageKind::Text,
        "Subject: Welcome\n\nHello there",
    );
    Arc::new(NotificationRenderService::new(Arc::new(renderer)))
}

async fn dispatcher_over(
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferencesStore>,
    channels: Vec<Arc<dyn PushChannel>>,
) -> PushDispatcher {
    preferences
        .save_preferences(&Preferences::new("john"))
        .await
        .unwrap();

    let mut builder = PushDispatcher::builder()
        .notification_store(notifications)
        .preferences_store(preferences)
        .content_producer(producer());
    for channel in channels {
        builder = builder.push_channel(channel);
    }
    builder.build().unwrap()
}

async fn memory_dispatcher(channels: Vec<Arc<dyn PushChannel>>) -> (Arc<MemoryStore>, PushDispatcher) {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = dispatcher_over(store.clone(), store.clone(), channels).await;
    (store, dispatcher)
}

fn queued_with_errors(count: u32) -> Notification {
    let mut n = Notification::new("john", "welcome");
    n.restore_push_status(PushStatus {
        state: PushState::Queued,
        date: Utc::now(),
        error_count: count,
        error_message: Some("earlier failure".to_string()),
    });
    n
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_on_one_notification_do_not_overlap() {
    let channel = TestChannel::with_delay("a", Ok(()), Duration::from_millis(100));
    let (store, dispatcher) = memory_dispatcher(vec![channel.clone() as Arc<dyn PushChannel>]).await;
    let dispatcher = Arc::new(dispatcher);

    let mut n = Notification::new("john", "welcome");
    store.save(&mut n).await.unwrap();

    let queued = {
        let dispatcher = dispatcher.clone();
        let n = n.clone();
        tokio::spawn(async move { dispatcher.process_queued(&n).await })
    };
    let now = {
        let dispatcher = dispatcher.clone();
        let n = n.clone();
        tokio::spawn(async move { dispatcher.dispatch_now(n).await })
    };

    let queued = queued.await.unwrap().unwrap();
    let now = now.await.unwrap().unwrap();

    assert!(!channel.overlapped.load(Ordering::SeqCst));
    assert_eq!(channel.calls(), 1);
    assert_eq!(now.push_state(), PushState::Pushed);
    assert!(matches!(
        queued,
        ProcessOutcome::Skipped | ProcessOutcome::Processed(PushResult::Success)
    ));

    let stored = store.get(n.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Pushed);
}

#[tokio::test]
async fn dispatch_now_persistent_failure_leaves_no_record() {
    let channel = TestChannel::new("a", Err(PushError::persistent("mailbox does not exist")));
    let (store, dispatcher) = memory_dispatcher(vec![channel.clone() as Arc<dyn PushChannel>]).await;

    let err = dispatcher
        .dispatch_now(Notification::new("john", "welcome"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Dispatch(_)));
    assert!(err.to_string().contains("mailbox does not exist"));
    assert!(store.is_empty());
    assert_eq!(channel.calls(), 1);
}

#[tokio::test]
async fn third_temporary_failure_is_rescheduled_two_hours_out() {
    let channel = TestChannel::new("a", Err(PushError::temporary("connection reset")));
    let (store, dispatcher) = memory_dispatcher(vec![channel as Arc<dyn PushChannel>]).await;

    let mut n = queued_with_errors(2);
    let id = store.save(&mut n).await.unwrap();

    let before = Utc::now();
    let outcome = dispatcher.process_queued(&n).await.unwrap();
    let after = Utc::now();
    assert_eq!(outcome, ProcessOutcome::Processed(PushResult::TemporaryError));

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Queued);
    assert_eq!(stored.push_error_count(), 3);
    assert!(stored.push_error_message().unwrap().contains("connection reset"));

    let backoff = chrono::Duration::milliseconds(7_200_000);
    assert!(stored.push_date() >= before + backoff);
    assert!(stored.push_date() <= after + backoff);

    // Not eligible again until the backoff has elapsed
    assert!(store.get_next(Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn fourth_temporary_failure_gives_up() {
    let channel = TestChannel::new("a", Err(PushError::temporary("connection reset")));
    let (store, dispatcher) = memory_dispatcher(vec![channel as Arc<dyn PushChannel>]).await;

    let mut n = queued_with_errors(3);
    let id = store.save(&mut n).await.unwrap();

    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::TemporaryError))
    );

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Undeliverable);
    assert_eq!(stored.push_error_count(), 4);
    assert!(dispatcher.process_next().await.unwrap().is_none());
}

#[tokio::test]
async fn one_successful_channel_is_enough() {
    let good = TestChannel::new("a", Ok(()));
    let bad = TestChannel::new("b", Err(PushError::persistent("rejected")));
    let (store, dispatcher) = memory_dispatcher(vec![
        good.clone() as Arc<dyn PushChannel>,
        bad.clone() as Arc<dyn PushChannel>,
    ])
    .await;

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    let listener: Arc<dyn ErrorListener> = Arc::new(
        move |_n: &Notification, channel: &dyn PushChannel, err: &PushError| {
            sink.lock().push((channel.id().to_string(), err.is_temporary()));
        },
    );
    dispatcher.add_error_listener(listener);

    let mut n = Notification::new("john", "welcome");
    let id = store.save(&mut n).await.unwrap();

    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::Success))
    );

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Pushed);
    assert_eq!(stored.push_error_count(), 0);
    assert_eq!(good.calls(), 1);
    assert_eq!(bad.calls(), 1);
    assert_eq!(*reported.lock(), vec![("b".to_string(), false)]);
}

#[tokio::test]
async fn no_applicable_channel_stays_queued() {
    let channel = TestChannel::new("a", Ok(()));
    let (store, dispatcher) = memory_dispatcher(vec![channel.clone() as Arc<dyn PushChannel>]).await;

    // Forced to a channel that is not registered
    let mut n = Notification::new("john", "welcome").force_channel("sms");
    let id = store.save(&mut n).await.unwrap();

    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::TemporaryError))
    );

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Queued);
    assert_eq!(stored.push_error_count(), 1);
    assert_eq!(channel.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_pool_delivers_enqueued_notifications() {
    let channel = TestChannel::new("a", Ok(()));
    let store = Arc::new(MemoryStore::new());
    store
        .save_preferences(&Preferences::new("john"))
        .await
        .unwrap();

    let config = EngineConfig {
        worker_count: 2,
        ..Default::default()
    };
    let container = ServiceContainer::new(
        config,
        store.clone(),
        store.clone(),
        producer(),
        vec![channel.clone() as Arc<dyn PushChannel>],
    )
    .unwrap();
    container.start();

    let n = container
        .service()
        .enqueue(Notification::new("john", "welcome"))
        .await
        .unwrap();
    let id = n.id().unwrap();

    let pushed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stored = store.get(id).await.unwrap().unwrap();
            if stored.push_state() == PushState::Pushed {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("worker did not deliver the notification");

    assert_eq!(pushed.push_error_count(), 0);
    assert_eq!(channel.calls(), 1);

    container.shutdown().await.unwrap();
    assert!(!container.worker_pool().is_running());
}

#[tokio::test]
async fn sqlite_store_round_trip_through_dispatcher() {
    let pool = database::init_memory_pool().await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));

    let channel = TestChannel::new("a", Err(PushError::temporary("try later")));
    let dispatcher = dispatcher_over(
        store.clone(),
        store.clone(),
        vec![channel as Arc<dyn PushChannel>],
    )
    .await;

    let mut n = Notification::new("john", "welcome").with_type(NotificationType::Public);
    let id = store.save(&mut n).await.unwrap();

    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::TemporaryError))
    );

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Queued);
    assert_eq!(stored.push_error_count(), 1);
    assert_eq!(stored.notification_type(), NotificationType::Public);

    assert!(store.get_next(Utc::now()).await.unwrap().is_none());
    let later = Utc::now() + chrono::Duration::minutes(2);
    assert_eq!(
        store.get_next(later).await.unwrap().and_then(|n| n.id()),
        Some(id)
    );
}

#[tokio::test]
async fn unreadable_preferences_do_not_block_the_queue() {
    let pool = database::init_memory_pool().await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));

    let channel = TestChannel::new("a", Ok(()));
    let dispatcher = dispatcher_over(
        store.clone(),
        store.clone(),
        vec![channel.clone() as Arc<dyn PushChannel>],
    )
    .await;

    sqlx::query("INSERT INTO preferences (user_id, params, channel_prefs) VALUES ('bad', '{}', 'not json')")
        .execute(store.pool())
        .await
        .unwrap();

    let mut stuck = Notification::new("bad", "welcome");
    stuck.restore_push_status(PushStatus::queued(Utc::now() - chrono::Duration::minutes(5)));
    let stuck_id = store.save(&mut stuck).await.unwrap();
    let mut n = Notification::new("john", "welcome");
    let id = store.save(&mut n).await.unwrap();

    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::TemporaryError))
    );
    assert_eq!(
        dispatcher.process_next().await.unwrap(),
        Some(ProcessOutcome::Processed(PushResult::Success))
    );

    let stuck = store.get(stuck_id).await.unwrap().unwrap();
    assert_eq!(stuck.push_state(), PushState::Queued);
    assert_eq!(stuck.push_error_count(), 1);
    assert!(
        stuck
            .push_error_message()
            .unwrap()
            .contains("cannot load preferences")
    );

    let delivered = store.get(id).await.unwrap().unwrap();
    assert_eq!(delivered.push_state(), PushState::Pushed);
    assert_eq!(channel.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_lets_in_flight_push_finish() {
    let channel = TestChannel::with_delay("a", Ok(()), Duration::from_millis(200));
    let store = Arc::new(MemoryStore::new());
    store
        .save_preferences(&Preferences::new("john"))
        .await
        .unwrap();

    let container = ServiceContainer::new(
        EngineConfig::default(),
        store.clone(),
        store.clone(),
        producer(),
        vec![channel.clone() as Arc<dyn PushChannel>],
    )
    .unwrap();
    container.start();

    let n = container
        .service()
        .enqueue(Notification::new("john", "welcome"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("push never started");

    container.shutdown().await.unwrap();

    let stored = store.get(n.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.push_state(), PushState::Pushed);
    assert_eq!(channel.calls(), 1);
    assert!(!container.worker_pool().is_running());
}
