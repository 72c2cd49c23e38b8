//! Cross-service workflow test harness.
//!
//! Wires the whole registration/activation pipeline against the in-memory
//! implementations: aggregate + outbox writer, relay, bus, consumer,
//! job queue, worker and a recording mail sender. Tests drive the pipeline
//! step by step instead of sleeping on background tasks.

use auth_service::services::{FakePasswordHasher, FixedRoleReader, InMemoryAuthUserRepository};
use auth_service::AuthServices;
use futures::FutureExt;
use futures::StreamExt;
use notification_service::consumer::EventConsumer;
use notification_service::events::{
    EventDispatcher, USER_OTP_REQUESTED_TOPIC, USER_REGISTERED_TOPIC,
};
use notification_service::handlers::OtpEmailHandler;
use notification_service::queue::{InMemoryJobQueue, NotificationQueue, QueueWorker, WorkerConfig};
use notification_service::services::{RecordingEmailSender, SentEmail};
use service_core::bus::{BusMessage, InMemoryBus, MessageBus, Subscription};
use service_core::outbox::{InMemoryOutboxStore, OutboxRelay, RelayConfig};
use std::sync::{Arc, Mutex, Once};

pub const OTP_SECRET: &str = "workflow-test-secret";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,workflow_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct Pipeline {
    pub outbox: Arc<InMemoryOutboxStore>,
    pub bus: Arc<InMemoryBus>,
    pub repository: Arc<InMemoryAuthUserRepository>,
    pub services: AuthServices,
    pub relay: OutboxRelay,
    pub consumer: EventConsumer,
    pub job_queue: InMemoryJobQueue,
    pub worker: QueueWorker,
    pub email: Arc<RecordingEmailSender>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Pipeline {
    pub async fn new() -> Self {
        init_tracing();

        let outbox = Arc::new(InMemoryOutboxStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let repository = Arc::new(InMemoryAuthUserRepository::new(outbox.clone()));

        let services = AuthServices {
            repository: repository.clone(),
            password_hasher: Arc::new(FakePasswordHasher),
            role_reader: Arc::new(FixedRoleReader(Some(1))),
            otp_secret: OTP_SECRET.to_string(),
            otp_ttl_minutes: 5,
        };

        let relay = OutboxRelay::new(outbox.clone(), bus.clone(), RelayConfig::default());

        // Subscribe before anything is published so no event is missed.
        let subscriptions = Mutex::new(vec![
            bus.subscribe(USER_REGISTERED_TOPIC)
                .await
                .expect("subscribe"),
            bus.subscribe(USER_OTP_REQUESTED_TOPIC)
                .await
                .expect("subscribe"),
        ]);

        let job_queue = InMemoryJobQueue::new();
        let notification_queue = Arc::new(NotificationQueue::new(Arc::new(job_queue.clone())));
        let otp_handler = Arc::new(OtpEmailHandler::new(notification_queue));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(USER_REGISTERED_TOPIC, otp_handler.clone());
        dispatcher.register(USER_OTP_REQUESTED_TOPIC, otp_handler);

        let consumer = EventConsumer::new(bus.clone(), Arc::new(dispatcher));

        let email = Arc::new(RecordingEmailSender::new());
        let worker = QueueWorker::new(
            Arc::new(job_queue.clone()),
            email.clone(),
            WorkerConfig::default(),
        );

        Self {
            outbox,
            bus,
            repository,
            services,
            relay,
            consumer,
            job_queue,
            worker,
            email,
            subscriptions,
        }
    }

    /// Pull every message already delivered to the subscriptions.
    pub fn delivered_messages(&self) -> Vec<BusMessage> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let mut messages = Vec::new();
        for subscription in subscriptions.iter_mut() {
            while let Some(Some(message)) = subscription.next().now_or_never() {
                messages.push(message);
            }
        }
        messages
    }

    /// Feed the delivered messages through the consumer.
    pub async fn consume_delivered(&self) -> usize {
        let messages = self.delivered_messages();
        let mut processed = 0;
        for message in &messages {
            self.consumer.process(message).await.expect("consume");
            processed += 1;
        }
        processed
    }

    /// Run queued jobs to completion (promoting any delayed retries).
    pub async fn work_all_jobs(&self) -> usize {
        let mut worked = 0;
        loop {
            self.job_queue.promote_all();
            if !self.worker.tick().await.expect("worker tick") {
                return worked;
            }
            worked += 1;
        }
    }

    /// One full pipeline pass: relay → consumer → worker.
    pub async fn run_once(&self) {
        self.relay.tick().await.expect("relay tick");
        self.consume_delivered().await;
        self.work_all_jobs().await;
    }

    /// The latest OTP email recorded for `to`.
    pub fn last_otp_email(&self, to: &str) -> Option<SentEmail> {
        self.email
            .sent()
            .into_iter()
            .filter(|sent| sent.to == to && sent.kind == "otp")
            .next_back()
    }
}
