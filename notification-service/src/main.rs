use notification_service::config::NotificationConfig;
use notification_service::consumer::EventConsumer;
use notification_service::events::{
    EventDispatcher, USER_OTP_REQUESTED_TOPIC, USER_REGISTERED_TOPIC,
};
use notification_service::handlers::OtpEmailHandler;
use notification_service::queue::{NotificationQueue, QueueWorker, RedisJobQueue};
use notification_service::services::{EmailSender, RecordingEmailSender, SmtpEmailSender};
use notification_service::startup::{health_router, shutdown_signal};
use service_core::bus::{MessageBus, NatsBus};
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = NotificationConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::io::Error::other(format!("Configuration error: {e}"))
    })?;
    init_tracing("notification-service", &config.log_level);

    let bus = Arc::new(NatsBus::connect(&config.nats.url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to NATS");
        std::io::Error::other(format!("Bus connection error: {e}"))
    })?);

    let job_queue = Arc::new(
        RedisJobQueue::connect(&config.redis.url, &config.redis.namespace)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                std::io::Error::other(format!("Queue connection error: {e}"))
            })?,
    );
    let redis_conn = job_queue.connection();

    let email: Arc<dyn EmailSender> = if config.smtp.enabled {
        let sender = SmtpEmailSender::new(config.smtp.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize SMTP transport");
            std::io::Error::other(format!("SMTP error: {e}"))
        })?;
        tracing::info!("SMTP email sender initialized");
        Arc::new(sender)
    } else {
        tracing::info!("SMTP disabled, emails will only be logged");
        Arc::new(RecordingEmailSender::new())
    };

    let notification_queue = Arc::new(NotificationQueue::new(job_queue.clone()));
    let otp_handler = Arc::new(OtpEmailHandler::new(notification_queue));
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(USER_REGISTERED_TOPIC, otp_handler.clone());
    dispatcher.register(USER_OTP_REQUESTED_TOPIC, otp_handler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = EventConsumer::new(bus.clone(), Arc::new(dispatcher));
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            tracing::error!(error = %e, "Event consumer exited with error");
        }
    });

    let worker = QueueWorker::new(job_queue, email, config.worker_config());
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to bind health listener to {}", addr);
        e
    })?;
    tracing::info!(port = config.port, "Notification service listening");

    if let Err(e) = axum::serve(listener, health_router(redis_conn))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Health server error");
    }

    // Stop the consumer first so no new jobs arrive while the worker drains.
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_handle.await {
        tracing::error!(error = %e, "Event consumer task panicked");
    }
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Job worker task panicked");
    }
    if let Err(e) = bus.close().await {
        tracing::error!(error = %e, "Failed to flush bus on shutdown");
    }

    tracing::info!("Notification service stopped");
    Ok(())
}
