//! End-to-end registration → activation workflow over the full pipeline:
//! command handler → transactional outbox → relay → bus → consumer →
//! job queue → worker → mail port → OTP verification.

use auth_service::domain::AuthError;
use auth_service::services::AuthUserRepository;
use auth_service::handlers::{
    register_user, resend_verification_code, verify_otp, RegisterUserCommand,
    ResendVerificationCodeCommand, VerifyOtpCommand,
};
use service_core::outbox::OutboxStatus;
use workflow_tests::Pipeline;

const EMAIL: &str = "ada@example.com";

fn register_command() -> RegisterUserCommand {
    RegisterUserCommand {
        email: EMAIL.to_string(),
        password: "Str0ng!Pass".to_string(),
    }
}

#[tokio::test]
async fn registration_to_activation_end_to_end() {
    let pipeline = Pipeline::new().await;

    // Registration leaves exactly one PENDING outbox row; nothing published.
    register_user(&pipeline.services, register_command())
        .await
        .unwrap();
    let records = pipeline.outbox.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OutboxStatus::Pending);
    assert!(pipeline.bus.published().is_empty());

    // Relay publishes, consumer enqueues, worker sends the OTP email.
    pipeline.run_once().await;
    assert_eq!(pipeline.bus.published().len(), 1);
    let sent = pipeline.last_otp_email(EMAIL).expect("otp email");
    let otp = sent.otp.expect("plaintext code rides in the email job");
    assert_eq!(otp.len(), 6);

    // The row is COMPLETED and a second pass republishes nothing.
    assert_eq!(
        pipeline.outbox.records()[0].status,
        OutboxStatus::Completed
    );
    pipeline.run_once().await;
    assert_eq!(pipeline.bus.published().len(), 1);
    assert_eq!(pipeline.email.sent().len(), 1);

    // The emailed code activates the account and clears the pending code.
    verify_otp(
        &pipeline.services,
        VerifyOtpCommand {
            email: EMAIL.to_string(),
            otp,
        },
    )
    .await
    .unwrap();

    let user = pipeline
        .repository
        .find_by_email(EMAIL)
        .await
        .unwrap()
        .expect("user persisted");
    assert!(user.can_login());
    assert!(user.verification_code().is_none());

    // Activation recorded a UserVerifiedEvent, which no handler consumes.
    pipeline.run_once().await;
    let types: Vec<_> = pipeline
        .bus
        .published()
        .iter()
        .map(|(topic, _)| topic.clone())
        .collect();
    assert_eq!(types, vec!["UserRegisteredEvent", "UserVerifiedEvent"]);
    assert_eq!(pipeline.email.sent().len(), 1);
}

#[tokio::test]
async fn resend_invalidates_the_previous_code() {
    let pipeline = Pipeline::new().await;
    register_user(&pipeline.services, register_command())
        .await
        .unwrap();
    pipeline.run_once().await;
    let first_otp = pipeline.last_otp_email(EMAIL).unwrap().otp.unwrap();

    resend_verification_code(
        &pipeline.services,
        ResendVerificationCodeCommand {
            email: EMAIL.to_string(),
        },
    )
    .await
    .unwrap();
    pipeline.run_once().await;
    let second_otp = pipeline.last_otp_email(EMAIL).unwrap().otp.unwrap();
    assert_ne!(first_otp, second_otp);

    // The replaced code no longer verifies; the fresh one does.
    let stale = verify_otp(
        &pipeline.services,
        VerifyOtpCommand {
            email: EMAIL.to_string(),
            otp: first_otp,
        },
    )
    .await;
    assert!(matches!(stale, Err(AuthError::InvalidOtp)));

    verify_otp(
        &pipeline.services,
        VerifyOtpCommand {
            email: EMAIL.to_string(),
            otp: second_otp,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn bus_outage_is_retried_until_published() {
    let pipeline = Pipeline::new().await;
    register_user(&pipeline.services, register_command())
        .await
        .unwrap();

    // Two failing ticks bump attempts but keep the row eligible.
    pipeline.bus.fail_publishes(true);
    pipeline.relay.tick().await.unwrap();
    pipeline.relay.tick().await.unwrap();
    let record = &pipeline.outbox.records()[0];
    assert_eq!(record.status, OutboxStatus::Pending);
    assert_eq!(record.attempts, 2);
    assert!(record.last_error.is_some());

    // Recovery publishes exactly once; downstream sends one email.
    pipeline.bus.fail_publishes(false);
    pipeline.run_once().await;
    assert_eq!(pipeline.bus.published().len(), 1);
    assert_eq!(pipeline.email.sent().len(), 1);
    assert_eq!(
        pipeline.outbox.records()[0].status,
        OutboxStatus::Completed
    );
}

#[tokio::test]
async fn duplicate_bus_delivery_sends_one_email() {
    let pipeline = Pipeline::new().await;
    register_user(&pipeline.services, register_command())
        .await
        .unwrap();

    pipeline.relay.tick().await.unwrap();
    let messages = pipeline.delivered_messages();
    assert_eq!(messages.len(), 1);

    // At-least-once transport: the same message arrives twice.
    pipeline.consumer.process(&messages[0]).await.unwrap();
    pipeline.consumer.process(&messages[0]).await.unwrap();

    assert_eq!(pipeline.work_all_jobs().await, 1);
    assert_eq!(pipeline.email.sent().len(), 1);
}

#[tokio::test]
async fn smtp_outage_consumes_the_retry_budget_then_buries() {
    let pipeline = Pipeline::new().await;
    register_user(&pipeline.services, register_command())
        .await
        .unwrap();
    pipeline.relay.tick().await.unwrap();
    pipeline.consume_delivered().await;

    pipeline.email.fail_always(true);
    pipeline.work_all_jobs().await;

    let dead = pipeline.job_queue.dead_jobs();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.attempts_made, 5);
    assert!(pipeline.email.sent().is_empty());
}
