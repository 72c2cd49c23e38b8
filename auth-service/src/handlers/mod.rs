//! Command handlers: registration, OTP verification, code resend.
//!
//! Transport-agnostic entry points; HTTP/gRPC surfaces call these with an
//! [`AuthServices`] wired at startup.

use crate::domain::{AuthError, AuthUser, Email, RawPassword, VerificationCode};
use crate::AuthServices;

#[derive(Debug, Clone)]
pub struct RegisterUserCommand {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct VerifyOtpCommand {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Clone)]
pub struct ResendVerificationCodeCommand {
    pub email: String,
}

/// Register a new user and record the `UserRegisteredEvent` for the outbox.
#[tracing::instrument(skip(services, command), fields(email = %command.email))]
pub async fn register_user(
    services: &AuthServices,
    command: RegisterUserCommand,
) -> Result<AuthUser, AuthError> {
    let email = Email::new(&command.email)?;
    let raw_password = RawPassword::new(&command.password)?;
    let hashed_password = services.password_hasher.hash(&raw_password).await?;

    let role_id = services
        .role_reader
        .client_role_id()
        .await?
        .ok_or(AuthError::RoleNotFound)?;

    let verification_code =
        VerificationCode::generate(&services.otp_secret, services.otp_ttl_minutes)?;
    let mut user = AuthUser::register(email, hashed_password, role_id, verification_code);

    services.repository.save(&mut user).await?;
    tracing::info!(user_id = %user.id(), "User registered, awaiting verification");
    Ok(user)
}

/// Verify the pending OTP and activate the account.
#[tracing::instrument(skip(services, command), fields(email = %command.email))]
pub async fn verify_otp(
    services: &AuthServices,
    command: VerifyOtpCommand,
) -> Result<(), AuthError> {
    let mut user = services
        .repository
        .find_by_email(&command.email)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    user.verify_otp(&command.otp, &services.otp_secret)?;
    services.repository.save(&mut user).await?;
    tracing::info!(user_id = %user.id(), "User verified");
    Ok(())
}

/// Replace the pending code and record `UserOtpRequestedEvent`.
#[tracing::instrument(skip(services, command), fields(email = %command.email))]
pub async fn resend_verification_code(
    services: &AuthServices,
    command: ResendVerificationCodeCommand,
) -> Result<(), AuthError> {
    let mut user = services
        .repository
        .find_by_email(&command.email)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    let verification_code =
        VerificationCode::generate(&services.otp_secret, services.otp_ttl_minutes)?;
    user.request_new_verification_code(verification_code)?;

    services.repository.save(&mut user).await?;
    tracing::info!(user_id = %user.id(), "Verification code replaced");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        AuthUserRepository, FakePasswordHasher, FixedRoleReader, InMemoryAuthUserRepository,
    };
    use service_core::outbox::{InMemoryOutboxStore, OutboxStatus};
    use std::sync::Arc;

    const SECRET: &str = "handler-test-secret";

    fn services(outbox: Arc<InMemoryOutboxStore>) -> (AuthServices, Arc<InMemoryAuthUserRepository>) {
        let repository = Arc::new(InMemoryAuthUserRepository::new(outbox));
        let services = AuthServices {
            repository: repository.clone(),
            password_hasher: Arc::new(FakePasswordHasher),
            role_reader: Arc::new(FixedRoleReader(Some(1))),
            otp_secret: SECRET.to_string(),
            otp_ttl_minutes: 5,
        };
        (services, repository)
    }

    fn register_command() -> RegisterUserCommand {
        RegisterUserCommand {
            email: "a@example.com".to_string(),
            password: "Str0ng!Pass".to_string(),
        }
    }

    #[tokio::test]
    async fn register_writes_one_pending_outbox_row() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, _) = services(outbox.clone());

        let user = register_user(&services, register_command()).await.unwrap();
        assert!(user.pending_events().is_empty(), "buffer cleared post-commit");

        let records = outbox.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "UserRegisteredEvent");
        assert_eq!(records[0].status, OutboxStatus::Pending);
        assert_eq!(records[0].payload["email"], "a@example.com");
    }

    #[tokio::test]
    async fn register_rejects_invalid_input_before_any_write() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, repository) = services(outbox.clone());

        let bad_email = RegisterUserCommand {
            email: "nope".to_string(),
            password: "Str0ng!Pass".to_string(),
        };
        assert!(matches!(
            register_user(&services, bad_email).await,
            Err(AuthError::InvalidEmail)
        ));

        let weak = RegisterUserCommand {
            email: "a@example.com".to_string(),
            password: "weak".to_string(),
        };
        assert!(matches!(
            register_user(&services, weak).await,
            Err(AuthError::WeakPassword)
        ));

        assert_eq!(repository.user_count(), 0);
        assert!(outbox.records().is_empty());
    }

    #[tokio::test]
    async fn register_fails_without_a_default_role() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (mut services, _) = services(outbox);
        services.role_reader = Arc::new(FixedRoleReader(None));
        assert!(matches!(
            register_user(&services, register_command()).await,
            Err(AuthError::RoleNotFound)
        ));
    }

    #[tokio::test]
    async fn failed_save_leaves_no_outbox_rows_and_retry_is_safe() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, repository) = services(outbox.clone());

        repository.fail_next_save();
        assert!(register_user(&services, register_command()).await.is_err());
        assert!(outbox.records().is_empty());
        assert_eq!(repository.user_count(), 0);

        // Retrying the registration succeeds and writes exactly one row.
        register_user(&services, register_command()).await.unwrap();
        assert_eq!(outbox.records().len(), 1);
        assert_eq!(repository.user_count(), 1);
    }

    #[tokio::test]
    async fn event_buffer_survives_a_failed_save_until_commit() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (_, repository) = services(outbox.clone());

        let mut user = AuthUser::register(
            Email::new("a@example.com").unwrap(),
            crate::domain::HashedPassword::from_hash("h".repeat(32)).unwrap(),
            1,
            VerificationCode::generate(SECRET, 5).unwrap(),
        );

        repository.fail_next_save();
        assert!(repository.save(&mut user).await.is_err());
        assert_eq!(user.pending_events().len(), 1, "buffer intact after rollback");

        repository.save(&mut user).await.unwrap();
        assert!(user.pending_events().is_empty());
        assert_eq!(outbox.records().len(), 1, "retry does not duplicate rows");
    }

    #[tokio::test]
    async fn verify_otp_end_to_end_activates_the_user() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, repository) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        let otp = outbox.records()[0].payload["otp"].as_str().unwrap().to_string();

        verify_otp(
            &services,
            VerifyOtpCommand {
                email: "a@example.com".to_string(),
                otp,
            },
        )
        .await
        .unwrap();

        let user = repository.find_by_email("a@example.com").await.unwrap().unwrap();
        assert!(user.can_login());
        assert!(user.verification_code().is_none());

        // Registration + verification events, in order.
        let types: Vec<_> = outbox.records().iter().map(|r| r.event_type.clone()).collect();
        assert_eq!(types, vec!["UserRegisteredEvent", "UserVerifiedEvent"]);
    }

    #[tokio::test]
    async fn verify_otp_distinguishes_not_found_from_invalid() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, _) = services(outbox.clone());

        let missing = VerifyOtpCommand {
            email: "ghost@example.com".to_string(),
            otp: "123456".to_string(),
        };
        assert!(matches!(
            verify_otp(&services, missing).await,
            Err(AuthError::UserNotFound)
        ));

        register_user(&services, register_command()).await.unwrap();
        let wrong = VerifyOtpCommand {
            email: "a@example.com".to_string(),
            otp: "000000".to_string(),
        };
        assert!(matches!(verify_otp(&services, wrong).await, Err(AuthError::InvalidOtp)));
    }

    #[tokio::test]
    async fn resend_replaces_code_and_records_event() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, _) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        resend_verification_code(
            &services,
            ResendVerificationCodeCommand {
                email: "a@example.com".to_string(),
            },
        )
        .await
        .unwrap();

        let records = outbox.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event_type, "UserOtpRequestedEvent");

        // Only the replacement code verifies now.
        let new_otp = records[1].payload["otp"].as_str().unwrap().to_string();
        verify_otp(
            &services,
            VerifyOtpCommand {
                email: "a@example.com".to_string(),
                otp: new_otp,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn resend_for_verified_user_fails_without_new_outbox_row() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, _) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        let otp = outbox.records()[0].payload["otp"].as_str().unwrap().to_string();
        verify_otp(
            &services,
            VerifyOtpCommand {
                email: "a@example.com".to_string(),
                otp,
            },
        )
        .await
        .unwrap();

        let rows_before = outbox.records().len();
        let result = resend_verification_code(
            &services,
            ResendVerificationCodeCommand {
                email: "a@example.com".to_string(),
            },
        )
        .await;
        assert!(matches!(result, Err(AuthError::AlreadyVerified)));
        assert_eq!(outbox.records().len(), rows_before);
    }

    #[tokio::test]
    async fn registering_an_active_email_conflicts() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, _) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        let otp = outbox.records()[0].payload["otp"].as_str().unwrap().to_string();
        verify_otp(
            &services,
            VerifyOtpCommand {
                email: "a@example.com".to_string(),
                otp,
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            register_user(&services, register_command()).await,
            Err(AuthError::EmailAlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn re_registration_before_verification_is_allowed() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, repository) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        // Same email, still inactive: the password may be overwritten.
        let second = RegisterUserCommand {
            email: "a@example.com".to_string(),
            password: "An0ther!Pass".to_string(),
        };
        register_user(&services, second).await.unwrap();

        assert_eq!(repository.user_count(), 1);
        assert_eq!(outbox.records().len(), 2);
    }

    #[tokio::test]
    async fn re_registration_events_carry_the_persisted_identity() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let (services, repository) = services(outbox.clone());

        register_user(&services, register_command()).await.unwrap();
        let second = RegisterUserCommand {
            email: "a@example.com".to_string(),
            password: "An0ther!Pass".to_string(),
        };
        let user = register_user(&services, second).await.unwrap();

        // The second registration adopted the existing row id, so every
        // published aggregateId resolves to a real user.
        let persisted = repository
            .find_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id(), persisted.id());

        for record in outbox.records() {
            assert_eq!(
                record.payload["aggregateId"].as_str().unwrap(),
                persisted.id().to_string()
            );
            assert_eq!(
                record.metadata["aggregateId"].as_str().unwrap(),
                persisted.id().to_string()
            );
        }
    }
}
