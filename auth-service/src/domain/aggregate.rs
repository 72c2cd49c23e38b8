//! The `AuthUser` aggregate: the consistency boundary for registration
//! and OTP activation.
//!
//! State-changing operations append to an internal pending-event buffer.
//! Only the persistence boundary reads (`pending_events`) and clears
//! (`commit`) the buffer, after its transaction has committed.

use crate::domain::error::AuthError;
use crate::domain::events::{DomainEvent, DomainEventKind};
use crate::domain::value_objects::{Email, HashedPassword};
use crate::domain::verification_code::VerificationCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Inactive,
    Active,
    Blocked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Inactive => "inactive",
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(UserStatus::Inactive),
            "active" => Some(UserStatus::Active),
            "blocked" => Some(UserStatus::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct AuthUser {
    id: Uuid,
    email: Email,
    password: HashedPassword,
    role_id: i32,
    status: UserStatus,
    verification_code: Option<VerificationCode>,
    pending_events: Vec<DomainEvent>,
}

impl AuthUser {
    /// Register a new user: identity assigned here, exactly once; status
    /// starts INACTIVE pending OTP verification. `verification_code` must
    /// be freshly generated so the event can carry the plaintext.
    pub fn register(
        email: Email,
        password: HashedPassword,
        role_id: i32,
        verification_code: VerificationCode,
    ) -> Self {
        let id = Uuid::new_v4();
        let otp = verification_code.plaintext().unwrap_or_default().to_string();
        let mut user = Self {
            id,
            email,
            password,
            role_id,
            status: UserStatus::Inactive,
            verification_code: Some(verification_code),
            pending_events: Vec::new(),
        };
        user.record(DomainEventKind::UserRegistered {
            aggregate_id: id,
            email: user.email.as_str().to_string(),
            otp,
        });
        user
    }

    /// Rebuild from persisted state; records no events.
    pub fn restore(
        id: Uuid,
        email: Email,
        password: HashedPassword,
        role_id: i32,
        status: UserStatus,
        verification_code: Option<VerificationCode>,
    ) -> Self {
        Self {
            id,
            email,
            password,
            role_id,
            status,
            verification_code,
            pending_events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn password(&self) -> &HashedPassword {
        &self.password
    }

    pub fn role_id(&self) -> i32 {
        self.role_id
    }

    pub fn status(&self) -> UserStatus {
        self.status
    }

    pub fn verification_code(&self) -> Option<&VerificationCode> {
        self.verification_code.as_ref()
    }

    pub fn can_login(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Identity is assigned exactly once, at construction.
    pub fn assign_id(&mut self, id: Uuid) -> Result<(), AuthError> {
        if !self.id.is_nil() {
            return Err(AuthError::IdentityAlreadyAssigned);
        }
        self.id = id;
        Ok(())
    }

    /// Adopt the identity of an existing persisted row: re-registering an
    /// unverified email keeps the row id, so any pending events are
    /// re-pointed at it before they reach the outbox.
    pub fn adopt_identity(&mut self, id: Uuid) {
        self.id = id;
        for event in &mut self.pending_events {
            event.set_aggregate_id(id);
        }
    }

    /// Verify the pending OTP: on success the user becomes ACTIVE, the code
    /// is consumed and a `UserVerified` event is recorded.
    pub fn verify_otp(&mut self, input: &str, secret: &str) -> Result<(), AuthError> {
        let code = self.verification_code.as_ref().ok_or(AuthError::InvalidOtp)?;
        if !code.verify(input, secret) {
            return Err(AuthError::InvalidOtp);
        }

        self.activate();
        self.verification_code = None;
        self.record(DomainEventKind::UserVerified {
            aggregate_id: self.id,
            email: self.email.as_str().to_string(),
        });
        Ok(())
    }

    /// Replace the pending code; only INACTIVE users may request one.
    pub fn request_new_verification_code(
        &mut self,
        verification_code: VerificationCode,
    ) -> Result<(), AuthError> {
        if self.status != UserStatus::Inactive {
            return Err(AuthError::AlreadyVerified);
        }

        let otp = verification_code.plaintext().unwrap_or_default().to_string();
        self.verification_code = Some(verification_code);
        self.record(DomainEventKind::UserOtpRequested {
            aggregate_id: self.id,
            email: self.email.as_str().to_string(),
            otp,
        });
        Ok(())
    }

    // Administrative setters; no downstream consumers, so no events.

    pub fn activate(&mut self) {
        self.status = UserStatus::Active;
    }

    pub fn inactivate(&mut self) {
        self.status = UserStatus::Inactive;
    }

    pub fn block(&mut self) {
        self.status = UserStatus::Blocked;
    }

    /// Events recorded since the last commit, in order.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    /// Clear the buffer. Called by the persistence boundary once its
    /// transaction has committed, never by business logic.
    pub fn commit(&mut self) {
        self.pending_events.clear();
    }

    fn record(&mut self, kind: DomainEventKind) {
        self.pending_events.push(DomainEvent::new(kind));
    }
}
