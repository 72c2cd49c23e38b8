//! Mail-send port: SMTP production implementation plus a recording fake.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use service_core::error::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_otp_email(
        &self,
        email: &str,
        otp: &str,
        user_name: Option<&str>,
    ) -> Result<(), AppError>;

    async fn send_welcome_email(&self, email: &str, user_name: Option<&str>)
        -> Result<(), AppError>;
}

pub struct SmtpEmailSender {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(config: SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AppError::EmailError(format!("Failed to create SMTP relay: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();
        Ok(Self { config, transport })
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        text: String,
        html: String,
    ) -> Result<(), AppError> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid recipient: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )
            .map_err(|e| AppError::EmailError(format!("Failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::EmailError(format!("Failed to send email: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_otp_email(
        &self,
        email: &str,
        otp: &str,
        user_name: Option<&str>,
    ) -> Result<(), AppError> {
        let greeting = user_name.unwrap_or("there");
        self.send(
            email,
            "Your verification code",
            format!("Hi {greeting},\n\nYour verification code is {otp}. It expires in 5 minutes."),
            format!(
                "<p>Hi {greeting},</p><p>Your verification code is <strong>{otp}</strong>. \
                 It expires in 5 minutes.</p>"
            ),
        )
        .await?;
        tracing::info!(to = %email, "OTP email sent");
        Ok(())
    }

    async fn send_welcome_email(
        &self,
        email: &str,
        user_name: Option<&str>,
    ) -> Result<(), AppError> {
        let greeting = user_name.unwrap_or("there");
        self.send(
            email,
            "Welcome aboard",
            format!("Hi {greeting},\n\nYour account is verified and ready to use."),
            format!("<p>Hi {greeting},</p><p>Your account is verified and ready to use.</p>"),
        )
        .await?;
        tracing::info!(to = %email, "Welcome email sent");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub kind: &'static str,
    pub otp: Option<String>,
}

/// Records sends instead of talking to SMTP; can be told to fail a fixed
/// number of times to exercise the retry engine.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    failures_left: Mutex<u32>,
    fail_always: AtomicBool,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32) {
        *self.failures_left.lock().unwrap() = times;
    }

    pub fn fail_always(&self, on: bool) {
        self.fail_always.store(on, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn try_send(&self, email: SentEmail) -> Result<(), AppError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(AppError::EmailError("smtp unavailable".to_string()));
        }
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(AppError::EmailError("smtp unavailable".to_string()));
            }
        }
        tracing::info!(to = %email.to, kind = email.kind, "[recorded] email send");
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_otp_email(
        &self,
        email: &str,
        otp: &str,
        _user_name: Option<&str>,
    ) -> Result<(), AppError> {
        self.try_send(SentEmail {
            to: email.to_string(),
            kind: "otp",
            otp: Some(otp.to_string()),
        })
    }

    async fn send_welcome_email(
        &self,
        email: &str,
        _user_name: Option<&str>,
    ) -> Result<(), AppError> {
        self.try_send(SentEmail {
            to: email.to_string(),
            kind: "welcome",
            otp: None,
        })
    }
}
