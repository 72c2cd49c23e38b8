pub mod email;

pub use email::{EmailSender, RecordingEmailSender, SentEmail, SmtpEmailSender};
