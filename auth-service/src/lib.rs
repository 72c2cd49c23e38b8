pub mod config;
pub mod domain;
pub mod handlers;
pub mod services;
pub mod startup;

use crate::services::{AuthUserRepository, PasswordHasher, RoleReader};
use std::sync::Arc;

/// Collaborators the command handlers need, wired once at startup.
#[derive(Clone)]
pub struct AuthServices {
    pub repository: Arc<dyn AuthUserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub role_reader: Arc<dyn RoleReader>,
    pub otp_secret: String,
    pub otp_ttl_minutes: i64,
}
