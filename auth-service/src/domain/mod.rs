pub mod aggregate;
pub mod error;
pub mod events;
pub mod value_objects;
pub mod verification_code;

pub use aggregate::{AuthUser, UserStatus};
pub use error::AuthError;
pub use events::{DomainEvent, DomainEventKind};
pub use value_objects::{Email, HashedPassword, RawPassword};
pub use verification_code::VerificationCode;
