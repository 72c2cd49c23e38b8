pub mod password;
pub mod repository;
pub mod role_reader;

pub use password::{Argon2PasswordHasher, FakePasswordHasher, PasswordHasher};
pub use repository::{AuthUserRepository, InMemoryAuthUserRepository, PgAuthUserRepository};
pub use role_reader::{FixedRoleReader, PgRoleReader, RoleReader};
