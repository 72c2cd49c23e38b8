use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::de::DeserializeOwned;

/// Load a typed configuration from the optional `configuration` file plus
/// `APP`-prefixed environment variables (`APP_DATABASE__URL`, ...).
///
/// Each service defines its own config struct with serde defaults and calls
/// this once at startup.
pub fn load<T: DeserializeOwned>() -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
