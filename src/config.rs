//! Environment-backed configuration.
//!
//! Every recognised key is required unless noted; startup fails fast with an
//! error naming the first missing key. The loaded [`Config`] is passed
//! explicitly into constructors rather than living in a global.

use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::model::id::ApplicationId;

/// Intents the engine needs by default: GUILDS | GUILD_VOICE_STATES |
/// GUILD_MESSAGES.
const DEFAULT_INTENTS: u64 = 641;

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub application_id: ApplicationId,
    /// Ed25519 key used by the (out-of-process) webhook verifier; loaded so
    /// that deployment environments share one set of required keys.
    pub public_key: String,
    pub gateway_version: u8,
    pub voice_gateway_version: u8,
    /// REST base, version segment included, e.g. `https://discord.com/api/v10`.
    pub http_base_url: String,
    /// Control gateway URL, scheme included, e.g. `wss://gateway.discord.gg`.
    pub gateway_address: String,
    pub app_env: AppEnv,
    pub bot_intents: u64,
    pub media_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required environment key {key}"),
            ConfigError::Invalid(key, value) => {
                write!(f, "invalid value {value:?} for environment key {key}")
            },
        }
    }
}

impl std::error::Error for ConfigError {}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid(key, value))
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let bot_token = required("DC_BOT_TOKEN")?;
        let application_id =
            parse("DC_APPLICATION_ID", required("DC_APPLICATION_ID")?).map(ApplicationId)?;
        let public_key = required("DC_PUBLIC_KEY")?;
        let gateway_version = parse("DC_GATEWAY_VERSION", required("DC_GATEWAY_VERSION")?)?;
        let voice_gateway_version =
            parse("DC_VOICE_GATEWAY_VERSION", required("DC_VOICE_GATEWAY_VERSION")?)?;
        let http_base_url = required("DC_HTTP_BASE_URL")?;
        let gateway_address = required("DC_GATEWAY_ADDRESS")?;

        let app_env = match required("APP_ENV")?.as_str() {
            "development" => AppEnv::Development,
            "production" => AppEnv::Production,
            other => return Err(ConfigError::Invalid("APP_ENV", other.to_owned())),
        };

        let bot_intents = match env::var("DC_BOT_INTENTS") {
            Ok(raw) => parse("DC_BOT_INTENTS", raw)?,
            Err(_) => DEFAULT_INTENTS,
        };

        let media_dir = env::var("DC_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./media"));

        Ok(Config {
            bot_token,
            application_id,
            public_key,
            gateway_version,
            voice_gateway_version,
            http_base_url,
            gateway_address,
            app_env,
            bot_intents,
            media_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_all() {
        env::set_var("DC_BOT_TOKEN", "token");
        env::set_var("DC_APPLICATION_ID", "1234");
        env::set_var("DC_PUBLIC_KEY", "pk");
        env::set_var("DC_GATEWAY_VERSION", "10");
        env::set_var("DC_VOICE_GATEWAY_VERSION", "8");
        env::set_var("DC_HTTP_BASE_URL", "https://discord.com/api/v10");
        env::set_var("DC_GATEWAY_ADDRESS", "wss://gateway.discord.gg");
        env::set_var("APP_ENV", "development");
    }

    // Environment access is process-global, so the cases run in one test.
    #[test]
    fn from_env_requires_every_key() {
        set_all();
        let config = Config::from_env().unwrap();
        assert_eq!(config.application_id.0, 1234);
        assert_eq!(config.bot_intents, DEFAULT_INTENTS);
        assert_eq!(config.app_env, AppEnv::Development);

        env::set_var("APP_ENV", "staging");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("APP_ENV", _))
        ));
        env::set_var("APP_ENV", "production");

        env::remove_var("DC_PUBLIC_KEY");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DC_PUBLIC_KEY"))
        ));
    }
}
