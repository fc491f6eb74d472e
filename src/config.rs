//! Environment-driven configuration for the API server and the notifier.
//!
//! Both loaders take a lookup function instead of reading `std::env`
//! directly; the binaries pass `env_lookup` after dotenvy has populated the
//! process environment.

use crate::error::ConfigError;
use log::{info, warn};
use std::str::FromStr;
use std::time::Duration;

/// Loads an env file into the process environment if it exists. Variables
/// already set win over the file.
pub fn load_env_file(path: &str) {
    match dotenvy::from_filename(path) {
        Ok(_) => info!("Loaded {}", path),
        Err(_) => info!("Did not load {} file", path),
    }
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: key,
                value,
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                var: key,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    pub scopes: Vec<String>,
}

/// Raw key material for one signing/encryption pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionKeyMaterial {
    pub signing: Vec<u8>,
    pub encryption: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    /// Host name or IP to listen on; `0.0.0.0` when unset.
    pub host: String,
    pub port: u16,
    pub app_url: String,
    pub allowed_origins: Vec<String>,
    pub oauth: OAuthConfig,
    /// `None` when no current keys are configured; the server then generates
    /// per-process keys.
    pub session_keys: Option<SessionKeyMaterial>,
    pub previous_session_keys: Option<SessionKeyMaterial>,
}

impl ServerConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let database_url = match vars.get("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}",
                vars.required("POSTGRES_USERNAME")?,
                vars.required("POSTGRES_PASSWORD")?,
                vars.required("POSTGRES_ADDRESS")?
            ),
        };

        let host = vars
            .get("SERVER_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = vars.parsed("SERVER_PORT", 8000)?;

        let app_url = vars.required("APP_URL")?;
        let allowed_origins = match vars.get("CORS_ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            None => vec![app_url.trim_end_matches('/').to_string()],
        };

        let oauth = OAuthConfig {
            client_id: vars.required("OAUTH_CLIENT_ID")?,
            client_secret: vars.required("OAUTH_CLIENT_SECRET")?,
            redirect_url: vars.required("OAUTH_REDIRECT_URL")?,
            auth_url: vars.required("OAUTH_AUTH_URL")?,
            token_url: vars.required("OAUTH_TOKEN_URL")?,
            user_info_url: vars.required("OAUTH_USER_INFO_URL")?,
            scopes: vec!["openid".to_string(), "profile".to_string()],
        };

        let key_pair = |signing: &str, encryption: &str| {
            match (vars.get(signing), vars.get(encryption)) {
                (Some(signing), Some(encryption)) => Some(SessionKeyMaterial {
                    signing: signing.into_bytes(),
                    encryption: encryption.into_bytes(),
                }),
                (None, None) => None,
                _ => {
                    warn!("Only one of {} and {} is set, ignoring both", signing, encryption);
                    None
                }
            }
        };

        Ok(ServerConfig {
            database_url,
            host,
            port,
            app_url,
            allowed_origins,
            oauth,
            session_keys: key_pair("SESSION_SIGNING_KEY", "SESSION_ENCRYPTION_KEY"),
            previous_session_keys: key_pair("SESSION_SIGNING_KEY_OLD", "SESSION_ENCRYPTION_KEY_OLD"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub online_url: String,
    pub todos_url: String,
    pub webhook_url: String,
    pub chat_user_id: String,
    /// Sent as the `Cookie` header on requests to the todos endpoint.
    pub todos_cookie: Option<String>,
    pub checks_per_minute: u32,
    pub request_timeout: Duration,
    pub delete_after_notify: bool,
}

impl NotifierConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let checks_per_minute: u32 = vars.parsed("CHECKS_PER_MIN", 20)?;
        if checks_per_minute == 0 || checks_per_minute > 60 {
            return Err(ConfigError::Invalid {
                var: "CHECKS_PER_MIN",
                value: checks_per_minute.to_string(),
            });
        }

        Ok(NotifierConfig {
            online_url: vars.required("USER_ONLINE_URI")?,
            todos_url: vars
                .required("TODOS_URI")?
                .trim_end_matches('/')
                .to_string(),
            webhook_url: vars.required("DISCORD_WEBHOOK")?,
            chat_user_id: vars.required("DISCORD_USER_ID")?,
            todos_cookie: vars.get("TODOS_COOKIE"),
            checks_per_minute,
            request_timeout: Duration::from_secs(vars.parsed("REQUEST_TIMEOUT_SECS", 10)?),
            delete_after_notify: vars.flag("DELETE_AFTER_NOTIFY", true)?,
        })
    }

    /// Pause between two checks so that one run spans a minute.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(60 / u64::from(self.checks_per_minute))
    }
}
