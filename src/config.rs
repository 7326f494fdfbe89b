use axum::http::HeaderValue;
use chrono::Duration;
use chrono_tz::Tz;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://db.sqlite3";
const DEFAULT_TIME_ZONE: &str = "America/Sao_Paulo";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];
const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 24 * 60;
const DEFAULT_REFRESH_TOKEN_MINUTES: i64 = 7 * 24 * 60;
const DEFAULT_SUPERUSER_USERNAME: &str = "admin";
const DEFAULT_SUPERUSER_EMAIL: &str = "admin@example.com";
const DEV_SECRET_KEY: &str = "insecure-development-secret-change-me";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct SuperuserSettings {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone)]
pub struct Settings {
    pub database_url: String,
    pub cors_allowed_origins: Vec<HeaderValue>,
    pub time_zone: Tz,
    pub secret_key: String,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub bind_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
    pub superuser: Option<SuperuserSettings>,
}

impl std::fmt::Debug for SuperuserSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperuserSettings")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &self.database_url)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("time_zone", &self.time_zone)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("bind_addr", &self.bind_addr)
            .field("log_dir", &self.log_dir)
            .field("superuser", &self.superuser)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let cors_allowed_origins = match get("CORS_ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(parse_origin)
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_CORS_ORIGINS
                .iter()
                .map(|origin| parse_origin(origin))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let time_zone_raw = get("TIME_ZONE").unwrap_or_else(|| DEFAULT_TIME_ZONE.to_string());
        let time_zone = time_zone_raw.parse::<Tz>().map_err(|err| ConfigError::Invalid {
            key: "TIME_ZONE",
            message: err.to_string(),
        })?;

        let secret_key = match get("SECRET_KEY") {
            Some(secret) => secret,
            None if cfg!(debug_assertions) => DEV_SECRET_KEY.to_string(),
            None => return Err(ConfigError::Missing("SECRET_KEY")),
        };

        let access_token_lifetime = parse_minutes(
            "ACCESS_TOKEN_LIFETIME_MINUTES",
            get("ACCESS_TOKEN_LIFETIME_MINUTES"),
            DEFAULT_ACCESS_TOKEN_MINUTES,
        )?;
        let refresh_token_lifetime = parse_minutes(
            "REFRESH_TOKEN_LIFETIME_MINUTES",
            get("REFRESH_TOKEN_LIFETIME_MINUTES"),
            DEFAULT_REFRESH_TOKEN_MINUTES,
        )?;

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::Invalid {
                key: "BIND_ADDR",
                message: err.to_string(),
            })?;

        let superuser = get("SUPERUSER_PASSWORD").map(|password| SuperuserSettings {
            username: get("SUPERUSER_USERNAME").unwrap_or_else(|| DEFAULT_SUPERUSER_USERNAME.to_string()),
            email: get("SUPERUSER_EMAIL").unwrap_or_else(|| DEFAULT_SUPERUSER_EMAIL.to_string()),
            password,
        });

        Ok(Self {
            database_url,
            cors_allowed_origins,
            time_zone,
            secret_key,
            access_token_lifetime,
            refresh_token_lifetime,
            bind_addr,
            log_dir: get("LOG_DIR").map(PathBuf::from),
            superuser,
        })
    }
}

fn parse_origin(raw: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(raw).map_err(|err| ConfigError::Invalid {
        key: "CORS_ALLOWED_ORIGINS",
        message: format!("{}: {}", raw, err),
    })
}

fn parse_minutes(key: &'static str, raw: Option<String>, default: i64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::minutes(default));
    };
    match raw.parse::<i64>() {
        Ok(minutes) if minutes > 0 => Ok(Duration::minutes(minutes)),
        _ => Err(ConfigError::Invalid {
            key,
            message: format!("expected a positive number of minutes, got {}", raw),
        }),
    }
}
