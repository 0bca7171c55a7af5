//! Process settings read from the environment (`.env` is loaded by the binary).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{name}: invalid value '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// JSON metadata file; `None` reads the `_sys_*` tables.
    pub schema_path: Option<PathBuf>,
    /// Raw `API_TOKENS` list, parsed by [`crate::auth::TokenTable::parse`].
    pub api_tokens: String,
    pub default_language: String,
    pub db_timeout: Duration,
    pub body_limit_bytes: usize,
    pub bruteforce_max_attempts: u32,
    pub bruteforce_window: Duration,
    /// 0 disables log pruning.
    pub logs_keep_days: u64,
    pub files_keep_days_deleted: u64,
    pub files_path: PathBuf,
    pub temp_path: PathBuf,
    pub cleanup_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/schema_api".into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            schema_path: None,
            api_tokens: String::new(),
            default_language: "en_us".into(),
            db_timeout: Duration::from_secs(60),
            body_limit_bytes: 2 * 1024 * 1024,
            bruteforce_max_attempts: 50,
            bruteforce_window: Duration::from_secs(3600),
            logs_keep_days: 90,
            files_keep_days_deleted: 90,
            files_path: PathBuf::from("data/files"),
            temp_path: PathBuf::from("data/temp"),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any name -> value lookup; unset or empty names keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut s = Settings::default();

        if let Some(v) = get("DATABASE_URL") {
            s.database_url = v;
        }
        if let Some(v) = get("BIND_ADDR") {
            s.bind_addr = parse_value("BIND_ADDR", &v)?;
        }
        s.schema_path = get("SCHEMA_PATH").map(PathBuf::from);
        if let Some(v) = get("API_TOKENS") {
            s.api_tokens = v;
        }
        if let Some(v) = get("DEFAULT_LANGUAGE") {
            s.default_language = v;
        }
        if let Some(v) = get("DB_TIMEOUT_DATA_REST") {
            s.db_timeout = Duration::from_secs(positive("DB_TIMEOUT_DATA_REST", &v)?);
        }
        if let Some(v) = get("BODY_LIMIT_BYTES") {
            s.body_limit_bytes = positive("BODY_LIMIT_BYTES", &v)? as usize;
        }
        if let Some(v) = get("BRUTEFORCE_MAX_ATTEMPTS") {
            s.bruteforce_max_attempts = positive("BRUTEFORCE_MAX_ATTEMPTS", &v)? as u32;
        }
        if let Some(v) = get("BRUTEFORCE_WINDOW_SECS") {
            s.bruteforce_window = Duration::from_secs(positive("BRUTEFORCE_WINDOW_SECS", &v)?);
        }
        if let Some(v) = get("LOGS_KEEP_DAYS") {
            s.logs_keep_days = parse_value("LOGS_KEEP_DAYS", &v)?;
        }
        if let Some(v) = get("FILES_KEEP_DAYS_DELETED") {
            s.files_keep_days_deleted = parse_value("FILES_KEEP_DAYS_DELETED", &v)?;
        }
        if let Some(v) = get("FILES_PATH") {
            s.files_path = PathBuf::from(v);
        }
        if let Some(v) = get("TEMP_PATH") {
            s.temp_path = PathBuf::from(v);
        }
        if let Some(v) = get("CLEANUP_INTERVAL_SECS") {
            s.cleanup_interval = Duration::from_secs(positive("CLEANUP_INTERVAL_SECS", &v)?);
        }
        Ok(s)
    }
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| SettingsError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive(name: &'static str, value: &str) -> Result<u64, SettingsError> {
    let n: u64 = parse_value(name, value)?;
    if n == 0 {
        return Err(SettingsError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be > 0".into(),
        });
    }
    Ok(n)
}
