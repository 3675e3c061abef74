//! Environment-driven configuration for the glcmd daemon and CLI.
//!
//! All knobs come from `GLCMD_*` variables. Invalid values fail loudly at
//! startup; `main` prints the diagnostic on stderr and exits non-zero.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const ENV_EMAIL: &str = "GLCMD_EMAIL";
pub const ENV_PASSWORD: &str = "GLCMD_PASSWORD";
pub const ENV_API_PORT: &str = "GLCMD_API_PORT";
pub const ENV_FETCH_INTERVAL: &str = "GLCMD_FETCH_INTERVAL";
pub const ENV_DB_PATH: &str = "GLCMD_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "GLCMD_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "GLCMD_LOG_FORMAT";
pub const ENV_API_URL: &str = "GLCMD_API_URL";

const DEFAULT_API_PORT: u16 = 8080;
const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_DB_PATH: &str = "./data/glcmd.db";
const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "'{other}' is not one of: debug | info | warn | error"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("'{other}' is not one of: text | json")),
        }
    }
}

/// Resolved daemon + CLI configuration.
#[derive(Clone)]
pub struct Config {
    pub email: String,
    pub password: String,
    pub api_port: u16,
    pub fetch_interval: Duration,
    pub db_path: PathBuf,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    /// Base URL the CLI talks to.
    pub api_url: String,
}

// Credentials must never leak through Debug output or logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("email", &"<redacted>")
            .field("password", &"<redacted>")
            .field("api_port", &self.api_port)
            .field("fetch_interval", &self.fetch_interval)
            .field("db_path", &self.db_path)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load from an explicit variable map (testable without touching the
    /// process environment).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |k: &'static str| vars.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

        let email = get(ENV_EMAIL)
            .ok_or(ConfigError::Missing(ENV_EMAIL))?
            .to_string();
        let password = get(ENV_PASSWORD)
            .ok_or(ConfigError::Missing(ENV_PASSWORD))?
            .to_string();

        let api_port = match get(ENV_API_PORT) {
            None => DEFAULT_API_PORT,
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| ConfigError::Invalid {
                    var: ENV_API_PORT,
                    reason: format!("'{raw}' is not a port in 1..65535"),
                })?,
        };

        let fetch_interval = match get(ENV_FETCH_INTERVAL) {
            None => DEFAULT_FETCH_INTERVAL,
            Some(raw) => parse_duration(raw).map_err(|reason| ConfigError::Invalid {
                var: ENV_FETCH_INTERVAL,
                reason,
            })?,
        };

        let db_path = get(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let log_level = match get(ENV_LOG_LEVEL) {
            None => LogLevel::Info,
            Some(raw) => LogLevel::parse(raw).map_err(|reason| ConfigError::Invalid {
                var: ENV_LOG_LEVEL,
                reason,
            })?,
        };

        let log_format = match get(ENV_LOG_FORMAT) {
            None => LogFormat::Text,
            Some(raw) => LogFormat::parse(raw).map_err(|reason| ConfigError::Invalid {
                var: ENV_LOG_FORMAT,
                reason,
            })?,
        };

        let api_url = get(ENV_API_URL)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Config {
            email,
            password,
            api_port,
            fetch_interval,
            db_path,
            log_level,
            log_format,
            api_url,
        })
    }
}

/// Parse a duration string of the form `30s`, `5m`, `2h` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let n: u64 = num
        .parse()
        .map_err(|_| format!("'{s}' has no leading number"))?;
    if n == 0 {
        return Err(format!("'{s}' must be a positive duration"));
    }

    match unit.trim() {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        other => Err(format!("unknown duration unit '{other}' (expected s|m|h)")),
    }
}
