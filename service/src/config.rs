use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default WebSocket base address; topic paths are appended to it.
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000/ws";

/// Default base URL of the HTTP API used by the pull path.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base address of the push endpoint. Topic paths such as `ticket/{number}`
    /// are appended to it.
    #[arg(long, env, default_value = DEFAULT_WS_BASE_URL)]
    pub ws_base_url: String,

    /// Base URL of the HTTP API used for periodic ticket refreshes.
    #[arg(long, env, default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Seconds between keep-alive pings on an open connection
    #[arg(long, env, default_value_t = 30)]
    pub keep_alive_secs: u64,

    /// Delay in milliseconds before the first reconnection attempt. Each
    /// further attempt doubles it.
    #[arg(long, env, default_value_t = 1000)]
    pub reconnect_base_delay_ms: u64,

    /// Number of reconnection attempts before a topic is marked as failed
    #[arg(long, env, default_value_t = 5)]
    pub reconnect_max_attempts: u32,

    /// Timeout in seconds for establishing a push connection
    #[arg(long, env, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Seconds between pull refreshes of the tracked ticket
    #[arg(long, env, default_value_t = 30)]
    pub refresh_interval_secs: u64,

    /// Queue position at or below which proximity alerts are raised
    #[arg(long, env, default_value_t = 3)]
    pub proximity_threshold: u32,

    /// Timeout in seconds for pull requests
    #[arg(long, env, default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// Ticket number to track (e.g. T-2025-001)
    #[arg(short, long, env)]
    ticket: Option<String>,

    /// Service queue to watch
    #[arg(long, env)]
    service_id: Option<String>,

    /// Watch the administrative dashboard stream
    #[arg(long, env, default_value_t = false)]
    pub admin_dashboard: bool,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn ticket(&self) -> Option<&str> {
        self.ticket.as_deref()
    }

    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::parse_from(["queue_sync"]);

        assert_eq!(config.ws_base_url, DEFAULT_WS_BASE_URL);
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect_base_delay(), Duration::from_millis(1000));
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.proximity_threshold, 3);
        assert_eq!(config.ticket(), None);
        assert!(!config.admin_dashboard);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::parse_from([
            "queue_sync",
            "--ticket",
            "T-2025-001",
            "--reconnect-max-attempts",
            "3",
            "--runtime-env",
            "PRODUCTION",
            "--log-level-filter",
            "DEBUG",
        ]);

        assert_eq!(config.ticket(), Some("T-2025-001"));
        assert_eq!(config.reconnect_max_attempts, 3);
        assert!(config.is_production());
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }

    #[test]
    fn test_rust_env_parse_is_case_insensitive() {
        assert_eq!("Staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("nope".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
