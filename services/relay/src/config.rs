use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_REALTIME_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_RELAY_PATH: &str = "/Assistant";
pub const DEFAULT_PENDING_QUEUE_CAPACITY: usize = 256;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// What happens when a local message arrives while the pending queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the incoming message and tell the local side.
    RejectNewest,
    /// Tell the local side, then tear down both connections.
    CloseBridge,
}

/// How the relay answers a function call naming an action it does not know.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownFunctionPolicy {
    /// Log a warning and send nothing upstream. The model's turn stays open.
    Ignore,
    /// Send a failure result followed by a response trigger.
    Report,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub relay_path: String,
    pub pending_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub unknown_function_policy: UnknownFunctionPolicy,
    pub handshake_timeout: Option<Duration>,
    pub open_command: String,
    pub browser_app: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("KEY"))
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url =
            std::env::var("REALTIME_URL").unwrap_or_else(|_| DEFAULT_REALTIME_URL.to_string());
        if !realtime_url.starts_with("ws://") && !realtime_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "REALTIME_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", realtime_url),
            ));
        }

        let relay_path =
            std::env::var("RELAY_PATH").unwrap_or_else(|_| DEFAULT_RELAY_PATH.to_string());
        if !relay_path.starts_with('/') || relay_path == "/health" {
            return Err(ConfigError::InvalidValue(
                "RELAY_PATH".to_string(),
                format!("'{}' must start with '/' and differ from /health", relay_path),
            ));
        }

        let pending_queue_capacity = match std::env::var("PENDING_QUEUE_CAPACITY") {
            Ok(value) => match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "PENDING_QUEUE_CAPACITY".to_string(),
                        format!("'{}' is not a positive integer", value),
                    ));
                }
            },
            Err(_) => DEFAULT_PENDING_QUEUE_CAPACITY,
        };

        let overflow_str =
            std::env::var("QUEUE_OVERFLOW_POLICY").unwrap_or_else(|_| "reject_newest".to_string());
        let overflow_policy = match overflow_str.to_lowercase().as_str() {
            "reject_newest" => OverflowPolicy::RejectNewest,
            "close_bridge" => OverflowPolicy::CloseBridge,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "QUEUE_OVERFLOW_POLICY".to_string(),
                    format!("'{}' is not one of reject_newest, close_bridge", overflow_str),
                ));
            }
        };

        let unknown_str =
            std::env::var("UNKNOWN_FUNCTION_POLICY").unwrap_or_else(|_| "ignore".to_string());
        let unknown_function_policy = match unknown_str.to_lowercase().as_str() {
            "ignore" => UnknownFunctionPolicy::Ignore,
            "report" => UnknownFunctionPolicy::Report,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "UNKNOWN_FUNCTION_POLICY".to_string(),
                    format!("'{}' is not one of ignore, report", unknown_str),
                ));
            }
        };

        let handshake_timeout = match std::env::var("HANDSHAKE_TIMEOUT_SECS") {
            Ok(value) => Some(value.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                ConfigError::InvalidValue("HANDSHAKE_TIMEOUT_SECS".to_string(), e.to_string())
            })?),
            Err(_) => None,
        };

        let open_command = std::env::var("OPEN_COMMAND").unwrap_or_else(|_| "open".to_string());
        let browser_app = std::env::var("BROWSER_APP")
            .unwrap_or_else(|_| jarvis_core::actions::DEFAULT_BROWSER.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_url,
            relay_path,
            pending_queue_capacity,
            overflow_policy,
            unknown_function_policy,
            handshake_timeout,
            open_command,
            browser_app,
            log_level,
        })
    }
}
