//! Configuration loading and types for swiftkit.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `swift` section describes how to reach the
//! account endpoint; the `logging` section is consumed by
//! [`init_logging`] for applications that want the crate's default
//! subscriber.

use serde::Deserialize;
use std::path::Path;

/// Environment variable consulted when `swift.auth_token` is empty.
pub const AUTH_TOKEN_ENV: &str = "OS_AUTH_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Swift endpoint settings.
    pub swift: SwiftConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Swift account endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SwiftConfig {
    /// Account URL, e.g. `https://swift.example.com/v1/AUTH_project`.
    pub storage_url: String,

    /// Pre-acquired token sent as `X-Auth-Token`.  Token acquisition
    /// itself is out of scope; an empty value falls back to
    /// `OS_AUTH_TOKEN`.
    #[serde(default)]
    pub auth_token: String,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl SwiftConfig {
    /// Resolve the auth token from config, then from the environment.
    ///
    /// Returns `None` when neither is set (e.g. for temp-URL-only use or
    /// a proxy that injects credentials itself).
    pub fn resolve_auth_token(&self) -> Option<String> {
        if !self.auth_token.is_empty() {
            return Some(self.auth_token.clone());
        }
        std::env::var(AUTH_TOKEN_ENV)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_timeout() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("swiftkit/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Install a global `tracing` subscriber according to `logging`.
///
/// `RUST_LOG` takes precedence over the configured level.  Intended for
/// binaries and tests; the library itself never calls this.
pub fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_with_defaults() {
        let file = write_config(
            "swift:\n  storage_url: https://swift.example.com/v1/AUTH_test\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.swift.storage_url,
            "https://swift.example.com/v1/AUTH_test"
        );
        assert_eq!(config.swift.timeout_seconds, 300);
        assert!(config.swift.user_agent.starts_with("swiftkit/"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_load_config_full() {
        let file = write_config(
            "swift:\n  storage_url: http://localhost:8080/v1/AUTH_x\n  auth_token: tok\n  timeout_seconds: 5\n  user_agent: ua\nlogging:\n  level: debug\n  format: json\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.swift.auth_token, "tok");
        assert_eq!(config.swift.timeout_seconds, 5);
        assert_eq!(config.swift.user_agent, "ua");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_load_config_missing_swift_section() {
        let file = write_config("logging:\n  level: warn\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/swiftkit.yaml").is_err());
    }

    #[test]
    fn test_resolve_auth_token_prefers_config() {
        let swift = SwiftConfig {
            storage_url: "http://localhost/v1/AUTH_x".into(),
            auth_token: "from-config".into(),
            timeout_seconds: 1,
            user_agent: "ua".into(),
        };
        assert_eq!(swift.resolve_auth_token().as_deref(), Some("from-config"));
    }
}
