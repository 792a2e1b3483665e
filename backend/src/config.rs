//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::{CorsOptions, TransportOptions, DEFAULT_MAX_BODY_BYTES};

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    cors: CorsOptions,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    sessions: SessionsConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_path")]
    path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            path: default_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransportConfig {
    #[serde(default)]
    stateless: bool,
    #[serde(default)]
    json_response: bool,
    #[serde(default = "default_keep_alive_secs")]
    keep_alive_secs: u64,
    /// 0 waits for JSON-mode responses without a limit
    #[serde(default = "default_json_response_timeout_secs")]
    json_response_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stateless: false,
            json_response: false,
            keep_alive_secs: default_keep_alive_secs(),
            json_response_timeout_secs: default_json_response_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StorageConfig {
    /// Directory for per-session JSON state files
    session_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionsConfig {
    #[serde(default = "default_max_idle_secs")]
    max_idle_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: default_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    streamwire_types::DEFAULT_PORT
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_path() -> String {
    "/mcp".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_json_response_timeout_secs() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_max_idle_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Address to bind
    pub host: String,
    /// Route of the MCP endpoint
    pub path: String,
    /// Serve without sessions: every POST gets a fresh transport
    pub stateless: bool,
    /// Answer POSTed requests with a JSON body instead of an SSE stream
    pub json_response: bool,
    pub keep_alive_secs: u64,
    pub json_response_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub cors: CorsOptions,
    /// Directory for session state files (persistence is off when unset)
    pub session_dir: Option<PathBuf>,
    pub max_idle_secs: u64,
    pub sweep_interval_secs: u64,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.streamwire.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/streamwire/ on Linux)
    ///
    /// Environment variables use the `STREAMWIRE_` prefix with `__` between
    /// section and key, e.g. `STREAMWIRE_TRANSPORT__JSON_RESPONSE=true`.
    pub fn from_figment(
        port: Option<u16>,
        path: Option<String>,
        json_response: Option<bool>,
        stateless: Option<bool>,
        session_dir: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        // Find config file paths
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".streamwire.toml"));
        let user_config = directories::ProjectDirs::from("", "", "streamwire")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // Keys contain underscores, so only the double underscore nests
        figment = figment.merge(Env::prefixed("STREAMWIRE_").split("__"));

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref route) = path {
            figment = figment.merge(Serialized::default("server.path", route));
        }
        if let Some(json) = json_response {
            figment = figment.merge(Serialized::default("transport.json_response", json));
        }
        if let Some(stateless) = stateless {
            figment = figment.merge(Serialized::default("transport.stateless", stateless));
        }
        if let Some(ref dir) = session_dir {
            figment = figment.merge(Serialized::default("storage.session_dir", dir));
        }

        let config_file: ConfigFile = figment.extract()?;
        Ok(config_file.into())
    }

    /// Socket address to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Template options for every transport created by the host.
    pub fn transport_options(&self) -> TransportOptions {
        let base = if self.stateless {
            TransportOptions::stateless()
        } else {
            TransportOptions::default()
        };

        let timeout = (self.json_response_timeout_secs > 0)
            .then(|| Duration::from_secs(self.json_response_timeout_secs));

        TransportOptions {
            max_body_bytes: self.max_body_bytes,
            ..base
        }
        .with_json_response(self.json_response)
        .with_cors(self.cors.clone())
        .with_keep_alive_interval(Duration::from_secs(self.keep_alive_secs))
        .with_json_response_timeout(timeout)
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            port: file.server.port,
            host: file.server.host,
            path: file.server.path,
            stateless: file.transport.stateless,
            json_response: file.transport.json_response,
            keep_alive_secs: file.transport.keep_alive_secs,
            json_response_timeout_secs: file.transport.json_response_timeout_secs,
            max_body_bytes: file.transport.max_body_bytes,
            cors: file.cors,
            session_dir: file.storage.session_dir,
            max_idle_secs: file.sessions.max_idle_secs,
            sweep_interval_secs: file.sessions.sweep_interval_secs,
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "STREAMWIRE_SERVER__PORT",
        "STREAMWIRE_TRANSPORT__JSON_RESPONSE",
        "STREAMWIRE_CORS__ORIGIN",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    /// Load config from inside `dir`, restoring the working directory after.
    fn load_in(
        dir: &TempDir,
        port: Option<u16>,
        json_response: Option<bool>,
    ) -> anyhow::Result<Config> {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let config = Config::from_figment(port, None, json_response, None, None);
        let _ = std::env::set_current_dir(original_dir);
        config
    }

    #[test]
    #[serial]
    fn test_from_figment_defaults() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();

        let config = load_in(&temp_dir, None, None).unwrap();

        assert_eq!(config.port, streamwire_types::DEFAULT_PORT);
        assert_eq!(config.path, "/mcp");
        assert!(!config.stateless);
        assert!(!config.json_response);
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.json_response_timeout_secs, 60);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.session_dir.is_none());
        assert_eq!(config.cors, CorsOptions::default());
    }

    #[test]
    #[serial]
    fn test_from_figment_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let config_content = r#"
[server]
port = 7777
path = "/rpc"

[transport]
json_response = true
json_response_timeout_secs = 0

[cors]
origin = "https://app.example.com"
max_age = 600

[storage]
session_dir = "/var/lib/streamwire"
"#;
        fs::write(temp_dir.path().join(".streamwire.toml"), config_content).unwrap();

        let config = load_in(&temp_dir, None, None).unwrap();

        assert_eq!(config.port, 7777);
        assert_eq!(config.path, "/rpc");
        assert!(config.json_response);
        assert_eq!(config.cors.origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(config.cors.max_age, Some(600));
        assert_eq!(
            config.session_dir,
            Some(PathBuf::from("/var/lib/streamwire"))
        );

        let options = config.transport_options();
        assert!(options.enable_json_response);
        assert_eq!(options.json_response_timeout, None);
    }

    #[test]
    #[serial]
    fn test_from_figment_env_vars_override_config_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".streamwire.toml"),
            "[server]\nport = 7777\n[transport]\njson_response = false",
        )
        .unwrap();

        std::env::set_var("STREAMWIRE_SERVER__PORT", "8888");
        std::env::set_var("STREAMWIRE_TRANSPORT__JSON_RESPONSE", "true");
        let config = load_in(&temp_dir, None, None);
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.port, 8888);
        assert!(config.json_response);
    }

    #[test]
    #[serial]
    fn test_from_figment_cli_overrides_env_and_config() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(".streamwire.toml"), "[server]\nport = 7777").unwrap();

        std::env::set_var("STREAMWIRE_SERVER__PORT", "8888");
        std::env::set_var("STREAMWIRE_TRANSPORT__JSON_RESPONSE", "true");
        let config = load_in(&temp_dir, Some(9999), Some(false));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.port, 9999);
        assert!(!config.json_response);
    }

    #[test]
    fn test_transport_options_from_config() {
        let config = Config {
            stateless: true,
            keep_alive_secs: 5,
            max_body_bytes: 1024,
            ..Config::default()
        };

        let options = config.transport_options();
        assert!(options.session_id_generator.is_none());
        assert_eq!(options.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(options.json_response_timeout, Some(Duration::from_secs(60)));
        assert_eq!(options.max_body_bytes, 1024);

        let stateful = Config::default().transport_options();
        assert!(stateful.session_id_generator.is_some());
        assert_eq!(Config::default().bind_address(), "0.0.0.0:8080");
    }
}
