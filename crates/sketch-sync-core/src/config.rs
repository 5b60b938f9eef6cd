//! Configuration loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level sketch-sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allow cross-origin requests from browser canvases (default: true).
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_port() -> u16 {
    3031
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file backing the element store. Absent = memory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// External AI action source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Endpoint that turns `{prompt, image, elements}` into an action plan.
    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_agent_timeout() -> u64 {
    60
}

impl AgentConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Headless viewer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_url")]
    pub url: String,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Give up after this many consecutive failed attempts. Absent = retry forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: None,
        }
    }
}

fn default_client_url() -> String {
    format!("ws://127.0.0.1:{}/ws", default_port())
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "sketch_sync_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Return `direct` if set and non-empty, else the value of the `env_var` environment variable.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Base data directory: `~/.sketch_sync`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sketch_sync")
}

fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::SyncError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::SyncError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_enabled(&self) -> bool {
        self.server.as_ref().map(|s| s.cors).unwrap_or(true)
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .map(PathBuf::from)
    }

    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    pub fn log_format(&self) -> &str {
        self.logging
            .as_ref()
            .map(|l| l.format.as_str())
            .unwrap_or("plain")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_SS_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_SS_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_SS_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_SS_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#)); // empty string
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 3031);
        assert_eq!(config.bind_addr(), "0.0.0.0");
        assert!(config.cors_enabled());
        assert!(config.store_path().is_none());
        assert_eq!(config.client().reconnect_delay_ms, 3000);
        assert_eq!(config.log_format(), "plain");
    }

    #[test]
    fn test_load_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are fine
                server: { port: 4000 },
                store: { path: "/tmp/elements.json" },
                agent: { endpoint: "http://localhost:9000/plan" },
                client: { reconnect_delay_ms: 500, max_reconnect_attempts: 3 },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_port(), 4000);
        assert_eq!(config.store_path(), Some(PathBuf::from("/tmp/elements.json")));
        assert_eq!(config.agent.as_ref().unwrap().timeout_secs, 60);
        let client = config.client();
        assert_eq!(client.reconnect_delay_ms, 500);
        assert_eq!(client.max_reconnect_attempts, Some(3));
        assert_eq!(client.url, "ws://127.0.0.1:3031/ws");
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("/definitely/not/here.json")).unwrap();
        assert!(config.server.is_none());
    }

    #[test]
    fn test_agent_resolve_api_key() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_SS_AGENT_KEY", "from-env") };
        let agent = AgentConfig {
            endpoint: "http://localhost".into(),
            api_key: None,
            api_key_env: Some("TEST_SS_AGENT_KEY".into()),
            timeout_secs: 5,
        };
        assert_eq!(agent.resolve_api_key(), Some("from-env".into()));
        unsafe { std::env::remove_var("TEST_SS_AGENT_KEY") };
    }
}
