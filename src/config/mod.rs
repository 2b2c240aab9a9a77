use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use anyhow::{Result, Context};
use reqwest::header::HeaderValue;
use url::Url;

pub const DEFAULT_ORIGINS: [&str; 3] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "https://educational-assistant-frontend.onrender.com",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub llm_settings: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_name() -> String { "Educational Assistant".to_string() }
fn default_listen_addr() -> String { "0.0.0.0:8000".to_string() }
fn default_origins() -> Vec<String> { DEFAULT_ORIGINS.iter().map(|o| o.to_string()).collect() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_timeout() -> u64 { 60 }

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: default_name(),
            server: ServerSettings::default(),
            llm_settings: LlmSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: default_origins(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout: default_timeout(),
        }
    }
}

impl LlmSettings {
    /// The configured API key, or `None` when it is missing or blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Override the API key. Blank keys are ignored.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.llm_settings.api_key = Some(key);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_listen_addr(&self.server.listen_addr)?;

        for origin in &self.server.allowed_origins {
            let parsed = Url::parse(origin)
                .with_context(|| format!("Invalid CORS origin: {}", origin))?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                anyhow::bail!("CORS origin must be an http(s) origin: {}", origin);
            }
            if parsed.path() != "/" || origin.ends_with('/') {
                anyhow::bail!("CORS origin must not contain a path: {}", origin);
            }
        }

        let base_url = Url::parse(&self.llm_settings.base_url)
            .with_context(|| format!("Invalid LLM base URL: {}", self.llm_settings.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("LLM base URL must use http or https: {}", self.llm_settings.base_url);
        }

        if let Some(key) = self.llm_settings.api_key() {
            if HeaderValue::from_str(key).is_err() {
                anyhow::bail!("API key contains characters that cannot be sent in an HTTP header");
            }
        }

        if self.llm_settings.timeout == 0 {
            anyhow::bail!("timeout must be greater than zero");
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Configuration {
            name: "Example Educational Assistant".to_string(),
            server: ServerSettings::default(),
            llm_settings: LlmSettings {
                api_key: Some("your-gemini-api-key".to_string()),
                ..LlmSettings::default()
            },
        }
    }
}

/// Accepts `ip:port` or `host:port`, as `TcpListener::bind` does.
fn validate_listen_addr(addr: &str) -> Result<()> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("Invalid listen address (expected host:port): {}", addr))?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        anyhow::bail!("Invalid listen address host: {}", addr);
    }
    port.parse::<u16>()
        .with_context(|| format!("Invalid listen address port: {}", addr))?;

    Ok(())
}
