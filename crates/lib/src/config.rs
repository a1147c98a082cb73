//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.circuit/config.json`) and environment.
//! Credentials and the public webhook URL can be supplied through env so they stay out of the file.

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sandbox domain used when no domain is configured.
pub const SANDBOX_DOMAIN: &str = "circuitsandbox.net";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Circuit platform connection settings.
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Embedded webhook server settings.
    #[serde(default)]
    pub webhooks: WebhookServerConfig,
}

/// Circuit domain, conversation and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitConfig {
    /// Platform domain (default "circuitsandbox.net").
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Full base URL override (scheme and host, e.g. "http://127.0.0.1:8080"). When unset, `https://<domain>` is used.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Conversation to post to and to filter inbound text items against.
    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub auth: CircuitAuthConfig,
}

/// How requests are authorized against the REST API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitAuthConfig {
    #[serde(default)]
    pub mode: CircuitAuthMode,

    /// Pre-encoded Basic credentials (base64 of "user:password"). Overridden by CIRCUIT_CREDENTIALS env.
    pub credentials: Option<String>,

    /// Used with `password` when `credentials` is absent.
    pub username: Option<String>,

    pub password: Option<String>,

    /// OAuth access token for bearer mode. Overridden by CIRCUIT_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitAuthMode {
    /// `Authorization: Basic <credentials>`.
    #[default]
    Basic,

    /// `Authorization: Bearer <token>`.
    Bearer,
}

/// Webhook server bind, port and the URL the platform should call back on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookServerConfig {
    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_webhook_bind")]
    pub bind: String,

    /// Port for inbound webhook calls (default 80).
    #[serde(default = "default_webhook_port")]
    pub port: u16,

    /// Externally reachable base URL of this server (e.g. "http://device.example.com:80"). Overridden by CIRCUIT_WEBHOOK_URL env.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_domain() -> String {
    SANDBOX_DOMAIN.to_string()
}

fn default_webhook_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    80
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            base_url: None,
            conversation_id: None,
            auth: CircuitAuthConfig::default(),
        }
    }
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            bind: default_webhook_bind(),
            port: default_webhook_port(),
            public_url: None,
        }
    }
}

/// Trimmed, non-empty env var.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Base URL of the platform without trailing slash: `circuit.baseUrl` or `https://<domain>`.
pub fn resolve_base_url(config: &CircuitConfig) -> String {
    match non_empty(config.base_url.as_ref()) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("https://{}", config.domain.trim()),
    }
}

/// Resolve the value of the Authorization header, or None when no credentials are configured.
/// Env CIRCUIT_CREDENTIALS / CIRCUIT_TOKEN override the file.
pub fn resolve_authorization(config: &CircuitConfig) -> Option<String> {
    let auth = &config.auth;
    match auth.mode {
        CircuitAuthMode::Basic => env_non_empty("CIRCUIT_CREDENTIALS")
            .or_else(|| non_empty(auth.credentials.as_ref()))
            .or_else(|| {
                let user = non_empty(auth.username.as_ref())?;
                let password = auth.password.clone().unwrap_or_default();
                Some(
                    base64::engine::general_purpose::STANDARD
                        .encode(format!("{}:{}", user, password)),
                )
            })
            .map(|c| format!("Basic {}", c)),
        CircuitAuthMode::Bearer => env_non_empty("CIRCUIT_TOKEN")
            .or_else(|| non_empty(auth.token.as_ref()))
            .map(|t| format!("Bearer {}", t)),
    }
}

/// Resolve the public webhook base URL: env CIRCUIT_WEBHOOK_URL overrides config. Trailing slash removed.
pub fn resolve_webhook_url(config: &Config) -> Option<String> {
    env_non_empty("CIRCUIT_WEBHOOK_URL")
        .or_else(|| non_empty(config.webhooks.public_url.as_ref()))
        .map(|u| u.trim_end_matches('/').to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CIRCUIT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".circuit").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, CIRCUIT_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write a default `config.json` if missing. Returns the directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }
    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_sandbox_and_port_80() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.circuit.domain, SANDBOX_DOMAIN);
        assert_eq!(config.webhooks.port, 80);
        assert_eq!(config.webhooks.bind, "0.0.0.0");
        assert_eq!(config.circuit.auth.mode, CircuitAuthMode::Basic);
    }

    #[test]
    fn base_url_from_domain_or_override() {
        let mut c = CircuitConfig::default();
        assert_eq!(resolve_base_url(&c), "https://circuitsandbox.net");
        c.domain = "eu.yourcircuit.com".to_string();
        assert_eq!(resolve_base_url(&c), "https://eu.yourcircuit.com");
        c.base_url = Some("http://127.0.0.1:9000/".to_string());
        assert_eq!(resolve_base_url(&c), "http://127.0.0.1:9000");
    }

    #[test]
    fn basic_auth_encodes_username_and_password() {
        let mut c = CircuitConfig::default();
        c.auth.username = Some("bot@example.com".to_string());
        c.auth.password = Some("secret".to_string());
        if std::env::var("CIRCUIT_CREDENTIALS").is_err() {
            assert_eq!(
                resolve_authorization(&c).as_deref(),
                Some("Basic Ym90QGV4YW1wbGUuY29tOnNlY3JldA==")
            );
        }
    }

    #[test]
    fn basic_auth_prefers_preencoded_credentials() {
        let mut c = CircuitConfig::default();
        c.auth.credentials = Some(" dXNlcjpwYXNz ".to_string());
        c.auth.username = Some("ignored".to_string());
        if std::env::var("CIRCUIT_CREDENTIALS").is_err() {
            assert_eq!(
                resolve_authorization(&c).as_deref(),
                Some("Basic dXNlcjpwYXNz")
            );
        }
    }

    #[test]
    fn bearer_auth_without_token_is_none() {
        let mut c = CircuitConfig::default();
        c.auth.mode = CircuitAuthMode::Bearer;
        c.auth.credentials = Some("dXNlcjpwYXNz".to_string());
        if std::env::var("CIRCUIT_TOKEN").is_err() {
            assert_eq!(resolve_authorization(&c), None);
            c.auth.token = Some("abc".to_string());
            assert_eq!(resolve_authorization(&c).as_deref(), Some("Bearer abc"));
        }
    }

    #[test]
    fn init_writes_default_config_once() {
        let dir = std::env::temp_dir().join(format!("circuit-config-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        assert_eq!(init_config_dir(&path).unwrap(), dir);
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.circuit.domain, SANDBOX_DOMAIN);

        std::fs::write(&path, r#"{"circuit":{"conversationId":"kept"}}"#).unwrap();
        init_config_dir(&path).unwrap();
        let (config, _) = load_config(Some(path)).unwrap();
        assert_eq!(config.circuit.conversation_id.as_deref(), Some("kept"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir()
            .join(format!("circuit-missing-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, _) = load_config(Some(path)).unwrap();
        assert_eq!(config.webhooks.port, 80);
        assert!(config.circuit.conversation_id.is_none());
    }

    #[test]
    fn parses_camel_case_file() {
        let json = r#"{
            "circuit": {
                "domain": "circuitsandbox.net",
                "conversationId": "conv-1",
                "auth": { "mode": "bearer", "token": "t" }
            },
            "webhooks": { "port": 8080, "publicUrl": "http://device.local:8080/" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.circuit.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(config.circuit.auth.mode, CircuitAuthMode::Bearer);
        assert_eq!(config.webhooks.port, 8080);
        if std::env::var("CIRCUIT_WEBHOOK_URL").is_err() {
            assert_eq!(
                resolve_webhook_url(&config).as_deref(),
                Some("http://device.local:8080")
            );
        }
    }
}
