//! Environment-derived configuration. Vault credentials here are defaults;
//! the settings document colocated with the database overrides them.

use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
}

impl BodyEncoding {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "form" => BodyEncoding::Form,
            _ => BodyEncoding::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub vault_url: String,
    pub vault_identifiers: String,
    pub vault_password: String,
    pub request_timeout: Duration,
    pub verify_tls: bool,
    pub body_encoding: BodyEncoding,
    pub scheduler_enabled: bool,
    /// Extra directories scanned for custom plugin descriptors, on top of
    /// `<data_dir>/plugins`.
    pub plugin_dirs: Vec<PathBuf>,
    pub api_token: String,
    pub admin_token: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => raw.to_lowercase() != "false" && raw != "0",
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("PUNCHCARD_DATA_DIR", "./data"));
        let plugin_dirs = env_or("PUNCHCARD_PLUGIN_DIRS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        Self {
            data_dir,
            api_host: env_or("PUNCHCARD_API_HOST", "127.0.0.1"),
            api_port: env_or("PUNCHCARD_API_PORT", "8470").parse().unwrap_or(8470),
            vault_url: env_or("PUNCHCARD_VAULT_URL", ""),
            vault_identifiers: env_or("PUNCHCARD_VAULT_IDENTIFIER", ""),
            vault_password: env_or("PUNCHCARD_VAULT_PASSWORD", ""),
            request_timeout: Duration::from_secs(
                env_or("PUNCHCARD_REQUEST_TIMEOUT", "30").parse().unwrap_or(30),
            ),
            verify_tls: env_flag("PUNCHCARD_VERIFY_TLS", true),
            body_encoding: BodyEncoding::parse(&env_or("PUNCHCARD_BODY_ENCODING", "json")),
            scheduler_enabled: env_flag("PUNCHCARD_SCHEDULER_ENABLED", true),
            plugin_dirs,
            api_token: env_or("PUNCHCARD_API_TOKEN", ""),
            admin_token: env_or("PUNCHCARD_ADMIN_TOKEN", ""),
        }
    }

    /// Custom plugin descriptor directories, primary location first.
    pub fn custom_plugin_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.data_dir.join("plugins")];
        dirs.extend(self.plugin_dirs.iter().cloned());
        dirs
    }

    /// Masked view for the config endpoint; secrets keep only their edges.
    pub fn masked(&self) -> serde_json::Value {
        json!({
            "data_dir": self.data_dir,
            "api_host": self.api_host,
            "api_port": self.api_port,
            "vault_url": self.vault_url,
            "vault_identifier": mask(&self.vault_identifiers),
            "vault_password": mask(&self.vault_password),
            "request_timeout_secs": self.request_timeout.as_secs(),
            "verify_tls": self.verify_tls,
            "body_encoding": match self.body_encoding {
                BodyEncoding::Json => "json",
                BodyEncoding::Form => "form",
            },
            "scheduler_enabled": self.scheduler_enabled,
            "plugin_dirs": self.plugin_dirs,
            "api_token": mask(&self.api_token),
            "admin_token": mask(&self.admin_token),
        })
    }

    #[cfg(test)]
    pub fn for_tests<P: AsRef<std::path::Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            api_host: "127.0.0.1".into(),
            api_port: 0,
            vault_url: String::new(),
            vault_identifiers: String::new(),
            vault_password: String::new(),
            request_timeout: Duration::from_secs(5),
            verify_tls: true,
            body_encoding: BodyEncoding::Json,
            scheduler_enabled: false,
            plugin_dirs: Vec::new(),
            api_token: String::new(),
            admin_token: String::new(),
        }
    }
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}
