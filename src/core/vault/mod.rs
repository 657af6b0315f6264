//! Client for the remote session vault. Payloads are fetched per identifier
//! from `<vault_url>/get/<identifier>` and decrypted with the legacy
//! CryptoJS-compatible scheme in [`crate::core::crypto`].

pub mod sync;

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::crypto;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub url: String,
    /// Comma-separated identifier list; an explicit sync argument overrides it.
    pub identifiers: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifierResult {
    pub identifier: String,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_storage_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

impl IdentifierResult {
    fn failed(identifier: &str, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.to_string(),
            ok: false,
            message: message.into(),
            cookie_data: None,
            local_storage_data: None,
            hash: None,
            changed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub ok: bool,
    pub message: String,
    pub results: Vec<IdentifierResult>,
}

impl SyncReport {
    fn not_configured(message: &str) -> Self {
        Self {
            ok: false,
            message: message.to_string(),
            results: Vec::new(),
        }
    }
}

pub struct VaultClient {
    http: reqwest::Client,
}

impl VaultClient {
    pub fn new(timeout: Duration, verify_tls: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self { http })
    }

    /// Fetch the encrypted payload for one identifier. Network failures and
    /// non-JSON responses are soft: the identifier is simply reported empty.
    pub async fn fetch(&self, base_url: &str, identifier: &str) -> Option<Value> {
        let url = format!("{}/get/{}", base_url.trim_end_matches('/'), identifier);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Vault fetch failed for {}: {}", identifier, e);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                "Vault returned {} for identifier {}",
                response.status(),
                identifier
            );
            return None;
        }
        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Vault response for {} was not JSON: {}", identifier, e);
                None
            }
        }
    }

    /// Sync one identifier (or every configured one). Missing configuration
    /// is a descriptive `ok=false` report, never an error; per-identifier
    /// failures leave the rest of the batch running.
    pub async fn sync(&self, config: &VaultConfig, identifier: Option<&str>) -> SyncReport {
        if config.url.trim().is_empty() {
            return SyncReport::not_configured("Vault URL not configured");
        }
        let identifiers: Vec<String> = match identifier {
            Some(id) if !id.trim().is_empty() => vec![id.trim().to_string()],
            _ => config
                .identifiers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        };
        if identifiers.is_empty() {
            return SyncReport::not_configured("Vault identifier not configured");
        }
        if config.password.is_empty() {
            return SyncReport::not_configured("Vault password not configured");
        }

        let mut results = Vec::with_capacity(identifiers.len());
        for id in &identifiers {
            results.push(self.sync_one(config, id).await);
        }
        let ok = results.iter().any(|r| r.ok);
        let message = if ok {
            "Vault sync completed".to_string()
        } else {
            "No identifier yielded usable data".to_string()
        };
        SyncReport { ok, message, results }
    }

    async fn sync_one(&self, config: &VaultConfig, identifier: &str) -> IdentifierResult {
        let Some(body) = self.fetch(&config.url, identifier).await else {
            return IdentifierResult::failed(identifier, "No payload from vault");
        };
        let Some(encrypted) = extract_encrypted(&body) else {
            return IdentifierResult::failed(identifier, "Payload carried no encrypted data");
        };
        let Some(payload) = decrypt_payload(&encrypted, identifier, &config.password) else {
            return IdentifierResult::failed(identifier, "Could not decrypt payload");
        };

        let cookie_data = payload
            .get("cookie_data")
            .cloned()
            .unwrap_or_else(empty_object);
        let local_storage_data = payload
            .get("local_storage_data")
            .cloned()
            .unwrap_or_else(empty_object);
        IdentifierResult {
            identifier: identifier.to_string(),
            ok: true,
            message: "Decrypted".to_string(),
            cookie_data: Some(cookie_data),
            local_storage_data: Some(local_storage_data),
            hash: None,
            changed: None,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn extract_encrypted(body: &Value) -> Option<String> {
    match body {
        Value::Object(map) => map
            .get("encrypted")
            .and_then(Value::as_str)
            .map(String::from),
        Value::String(raw) => Some(raw.clone()),
        _ => None,
    }
}

/// Vault clients disagree on whether the key seed joins identifier and
/// password with a `-`; both derivations are tried, first JSON parse wins.
fn passphrase_variants(identifier: &str, password: &str) -> [String; 2] {
    let digest16 = |input: String| -> String {
        let digest = hex::encode(Md5::digest(input.as_bytes()));
        digest[..16].to_string()
    };
    [
        digest16(format!("{identifier}-{password}")),
        digest16(format!("{identifier}{password}")),
    ]
}

fn decrypt_payload(encrypted: &str, identifier: &str, password: &str) -> Option<Value> {
    for passphrase in passphrase_variants(identifier, password) {
        match crypto::decrypt(encrypted, passphrase.as_bytes()) {
            Ok(plaintext) => {
                if let Ok(value) = serde_json::from_slice::<Value>(&plaintext) {
                    return Some(value);
                }
                debug!("Decrypted payload for {} was not JSON", identifier);
            }
            Err(e) => debug!("Decrypt variant failed for {}: {}", identifier, e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn client() -> VaultClient {
        VaultClient::new(Duration::from_secs(5), true).unwrap()
    }

    fn encrypt_for(
        identifier: &str,
        password: &str,
        payload: &Value,
        with_separator: bool,
    ) -> String {
        let seed = if with_separator {
            format!("{identifier}-{password}")
        } else {
            format!("{identifier}{password}")
        };
        let passphrase = hex::encode(Md5::digest(seed.as_bytes()))[..16].to_string();
        crypto::encrypt(payload.to_string().as_bytes(), passphrase.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn sync_without_url_is_soft_failure() {
        let config = VaultConfig {
            url: "".into(),
            identifiers: "abc".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(!report.ok);
        assert_eq!(report.message, "Vault URL not configured");
    }

    #[tokio::test]
    async fn sync_without_identifier_is_soft_failure() {
        let config = VaultConfig {
            url: "https://vault.example.com".into(),
            identifiers: " , ".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(!report.ok);
        assert_eq!(report.message, "Vault identifier not configured");
    }

    #[tokio::test]
    async fn sync_without_password_is_soft_failure() {
        let config = VaultConfig {
            url: "https://vault.example.com".into(),
            identifiers: "a,b".into(),
            password: "".into(),
        };
        let report = client().sync(&config, Some("only-this")).await;
        assert!(!report.ok);
        assert_eq!(report.message, "Vault password not configured");
    }

    #[tokio::test]
    async fn sync_decrypts_separator_variant() {
        let payload = json!({
            "cookie_data": {"example.com": [{"name": "sid", "value": "1"}]},
            "local_storage_data": {}
        });
        let encrypted = encrypt_for("uuid-1", "pw", &payload, true);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get/uuid-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"encrypted": encrypted}).to_string())
            .create_async()
            .await;

        let config = VaultConfig {
            url: server.url(),
            identifiers: "uuid-1".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(report.ok, "{}", report.message);
        let result = &report.results[0];
        assert!(result.ok);
        assert_eq!(
            result.cookie_data.as_ref().unwrap()["example.com"][0]["name"],
            "sid"
        );
    }

    #[tokio::test]
    async fn sync_falls_back_to_no_separator_variant() {
        let payload = json!({"cookie_data": {}, "local_storage_data": {"a.com": {"k": "v"}}});
        let encrypted = encrypt_for("uuid-2", "pw", &payload, false);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get/uuid-2")
            .with_status(200)
            .with_body(json!({"encrypted": encrypted}).to_string())
            .create_async()
            .await;

        let config = VaultConfig {
            url: server.url(),
            identifiers: "uuid-2".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(report.ok);
        assert_eq!(
            report.results[0].local_storage_data.as_ref().unwrap()["a.com"]["k"],
            "v"
        );
    }

    #[tokio::test]
    async fn bad_payload_fails_that_identifier_only() {
        let payload = json!({"cookie_data": {}});
        let good = encrypt_for("good-id", "pw", &payload, true);

        let mut server = mockito::Server::new_async().await;
        let _bad = server
            .mock("GET", "/get/bad-id")
            .with_status(200)
            .with_body(json!({"encrypted": "AAAA"}).to_string())
            .create_async()
            .await;
        let _good = server
            .mock("GET", "/get/good-id")
            .with_status(200)
            .with_body(json!({"encrypted": good}).to_string())
            .create_async()
            .await;

        let config = VaultConfig {
            url: server.url(),
            identifiers: "bad-id,good-id".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(report.ok, "one good identifier keeps the batch ok");
        assert!(!report.results[0].ok);
        assert!(report.results[1].ok);
    }

    #[tokio::test]
    async fn non_2xx_is_reported_as_no_payload() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get/missing")
            .with_status(404)
            .create_async()
            .await;

        let config = VaultConfig {
            url: server.url(),
            identifiers: "missing".into(),
            password: "pw".into(),
        };
        let report = client().sync(&config, None).await;
        assert!(!report.ok);
        assert_eq!(report.results[0].message, "No payload from vault");
    }
}
