//! Local content-addressed snapshot of vault session data, one entry per
//! vault identifier. Stored as a JSON sidecar next to the database. The
//! fingerprint is a SHA-256 over a canonicalized payload so reordered vault
//! responses do not register as changes.
//!
//! The status view never exposes raw cookie or local-storage values.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain: String,
    pub cookie_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CacheEntry {
    last_checked_at: Option<String>,
    last_sync_at: Option<String>,
    hash: Option<String>,
    domain_count: usize,
    cookie_count: usize,
    domains: Vec<DomainSummary>,
    // Sensitive: kept on disk only, never surfaced via status().
    cookies: BTreeMap<String, Vec<Value>>,
    local_storage: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct CacheFile {
    version: u32,
    updated_at: Option<String>,
    identifiers: BTreeMap<String, CacheEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            updated_at: None,
            identifiers: BTreeMap::new(),
        }
    }
}

pub struct SessionCache {
    path: PathBuf,
    // Serializes read-modify-write cycles; concurrent unserialized writers
    // could drop an identifier's update.
    lock: Mutex<()>,
}

impl SessionCache {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join("session_cache.json"),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> CacheFile {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return CacheFile::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("Unreadable session cache at {:?}: {}", self.path, e);
                CacheFile::default()
            }
        }
    }

    fn save(&self, mut file: CacheFile) -> Result<()> {
        file.version = CACHE_VERSION;
        file.updated_at = Some(now_iso());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Update the snapshot for one identifier. `last_checked_at` is bumped on
    /// every call; cookies, local storage, summaries and the hash are only
    /// rewritten when `changed` is set.
    pub async fn upsert_snapshot(
        &self,
        identifier: &str,
        cookie_data: &Value,
        local_storage_data: &Value,
        new_hash: &str,
        changed: bool,
    ) -> Result<()> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut file = self.load();
        let entry = file.identifiers.entry(identifier.to_string()).or_default();
        entry.last_checked_at = Some(now_iso());

        if changed {
            let cookies = group_cookies_by_domain(cookie_data);
            let domains: Vec<DomainSummary> = cookies
                .iter()
                .map(|(domain, list)| DomainSummary {
                    domain: domain.clone(),
                    cookie_count: list.len(),
                })
                .collect();

            entry.last_sync_at = Some(now_iso());
            entry.hash = Some(new_hash.to_string());
            entry.domain_count = domains.len();
            entry.cookie_count = domains.iter().map(|d| d.cookie_count).sum();
            entry.domains = domains;
            entry.cookies = cookies;
            entry.local_storage = group_local_storage_by_domain(local_storage_data);
        }

        self.save(file)
    }

    pub async fn stored_hash(&self, identifier: &str) -> Option<String> {
        let _guard = self.lock.lock().await;
        self.load().identifiers.get(identifier)?.hash.clone()
    }

    /// Safe summary: timestamps, hashes and per-domain counts only.
    pub async fn status(&self) -> Value {
        let _guard = self.lock.lock().await;
        let file = self.load();
        let identifiers: serde_json::Map<String, Value> = file
            .identifiers
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    serde_json::json!({
                        "last_sync_at": entry.last_sync_at,
                        "last_checked_at": entry.last_checked_at,
                        "hash": entry.hash,
                        "domain_count": entry.domain_count,
                        "cookie_count": entry.cookie_count,
                        "domains": entry.domains,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "ok": true,
            "version": file.version,
            "updated_at": file.updated_at,
            "identifiers": identifiers,
        })
    }

    pub async fn domain_cookies(&self, identifier: &str, domain: &str) -> Vec<Value> {
        let _guard = self.lock.lock().await;
        let file = self.load();
        file.identifiers
            .get(identifier)
            .and_then(|entry| entry.cookies.get(&normalize_domain(domain)))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn domain_local_storage(&self, identifier: &str, domain: &str) -> Value {
        let _guard = self.lock.lock().await;
        let file = self.load();
        file.identifiers
            .get(identifier)
            .and_then(|entry| entry.local_storage.get(&normalize_domain(domain)))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    pub async fn known_domains(&self, identifier: &str) -> Vec<String> {
        let _guard = self.lock.lock().await;
        let file = self.load();
        file.identifiers
            .get(identifier)
            .map(|entry| entry.domains.iter().map(|d| d.domain.clone()).collect())
            .unwrap_or_default()
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_lowercase()
}

/// Best matching known domain for a URL: hostname equals the domain or is a
/// subdomain of it, longest (most specific) candidate wins.
pub fn match_domain(url: &str, domains: &[String]) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let hostname = parsed.host_str()?.to_lowercase();

    let mut best: Option<String> = None;
    for domain in domains {
        let candidate = normalize_domain(domain);
        if candidate.is_empty() {
            continue;
        }
        if hostname == candidate || hostname.ends_with(&format!(".{candidate}")) {
            match &best {
                Some(current) if current.len() >= candidate.len() => {}
                _ => best = Some(candidate),
            }
        }
    }
    best
}

/// Stable fingerprint over cookie + local-storage payloads: maps get sorted
/// keys, cookie lists are sorted by (name, domain, path, expiry), then the
/// canonical JSON is hashed with SHA-256.
pub fn content_hash(cookie_data: &Value, local_storage_data: &Value) -> String {
    let wrapped = serde_json::json!({
        "cookie_data": empty_if_null(cookie_data),
        "local_storage_data": empty_if_null(local_storage_data),
    });
    let canonical = canonicalize(&wrapped);
    let text = canonical.to_string();
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn empty_if_null(value: &Value) -> Value {
    if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        // serde_json maps are BTreeMap-backed, so rebuilding sorts the keys.
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut canonical: Vec<Value> = items.iter().map(canonicalize).collect();
            if !canonical.is_empty() && canonical.iter().all(Value::is_object) {
                canonical.sort_by_key(cookie_sort_key);
            }
            Value::Array(canonical)
        }
        other => other.clone(),
    }
}

fn cookie_sort_key(item: &Value) -> (String, String, String, String) {
    let text = |key: &str| -> String {
        match item.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };
    let expiry = match item.get("expires") {
        Some(v) if !v.is_null() => match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        _ => text("expirationDate"),
    };
    (text("name"), text("domain"), text("path"), expiry)
}

/// Cookie payloads arrive either as domain -> cookie-list maps or flat cookie
/// lists; both collapse into normalized-domain buckets.
fn group_cookies_by_domain(cookie_data: &Value) -> BTreeMap<String, Vec<Value>> {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    match cookie_data {
        Value::Object(map) => {
            for (domain, cookies) in map {
                let normalized = normalize_domain(domain);
                if normalized.is_empty() {
                    continue;
                }
                let list = match cookies {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                grouped.insert(normalized, list);
            }
        }
        Value::Array(items) => {
            for cookie in items {
                let Value::Object(fields) = cookie else {
                    continue;
                };
                let domain = fields
                    .get("domain")
                    .and_then(Value::as_str)
                    .map(normalize_domain)
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                grouped.entry(domain).or_default().push(cookie.clone());
            }
        }
        _ => {}
    }
    grouped
}

fn group_local_storage_by_domain(local_storage_data: &Value) -> BTreeMap<String, Value> {
    let mut grouped = BTreeMap::new();
    if let Value::Object(map) = local_storage_data {
        for (domain, value) in map {
            let normalized = normalize_domain(domain);
            if normalized.is_empty() {
                continue;
            }
            grouped.insert(normalized, value.clone());
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_cookies() -> Value {
        json!({
            "Example.com": [
                {"name": "sid", "domain": ".example.com", "path": "/", "value": "secret-zz-value"},
                {"name": "theme", "domain": ".example.com", "path": "/", "value": "dark"}
            ],
            "other.net": [
                {"name": "tok", "domain": "other.net", "path": "/", "value": "xyz"}
            ]
        })
    }

    #[test]
    fn hash_is_order_independent_for_map_keys() {
        let a = json!({"b.com": [], "a.com": []});
        let b = json!({"a.com": [], "b.com": []});
        assert_eq!(content_hash(&a, &Value::Null), content_hash(&b, &Value::Null));
    }

    #[test]
    fn hash_is_order_independent_for_cookie_lists() {
        let a = json!({"example.com": [
            {"name": "b", "domain": "example.com", "path": "/", "value": "2"},
            {"name": "a", "domain": "example.com", "path": "/", "value": "1"}
        ]});
        let b = json!({"example.com": [
            {"name": "a", "domain": "example.com", "path": "/", "value": "1"},
            {"name": "b", "domain": "example.com", "path": "/", "value": "2"}
        ]});
        assert_eq!(content_hash(&a, &Value::Null), content_hash(&b, &Value::Null));
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let a = json!({"example.com": [{"name": "sid", "value": "1"}]});
        let b = json!({"example.com": [{"name": "sid", "value": "2"}]});
        assert_ne!(content_hash(&a, &Value::Null), content_hash(&b, &Value::Null));
    }

    #[tokio::test]
    async fn upsert_with_change_persists_grouped_content() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let cookies = sample_cookies();
        let ls = json!({".example.com": {"token": "t"}});
        let hash = content_hash(&cookies, &ls);

        cache
            .upsert_snapshot("uuid-1", &cookies, &ls, &hash, true)
            .await
            .unwrap();

        let fetched = cache.domain_cookies("uuid-1", ".Example.com").await;
        assert_eq!(fetched.len(), 2);
        let storage = cache.domain_local_storage("uuid-1", "example.com").await;
        assert_eq!(storage["token"], "t");
        assert_eq!(cache.stored_hash("uuid-1").await.as_deref(), Some(hash.as_str()));
    }

    #[tokio::test]
    async fn upsert_without_change_only_touches_last_checked() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let cookies = sample_cookies();
        let hash = content_hash(&cookies, &Value::Null);
        cache
            .upsert_snapshot("uuid-1", &cookies, &Value::Null, &hash, true)
            .await
            .unwrap();

        let replacement = json!({"replaced.com": [{"name": "x"}]});
        cache
            .upsert_snapshot("uuid-1", &replacement, &Value::Null, "different", false)
            .await
            .unwrap();

        // Content and hash untouched, only the check timestamp moved.
        assert_eq!(cache.stored_hash("uuid-1").await.as_deref(), Some(hash.as_str()));
        assert_eq!(cache.domain_cookies("uuid-1", "example.com").await.len(), 2);
        assert!(cache.domain_cookies("uuid-1", "replaced.com").await.is_empty());
        let status = cache.status().await;
        assert!(status["identifiers"]["uuid-1"]["last_checked_at"].is_string());
    }

    #[tokio::test]
    async fn status_never_leaks_raw_values() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let cookies = sample_cookies();
        let hash = content_hash(&cookies, &Value::Null);
        cache
            .upsert_snapshot("uuid-1", &cookies, &Value::Null, &hash, true)
            .await
            .unwrap();

        let status = cache.status().await;
        let text = status.to_string();
        assert!(
            !text.contains("secret-zz-value"),
            "cookie value leaked into status"
        );
        assert!(!text.contains("\"cookies\""));
        assert_eq!(status["identifiers"]["uuid-1"]["cookie_count"], 3);
        assert_eq!(status["identifiers"]["uuid-1"]["domain_count"], 2);
    }

    #[tokio::test]
    async fn flat_cookie_lists_group_by_cookie_domain() {
        let dir = tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let cookies = json!([
            {"name": "a", "domain": ".one.com"},
            {"name": "b", "domain": "two.com"},
            {"name": "c"}
        ]);
        let hash = content_hash(&cookies, &Value::Null);
        cache
            .upsert_snapshot("uuid-2", &cookies, &Value::Null, &hash, true)
            .await
            .unwrap();

        assert_eq!(cache.domain_cookies("uuid-2", "one.com").await.len(), 1);
        assert_eq!(cache.domain_cookies("uuid-2", "unknown").await.len(), 1);
        let mut domains = cache.known_domains("uuid-2").await;
        domains.sort();
        assert_eq!(domains, vec!["one.com", "two.com", "unknown"]);
    }

    #[test]
    fn match_domain_prefers_most_specific() {
        let domains = vec!["example.com".to_string(), "sub.example.com".to_string()];
        assert_eq!(
            match_domain("https://sub.example.com/x", &domains).as_deref(),
            Some("sub.example.com")
        );
        assert_eq!(
            match_domain("https://deep.sub.example.com/", &domains).as_deref(),
            Some("sub.example.com")
        );
        assert_eq!(
            match_domain("https://example.com/", &domains).as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn match_domain_requires_dot_boundary() {
        let domains = vec!["example.com".to_string()];
        assert_eq!(match_domain("https://notexample.com/", &domains), None);
        assert_eq!(match_domain("not a url", &domains), None);
    }
}
