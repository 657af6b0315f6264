//! Built-in plugins, self-registered at startup and on reload.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use super::{ConfigField, PluginContext, PluginDescriptor, PluginResult, SitePlugin};
use crate::core::config::BodyEncoding;

/// Echoes the site back; handy for wiring checks and tests.
pub struct EchoPlugin;

#[async_trait]
impl SitePlugin for EchoPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            key: "echo".into(),
            name: "Echo".into(),
            description: "Return a quick echo response for testing.".into(),
            version: "1.0".into(),
            category: "general".into(),
            config_schema: Vec::new(),
        }
    }

    async fn run(&self, context: &PluginContext) -> PluginResult {
        PluginResult::success(format!("Echoed {}", context.site_name))
            .with_data("site", json!(context.site_name))
            .with_data("url", json!(context.site_url))
            .with_data("at", json!(Utc::now().to_rfc3339()))
    }
}

/// Reports on the session data injected for this run; fails when the site
/// has no vault identifier so misconfiguration shows up as a failed run.
pub struct SessionProbePlugin;

#[async_trait]
impl SitePlugin for SessionProbePlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            key: "session-probe".into(),
            name: "Session Probe".into(),
            description: "Verify vault session data is wired up for this site.".into(),
            version: "1.0".into(),
            category: "general".into(),
            config_schema: Vec::new(),
        }
    }

    async fn run(&self, context: &PluginContext) -> PluginResult {
        let Some(identifier) = context.vault_identifier.as_deref().filter(|v| !v.is_empty())
        else {
            return PluginResult::failure("No vault identifier configured.");
        };
        let storage_keys = context
            .local_storage
            .as_object()
            .map(|m| m.len())
            .unwrap_or(0);
        PluginResult::success(format!(
            "Session data for {}: {} cookies, {} local-storage keys",
            identifier,
            context.cookies.len(),
            storage_keys
        ))
        .with_data("identifier", json!(identifier))
        .with_data("cookie_count", json!(context.cookies.len()))
        .with_data("local_storage_keys", json!(storage_keys))
    }
}

/// Performs the actual sign-in request: hits a configured path with the
/// injected session cookies attached and judges the response status.
pub struct HttpCheckPlugin {
    http: reqwest::Client,
    body_encoding: BodyEncoding,
}

impl HttpCheckPlugin {
    pub fn new(timeout: Duration, verify_tls: bool, body_encoding: BodyEncoding) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self {
            http,
            body_encoding,
        })
    }

    fn target_url(context: &PluginContext) -> String {
        let path = context
            .config
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("");
        if path.is_empty() {
            context.site_url.clone()
        } else {
            format!(
                "{}/{}",
                context.site_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    fn cookie_header(context: &PluginContext) -> Option<String> {
        let pairs: Vec<String> = context
            .cookies
            .iter()
            .filter_map(|cookie| {
                let name = cookie.get("name")?.as_str()?;
                let value = cookie.get("value")?.as_str()?;
                Some(format!("{name}={value}"))
            })
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

#[async_trait]
impl SitePlugin for HttpCheckPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            key: "http-check".into(),
            name: "HTTP Check".into(),
            description: "Request a sign-in endpoint with injected session cookies.".into(),
            version: "1.0".into(),
            category: "signin".into(),
            config_schema: vec![
                ConfigField {
                    key: "path".into(),
                    label: "Path".into(),
                    field_type: "text".into(),
                    required: false,
                    placeholder: Some("/attendance/sign-in".into()),
                    description: Some("Appended to the site URL; empty hits the site URL itself.".into()),
                    options: Vec::new(),
                },
                ConfigField {
                    key: "method".into(),
                    label: "Method".into(),
                    field_type: "select".into(),
                    required: false,
                    placeholder: None,
                    description: None,
                    options: vec!["GET".into(), "POST".into()],
                },
                ConfigField {
                    key: "body".into(),
                    label: "Body".into(),
                    field_type: "json".into(),
                    required: false,
                    placeholder: None,
                    description: Some("POST payload, encoded per the configured body encoding.".into()),
                    options: Vec::new(),
                },
            ],
        }
    }

    async fn before_run(&self, context: &PluginContext) -> Option<PluginResult> {
        if context.site_url.trim().is_empty() {
            return Some(PluginResult::failure("Site has no URL."));
        }
        None
    }

    async fn run(&self, context: &PluginContext) -> PluginResult {
        let url = Self::target_url(context);
        let method = context
            .config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let mut request = match method.as_str() {
            "POST" => {
                let body = context.config.get("body").cloned().unwrap_or(json!({}));
                match self.body_encoding {
                    BodyEncoding::Json => self.http.post(&url).json(&body),
                    BodyEncoding::Form => {
                        let form: Vec<(String, String)> = body
                            .as_object()
                            .map(|m| {
                                m.iter()
                                    .map(|(k, v)| {
                                        let text = match v {
                                            Value::String(s) => s.clone(),
                                            other => other.to_string(),
                                        };
                                        (k.clone(), text)
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        self.http.post(&url).form(&form)
                    }
                }
            }
            _ => self.http.get(&url),
        };
        if let Some(header) = Self::cookie_header(context) {
            request = request.header(reqwest::header::COOKIE, header);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    PluginResult::success(format!("{method} {url} returned {status}"))
                        .with_data("status", json!(status.as_u16()))
                } else {
                    PluginResult::failure(format!("{method} {url} returned {status}"))
                        .with_data("status", json!(status.as_u16()))
                }
            }
            Err(e) => PluginResult::failure(format!("Request to {url} failed: {e}")),
        }
    }
}

/// The built-in set, reconstructed on every registry reload.
pub fn builtins(
    timeout: Duration,
    verify_tls: bool,
    body_encoding: BodyEncoding,
) -> Vec<Arc<dyn SitePlugin>> {
    let mut plugins: Vec<Arc<dyn SitePlugin>> =
        vec![Arc::new(EchoPlugin), Arc::new(SessionProbePlugin)];
    match HttpCheckPlugin::new(timeout, verify_tls, body_encoding) {
        Ok(plugin) => plugins.push(Arc::new(plugin)),
        Err(e) => tracing::warn!("http-check plugin unavailable: {}", e),
    }
    plugins
}
