use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub cookie_domain: Option<String>,
    pub vault_identifier: Option<String>,
    pub plugin_key: Option<String>,
    pub plugin_config: Option<serde_json::Value>,
    pub schedule: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Effective cron expression: the first-class schedule field wins, a
    /// legacy `cron:` line in notes is still honored when it is empty.
    pub fn cron_expression(&self) -> Option<String> {
        if let Some(schedule) = &self.schedule {
            let trimmed = schedule.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        let notes = self.notes.as_deref()?;
        for line in notes.lines() {
            let line = line.trim();
            if let Some(rest) = line
                .strip_prefix("cron:")
                .or_else(|| line.strip_prefix("Cron:"))
                .or_else(|| line.strip_prefix("CRON:"))
            {
                let expr = rest.trim();
                if !expr.is_empty() {
                    return Some(expr.to_string());
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cookie_domain: Option<String>,
    #[serde(default)]
    pub vault_identifier: Option<String>,
    #[serde(default)]
    pub plugin_key: Option<String>,
    #[serde(default)]
    pub plugin_config: Option<serde_json::Value>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SitePatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub cookie_domain: Option<Option<String>>,
    pub vault_identifier: Option<Option<String>>,
    pub plugin_key: Option<Option<String>>,
    pub plugin_config: Option<Option<serde_json::Value>>,
    pub schedule: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub site_id: i64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub plugin_key: Option<String>,
    pub plugin_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "debug" => LogLevel::Debug,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub run_id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    pub event: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
