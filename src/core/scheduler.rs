//! Background scheduling. A fixed ten second tick reconciles the live cron
//! jobs against the enabled sites in storage, so schedule edits take effect
//! without a restart, then claims at most one queued run. Site jobs only
//! enqueue runs; the tick is the only thing draining the queue while the
//! scheduler is on.

use anyhow::Result;
use chrono::{DateTime, Utc};
use croner::Cron;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::core::executor::RunExecutor;
use crate::storage::Store;

const RECONCILE_TICK: &str = "0/10 * * * * *";

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub name: String,
    pub site_id: i64,
    pub site_name: String,
    pub cron: String,
    pub job_id: String,
}

struct SiteJob {
    cron: String,
    site_name: String,
    job_id: uuid::Uuid,
}

fn job_name(site_id: i64) -> String {
    format!("site:{site_id}")
}

/// `tokio_cron_scheduler` wants a seconds field, site schedules are written
/// in the classic five field form. Prefix a zero second so both the live
/// jobs and the validate endpoint read the same expression.
fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

pub struct Scheduler {
    scheduler: JobScheduler,
    store: Arc<Store>,
    executor: Arc<RunExecutor>,
    jobs: Arc<Mutex<HashMap<i64, SiteJob>>>,
}

impl Scheduler {
    pub async fn new(store: Arc<Store>, executor: Arc<RunExecutor>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            store,
            executor,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Install the tick and start firing jobs.
    pub async fn start(&self) -> Result<()> {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let jobs = self.jobs.clone();
        let handle = self.scheduler.clone();

        let tick = Job::new_async(RECONCILE_TICK, move |_uuid, mut _l| {
            let store = store.clone();
            let executor = executor.clone();
            let jobs = jobs.clone();
            let handle = handle.clone();
            Box::pin(async move {
                debug!("Scheduler tick");
                if let Err(e) = tick_once(&handle, &store, &jobs, &executor).await {
                    warn!("Scheduler tick failed: {}", e);
                }
            })
        })?;
        self.scheduler.add(tick).await?;
        self.scheduler.start().await?;
        info!("Scheduler started");
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<ScheduledJob> {
        let mut out: Vec<ScheduledJob> = self
            .jobs
            .lock()
            .await
            .iter()
            .map(|(site_id, job)| ScheduledJob {
                name: job_name(*site_id),
                site_id: *site_id,
                site_name: job.site_name.clone(),
                cron: job.cron.clone(),
                job_id: job.job_id.to_string(),
            })
            .collect();
        out.sort_by_key(|j| j.site_id);
        out
    }
}

/// One scheduler beat: reconcile the job table, then claim and execute at
/// most one queued run.
async fn tick_once(
    handle: &JobScheduler,
    store: &Arc<Store>,
    jobs: &Arc<Mutex<HashMap<i64, SiteJob>>>,
    executor: &Arc<RunExecutor>,
) -> Result<()> {
    reconcile(handle, store, jobs).await?;
    if let Some(run) = executor.execute_next().await? {
        debug!(run_id = run.id, status = run.status.as_str(), "Run finished");
    }
    Ok(())
}

/// Bring live jobs in line with storage: add jobs for newly scheduled
/// sites, replace jobs whose expression changed, drop jobs for sites that
/// were disabled, deleted, or unscheduled.
async fn reconcile(
    handle: &JobScheduler,
    store: &Arc<Store>,
    jobs: &Arc<Mutex<HashMap<i64, SiteJob>>>,
) -> Result<()> {
    let sites = store.list_enabled_sites().await?;
    let mut wanted: HashMap<i64, (String, String)> = HashMap::new();
    for site in sites {
        if let Some(cron) = site.cron_expression() {
            wanted.insert(site.id, (cron, site.name.clone()));
        }
    }

    let mut current = jobs.lock().await;

    let stale: Vec<i64> = current
        .keys()
        .filter(|site_id| !wanted.contains_key(site_id))
        .copied()
        .collect();
    for site_id in stale {
        if let Some(job) = current.remove(&site_id) {
            if let Err(e) = handle.remove(&job.job_id).await {
                warn!("Failed to remove job {}: {}", job_name(site_id), e);
            }
            info!(site_id, cron = %job.cron, "Unscheduled site");
        }
    }

    for (site_id, (cron, site_name)) in wanted {
        let unchanged = current
            .get(&site_id)
            .is_some_and(|existing| existing.cron == cron);
        if unchanged {
            continue;
        }
        if let Some(old) = current.remove(&site_id) {
            if let Err(e) = handle.remove(&old.job_id).await {
                warn!("Failed to remove stale job {}: {}", job_name(site_id), e);
            }
        }
        match build_site_job(store.clone(), site_id, &cron) {
            Ok(job) => match handle.add(job).await {
                Ok(job_id) => {
                    info!(site_id, cron = %cron, "Scheduled site");
                    current.insert(
                        site_id,
                        SiteJob {
                            cron,
                            site_name,
                            job_id,
                        },
                    );
                }
                Err(e) => warn!("Failed to add job {}: {}", job_name(site_id), e),
            },
            Err(e) => warn!(site_id, cron = %cron, "Invalid cron expression: {}", e),
        }
    }

    Ok(())
}

fn build_site_job(store: Arc<Store>, site_id: i64, cron: &str) -> Result<Job> {
    let job = Job::new_async(normalize_cron(cron), move |_uuid, mut _l| {
        let store = store.clone();
        Box::pin(async move {
            match store.enqueue_run_for_site(site_id).await {
                Ok(run) => {
                    store
                        .log_event(
                            Some(run.id),
                            crate::storage::types::LogLevel::Info,
                            &format!("Scheduled run queued for site {site_id}"),
                            "cron.enqueued",
                            serde_json::json!({ "site_id": site_id }),
                        )
                        .await;
                }
                Err(e) => warn!(site_id, "Scheduled enqueue failed: {}", e),
            }
        })
    })?;
    Ok(job)
}

/// Parse a cron expression (five field, or six with a leading seconds
/// field) and report its next few fire times. Applies the same
/// normalization as the live jobs so the two can never disagree.
pub fn validate_cron(expr: &str) -> Result<Vec<DateTime<Utc>>, String> {
    let cron: Cron = normalize_cron(expr).parse().map_err(|e| format!("{e}"))?;
    let mut occurrences = Vec::new();
    let mut cursor = Utc::now();
    for _ in 0..3 {
        match cron.find_next_occurrence(&cursor, false) {
            Ok(next) => {
                occurrences.push(next);
                cursor = next;
            }
            Err(e) => return Err(format!("{e}")),
        }
    }
    Ok(occurrences)
}

/// Distinct cron expressions across enabled sites, used by status output.
pub async fn active_expressions(store: &Store) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for site in store.list_enabled_sites().await? {
        if let Some(cron) = site.cron_expression() {
            if seen.insert(cron.clone()) {
                out.push(cron);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::session_cache::SessionCache;
    use crate::core::vault::VaultClient;
    use crate::core::vault::sync::SyncService;
    use crate::plugins::PluginRegistry;
    use crate::storage::settings::SettingsStore;
    use crate::storage::types::{NewSite, RunStatus};
    use std::time::Duration;

    fn site(name: &str, schedule: Option<&str>) -> NewSite {
        NewSite {
            name: name.into(),
            url: format!("https://{name}.example.com"),
            enabled: true,
            cookie_domain: None,
            vault_identifier: None,
            plugin_key: Some("echo".into()),
            plugin_config: None,
            schedule: schedule.map(String::from),
            notes: None,
        }
    }

    async fn scheduler_with(dir: &std::path::Path) -> (Scheduler, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let registry = Arc::new(PluginRegistry::new(Box::new(Vec::new), Vec::new()));
        let cache = Arc::new(SessionCache::new(dir));
        let settings = Arc::new(SettingsStore::new(dir));
        let config = Arc::new(Config::for_tests(dir));
        let client = VaultClient::new(Duration::from_secs(2), true).unwrap();
        let sync = Arc::new(SyncService::new(client, cache.clone(), settings, config));
        let executor = Arc::new(RunExecutor::new(store.clone(), registry, sync, cache));
        let scheduler = Scheduler::new(store.clone(), executor).await.unwrap();
        (scheduler, store)
    }

    #[test]
    fn normalize_prefixes_seconds_on_five_field_expressions() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("  0 9 * * *  "), "0 0 9 * * *");
        assert_eq!(normalize_cron("0/10 * * * * *"), "0/10 * * * * *");
    }

    #[test]
    fn validate_accepts_five_field_expressions() {
        let next = validate_cron("0 9 * * *").unwrap();
        assert_eq!(next.len(), 3);
        assert!(next[0] < next[1] && next[1] < next[2]);
    }

    #[test]
    fn validate_accepts_seconds_field_expressions() {
        assert!(validate_cron("0/30 * * * * *").is_ok());
    }

    #[test]
    fn validate_rejects_garbage() {
        assert!(validate_cron("not a cron").is_err());
        assert!(validate_cron("").is_err());
    }

    #[tokio::test]
    async fn five_field_expressions_build_live_jobs() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        assert!(build_site_job(store.clone(), 1, "*/5 * * * *").is_ok());
        assert!(build_site_job(store, 2, "0/30 * * * * *").is_ok());
    }

    #[tokio::test]
    async fn active_expressions_skips_unscheduled_and_dedupes() {
        let store = Store::open_in_memory().await.unwrap();
        for (name, schedule) in [
            ("a", Some("0 9 * * *")),
            ("b", Some("0 9 * * *")),
            ("c", None),
        ] {
            store.create_site(site(name, schedule)).await.unwrap();
        }
        let exprs = active_expressions(&store).await.unwrap();
        assert_eq!(exprs, vec!["0 9 * * *".to_string()]);
    }

    #[tokio::test]
    async fn reconcile_tracks_site_schedule_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = scheduler_with(dir.path()).await;
        let created = store
            .create_site(site("daily", Some("0 9 * * *")))
            .await
            .unwrap();

        reconcile(&scheduler.scheduler, &store, &scheduler.jobs)
            .await
            .unwrap();
        let jobs = scheduler.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].site_id, created.id);
        assert_eq!(jobs[0].name, format!("site:{}", created.id));
        assert_eq!(jobs[0].cron, "0 9 * * *");

        store
            .update_site(
                created.id,
                crate::storage::types::SitePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        reconcile(&scheduler.scheduler, &store, &scheduler.jobs)
            .await
            .unwrap();
        assert!(scheduler.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn notes_cron_directive_schedules_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = scheduler_with(dir.path()).await;
        let mut new_site = site("noted", None);
        new_site.notes = Some("signs in before standup\ncron: */5 * * * *".into());
        let created = store.create_site(new_site).await.unwrap();

        reconcile(&scheduler.scheduler, &store, &scheduler.jobs)
            .await
            .unwrap();
        reconcile(&scheduler.scheduler, &store, &scheduler.jobs)
            .await
            .unwrap();
        let jobs = scheduler.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].cron, "*/5 * * * *");

        store
            .update_site(
                created.id,
                crate::storage::types::SitePatch {
                    notes: Some(Some("signs in before standup".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        reconcile(&scheduler.scheduler, &store, &scheduler.jobs)
            .await
            .unwrap();
        assert!(scheduler.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn tick_claims_at_most_one_queued_run() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = scheduler_with(dir.path()).await;
        let created = store.create_site(site("busy", None)).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();
        store.enqueue_run_for_site(created.id).await.unwrap();

        tick_once(
            &scheduler.scheduler,
            &store,
            &scheduler.jobs,
            &scheduler.executor,
        )
        .await
        .unwrap();

        let runs = store.list_runs(Some(created.id), 10).await.unwrap();
        let queued = runs
            .iter()
            .filter(|r| r.status == RunStatus::Queued)
            .count();
        assert_eq!(queued, 1);
        assert_eq!(runs.len(), 2);
    }
}
