//! Sync Engine - runs the orchestrator over every discovered fork
//!
//! Discovery errors abort the run; per-repository problems never do. Up to
//! `sync.max_parallel` repositories are processed at once, each one's steps
//! strictly in order, and the metadata cache is shared between them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::{CacheHandle, CacheTtls, MetadataCache};
use crate::config::Config;
use crate::discovery::{ForkDiscovery, RepoFilters};
use crate::github::HostingApi;
use crate::issues::IssueReporter;
use crate::models::RepoIdentity;
use crate::orchestrator::{RepoSyncOrchestrator, SyncOutcome};
use crate::policy::BranchPolicy;

/// Results from a complete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub org: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub policy: Arc<BranchPolicy>,
    /// One outcome per repository, in discovery order
    pub outcomes: Vec<SyncOutcome>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn synced(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_synced()).count()
    }

    pub fn skipped(&self) -> usize {
        self.processed() - self.synced()
    }
}

/// Per-invocation switches
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: String,
    pub use_cache: bool,
}

/// Run identifier used when none is configured: the CI run id, else a timestamp
pub fn default_run_id(ci_run_id: Option<String>) -> String {
    ci_run_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Utc::now().format("%Y%m%dT%H%M%SZ").to_string())
}

/// The main sync engine that runs the orchestrator across an organisation
pub struct SyncEngine {
    config: Arc<Config>,
    api: Arc<dyn HostingApi>,
    policy: Arc<BranchPolicy>,
    options: RunOptions,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn HostingApi>,
        policy: Arc<BranchPolicy>,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            api,
            policy,
            options,
        }
    }

    fn cache_path(&self) -> Option<PathBuf> {
        (self.options.use_cache && self.config.cache.enabled)
            .then(|| PathBuf::from(&self.config.cache.path))
    }

    fn open_cache(&self) -> Result<CacheHandle> {
        let Some(path) = self.cache_path() else {
            debug!("Metadata cache disabled for this run");
            return Ok(CacheHandle::disabled());
        };
        let ttls = CacheTtls {
            metadata: self.config.cache.metadata_ttl()?,
            refs: self.config.cache.ref_ttl()?,
        };
        Ok(CacheHandle::new(MetadataCache::load(&path), ttls))
    }

    /// Discover the organisation's forks
    pub async fn discover(&self) -> Result<Vec<RepoIdentity>> {
        let org = self.config.target_org()?;
        let filters = RepoFilters::from_config(
            &self.config.discovery,
            self.config.target.repo.as_deref(),
        )?;
        let discovery = ForkDiscovery::new(self.api.clone(), org, filters);
        debug!("Discovering repositories from {}", discovery.provider_name());

        discovery
            .discover()
            .await
            .with_context(|| format!("Failed to discover repositories in {}", org))
    }

    /// Run a complete sync: discover forks and process each one
    pub async fn run_sync(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let start_time = Instant::now();
        let org = self.config.target_org()?.to_string();

        info!(
            "Starting run {} for {} ({})",
            self.options.run_id,
            org,
            self.policy.summary_line()
        );

        let repositories = self.discover().await?;
        let cache = self.open_cache()?;
        let orchestrator = RepoSyncOrchestrator::new(
            self.api.clone(),
            cache.clone(),
            self.policy.clone(),
            IssueReporter::new(self.api.clone(), self.config.issues.enabled),
            self.options.run_id.clone(),
        );

        let outcomes = self
            .sync_repositories_parallel(&orchestrator, repositories)
            .await;

        if let Some(path) = self.cache_path() {
            // The cache is advisory; losing it only costs API calls next run
            if let Err(e) = cache.persist(&path) {
                warn!("Failed to save metadata cache: {:#}", e);
            }
        }

        let summary = RunSummary {
            org,
            run_id: self.options.run_id.clone(),
            started_at,
            duration: start_time.elapsed(),
            policy: self.policy.clone(),
            outcomes,
        };

        info!(
            "Run completed in {:.2}s: {} processed, {} synced, {} skipped",
            summary.duration.as_secs_f64(),
            summary.processed(),
            summary.synced(),
            summary.skipped()
        );

        Ok(summary)
    }

    /// Process repositories with at most `sync.max_parallel` in flight
    async fn sync_repositories_parallel(
        &self,
        orchestrator: &RepoSyncOrchestrator,
        repositories: Vec<RepoIdentity>,
    ) -> Vec<SyncOutcome> {
        let max_parallel = self.config.sync.max_parallel.max(1);
        info!(
            "Syncing {} repositories with concurrency {}",
            repositories.len(),
            max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut futures = FuturesUnordered::new();

        for (index, repo) in repositories.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            futures.push(async move {
                // never closed, so the permit is always granted
                let _permit = semaphore.acquire().await.ok();
                (index, orchestrator.sync_repo(&repo).await)
            });
        }

        let mut results = Vec::new();
        while let Some((index, outcome)) = futures.next().await {
            debug!(
                "Finished {}: {}",
                outcome.repo,
                if outcome.is_synced() { "synced" } else { "skipped" }
            );
            results.push((index, outcome));
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}
