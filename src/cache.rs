//! TTL-bounded metadata cache
//!
//! One JSON document keyed org → repo → {meta, refs, negative}, each entry
//! independently timestamped. The cache is advisory: every caller must behave
//! correctly when a lookup misses, so an absent, expired or unreadable cache
//! only costs extra API calls.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{RepoIdentity, RepoMetadata};

/// On-disk format version; any other version is discarded on load
pub const CACHE_VERSION: u32 = 1;

/// Larger cache files are ignored rather than parsed
pub const MAX_CACHE_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// A cached value and the moment it was captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub ts: DateTime<Utc>,
}

/// A cached ref SHA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefEntry {
    pub sha: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub ts: DateTime<Utc>,
}

/// Moment a ref was observed to be missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEntry {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NegativeEntries {
    #[serde(default)]
    pub missing_refs: BTreeMap<String, MissingEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CacheEntry<RepoMetadata>>,
    #[serde(default)]
    pub refs: BTreeMap<String, RefEntry>,
    #[serde(default)]
    pub negative: NegativeEntries,
}

impl RepoEntry {
    fn is_empty(&self) -> bool {
        self.meta.is_none() && self.refs.is_empty() && self.negative.missing_refs.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgEntry {
    #[serde(default)]
    pub repos: BTreeMap<String, RepoEntry>,
}

/// Outcome of a ref lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefLookup {
    /// Fresh SHA on record
    Found(String),
    /// Fresh record that the ref did not exist
    Missing,
    /// Nothing fresh; ask the host
    Unknown,
}

/// Whether an entry captured at `captured` is still usable at `now`
///
/// A hit requires `now - captured <= ttl`; a zero TTL disables the entry kind.
pub fn is_fresh(captured: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    if ttl.is_zero() {
        return false;
    }
    let Ok(ttl) = ChronoDuration::from_std(ttl) else {
        return true;
    };
    now.signed_duration_since(captured) <= ttl
}

/// The cache document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCache {
    pub version: u32,
    #[serde(default)]
    pub orgs: BTreeMap<String, OrgEntry>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            orgs: BTreeMap::new(),
        }
    }
}

impl MetadataCache {
    /// Load a cache file, starting empty when it is missing, oversized,
    /// unparsable or from another format version
    pub fn load(path: &Path) -> Self {
        let size = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                debug!("No cache file at {:?}, starting empty", path);
                return Self::default();
            }
        };

        if size > MAX_CACHE_FILE_BYTES {
            warn!(
                "Cache file {:?} is {} bytes (limit {}), starting empty",
                path, size, MAX_CACHE_FILE_BYTES
            );
            return Self::default();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read cache file {:?}: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str::<MetadataCache>(&content) {
            Ok(cache) if cache.version == CACHE_VERSION => {
                debug!("Loaded cache with {} organization(s)", cache.orgs.len());
                cache
            }
            Ok(cache) => {
                info!(
                    "Ignoring cache file {:?} with version {} (expected {})",
                    path, cache.version, CACHE_VERSION
                );
                Self::default()
            }
            Err(e) => {
                warn!("Failed to parse cache file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save atomically: write `<path>.tmp`, then rename over `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }

        let content = serde_json::to_string(self).context("Failed to serialize cache")?;
        let tmp_path = tmp_path_for(path);

        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write cache file: {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move cache file into place: {:?}", path))?;

        debug!("Saved cache to {:?}", path);
        Ok(())
    }

    fn repo(&self, repo: &RepoIdentity) -> Option<&RepoEntry> {
        self.orgs.get(&repo.org)?.repos.get(&repo.name)
    }

    fn repo_mut(&mut self, repo: &RepoIdentity) -> &mut RepoEntry {
        self.orgs
            .entry(repo.org.clone())
            .or_default()
            .repos
            .entry(repo.name.clone())
            .or_default()
    }

    pub fn get_meta(
        &self,
        repo: &RepoIdentity,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<RepoMetadata> {
        let entry = self.repo(repo)?.meta.as_ref()?;
        is_fresh(entry.ts, now, ttl).then(|| entry.value.clone())
    }

    pub fn set_meta(&mut self, repo: &RepoIdentity, meta: RepoMetadata, now: DateTime<Utc>) {
        self.repo_mut(repo).meta = Some(CacheEntry {
            value: meta,
            ts: now,
        });
    }

    pub fn lookup_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> RefLookup {
        let Some(entry) = self.repo(repo) else {
            return RefLookup::Unknown;
        };
        if let Some(found) = entry.refs.get(branch) {
            if is_fresh(found.ts, now, ttl) {
                return RefLookup::Found(found.sha.clone());
            }
        }
        if let Some(missing) = entry.negative.missing_refs.get(branch) {
            if is_fresh(missing.ts, now, ttl) {
                return RefLookup::Missing;
            }
        }
        RefLookup::Unknown
    }

    /// Record a ref SHA, clearing any negative entry for it
    pub fn set_ref(&mut self, repo: &RepoIdentity, branch: &str, sha: &str, now: DateTime<Utc>) {
        let entry = self.repo_mut(repo);
        entry.negative.missing_refs.remove(branch);
        entry.refs.insert(
            branch.to_string(),
            RefEntry {
                sha: sha.to_string(),
                ts: now,
            },
        );
    }

    /// Record that a ref does not exist, clearing any SHA for it
    pub fn set_missing(&mut self, repo: &RepoIdentity, branch: &str, now: DateTime<Utc>) {
        let entry = self.repo_mut(repo);
        entry.refs.remove(branch);
        entry
            .negative
            .missing_refs
            .insert(branch.to_string(), MissingEntry { ts: now });
    }

    pub fn invalidate_ref(&mut self, repo: &RepoIdentity, branch: &str) {
        if let Some(entry) = self
            .orgs
            .get_mut(&repo.org)
            .and_then(|org| org.repos.get_mut(&repo.name))
        {
            entry.refs.remove(branch);
            entry.negative.missing_refs.remove(branch);
        }
    }

    /// Drop entries older than `max_age` and empty containers
    pub fn prune(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for org in self.orgs.values_mut() {
            for repo in org.repos.values_mut() {
                if repo
                    .meta
                    .as_ref()
                    .is_some_and(|meta| !is_fresh(meta.ts, now, max_age))
                {
                    repo.meta = None;
                    removed += 1;
                }
                let before = repo.refs.len() + repo.negative.missing_refs.len();
                repo.refs.retain(|_, r| is_fresh(r.ts, now, max_age));
                repo.negative
                    .missing_refs
                    .retain(|_, m| is_fresh(m.ts, now, max_age));
                removed += before - (repo.refs.len() + repo.negative.missing_refs.len());
            }
            org.repos.retain(|_, repo| !repo.is_empty());
        }
        self.orgs.retain(|_, org| !org.repos.is_empty());
        removed
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Lifetimes per entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub metadata: Duration,
    pub refs: Duration,
}

impl CacheTtls {
    /// Every lookup misses
    pub fn disabled() -> Self {
        Self {
            metadata: Duration::ZERO,
            refs: Duration::ZERO,
        }
    }

    fn longest(&self) -> Duration {
        self.metadata.max(self.refs)
    }
}

/// Shared, lock-guarded view of the cache used during a run
///
/// The lock is held only for the duration of a single lookup or store, never
/// across an API call.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    inner: Arc<Mutex<MetadataCache>>,
    ttls: CacheTtls,
}

impl CacheHandle {
    pub fn new(cache: MetadataCache, ttls: CacheTtls) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
            ttls,
        }
    }

    /// Handle whose lookups always miss
    pub fn disabled() -> Self {
        Self::new(MetadataCache::default(), CacheTtls::disabled())
    }

    fn lock(&self) -> MutexGuard<'_, MetadataCache> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub fn metadata(&self, repo: &RepoIdentity) -> Option<RepoMetadata> {
        self.lock().get_meta(repo, self.ttls.metadata, Utc::now())
    }

    pub fn store_metadata(&self, repo: &RepoIdentity, meta: &RepoMetadata) {
        self.lock().set_meta(repo, meta.clone(), Utc::now());
    }

    pub fn lookup_ref(&self, repo: &RepoIdentity, branch: &str) -> RefLookup {
        self.lock()
            .lookup_ref(repo, branch, self.ttls.refs, Utc::now())
    }

    pub fn store_ref(&self, repo: &RepoIdentity, branch: &str, sha: &str) {
        self.lock().set_ref(repo, branch, sha, Utc::now());
    }

    pub fn store_missing(&self, repo: &RepoIdentity, branch: &str) {
        self.lock().set_missing(repo, branch, Utc::now());
    }

    pub fn invalidate_ref(&self, repo: &RepoIdentity, branch: &str) {
        self.lock().invalidate_ref(repo, branch);
    }

    /// Prune expired entries and write the cache to `path`
    pub fn persist(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let mut cache = self.lock();
            let removed = cache.prune(self.ttls.longest(), Utc::now());
            if removed > 0 {
                debug!("Pruned {} expired cache entries", removed);
            }
            cache.clone()
        };
        snapshot.save(path)
    }
}
