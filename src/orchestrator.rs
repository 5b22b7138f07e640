//! Per-repository branch synchronization
//!
//! [`RepoSyncOrchestrator::sync_repo`] walks one fork through a fixed sequence
//! of steps:
//!
//! 1. resolve metadata and gate on fork / archived / disabled
//! 2. select the mirror branch
//! 3. merge upstream into the mirror on the host
//! 4. create missing managed branches in policy order (create-only)
//! 5. audit branch presence
//! 6. move product to the mirror SHA, fast-forward first
//! 7. if product moved, move promoted branches to the downstream target
//! 8. record create-once branches as excluded
//!
//! Each step consumes SHAs produced by the previous one, so the steps for one
//! repository never run concurrently. Any failure ends the repository's run
//! with a [`SkipReason`] and notes; nothing propagates out of `sync_repo`.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheHandle, RefLookup};
use crate::error::{ApiError, SkipReason};
use crate::github::HostingApi;
use crate::issues::{
    bootstrap_failure_body, missing_mirror_body, mirror_sync_failure_body, run_comment,
    IssueReport, IssueReporter, BOOTSTRAP_FAILED_TITLE, MIRROR_SYNC_FAILED_TITLE,
};
use crate::models::{BranchRole, CompareStatus, RepoIdentity, RepoMetadata};
use crate::policy::{BranchPolicy, BranchSpec};

/// Result of the host-side upstream merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorSyncStatus {
    NotAttempted,
    Synced {
        message: String,
        merge_type: Option<String>,
    },
    Failed {
        status: u16,
        message: String,
    },
}

impl fmt::Display for MirrorSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorSyncStatus::NotAttempted => f.write_str("not attempted"),
            MirrorSyncStatus::Synced {
                merge_type: Some(merge_type),
                ..
            } => write!(f, "synced ({})", merge_type),
            MirrorSyncStatus::Synced { message, .. } if !message.is_empty() => {
                write!(f, "synced ({})", message)
            }
            MirrorSyncStatus::Synced { .. } => f.write_str("synced"),
            MirrorSyncStatus::Failed { status, message } => {
                write!(f, "failed ({}): {}", status, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    /// Already present; never touched
    Exists,
    Created,
    Failed { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapResult {
    pub role: BranchRole,
    pub branch: String,
    pub status: BootstrapStatus,
    /// SHA the branch resolved to, or was created at
    pub sha: Option<String>,
}

impl fmt::Display for BootstrapResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.sha) {
            (BootstrapStatus::Exists, _) => write!(f, "`{}` exists", self.branch),
            (BootstrapStatus::Created, Some(sha)) => {
                write!(f, "`{}` created at `{}`", self.branch, short_sha(sha))
            }
            (BootstrapStatus::Created, None) => write!(f, "`{}` created", self.branch),
            (BootstrapStatus::Failed { status, message }, _) => {
                write!(f, "`{}` failed ({}): {}", self.branch, status, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Present(String),
    Missing,
    /// The lookup itself failed
    Unknown { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPresence {
    pub role: BranchRole,
    pub branch: String,
    pub presence: Presence,
}

/// What enforcement or promotion did to one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionAction {
    /// Already at the target
    Unchanged,
    FastForwarded { from: String, to: String },
    /// The fast-forward was rejected, so the branch was force-updated
    ResetAfterRejectedFastForward { from: String, to: String },
    /// Force-updated because the branch had commits the target lacks
    Reset {
        from: String,
        to: String,
        discarded: u64,
    },
    NotRun { reason: String },
    Failed { status: u16, message: String },
}

impl PromotionAction {
    /// Whether the branch now points somewhere else
    pub fn moved(&self) -> bool {
        matches!(
            self,
            PromotionAction::FastForwarded { .. }
                | PromotionAction::ResetAfterRejectedFastForward { .. }
                | PromotionAction::Reset { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PromotionAction::Failed { .. })
    }

    fn not_run(reason: &str) -> Self {
        PromotionAction::NotRun {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PromotionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionAction::Unchanged => f.write_str("no action (identical)"),
            PromotionAction::FastForwarded { from, to } => {
                write!(f, "fast-forward `{}` → `{}`", short_sha(from), short_sha(to))
            }
            PromotionAction::ResetAfterRejectedFastForward { from, to } => write!(
                f,
                "fast-forward rejected, reset `{}` → `{}`",
                short_sha(from),
                short_sha(to)
            ),
            PromotionAction::Reset {
                from,
                to,
                discarded,
            } => write!(
                f,
                "reset `{}` → `{}` (discarded {} local commit(s))",
                short_sha(from),
                short_sha(to),
                discarded
            ),
            PromotionAction::NotRun { reason } => write!(f, "not run ({})", reason),
            PromotionAction::Failed { status, message } => {
                write!(f, "failed ({}): {}", status, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionResult {
    pub role: BranchRole,
    pub branch: String,
    pub action: PromotionAction,
}

/// Where the downstream target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// First parent of product's new SHA
    Parent,
    /// Product's own SHA, because it has no parent
    ProductFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamTarget {
    pub sha: String,
    pub source: TargetSource,
}

impl fmt::Display for DownstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            TargetSource::Parent => write!(f, "`{}` (parent of product)", short_sha(&self.sha)),
            TargetSource::ProductFallback => {
                write!(f, "`{}` (product, no parent commit)", short_sha(&self.sha))
            }
        }
    }
}

/// Everything that happened to one repository in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub repo: RepoIdentity,
    pub skipped: Option<SkipReason>,
    pub mirror_branch: Option<String>,
    pub mirror_sha: Option<String>,
    pub mirror_sync: MirrorSyncStatus,
    pub bootstrap: Vec<BootstrapResult>,
    pub presence: Vec<BranchPresence>,
    pub product_action: Option<PromotionAction>,
    pub product_changed: bool,
    pub downstream_target: Option<DownstreamTarget>,
    pub promotions: Vec<PromotionResult>,
    /// Branches excluded from promotion because they are create-once
    pub create_once: Vec<String>,
    pub issue: Option<IssueReport>,
    pub notes: Vec<String>,
}

impl SyncOutcome {
    fn new(repo: RepoIdentity) -> Self {
        Self {
            repo,
            skipped: None,
            mirror_branch: None,
            mirror_sha: None,
            mirror_sync: MirrorSyncStatus::NotAttempted,
            bootstrap: Vec::new(),
            presence: Vec::new(),
            product_action: None,
            product_changed: false,
            downstream_target: None,
            promotions: Vec::new(),
            create_once: Vec::new(),
            issue: None,
            notes: Vec::new(),
        }
    }

    /// Promotion result for a role, if that role was promoted this run
    pub fn promotion(&self, role: BranchRole) -> Option<&PromotionAction> {
        self.promotions
            .iter()
            .find(|p| p.role == role)
            .map(|p| &p.action)
    }

    /// Reached the end without a skip or a failed promotion
    pub fn is_synced(&self) -> bool {
        self.skipped.is_none() && !self.promotions.iter().any(|p| p.action.is_failure())
    }

    fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Whether a ref read may be served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Cached,
    Live,
}

/// Drives one fork's managed branches into the state the policy requires
#[derive(Clone)]
pub struct RepoSyncOrchestrator {
    api: Arc<dyn HostingApi>,
    cache: CacheHandle,
    policy: Arc<BranchPolicy>,
    issues: IssueReporter,
    run_id: String,
}

impl RepoSyncOrchestrator {
    pub fn new(
        api: Arc<dyn HostingApi>,
        cache: CacheHandle,
        policy: Arc<BranchPolicy>,
        issues: IssueReporter,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            cache,
            policy,
            issues,
            run_id: run_id.into(),
        }
    }

    /// Process one repository; never fails, every problem lands in the outcome
    pub async fn sync_repo(&self, repo: &RepoIdentity) -> SyncOutcome {
        let mut outcome = SyncOutcome::new(repo.clone());
        info!("Syncing {}", repo);

        if let Err(reason) = self.run(repo, &mut outcome).await {
            info!("Skipped {}: {}", repo, reason);
            outcome.skipped = Some(reason);
        }

        outcome
    }

    async fn run(&self, repo: &RepoIdentity, outcome: &mut SyncOutcome) -> Result<(), SkipReason> {
        // 1. resolve & gate
        let meta = self.metadata(repo, outcome).await?;
        if meta.is_archived || meta.is_disabled {
            return Err(SkipReason::ArchivedOrDisabled);
        }
        if !meta.is_fork || meta.parent.is_none() {
            return Err(SkipReason::NotAFork);
        }

        // 2. mirror selection
        let mirror = self.select_mirror(repo, &meta, outcome).await?;
        outcome.mirror_branch = Some(mirror.clone());

        // 3. mirror sync
        let mirror_sha = self.sync_mirror(repo, &mirror, outcome).await?;
        outcome.mirror_sha = Some(mirror_sha.clone());

        // 4. bootstrap
        let product_sha = self.bootstrap(repo, &mirror_sha, outcome).await?;

        // 5. presence audit
        self.audit_presence(repo, outcome).await;

        // 6. product enforcement
        let product = self.policy.product();
        let action = self
            .converge(repo, &product.full_ref, &product_sha, &mirror_sha)
            .await;
        if let PromotionAction::Failed { status, message } = &action {
            outcome.note(format!(
                "product `{}` could not be moved to mirror: {}",
                product.full_ref, message
            ));
            let status = *status;
            outcome.product_action = Some(action);
            return Err(SkipReason::PromotionFailed { status });
        }
        if let PromotionAction::Reset { discarded, .. } = &action {
            if *discarded > 0 {
                outcome.note(format!(
                    "product `{}` carried {} commit(s) not in `{}`; they were abandoned",
                    product.full_ref, discarded, mirror
                ));
            }
        }
        outcome.product_changed = action.moved();
        outcome.product_action = Some(action);

        // 7. downstream promotion
        self.promote_downstream(repo, &mirror_sha, outcome).await?;

        // 8. create-once branches
        for spec in self.policy.create_once() {
            outcome.create_once.push(spec.full_ref.clone());
        }

        Ok(())
    }

    async fn metadata(
        &self,
        repo: &RepoIdentity,
        outcome: &mut SyncOutcome,
    ) -> Result<RepoMetadata, SkipReason> {
        if let Some(meta) = self.cache.metadata(repo) {
            debug!("Using cached metadata for {}", repo);
            return Ok(meta);
        }

        match self.api.get_repository(repo).await {
            Ok(meta) => {
                self.cache.store_metadata(repo, &meta);
                Ok(meta)
            }
            Err(e) => {
                warn!("Failed to fetch metadata for {}: {}", repo, e);
                outcome.note(format!("metadata lookup failed: {}", e));
                Err(SkipReason::MetadataUnavailable { status: e.status })
            }
        }
    }

    async fn read_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        freshness: Freshness,
    ) -> Result<Option<String>, ApiError> {
        if freshness == Freshness::Cached {
            match self.cache.lookup_ref(repo, branch) {
                RefLookup::Found(sha) => return Ok(Some(sha)),
                RefLookup::Missing => return Ok(None),
                RefLookup::Unknown => {}
            }
        }

        let pointer = self.api.get_ref(repo, branch).await?;
        match &pointer {
            Some(pointer) => self.cache.store_ref(repo, branch, &pointer.sha),
            None => self.cache.store_missing(repo, branch),
        }
        Ok(pointer.map(|p| p.sha))
    }

    /// Parent's default branch, then the fork's default, then `main`, then `master`
    async fn select_mirror(
        &self,
        repo: &RepoIdentity,
        meta: &RepoMetadata,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SkipReason> {
        let mut candidates: Vec<String> = Vec::new();
        let preferred = meta.parent.as_ref().map(|p| p.default_branch.as_str());
        for candidate in [preferred, Some(meta.default_branch.as_str()), Some("main"), Some("master")]
            .into_iter()
            .flatten()
        {
            if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
                candidates.push(candidate.to_string());
            }
        }

        for candidate in &candidates {
            match self.read_ref(repo, candidate, Freshness::Cached).await {
                Ok(Some(_)) => {
                    debug!("Selected mirror branch `{}` for {}", candidate, repo);
                    return Ok(candidate.clone());
                }
                Ok(None) => continue,
                Err(e) => {
                    outcome.note(format!("reading `{}` failed: {}", candidate, e));
                    return Err(SkipReason::RefLookupFailed { status: e.status });
                }
            }
        }

        outcome.note(format!("tried {}", candidates.join(", ")));
        let body = missing_mirror_body(repo, &candidates);
        self.escalate(
            repo,
            outcome,
            MIRROR_SYNC_FAILED_TITLE,
            &body,
            "no mirror branch candidate exists",
        )
        .await;
        Err(SkipReason::NoMirrorBranch)
    }

    /// Merge upstream into the mirror, then read the mirror's SHA fresh
    async fn sync_mirror(
        &self,
        repo: &RepoIdentity,
        mirror: &str,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SkipReason> {
        match self.api.merge_upstream(repo, mirror).await {
            Ok(result) => {
                info!(
                    "Merged upstream into `{}` in {} ({})",
                    mirror,
                    repo,
                    result.merge_type.as_deref().unwrap_or("none")
                );
                outcome.mirror_sync = MirrorSyncStatus::Synced {
                    message: result.message,
                    merge_type: result.merge_type,
                };
                self.cache.invalidate_ref(repo, mirror);
            }
            Err(e) => {
                warn!("Mirror sync failed for {}: {}", repo, e);
                outcome.mirror_sync = MirrorSyncStatus::Failed {
                    status: e.status,
                    message: e.message.clone(),
                };
                outcome.note(format!("mirror sync of `{}` failed: {}", mirror, e));
                let body = mirror_sync_failure_body(repo, mirror, &e);
                let detail = format!("merge-upstream of `{}` returned {}", mirror, e.status);
                self.escalate(repo, outcome, MIRROR_SYNC_FAILED_TITLE, &body, &detail)
                    .await;
                return Err(SkipReason::MirrorSyncFailed { status: e.status });
            }
        }

        match self.read_ref(repo, mirror, Freshness::Live).await {
            Ok(Some(sha)) => Ok(sha),
            Ok(None) => {
                outcome.note(format!("mirror `{}` disappeared after sync", mirror));
                Err(SkipReason::NoMirrorBranch)
            }
            Err(e) => {
                outcome.note(format!("reading mirror `{}` failed: {}", mirror, e));
                Err(SkipReason::RefLookupFailed { status: e.status })
            }
        }
    }

    /// Create missing branches in policy order; returns product's SHA
    ///
    /// Seeds are taken before any promotion: product from the mirror, staging
    /// and feature from product, snapshot from staging.
    async fn bootstrap(
        &self,
        repo: &RepoIdentity,
        mirror_sha: &str,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SkipReason> {
        let mut resolved: Vec<(BranchRole, String)> = vec![(BranchRole::Mirror, mirror_sha.to_string())];

        // read live so a branch deleted on the host is recreated from a current seed
        for spec in &self.policy.order {
            let existing = match self.read_ref(repo, &spec.full_ref, Freshness::Live).await {
                Ok(existing) => existing,
                Err(e) => {
                    outcome.note(format!("reading `{}` failed: {}", spec.full_ref, e));
                    return Err(SkipReason::RefLookupFailed { status: e.status });
                }
            };

            if let Some(sha) = existing {
                outcome.bootstrap.push(BootstrapResult {
                    role: spec.role,
                    branch: spec.full_ref.clone(),
                    status: BootstrapStatus::Exists,
                    sha: Some(sha.clone()),
                });
                resolved.push((spec.role, sha));
                continue;
            }

            let seed_role = spec.role.seed_source().unwrap_or(BranchRole::Mirror);
            let Some(seed) = resolved
                .iter()
                .find(|(role, _)| *role == seed_role)
                .map(|(_, sha)| sha.clone())
            else {
                outcome.note(format!(
                    "no {} branch to seed `{}` from",
                    seed_role, spec.full_ref
                ));
                return Err(SkipReason::BootstrapFailed { status: 0 });
            };

            let sha = self.create_branch(repo, spec, &seed, outcome).await?;
            resolved.push((spec.role, sha));
        }

        let product = self.policy.product();
        match self.read_ref(repo, &product.full_ref, Freshness::Live).await {
            Ok(Some(sha)) => Ok(sha),
            Ok(None) => {
                outcome.note(format!("product `{}` missing after bootstrap", product.full_ref));
                Err(SkipReason::BootstrapFailed { status: 404 })
            }
            Err(e) => {
                outcome.note(format!("reading `{}` failed: {}", product.full_ref, e));
                Err(SkipReason::RefLookupFailed { status: e.status })
            }
        }
    }

    async fn create_branch(
        &self,
        repo: &RepoIdentity,
        spec: &BranchSpec,
        seed: &str,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SkipReason> {
        match self.api.create_ref(repo, &spec.full_ref, seed).await {
            Ok(pointer) => {
                info!(
                    "Created `{}` in {} at {}",
                    spec.full_ref,
                    repo,
                    short_sha(&pointer.sha)
                );
                self.cache.store_ref(repo, &spec.full_ref, &pointer.sha);
                outcome.bootstrap.push(BootstrapResult {
                    role: spec.role,
                    branch: spec.full_ref.clone(),
                    status: BootstrapStatus::Created,
                    sha: Some(pointer.sha.clone()),
                });
                Ok(pointer.sha)
            }
            // 422: the ref already exists (a stale negative cache entry)
            Err(e) if e.is_unprocessable() => {
                if let Ok(Some(sha)) = self.read_ref(repo, &spec.full_ref, Freshness::Live).await {
                    debug!("`{}` already existed in {}", spec.full_ref, repo);
                    outcome.bootstrap.push(BootstrapResult {
                        role: spec.role,
                        branch: spec.full_ref.clone(),
                        status: BootstrapStatus::Exists,
                        sha: Some(sha.clone()),
                    });
                    return Ok(sha);
                }
                self.bootstrap_failed(repo, spec, seed, e, outcome).await
            }
            Err(e) => self.bootstrap_failed(repo, spec, seed, e, outcome).await,
        }
    }

    async fn bootstrap_failed(
        &self,
        repo: &RepoIdentity,
        spec: &BranchSpec,
        seed: &str,
        error: ApiError,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SkipReason> {
        warn!("Creating `{}` in {} failed: {}", spec.full_ref, repo, error);
        outcome.bootstrap.push(BootstrapResult {
            role: spec.role,
            branch: spec.full_ref.clone(),
            status: BootstrapStatus::Failed {
                status: error.status,
                message: error.message.clone(),
            },
            sha: None,
        });
        outcome.note(format!("creating `{}` failed: {}", spec.full_ref, error));

        let body = bootstrap_failure_body(repo, &spec.full_ref, seed, &error);
        let detail = format!("creating `{}` returned {}", spec.full_ref, error.status);
        self.escalate(repo, outcome, BOOTSTRAP_FAILED_TITLE, &body, &detail)
            .await;
        Err(SkipReason::BootstrapFailed {
            status: error.status,
        })
    }

    async fn audit_presence(&self, repo: &RepoIdentity, outcome: &mut SyncOutcome) {
        for spec in &self.policy.order {
            let presence = match self.read_ref(repo, &spec.full_ref, Freshness::Cached).await {
                Ok(Some(sha)) => Presence::Present(sha),
                Ok(None) => Presence::Missing,
                Err(e) => {
                    outcome.note(format!("presence check of `{}` failed: {}", spec.full_ref, e));
                    Presence::Unknown { status: e.status }
                }
            };
            outcome.presence.push(BranchPresence {
                role: spec.role,
                branch: spec.full_ref.clone(),
                presence,
            });
        }
    }

    /// Move `branch` from `current` to `target`: fast-forward when the branch
    /// is behind, force otherwise
    async fn converge(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        current: &str,
        target: &str,
    ) -> PromotionAction {
        if current == target {
            return PromotionAction::Unchanged;
        }

        let comparison = match self.api.compare(repo, current, target).await {
            Ok(comparison) => comparison,
            Err(e) => {
                return PromotionAction::Failed {
                    status: e.status,
                    message: format!("compare failed: {}", e.message),
                }
            }
        };
        debug!(
            "`{}` is {} target (ahead {}, behind {})",
            branch, comparison.status, comparison.ahead_by, comparison.behind_by
        );

        let action = match comparison.status {
            CompareStatus::Identical => return PromotionAction::Unchanged,
            CompareStatus::Behind => {
                match self.api.update_ref(repo, branch, target, false).await {
                    Ok(_) => PromotionAction::FastForwarded {
                        from: current.to_string(),
                        to: target.to_string(),
                    },
                    Err(e) if e.is_unprocessable() || e.is_conflict() => {
                        warn!(
                            "Fast-forward of `{}` in {} rejected ({}), forcing",
                            branch, repo, e.status
                        );
                        match self.api.update_ref(repo, branch, target, true).await {
                            Ok(_) => PromotionAction::ResetAfterRejectedFastForward {
                                from: current.to_string(),
                                to: target.to_string(),
                            },
                            Err(e) => PromotionAction::Failed {
                                status: e.status,
                                message: e.message,
                            },
                        }
                    }
                    Err(e) => PromotionAction::Failed {
                        status: e.status,
                        message: e.message,
                    },
                }
            }
            CompareStatus::Ahead | CompareStatus::Diverged => {
                match self.api.update_ref(repo, branch, target, true).await {
                    Ok(_) => PromotionAction::Reset {
                        from: current.to_string(),
                        to: target.to_string(),
                        discarded: comparison.ahead_by,
                    },
                    Err(e) => PromotionAction::Failed {
                        status: e.status,
                        message: e.message,
                    },
                }
            }
        };

        if action.moved() {
            info!("Moved `{}` in {}: {}", branch, repo, action);
            self.cache.store_ref(repo, branch, target);
        } else {
            self.cache.invalidate_ref(repo, branch);
        }
        action
    }

    async fn promote_downstream(
        &self,
        repo: &RepoIdentity,
        product_sha: &str,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SkipReason> {
        let promoted: Vec<&BranchSpec> = self.policy.promoted().collect();

        if !outcome.product_changed {
            for spec in promoted {
                outcome.promotions.push(PromotionResult {
                    role: spec.role,
                    branch: spec.full_ref.clone(),
                    action: PromotionAction::not_run("product unchanged"),
                });
            }
            return Ok(());
        }

        let target = match self.api.first_parent(repo, product_sha).await {
            Ok(Some(parent)) => DownstreamTarget {
                sha: parent,
                source: TargetSource::Parent,
            },
            Ok(None) => DownstreamTarget {
                sha: product_sha.to_string(),
                source: TargetSource::ProductFallback,
            },
            Err(e) => {
                outcome.note(format!(
                    "reading the parent of `{}` failed: {}",
                    short_sha(product_sha),
                    e
                ));
                return Err(SkipReason::PromotionFailed { status: e.status });
            }
        };
        if target.source == TargetSource::ProductFallback {
            outcome.note("product has no parent commit; downstream target is product itself");
        }

        for spec in promoted {
            let action = match self.read_ref(repo, &spec.full_ref, Freshness::Live).await {
                Ok(Some(current)) => {
                    self.converge(repo, &spec.full_ref, &current, &target.sha)
                        .await
                }
                Ok(None) => PromotionAction::not_run("branch missing"),
                Err(e) => PromotionAction::Failed {
                    status: e.status,
                    message: format!("reading branch failed: {}", e.message),
                },
            };
            if let PromotionAction::Failed { message, .. } = &action {
                outcome.note(format!("promoting `{}` failed: {}", spec.full_ref, message));
            }
            outcome.promotions.push(PromotionResult {
                role: spec.role,
                branch: spec.full_ref.clone(),
                action,
            });
        }

        outcome.downstream_target = Some(target);
        Ok(())
    }

    /// File or update a tracking issue; failures become notes
    async fn escalate(
        &self,
        repo: &RepoIdentity,
        outcome: &mut SyncOutcome,
        title: &str,
        body: &str,
        detail: &str,
    ) {
        let comment = run_comment(&self.run_id, detail);
        match self
            .issues
            .create_or_update(repo, title, body, Some(&comment))
            .await
        {
            Ok(report) => outcome.issue = Some(report),
            Err(e) => {
                warn!("Filing issue `{}` in {} failed: {}", title, repo, e);
                outcome.note(format!("filing issue `{}` failed: {}", title, e));
            }
        }
    }
}
