//! Shared fixtures for the integration tests: an in-memory host over a small
//! commit graph, plus policy helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use forkwarden::cache::CacheHandle;
use forkwarden::github::HostingApi;
use forkwarden::issues::IssueReporter;
use forkwarden::models::{
    CompareResult, CompareStatus, IssueRef, MergeUpstreamResult, OrgRepoSummary, ParentRepo,
    RateLimitStatus, RefPointer, RepoIdentity, RepoMetadata,
};
use forkwarden::{ApiError, BranchPolicy, RepoSyncOrchestrator};

pub const POLICY_JSON: &str = r#"{
    "prefixEnv": "BRANCH_PREFIX",
    "createOrder": ["product", "staging", "feature", "snapshot"],
    "branches": [
        {"role": "product", "nameEnv": "PRODUCT_BRANCH", "track": "upstream"},
        {"role": "staging", "nameEnv": "STAGING_BRANCH", "track": "main"},
        {"role": "feature", "nameEnv": "FEATURE_BRANCH", "track": "main"},
        {"role": "snapshot", "nameEnv": "SNAPSHOT_BRANCH", "track": "main", "update": false}
    ]
}"#;

pub const PRODUCT: &str = "acme/product";
pub const STAGING: &str = "acme/staging";
pub const FEATURE: &str = "acme/feature";
pub const SNAPSHOT: &str = "acme/snapshot";

pub fn policy_values() -> BTreeMap<String, String> {
    [
        ("BRANCH_PREFIX", "acme"),
        ("PRODUCT_BRANCH", "product"),
        ("STAGING_BRANCH", "staging"),
        ("FEATURE_BRANCH", "feature"),
        ("SNAPSHOT_BRANCH", "snapshot"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn policy() -> Arc<BranchPolicy> {
    Arc::new(BranchPolicy::from_json(POLICY_JSON, &policy_values()).expect("valid policy"))
}

/// Orchestrator over `host` with the cache switched off
pub fn orchestrator(host: &Arc<FakeHost>) -> RepoSyncOrchestrator {
    orchestrator_with_cache(host, CacheHandle::disabled())
}

pub fn orchestrator_with_cache(host: &Arc<FakeHost>, cache: CacheHandle) -> RepoSyncOrchestrator {
    let api: Arc<dyn HostingApi> = host.clone();
    RepoSyncOrchestrator::new(
        api.clone(),
        cache,
        policy(),
        IssueReporter::new(api, true),
        "run-1",
    )
}

/// A ref mutation observed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create { branch: String, sha: String },
    Update { branch: String, sha: String, force: bool },
    MergeUpstream { branch: String },
}

#[derive(Debug, Clone)]
pub struct FakeIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub open: bool,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeRepo {
    meta: RepoMetadata,
    branches: BTreeMap<String, String>,
    /// Tip of the parent's default branch
    upstream_tip: Option<String>,
}

#[derive(Default)]
struct HostState {
    next_commit: u64,
    /// sha -> parents, first parent first
    commits: HashMap<String, Vec<String>>,
    repos: BTreeMap<String, FakeRepo>,
    issues: Vec<FakeIssue>,
    mutations: Vec<Mutation>,
    merge_failure: Option<ApiError>,
    create_failure: Option<ApiError>,
    /// Branches whose non-forced updates are rejected regardless of ancestry
    reject_fast_forward: HashSet<String>,
}

/// In-memory host implementing [`HostingApi`]
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().expect("fake host lock")
    }

    /// Add a commit with the given parents and return its SHA
    pub fn commit(&self, parents: &[&str]) -> String {
        let mut state = self.state();
        state.next_commit += 1;
        let sha = format!("{:040x}", 0xc0_0000 + state.next_commit);
        let parents = parents.iter().map(|p| p.to_string()).collect();
        state.commits.insert(sha.clone(), parents);
        sha
    }

    /// A linear history of `len` commits; returns the SHAs oldest first
    pub fn chain(&self, from: Option<&str>, len: usize) -> Vec<String> {
        let mut shas: Vec<String> = Vec::with_capacity(len);
        let mut parent = from.map(str::to_string);
        for _ in 0..len {
            let parents: Vec<&str> = parent.iter().map(String::as_str).collect();
            let sha = self.commit(&parents);
            parent = Some(sha.clone());
            shas.push(sha);
        }
        shas
    }

    /// Register a fork whose parent's default branch is `main`
    pub fn add_fork(&self, repo: &RepoIdentity, mirror: &str, upstream_tip: &str) {
        let meta = RepoMetadata {
            is_fork: true,
            is_archived: false,
            is_disabled: false,
            default_branch: mirror.to_string(),
            parent: Some(ParentRepo {
                org: "upstream".to_string(),
                name: repo.name.clone(),
                default_branch: mirror.to_string(),
            }),
        };
        self.state().repos.insert(
            repo.full_name(),
            FakeRepo {
                meta,
                branches: BTreeMap::new(),
                upstream_tip: Some(upstream_tip.to_string()),
            },
        );
    }

    pub fn set_metadata(&self, repo: &RepoIdentity, meta: RepoMetadata) {
        if let Some(entry) = self.state().repos.get_mut(&repo.full_name()) {
            entry.meta = meta;
        }
    }

    pub fn set_branch(&self, repo: &RepoIdentity, branch: &str, sha: &str) {
        if let Some(entry) = self.state().repos.get_mut(&repo.full_name()) {
            entry.branches.insert(branch.to_string(), sha.to_string());
        }
    }

    pub fn set_upstream(&self, repo: &RepoIdentity, sha: &str) {
        if let Some(entry) = self.state().repos.get_mut(&repo.full_name()) {
            entry.upstream_tip = Some(sha.to_string());
        }
    }

    pub fn branch(&self, repo: &RepoIdentity, branch: &str) -> Option<String> {
        self.state()
            .repos
            .get(&repo.full_name())
            .and_then(|entry| entry.branches.get(branch).cloned())
    }

    pub fn fail_merge_upstream(&self, error: Option<ApiError>) {
        self.state().merge_failure = error;
    }

    pub fn fail_create_ref(&self, error: Option<ApiError>) {
        self.state().create_failure = error;
    }

    pub fn reject_fast_forward(&self, branch: &str) {
        self.state().reject_fast_forward.insert(branch.to_string());
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    /// Ref creations and updates, ignoring upstream merges
    pub fn ref_mutations(&self) -> Vec<Mutation> {
        self.mutations()
            .into_iter()
            .filter(|m| !matches!(m, Mutation::MergeUpstream { .. }))
            .collect()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    pub fn issues(&self) -> Vec<FakeIssue> {
        self.state().issues.clone()
    }

    pub fn first_parent_of(&self, sha: &str) -> Option<String> {
        self.state()
            .commits
            .get(sha)
            .and_then(|parents| parents.first().cloned())
    }

    fn ancestors(state: &HostState, sha: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([sha.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(parents) = state.commits.get(&next) {
                queue.extend(parents.iter().cloned());
            }
        }
        seen
    }

    fn is_ancestor(state: &HostState, ancestor: &str, of: &str) -> bool {
        Self::ancestors(state, of).contains(ancestor)
    }

    fn repo<'a>(state: &'a HostState, repo: &RepoIdentity) -> Result<&'a FakeRepo, ApiError> {
        state
            .repos
            .get(&repo.full_name())
            .ok_or_else(|| ApiError::new(404, "Not Found"))
    }

    fn repo_mut<'a>(
        state: &'a mut HostState,
        repo: &RepoIdentity,
    ) -> Result<&'a mut FakeRepo, ApiError> {
        state
            .repos
            .get_mut(&repo.full_name())
            .ok_or_else(|| ApiError::new(404, "Not Found"))
    }

    fn resolve(state: &HostState, repo: &RepoIdentity, rev: &str) -> Result<String, ApiError> {
        if state.commits.contains_key(rev) {
            return Ok(rev.to_string());
        }
        Self::repo(state, repo)?
            .branches
            .get(rev)
            .cloned()
            .ok_or_else(|| ApiError::new(404, format!("No commit found for {}", rev)))
    }
}

#[async_trait]
impl HostingApi for FakeHost {
    async fn get_repository(&self, repo: &RepoIdentity) -> Result<RepoMetadata, ApiError> {
        let state = self.state();
        Ok(Self::repo(&state, repo)?.meta.clone())
    }

    async fn get_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<Option<RefPointer>, ApiError> {
        let state = self.state();
        Ok(Self::repo(&state, repo)?
            .branches
            .get(branch)
            .map(|sha| RefPointer::new(branch, sha.clone())))
    }

    async fn create_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
    ) -> Result<RefPointer, ApiError> {
        let mut state = self.state();
        if let Some(error) = state.create_failure.clone() {
            return Err(error);
        }
        if !state.commits.contains_key(sha) {
            return Err(ApiError::new(422, "Object does not exist"));
        }
        let entry = Self::repo_mut(&mut state, repo)?;
        if entry.branches.contains_key(branch) {
            return Err(ApiError::new(422, "Reference already exists"));
        }
        entry.branches.insert(branch.to_string(), sha.to_string());
        state.mutations.push(Mutation::Create {
            branch: branch.to_string(),
            sha: sha.to_string(),
        });
        Ok(RefPointer::new(branch, sha))
    }

    async fn update_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<RefPointer, ApiError> {
        let mut state = self.state();
        let current = Self::repo(&state, repo)?
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| ApiError::new(422, "Reference does not exist"))?;

        if !force
            && (state.reject_fast_forward.contains(branch)
                || !Self::is_ancestor(&state, &current, sha))
        {
            return Err(ApiError::new(422, "Update is not a fast forward"));
        }

        Self::repo_mut(&mut state, repo)?
            .branches
            .insert(branch.to_string(), sha.to_string());
        state.mutations.push(Mutation::Update {
            branch: branch.to_string(),
            sha: sha.to_string(),
            force,
        });
        Ok(RefPointer::new(branch, sha))
    }

    async fn compare(
        &self,
        repo: &RepoIdentity,
        base: &str,
        head: &str,
    ) -> Result<CompareResult, ApiError> {
        let state = self.state();
        let base_sha = Self::resolve(&state, repo, base)?;
        let head_sha = Self::resolve(&state, repo, head)?;

        let from_base = Self::ancestors(&state, &base_sha);
        let from_head = Self::ancestors(&state, &head_sha);
        let ahead_by = from_base.difference(&from_head).count() as u64;
        let behind_by = from_head.difference(&from_base).count() as u64;

        let status = match (ahead_by, behind_by) {
            (0, 0) => CompareStatus::Identical,
            (0, _) => CompareStatus::Behind,
            (_, 0) => CompareStatus::Ahead,
            _ => CompareStatus::Diverged,
        };
        Ok(CompareResult {
            status,
            ahead_by,
            behind_by,
            head_sha,
        })
    }

    async fn first_parent(
        &self,
        _repo: &RepoIdentity,
        sha: &str,
    ) -> Result<Option<String>, ApiError> {
        let state = self.state();
        state
            .commits
            .get(sha)
            .map(|parents| parents.first().cloned())
            .ok_or_else(|| ApiError::new(404, "No commit found"))
    }

    async fn merge_upstream(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<MergeUpstreamResult, ApiError> {
        let mut state = self.state();
        state.mutations.push(Mutation::MergeUpstream {
            branch: branch.to_string(),
        });
        if let Some(error) = state.merge_failure.clone() {
            return Err(error);
        }

        let entry = Self::repo(&state, repo)?;
        let current = entry
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| ApiError::new(422, "Branch not found"))?;
        let Some(tip) = entry.upstream_tip.clone() else {
            return Err(ApiError::new(422, "Repository has no upstream"));
        };

        if current == tip || Self::is_ancestor(&state, &tip, &current) {
            return Ok(MergeUpstreamResult {
                message: "This branch is not behind the upstream".to_string(),
                merge_type: Some("none".to_string()),
            });
        }
        if !Self::is_ancestor(&state, &current, &tip) {
            return Err(ApiError::new(409, "There are merge conflicts"));
        }

        Self::repo_mut(&mut state, repo)?
            .branches
            .insert(branch.to_string(), tip);
        Ok(MergeUpstreamResult {
            message: "Successfully fetched and fast-forwarded from upstream".to_string(),
            merge_type: Some("fast-forward".to_string()),
        })
    }

    async fn find_open_issue(
        &self,
        _repo: &RepoIdentity,
        title: &str,
    ) -> Result<Option<IssueRef>, ApiError> {
        Ok(self
            .state()
            .issues
            .iter()
            .find(|issue| issue.open && issue.title == title)
            .map(|issue| IssueRef {
                number: issue.number,
                title: issue.title.clone(),
                url: None,
            }))
    }

    async fn create_issue(
        &self,
        _repo: &RepoIdentity,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, ApiError> {
        let mut state = self.state();
        let number = state.issues.len() as u64 + 1;
        state.issues.push(FakeIssue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            open: true,
            comments: Vec::new(),
        });
        Ok(IssueRef {
            number,
            title: title.to_string(),
            url: None,
        })
    }

    async fn update_issue_body(
        &self,
        _repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<IssueRef, ApiError> {
        let mut state = self.state();
        let issue = state
            .issues
            .iter_mut()
            .find(|issue| issue.number == number)
            .ok_or_else(|| ApiError::new(404, "Not Found"))?;
        issue.body = body.to_string();
        Ok(IssueRef {
            number,
            title: issue.title.clone(),
            url: None,
        })
    }

    async fn create_issue_comment(
        &self,
        _repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        let issue = state
            .issues
            .iter_mut()
            .find(|issue| issue.number == number)
            .ok_or_else(|| ApiError::new(404, "Not Found"))?;
        issue.comments.push(body.to_string());
        Ok(())
    }

    async fn list_org_repositories(&self, org: &str) -> Result<Vec<OrgRepoSummary>, ApiError> {
        let prefix = format!("{}/", org);
        Ok(self
            .state()
            .repos
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, entry)| OrgRepoSummary {
                name: name[prefix.len()..].to_string(),
                is_fork: entry.meta.is_fork,
                is_archived: entry.meta.is_archived,
                is_disabled: entry.meta.is_disabled,
            })
            .collect())
    }

    async fn get_organization(&self, org: &str) -> Result<(), ApiError> {
        let prefix = format!("{}/", org);
        if self.state().repos.keys().any(|name| name.starts_with(&prefix)) {
            Ok(())
        } else {
            Err(ApiError::new(404, "Not Found"))
        }
    }

    async fn rate_limit(&self) -> Result<RateLimitStatus, ApiError> {
        Ok(RateLimitStatus {
            limit: 5000,
            remaining: 4999,
            reset: 0,
        })
    }
}
