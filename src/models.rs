//! Typed records decoded from the hosting API
//!
//! Every endpoint the orchestrator consumes is decoded into one of these
//! records at the client boundary; nothing downstream inspects raw JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key for all cache and API lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub org: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
        }
    }

    /// Get display name (org/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// The upstream repository a fork was created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRepo {
    pub org: String,
    pub name: String,
    pub default_branch: String,
}

/// Snapshot of repository metadata used for every decision in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub is_fork: bool,
    pub is_archived: bool,
    pub is_disabled: bool,
    pub default_branch: String,
    pub parent: Option<ParentRepo>,
}

/// A branch name plus the commit it currently resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefPointer {
    pub branch: String,
    pub sha: String,
}

impl RefPointer {
    pub fn new(branch: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            sha: sha.into(),
        }
    }
}

/// Relationship of a base ref to a head ref, seen from the base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareStatus {
    /// Base and head point at the same commit
    Identical,
    /// Base has commits head lacks, and head is an ancestor of base
    Ahead,
    /// Base is an ancestor of head (a fast-forward is possible)
    Behind,
    /// Each side has commits the other lacks
    Diverged,
}

impl CompareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareStatus::Identical => "identical",
            CompareStatus::Ahead => "ahead",
            CompareStatus::Behind => "behind",
            CompareStatus::Diverged => "diverged",
        }
    }
}

impl fmt::Display for CompareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing `base...head`
///
/// `ahead_by` counts commits reachable from base but not head, `behind_by`
/// counts commits reachable from head but not base. `head_sha` is the commit
/// head resolved to when the comparison was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareResult {
    pub status: CompareStatus,
    pub ahead_by: u64,
    pub behind_by: u64,
    pub head_sha: String,
}

/// Response of the host-side "merge upstream into branch" operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeUpstreamResult {
    pub message: String,
    pub merge_type: Option<String>,
}

/// Minimal view of an issue in the target repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub number: u64,
    pub title: String,
    pub url: Option<String>,
}

/// An entry from the organisation repository listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgRepoSummary {
    pub name: String,
    pub is_fork: bool,
    pub is_archived: bool,
    pub is_disabled: bool,
}

/// Core API quota as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds at which the quota resets
    pub reset: u64,
}

/// Managed branch roles
///
/// `Mirror` is resolved at runtime; the other roles are named by policy as
/// `{prefix}/{name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchRole {
    Mirror,
    Product,
    Staging,
    Feature,
    Snapshot,
}

impl BranchRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchRole::Mirror => "mirror",
            BranchRole::Product => "product",
            BranchRole::Staging => "staging",
            BranchRole::Feature => "feature",
            BranchRole::Snapshot => "snapshot",
        }
    }

    /// The role whose SHA a missing branch of this role is created from
    pub fn seed_source(&self) -> Option<BranchRole> {
        match self {
            BranchRole::Mirror => None,
            BranchRole::Product => Some(BranchRole::Mirror),
            BranchRole::Staging | BranchRole::Feature => Some(BranchRole::Product),
            BranchRole::Snapshot => Some(BranchRole::Staging),
        }
    }
}

impl fmt::Display for BranchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
