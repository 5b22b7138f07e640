//! Tracking issues for repositories that cannot be synced safely
//!
//! One open issue per failure kind and repository, found by exact title. A
//! repeat failure patches the existing issue and adds a run comment instead of
//! opening a duplicate.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::github::HostingApi;
use crate::models::RepoIdentity;

pub const MIRROR_SYNC_FAILED_TITLE: &str = "[automation] mirror sync failed";
pub const BOOTSTRAP_FAILED_TITLE: &str = "[automation] branch bootstrap failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueAction {
    Created,
    Updated,
    Skipped,
}

impl fmt::Display for IssueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueAction::Created => f.write_str("created"),
            IssueAction::Updated => f.write_str("updated"),
            IssueAction::Skipped => f.write_str("skipped"),
        }
    }
}

/// What happened to the tracking issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReport {
    pub action: IssueAction,
    pub number: Option<u64>,
    pub url: Option<String>,
    /// Set when `action` is `Skipped`
    pub reason: Option<String>,
}

impl IssueReport {
    fn skipped(reason: &str) -> Self {
        Self {
            action: IssueAction::Skipped,
            number: None,
            url: None,
            reason: Some(reason.to_string()),
        }
    }
}

impl fmt::Display for IssueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.action, self.number, &self.reason) {
            (IssueAction::Skipped, _, Some(reason)) => write!(f, "skipped ({})", reason),
            (action, Some(number), _) => match &self.url {
                Some(url) => write!(f, "{} #{} ({})", action, number, url),
                None => write!(f, "{} #{}", action, number),
            },
            (action, None, _) => write!(f, "{}", action),
        }
    }
}

/// Files or updates tracking issues in the target repository
#[derive(Clone)]
pub struct IssueReporter {
    api: Arc<dyn HostingApi>,
    enabled: bool,
}

impl IssueReporter {
    pub fn new(api: Arc<dyn HostingApi>, enabled: bool) -> Self {
        Self { api, enabled }
    }

    /// Create the issue, or patch the open one with the same title
    ///
    /// A repository with issues disabled (410 Gone) yields a skipped report,
    /// not an error.
    pub async fn create_or_update(
        &self,
        repo: &RepoIdentity,
        title: &str,
        body: &str,
        comment: Option<&str>,
    ) -> Result<IssueReport, ApiError> {
        if !self.enabled {
            debug!("Issue reporting disabled, not filing `{}` in {}", title, repo);
            return Ok(IssueReport::skipped("issue reporting disabled"));
        }

        match self.file(repo, title, body, comment).await {
            Err(e) if e.is_gone() => {
                info!("Issues are disabled in {}", repo);
                Ok(IssueReport::skipped("issues disabled"))
            }
            other => other,
        }
    }

    async fn file(
        &self,
        repo: &RepoIdentity,
        title: &str,
        body: &str,
        comment: Option<&str>,
    ) -> Result<IssueReport, ApiError> {
        if let Some(existing) = self.api.find_open_issue(repo, title).await? {
            let updated = self
                .api
                .update_issue_body(repo, existing.number, body)
                .await?;
            if let Some(comment) = comment {
                self.api
                    .create_issue_comment(repo, existing.number, comment)
                    .await?;
            }
            info!("Updated issue #{} in {}: {}", updated.number, repo, title);
            return Ok(IssueReport {
                action: IssueAction::Updated,
                number: Some(updated.number),
                url: updated.url.or(existing.url),
                reason: None,
            });
        }

        let created = self.api.create_issue(repo, title, body).await?;
        info!("Created issue #{} in {}: {}", created.number, repo, title);
        Ok(IssueReport {
            action: IssueAction::Created,
            number: Some(created.number),
            url: created.url,
            reason: None,
        })
    }
}

/// Issue body for a failed host-side upstream merge
pub fn mirror_sync_failure_body(repo: &RepoIdentity, mirror_branch: &str, error: &ApiError) -> String {
    format!(
        "Automated upstream sync of `{mirror}` in `{repo}` failed.\n\n\
         - Status: `{status}`\n\
         - Message: {message}\n\n\
         No managed branch was changed. Resolve the conflict between `{mirror}` and \
         its upstream manually (for example by merging upstream locally and pushing), \
         then let the next run pick it up. This issue is updated on every failing run.",
        mirror = mirror_branch,
        repo = repo,
        status = error.status,
        message = error.message,
    )
}

/// Issue body for a fork in which no mirror branch candidate exists
pub fn missing_mirror_body(repo: &RepoIdentity, candidates: &[String]) -> String {
    let tried = candidates
        .iter()
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Automated upstream sync of `{repo}` cannot start: none of the mirror branch \
         candidates ({tried}) exists in the fork.\n\n\
         Recreate the upstream default branch in the fork, then let the next run \
         pick it up. This issue is updated on every failing run.",
        repo = repo,
        tried = tried,
    )
}

/// Issue body for a branch that could not be created
pub fn bootstrap_failure_body(
    repo: &RepoIdentity,
    branch: &str,
    source_sha: &str,
    error: &ApiError,
) -> String {
    format!(
        "Creating managed branch `{branch}` in `{repo}` from `{sha}` failed.\n\n\
         - Status: `{status}`\n\
         - Message: {message}\n\n\
         Branch promotion is paused for this repository. Check branch protection \
         rules and token permissions, or create the branch manually. This issue is \
         updated on every failing run.",
        branch = branch,
        repo = repo,
        sha = source_sha,
        status = error.status,
        message = error.message,
    )
}

/// Comment appended to an existing issue, scoped to the run identifier
pub fn run_comment(run_id: &str, detail: &str) -> String {
    format!("Run `{}` update: {}", run_id, detail)
}
