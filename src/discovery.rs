//! Fork discovery
//!
//! Lists an organisation's repositories and narrows them down to the forks
//! this run should process: archived and disabled repositories are dropped,
//! as are names matching a configured exclusion.

use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::error::{ApiError, ValidationError};
use crate::github::HostingApi;
use crate::models::{OrgRepoSummary, RepoIdentity};

/// Compiled exclusion rules plus the optional single-repository filter
#[derive(Debug, Clone)]
pub struct RepoFilters {
    globs: Vec<(String, Regex)>,
    patterns: Vec<Regex>,
    only: Option<String>,
}

impl RepoFilters {
    pub fn from_config(
        config: &DiscoveryConfig,
        only: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let globs = config
            .exclude_patterns
            .iter()
            .map(|pattern| Ok((pattern.clone(), glob_to_regex(pattern)?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let patterns = config
            .exclude_regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let only = match only.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => {
                validate_repo_filter(name)?;
                Some(name.to_string())
            }
            None => None,
        };

        Ok(Self {
            globs,
            patterns,
            only,
        })
    }

    /// The single repository this run is restricted to, if any
    pub fn only(&self) -> Option<&str> {
        self.only.as_deref()
    }

    /// Why a repository name is excluded, if it is
    pub fn exclusion(&self, name: &str) -> Option<String> {
        if let Some((pattern, _)) = self.globs.iter().find(|(_, re)| re.is_match(name)) {
            return Some(format!("matches exclusion pattern `{}`", pattern));
        }
        if let Some(re) = self.patterns.iter().find(|re| re.is_match(name)) {
            return Some(format!("matches exclusion regex `{}`", re.as_str()));
        }
        None
    }
}

/// Anchored regex for a `*` glob; a pattern without `*` matches exactly
fn glob_to_regex(pattern: &str) -> Result<Regex, ValidationError> {
    let body = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| ValidationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// A single-repository filter must be a bare repository name
pub fn validate_repo_filter(name: &str) -> Result<(), ValidationError> {
    let invalid = name.contains('/')
        || name.starts_with('.')
        || name.chars().any(|c| c.is_whitespace() || c.is_control());
    if invalid {
        Err(ValidationError::InvalidRepoFilter(name.to_string()))
    } else {
        Ok(())
    }
}

/// Discovers the forks of one organisation
pub struct ForkDiscovery {
    api: Arc<dyn HostingApi>,
    org: String,
    filters: RepoFilters,
}

impl ForkDiscovery {
    pub fn new(api: Arc<dyn HostingApi>, org: impl Into<String>, filters: RepoFilters) -> Self {
        Self {
            api,
            org: org.into(),
            filters,
        }
    }

    /// Repositories to process, in listing order
    ///
    /// With a single-repository filter the listing is skipped; the
    /// orchestrator gates that repository on its own metadata.
    pub async fn discover(&self) -> Result<Vec<RepoIdentity>, ApiError> {
        if let Some(name) = self.filters.only() {
            if let Some(reason) = self.filters.exclusion(name) {
                info!("Requested repository {} is excluded: {}", name, reason);
                return Ok(Vec::new());
            }
            return Ok(vec![RepoIdentity::new(&self.org, name)]);
        }

        let listed = self.api.list_org_repositories(&self.org).await?;
        let total = listed.len();
        let selected: Vec<RepoIdentity> = listed
            .into_iter()
            .filter(|repo| self.keep(repo))
            .map(|repo| RepoIdentity::new(&self.org, repo.name))
            .collect();

        info!(
            "Discovered {} fork(s) to process out of {} repositories in {}",
            selected.len(),
            total,
            self.org
        );
        Ok(selected)
    }

    fn keep(&self, repo: &OrgRepoSummary) -> bool {
        if repo.is_archived || repo.is_disabled {
            debug!("Excluding archived or disabled repository: {}", repo.name);
            return false;
        }
        if !repo.is_fork {
            debug!("Excluding non-fork repository: {}", repo.name);
            return false;
        }
        if let Some(reason) = self.filters.exclusion(&repo.name) {
            debug!("Excluding repository {}: {}", repo.name, reason);
            return false;
        }
        true
    }

    pub fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}
