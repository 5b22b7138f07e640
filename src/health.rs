//! Preflight checks
//!
//! [`preflight`] gates a sync run: a rejected token or an unreachable
//! organisation aborts before any repository is touched. [`HealthCheck`] runs
//! the same probes plus local checks for the `doctor` command.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::github::HostingApi;
use crate::models::RateLimitStatus;
use crate::policy::BranchPolicy;

/// Remaining core quota below which the token check warns
pub const LOW_QUOTA: u64 = 100;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub token: CheckResult,
    pub organization: CheckResult,
    pub policy: CheckResult,
    /// Warning only; the cache is advisory
    pub cache_dir: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::ok(message)
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

/// Verify the token and the target organisation before a run
pub async fn preflight(api: &dyn HostingApi, org: &str) -> Result<RateLimitStatus, ApiError> {
    let quota = api.rate_limit().await?;
    debug!(
        "Token accepted, {}/{} core requests remaining",
        quota.remaining, quota.limit
    );
    if quota.remaining < LOW_QUOTA {
        warn!(
            "Only {} API requests remain until the quota resets",
            quota.remaining
        );
    }
    api.get_organization(org).await?;
    debug!("Organisation {} is reachable", org);
    Ok(quota)
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(
        api: &dyn HostingApi,
        config: &Config,
        policy: &Result<BranchPolicy>,
    ) -> Self {
        let token = Self::check_token(api).await;
        let organization = if token.passed {
            Self::check_organization(api, config).await
        } else {
            CheckResult::error_with_details(
                "Organisation not checked",
                "The token was rejected",
            )
        };

        Self {
            token,
            organization,
            policy: Self::check_policy(policy),
            cache_dir: Self::check_cache_dir(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, check)| check.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_token(api: &dyn HostingApi) -> CheckResult {
        match api.rate_limit().await {
            Ok(quota) if quota.remaining < LOW_QUOTA => CheckResult::warning_with_details(
                "Token accepted, quota nearly exhausted",
                format!("{}/{} requests remaining", quota.remaining, quota.limit),
            ),
            Ok(quota) => CheckResult::ok_with_details(
                "Token accepted",
                format!("{}/{} requests remaining", quota.remaining, quota.limit),
            ),
            Err(e) => CheckResult::error_with_details(
                "Token rejected",
                format!("{}\nRun: forkwarden auth status", e),
            ),
        }
    }

    async fn check_organization(api: &dyn HostingApi, config: &Config) -> CheckResult {
        let org = match config.target_org() {
            Ok(org) => org,
            Err(e) => {
                return CheckResult::error_with_details(
                    "No target organisation",
                    format!("{:#}", e),
                )
            }
        };
        match api.get_organization(org).await {
            Ok(()) => CheckResult::ok_with_details("Organisation reachable", org.to_string()),
            Err(e) if e.is_not_found() => CheckResult::error_with_details(
                "Organisation not found",
                format!("{} (or the token cannot see it)", org),
            ),
            Err(e) => CheckResult::error_with_details("Organisation unreachable", e.to_string()),
        }
    }

    fn check_policy(policy: &Result<BranchPolicy>) -> CheckResult {
        match policy {
            Ok(policy) => CheckResult::ok_with_details("Branch policy valid", policy.summary_line()),
            Err(e) => CheckResult::error_with_details("Branch policy invalid", format!("{:#}", e)),
        }
    }

    fn check_cache_dir(config: &Config) -> CheckResult {
        if !config.cache.enabled {
            return CheckResult::ok("Metadata cache disabled");
        }
        let path = Path::new(&config.cache.path);
        let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return CheckResult::ok_with_details("Cache directory writable", ".");
        };

        let probe = dir.join(".forkwarden-probe");
        let writable = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&probe, b"probe"))
            .and_then(|_| std::fs::remove_file(&probe));
        match writable {
            Ok(()) => CheckResult::ok_with_details("Cache directory writable", dir.display().to_string()),
            Err(e) => CheckResult::warning_with_details(
                "Cache directory not writable",
                format!("{}: {}. Runs will work without a cache", dir.display(), e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("API Token", &self.token),
            ("Organisation", &self.organization),
            ("Branch Policy", &self.policy),
            ("Cache Directory", &self.cache_dir),
        ]
    }
}
