//! Forkwarden - keeps an organisation's forks tracking their upstreams
//!
//! For every fork in an organisation, Forkwarden merges upstream into the
//! fork's mirror branch on the host, creates the managed branches a branch
//! policy asks for, and moves them along a fixed promotion chain:
//!
//! ```text
//! mirror -> {prefix}/product -> {prefix}/staging, {prefix}/feature
//! ```
//!
//! All work happens through the hosting API; nothing is cloned locally.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration, XDG paths and startup value resolution
//! - [`github`]: the [`HostingApi`] seam and its GitHub REST implementation
//! - [`cache`]: advisory on-disk metadata cache with per-kind TTLs
//! - [`policy`]: branch policy loading and validation
//! - [`orchestrator`]: the per-repository sync state machine
//! - [`issues`]: tracking issues for repositories needing a human
//! - [`sync`]: the batch runner across discovered forks
//! - [`summary`]: markdown rendering of a run

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod github;
pub mod health;
pub mod issues;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod retry;
pub mod summary;
pub mod sync;

pub use cache::{CacheHandle, CacheTtls, MetadataCache};
pub use config::{Config, StartupValues, ValueSource};
pub use discovery::{ForkDiscovery, RepoFilters};
pub use error::{ApiError, SkipReason, ValidationError};
pub use github::{GitHubClient, HostingApi};
pub use health::HealthCheck;
pub use issues::IssueReporter;
pub use logging::Redactor;
pub use models::{BranchRole, CompareStatus, RepoIdentity};
pub use orchestrator::{RepoSyncOrchestrator, SyncOutcome};
pub use policy::BranchPolicy;
pub use sync::{RunOptions, RunSummary, SyncEngine};
