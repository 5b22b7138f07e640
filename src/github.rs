//! Hosting API client
//!
//! [`HostingApi`] is the typed seam the orchestrator, issue reporter and
//! discovery depend on. [`GitHubClient`] implements it over the GitHub REST
//! API with one shared [`RetryPolicy`]; every endpoint response is decoded
//! into a record from [`crate::models`] before it leaves this module.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::error::ApiError;
use crate::logging::Redactor;
use crate::models::{
    CompareResult, CompareStatus, IssueRef, MergeUpstreamResult, OrgRepoSummary, ParentRepo,
    RateLimitStatus, RefPointer, RepoIdentity, RepoMetadata,
};
use crate::retry::{RetryDecision, RetryPolicy};

/// Hard stop for pagination regardless of what the host advertises
pub const MAX_PAGES: u32 = 100;

/// Typed operations the sync components need from the hosting service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn get_repository(&self, repo: &RepoIdentity) -> Result<RepoMetadata, ApiError>;

    /// Resolve a branch; `None` when the branch does not exist
    async fn get_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<Option<RefPointer>, ApiError>;

    async fn create_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
    ) -> Result<RefPointer, ApiError>;

    /// Move a branch; with `force == false` the host rejects non-fast-forward moves
    async fn update_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<RefPointer, ApiError>;

    /// Compare `base...head`, reported from the base's point of view
    async fn compare(
        &self,
        repo: &RepoIdentity,
        base: &str,
        head: &str,
    ) -> Result<CompareResult, ApiError>;

    /// First parent of a commit; `None` for root commits
    async fn first_parent(&self, repo: &RepoIdentity, sha: &str)
        -> Result<Option<String>, ApiError>;

    /// Ask the host to merge the upstream default branch into `branch`
    async fn merge_upstream(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<MergeUpstreamResult, ApiError>;

    /// Open issue whose title matches exactly
    async fn find_open_issue(
        &self,
        repo: &RepoIdentity,
        title: &str,
    ) -> Result<Option<IssueRef>, ApiError>;

    async fn create_issue(
        &self,
        repo: &RepoIdentity,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, ApiError>;

    async fn update_issue_body(
        &self,
        repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<IssueRef, ApiError>;

    async fn create_issue_comment(
        &self,
        repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<(), ApiError>;

    async fn list_org_repositories(&self, org: &str) -> Result<Vec<OrgRepoSummary>, ApiError>;

    /// Fails when the organisation is unknown or invisible to the token
    async fn get_organization(&self, org: &str) -> Result<(), ApiError>;

    /// Core quota; also proves the token is accepted
    async fn rate_limit(&self) -> Result<RateLimitStatus, ApiError>;
}

/// Raw response of a successful request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub data: Option<Value>,
}

/// GitHub REST client with retry, rate-limit backoff and pagination
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    per_page: usize,
    retry: RetryPolicy,
    redactor: Redactor,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
    /// Read the token from a file
    TokenFile,
}

impl GitHubClient {
    /// Create a client from configuration, acquiring a token as configured
    ///
    /// The token is registered with the redactor before any request is made.
    pub fn from_config(config: &GitHubConfig, redactor: Redactor) -> Result<Self> {
        let (auth_strategy, token) = detect_authentication(config)?;
        info!("Using authentication strategy: {:?}", auth_strategy);
        Self::new(config, &token, redactor)
    }

    /// Create a client with an explicit token
    pub fn new(config: &GitHubConfig, token: &str, redactor: Redactor) -> Result<Self> {
        redactor.add_secret(token);

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("GitHub token contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_str(&config.api_version).context("Invalid github.api_version")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            per_page: config.per_page.clamp(1, 100),
            retry: config.retry_policy(),
            redactor,
        })
    }

    /// Replace the retry policy (tests use short waits)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Issue one request, retrying per the shared policy
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, ApiError> {
        let url = self.url(path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut builder = self.http.request(method.clone(), &url).query(query);
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            let failure = match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    match response.text().await {
                        Ok(text) if (200..300).contains(&status) => {
                            let data = parse_body(status, &text)?;
                            return Ok(ApiResponse {
                                status,
                                headers,
                                data,
                            });
                        }
                        Ok(text) => {
                            match self.retry.decide_status(attempt, status, &headers, Utc::now()) {
                                RetryDecision::Retry(wait) => {
                                    warn!(
                                        "{} {} returned {} (attempt {}/{}), retrying in {:?}",
                                        method, path, status, attempt, self.retry.max_attempts, wait
                                    );
                                    tokio::time::sleep(wait).await;
                                    continue;
                                }
                                RetryDecision::GiveUp => {
                                    return Err(ApiError::new(status, self.error_message(&text)));
                                }
                            }
                        }
                        Err(e) => e.to_string(),
                    }
                }
                Err(e) => e.to_string(),
            };

            match self.retry.decide_transport(attempt) {
                RetryDecision::Retry(wait) => {
                    warn!(
                        "{} {} transport failure (attempt {}/{}), retrying in {:?}: {}",
                        method, path, attempt, self.retry.max_attempts, wait, failure
                    );
                    tokio::time::sleep(wait).await;
                }
                RetryDecision::GiveUp => {
                    return Err(ApiError::transport(self.redactor.redact(&failure)));
                }
            }
        }
    }

    /// Lazily walk a paginated listing, yielding one item at a time
    ///
    /// Stops on an empty page, a short page, a missing `rel="next"` link or
    /// after [`MAX_PAGES`] pages.
    pub fn paginate<'a>(
        &'a self,
        path: &'a str,
        query: Vec<(&'static str, String)>,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        let per_page = self.per_page;
        stream::try_unfold(PageCursor::first(), move |cursor| {
            let mut page_query = query.clone();
            async move {
                if cursor.done || cursor.page > MAX_PAGES {
                    if cursor.page > MAX_PAGES {
                        warn!("Stopped paginating {} after {} pages", path, MAX_PAGES);
                    }
                    return Ok(None);
                }

                page_query.push(("per_page", per_page.to_string()));
                page_query.push(("page", cursor.page.to_string()));
                let response = self.request(Method::GET, path, None, &page_query).await?;

                let items = match response.data {
                    Some(Value::Array(items)) => items,
                    None => Vec::new(),
                    Some(_) => {
                        return Err(ApiError::new(
                            response.status,
                            format!("expected a JSON array from {}", path),
                        ))
                    }
                };

                let done =
                    items.is_empty() || items.len() < per_page || !has_next_link(&response.headers);
                debug!("Fetched page {} of {} ({} items)", cursor.page, path, items.len());

                Ok(Some((
                    items,
                    PageCursor {
                        page: cursor.page + 1,
                        done,
                    },
                )))
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<Value, ApiError>)))
        .try_flatten()
    }

    /// Message for a failed response: the body's `message` field or the raw body
    fn error_message(&self, body: &str) -> String {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        let message = if message.is_empty() {
            "empty response body".to_string()
        } else {
            message
        };
        self.redactor.redact(&message)
    }

    async fn get_json(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.request(Method::GET, path, None, &[]).await
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        payload: Value,
    ) -> Result<ApiResponse, ApiError> {
        self.request(method, path, Some(&payload), &[]).await
    }
}

#[derive(Debug, Clone, Copy)]
struct PageCursor {
    page: u32,
    done: bool,
}

impl PageCursor {
    fn first() -> Self {
        Self {
            page: 1,
            done: false,
        }
    }
}

fn parse_body(status: u16, text: &str) -> Result<Option<Value>, ApiError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| ApiError::new(status, format!("invalid JSON response: {}", e)))
}

/// Whether a `Link` header advertises a next page
pub fn has_next_link(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|link| link.contains("rel=\"next\""))
}

fn decode<T: serde::de::DeserializeOwned>(response: ApiResponse, what: &str) -> Result<T, ApiError> {
    let status = response.status;
    let data = response
        .data
        .ok_or_else(|| ApiError::new(status, format!("empty {} response", what)))?;
    serde_json::from_value(data)
        .map_err(|e| ApiError::new(status, format!("unexpected {} response: {}", what, e)))
}

fn repo_path(repo: &RepoIdentity, rest: &str) -> String {
    format!("repos/{}/{}/{}", repo.org, repo.name, rest)
}

/// Percent-encode each `/`-separated segment of a branch name or SHA
fn encode_ref(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Deserialize)]
struct RawOwner {
    login: String,
}

#[derive(Deserialize)]
struct RawParent {
    name: String,
    owner: RawOwner,
    default_branch: String,
}

#[derive(Deserialize)]
struct RawRepository {
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    default_branch: String,
    parent: Option<RawParent>,
}

impl From<RawRepository> for RepoMetadata {
    fn from(raw: RawRepository) -> Self {
        RepoMetadata {
            is_fork: raw.fork,
            is_archived: raw.archived,
            is_disabled: raw.disabled,
            default_branch: raw.default_branch,
            parent: raw.parent.map(|p| ParentRepo {
                org: p.owner.login,
                name: p.name,
                default_branch: p.default_branch,
            }),
        }
    }
}

#[derive(Deserialize)]
struct RawListedRepo {
    name: String,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct RawObject {
    sha: String,
}

#[derive(Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    full_ref: String,
    object: RawObject,
}

impl RawRef {
    fn into_pointer(self) -> RefPointer {
        let branch = self
            .full_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.full_ref)
            .to_string();
        RefPointer::new(branch, self.object.sha)
    }
}

#[derive(Deserialize)]
struct RawCommit {
    sha: String,
    #[serde(default)]
    parents: Vec<RawObject>,
}

#[derive(Deserialize)]
struct RawCompare {
    status: String,
    ahead_by: u64,
    behind_by: u64,
    #[serde(default)]
    commits: Vec<RawCommit>,
    merge_base_commit: Option<RawCommit>,
}

#[derive(Deserialize)]
struct RawMergeUpstream {
    #[serde(default)]
    message: String,
    merge_type: Option<String>,
}

#[derive(Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    html_url: Option<String>,
    pull_request: Option<Value>,
}

impl From<RawIssue> for IssueRef {
    fn from(raw: RawIssue) -> Self {
        IssueRef {
            number: raw.number,
            title: raw.title,
            url: raw.html_url,
        }
    }
}

#[derive(Deserialize)]
struct RawRateLimit {
    resources: RawRateResources,
}

#[derive(Deserialize)]
struct RawRateResources {
    core: RawRate,
}

#[derive(Deserialize)]
struct RawRate {
    limit: u64,
    remaining: u64,
    reset: u64,
}

fn is_full_sha(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Translate GitHub's compare payload into the base's point of view
///
/// GitHub describes the head relative to the base ("ahead" means head has
/// commits base lacks), so the status and counters are swapped here.
fn compare_from_raw(raw: RawCompare, head: &str) -> Result<CompareResult, ApiError> {
    let status = match raw.status.as_str() {
        "identical" => CompareStatus::Identical,
        "ahead" => CompareStatus::Behind,
        "behind" => CompareStatus::Ahead,
        "diverged" => CompareStatus::Diverged,
        other => {
            return Err(ApiError::new(
                200,
                format!("unknown compare status `{}`", other),
            ))
        }
    };

    let head_sha = if is_full_sha(head) {
        head.to_string()
    } else if status == CompareStatus::Identical || status == CompareStatus::Ahead {
        // head is an ancestor of base, so it is the merge base
        raw.merge_base_commit
            .map(|c| c.sha)
            .unwrap_or_default()
    } else {
        raw.commits.last().map(|c| c.sha.clone()).unwrap_or_default()
    };

    Ok(CompareResult {
        status,
        ahead_by: raw.behind_by,
        behind_by: raw.ahead_by,
        head_sha,
    })
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn get_repository(&self, repo: &RepoIdentity) -> Result<RepoMetadata, ApiError> {
        let response = self
            .get_json(&format!("repos/{}/{}", repo.org, repo.name))
            .await?;
        decode::<RawRepository>(response, "repository").map(RepoMetadata::from)
    }

    async fn get_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<Option<RefPointer>, ApiError> {
        match self
            .get_json(&repo_path(repo, &format!("git/ref/heads/{}", encode_ref(branch))))
            .await
        {
            Ok(response) => decode::<RawRef>(response, "ref").map(|r| Some(r.into_pointer())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
    ) -> Result<RefPointer, ApiError> {
        let response = self
            .send_json(
                Method::POST,
                &repo_path(repo, "git/refs"),
                json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }),
            )
            .await?;
        decode::<RawRef>(response, "ref").map(RawRef::into_pointer)
    }

    async fn update_ref(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<RefPointer, ApiError> {
        let response = self
            .send_json(
                Method::PATCH,
                &repo_path(repo, &format!("git/refs/heads/{}", encode_ref(branch))),
                json!({ "sha": sha, "force": force }),
            )
            .await?;
        decode::<RawRef>(response, "ref").map(RawRef::into_pointer)
    }

    async fn compare(
        &self,
        repo: &RepoIdentity,
        base: &str,
        head: &str,
    ) -> Result<CompareResult, ApiError> {
        let response = self
            .get_json(&repo_path(
                repo,
                &format!("compare/{}...{}", encode_ref(base), encode_ref(head)),
            ))
            .await?;
        let raw = decode::<RawCompare>(response, "compare")?;
        compare_from_raw(raw, head)
    }

    async fn first_parent(
        &self,
        repo: &RepoIdentity,
        sha: &str,
    ) -> Result<Option<String>, ApiError> {
        let response = self
            .get_json(&repo_path(repo, &format!("commits/{}", sha)))
            .await?;
        let commit = decode::<RawCommit>(response, "commit")?;
        debug!("Commit {} has {} parent(s)", commit.sha, commit.parents.len());
        Ok(commit.parents.into_iter().next().map(|p| p.sha))
    }

    async fn merge_upstream(
        &self,
        repo: &RepoIdentity,
        branch: &str,
    ) -> Result<MergeUpstreamResult, ApiError> {
        let response = self
            .send_json(
                Method::POST,
                &repo_path(repo, "merge-upstream"),
                json!({ "branch": branch }),
            )
            .await?;
        if response.data.is_none() {
            return Ok(MergeUpstreamResult {
                message: String::new(),
                merge_type: None,
            });
        }
        let raw = decode::<RawMergeUpstream>(response, "merge-upstream")?;
        Ok(MergeUpstreamResult {
            message: raw.message,
            merge_type: raw.merge_type,
        })
    }

    async fn find_open_issue(
        &self,
        repo: &RepoIdentity,
        title: &str,
    ) -> Result<Option<IssueRef>, ApiError> {
        let path = repo_path(repo, "issues");
        let issues = self.paginate(&path, vec![("state", "open".to_string())]);
        futures::pin_mut!(issues);

        while let Some(item) = issues.next().await {
            let raw: RawIssue = serde_json::from_value(item?)
                .map_err(|e| ApiError::new(200, format!("unexpected issue response: {}", e)))?;
            if raw.pull_request.is_none() && raw.title == title {
                return Ok(Some(raw.into()));
            }
        }
        Ok(None)
    }

    async fn create_issue(
        &self,
        repo: &RepoIdentity,
        title: &str,
        body: &str,
    ) -> Result<IssueRef, ApiError> {
        let response = self
            .send_json(
                Method::POST,
                &repo_path(repo, "issues"),
                json!({ "title": title, "body": body }),
            )
            .await?;
        decode::<RawIssue>(response, "issue").map(IssueRef::from)
    }

    async fn update_issue_body(
        &self,
        repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<IssueRef, ApiError> {
        let response = self
            .send_json(
                Method::PATCH,
                &repo_path(repo, &format!("issues/{}", number)),
                json!({ "body": body }),
            )
            .await?;
        decode::<RawIssue>(response, "issue").map(IssueRef::from)
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoIdentity,
        number: u64,
        body: &str,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::POST,
            &repo_path(repo, &format!("issues/{}/comments", number)),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn list_org_repositories(&self, org: &str) -> Result<Vec<OrgRepoSummary>, ApiError> {
        debug!("Fetching repositories for organization: {}", org);
        let path = format!("orgs/{}/repos", org);
        let items: Vec<Value> = self
            .paginate(&path, vec![("type", "all".to_string())])
            .try_collect()
            .await?;

        let repositories = items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<RawListedRepo>(item)
                    .map(|raw| OrgRepoSummary {
                        name: raw.name,
                        is_fork: raw.fork,
                        is_archived: raw.archived,
                        is_disabled: raw.disabled,
                    })
                    .map_err(|e| ApiError::new(200, format!("unexpected repository entry: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Found {} repositories for organization: {}",
            repositories.len(),
            org
        );
        Ok(repositories)
    }

    async fn get_organization(&self, org: &str) -> Result<(), ApiError> {
        self.get_json(&format!("orgs/{}", org)).await?;
        Ok(())
    }

    async fn rate_limit(&self) -> Result<RateLimitStatus, ApiError> {
        let response = self.get_json("rate_limit").await?;
        let raw = decode::<RawRateLimit>(response, "rate limit")?;
        Ok(RateLimitStatus {
            limit: raw.resources.core.limit,
            remaining: raw.resources.core.remaining,
            reset: raw.resources.core.reset,
        })
    }
}

/// Detect and obtain GitHub authentication
pub fn detect_authentication(config: &GitHubConfig) -> Result<(AuthStrategy, String)> {
    match config.auth_method.as_str() {
        "auto" => {
            // Explicit token sources first, then GitHub CLI
            if let Ok(token) = try_environment_token() {
                Ok((AuthStrategy::EnvironmentToken, token))
            } else if let Some(token) = config
                .token_file
                .as_deref()
                .and_then(|path| try_token_file(path).ok())
            {
                Ok((AuthStrategy::TokenFile, token))
            } else if let Ok(token) = try_github_cli() {
                Ok((AuthStrategy::GitHubCLI, token))
            } else {
                Err(anyhow!(
                    "No GitHub authentication found. Please either:\n\
                     1. Set GITHUB_TOKEN (or GH_TOKEN) environment variable\n\
                     2. Set github.token_file in the configuration\n\
                     3. Install and authenticate GitHub CLI: gh auth login"
                ))
            }
        }
        "gh_cli" => {
            let token =
                try_github_cli().context("GitHub CLI authentication failed. Run: gh auth login")?;
            Ok((AuthStrategy::GitHubCLI, token))
        }
        "token" => {
            let token = try_environment_token()
                .context("GITHUB_TOKEN environment variable not found or invalid")?;
            Ok((AuthStrategy::EnvironmentToken, token))
        }
        "token_file" => {
            let path = config
                .token_file
                .as_deref()
                .context("auth_method is token_file but github.token_file is not set")?;
            let token = try_token_file(path)?;
            Ok((AuthStrategy::TokenFile, token))
        }
        other => Err(anyhow!("Unknown auth method: {}", other)),
    }
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Failed to run GitHub CLI (is gh installed?)")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "GitHub CLI is not authenticated. Run: gh auth login"
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get token from environment variable
fn try_environment_token() -> Result<String> {
    debug!("Attempting environment variable authentication");

    let token = env::var("GITHUB_TOKEN")
        .or_else(|_| env::var("GH_TOKEN"))
        .context("GITHUB_TOKEN environment variable not set")?;
    let token = token.trim().to_string();

    if token.is_empty() {
        return Err(anyhow!("GITHUB_TOKEN is empty"));
    }

    if !looks_like_github_token(&token) {
        warn!("GITHUB_TOKEN doesn't look like a GitHub token (expected a ghp_, gho_, ghs_ or github_pat_ prefix)");
    }

    Ok(token)
}

fn try_token_file(path: &str) -> Result<String> {
    debug!("Attempting token file authentication");

    let token = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {}", path))?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("Token file {} is empty", path));
    }
    Ok(token)
}

fn looks_like_github_token(token: &str) -> bool {
    ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Utility functions for the `auth` subcommand
pub mod auth_setup {
    use super::*;

    /// Test current authentication and print the remaining quota
    pub async fn test_authentication(config: &GitHubConfig, redactor: Redactor) -> Result<()> {
        println!("🔍 Testing GitHub authentication...");

        let client = match GitHubClient::from_config(config, redactor) {
            Ok(client) => client,
            Err(e) => {
                println!("❌ No usable token: {:#}", e);
                return Ok(());
            }
        };

        match client.rate_limit().await {
            Ok(quota) => {
                println!("✅ Authentication successful");
                println!("   API: {}", config.api_url);
                println!("   Quota: {}/{} remaining", quota.remaining, quota.limit);
            }
            Err(e) => {
                println!("❌ Authentication failed: {}", e);
            }
        }

        Ok(())
    }
}
