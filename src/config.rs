use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{Backoff, RetryPolicy};

/// Main configuration structure for forkwarden
///
/// Constructed once at startup and passed by reference into every component.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Hosting API connection settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Which organisation (and optionally which single repository) to process
    #[serde(default)]
    pub target: TargetConfig,

    /// Repository exclusion rules applied during discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Metadata cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Branch policy source
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Values for the policy's `prefixEnv` / `nameEnv` indirections
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Batch run behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// Tracking issue settings
    #[serde(default)]
    pub issues: IssuesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hosting API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Value sent in the `X-GitHub-Api-Version` header
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token", "token_file"

    /// Token file used by the "token_file" method
    pub token_file: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attempt budget per request, including the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Page size requested from paginated endpoints
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

/// Target selection
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TargetConfig {
    /// Organisation whose forks are processed
    pub org: Option<String>,

    /// Process only this repository
    pub repo: Option<String>,
}

/// Discovery exclusions
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Glob patterns (`*` wildcard) matched against repository names
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Regular expressions searched in repository names
    #[serde(default)]
    pub exclude_regex: Vec<String>,
}

/// Metadata cache configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache file location
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Lifetime of cached repository metadata
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl: String, // "1h"

    /// Lifetime of cached ref SHAs and negative entries
    #[serde(default = "default_ref_ttl")]
    pub ref_ttl: String, // "5m"
}

/// Branch policy configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PolicyConfig {
    /// Path of the branch policy JSON document
    #[serde(default = "default_policy_path")]
    pub path: String,
}

/// Batch run configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Repositories processed concurrently; 1 means strictly sequential
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Identifier quoted in issue comments; generated per run when unset
    pub run_id: Option<String>,
}

/// Tracking issue configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IssuesConfig {
    /// File or update tracking issues when a repository cannot be synced
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "json"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Extra values masked in all log output
    #[serde(default)]
    pub redact: Vec<String>,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_api_version() -> String {
    "2022-11-28".to_string()
}
fn default_user_agent() -> String {
    format!("forkwarden/{}", env!("CARGO_PKG_VERSION"))
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_per_page() -> usize {
    100
}
fn default_cache_path() -> String {
    if let Ok(cache_home) = std::env::var("XDG_CACHE_HOME") {
        format!("{}/forkwarden/metadata.json", cache_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.cache/forkwarden/metadata.json", home)
    } else {
        "/tmp/forkwarden-metadata.json".to_string()
    }
}
fn default_metadata_ttl() -> String {
    "1h".to_string()
}
fn default_ref_ttl() -> String {
    "5m".to_string()
}
fn default_policy_path() -> String {
    "configs/branch-policy.json".to_string()
}
fn default_max_parallel() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_version: default_api_version(),
            user_agent: default_user_agent(),
            auth_method: default_auth_method(),
            token_file: None,
            timeout: default_timeout(),
            max_attempts: default_max_attempts(),
            per_page: default_per_page(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_cache_path(),
            metadata_ttl: default_metadata_ttl(),
            ref_ttl: default_ref_ttl(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: default_policy_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            run_id: None,
        }
    }
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
            redact: Vec::new(),
        }
    }
}

impl GitHubConfig {
    /// Retry policy derived from the configured attempt budget
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Backoff::default(),
            ..RetryPolicy::default()
        }
        .with_max_attempts(self.max_attempts.clamp(1, 10))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

impl CacheConfig {
    pub fn metadata_ttl(&self) -> Result<Duration> {
        parse_duration(&self.metadata_ttl).context("Invalid cache.metadata_ttl")
    }

    pub fn ref_ttl(&self) -> Result<Duration> {
        parse_duration(&self.ref_ttl).context("Invalid cache.ref_ttl")
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("forkwarden").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.cache.path = shellexpand::full(&self.cache.path)
            .context("Failed to expand cache.path")?
            .into_owned();

        self.policy.path = shellexpand::full(&self.policy.path)
            .context("Failed to expand policy.path")?
            .into_owned();

        if let Some(token_file) = &self.github.token_file {
            self.github.token_file = Some(
                shellexpand::full(token_file)
                    .context("Failed to expand github.token_file")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Reject values that would make every run fail later
    pub fn validate(&self) -> Result<()> {
        self.cache.metadata_ttl()?;
        self.cache.ref_ttl()?;

        if self.sync.max_parallel == 0 {
            bail!("sync.max_parallel must be at least 1");
        }
        if self.github.per_page == 0 || self.github.per_page > 100 {
            bail!("github.per_page must be between 1 and 100");
        }
        match self.github.auth_method.as_str() {
            "auto" | "gh_cli" | "token" | "token_file" => {}
            other => bail!("Unknown auth method: {}", other),
        }

        Ok(())
    }

    /// Apply command-line overrides on top of the loaded file
    pub fn with_target(mut self, org: Option<String>, repo: Option<String>) -> Self {
        if org.is_some() {
            self.target.org = org;
        }
        if repo.is_some() {
            self.target.repo = repo;
        }
        self
    }

    /// The organisation to process, which must be configured by now
    pub fn target_org(&self) -> Result<&str> {
        self.target
            .org
            .as_deref()
            .filter(|org| !org.trim().is_empty())
            .context("No target organisation configured (set target.org or pass --org)")
    }
}

/// Source of values for the policy's indirection keys
pub trait ValueSource {
    fn value(&self, key: &str) -> Option<String>;
}

impl ValueSource for BTreeMap<String, String> {
    fn value(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Startup-time resolver: config `values` map, then `<KEY>_FILE`, then `<KEY>`
///
/// The environment is snapshotted when the resolver is built; nothing reads
/// it afterwards.
#[derive(Debug, Clone)]
pub struct StartupValues {
    configured: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
}

/// Upper bound on the size of a value file
const MAX_VALUE_FILE_BYTES: u64 = 64 * 1024;

impl StartupValues {
    pub fn from_process(config: &Config) -> Self {
        Self {
            configured: config.values.clone(),
            environment: std::env::vars().collect(),
        }
    }

    pub fn new(configured: BTreeMap<String, String>, environment: BTreeMap<String, String>) -> Self {
        Self {
            configured,
            environment,
        }
    }

    fn read_value_file(path: &str) -> Option<String> {
        let metadata = std::fs::metadata(path).ok()?;
        if metadata.len() > MAX_VALUE_FILE_BYTES {
            tracing::warn!("Ignoring value file larger than {} bytes", MAX_VALUE_FILE_BYTES);
            return None;
        }
        std::fs::read_to_string(path)
            .ok()
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
    }
}

impl ValueSource for StartupValues {
    fn value(&self, key: &str) -> Option<String> {
        if let Some(value) = self.configured.value(key) {
            return Some(value);
        }
        if let Some(path) = self.environment.get(&format!("{}_FILE", key)) {
            if let Some(value) = Self::read_value_file(path) {
                return Some(value);
            }
        }
        self.environment.value(key)
    }
}

/// Parse duration strings like "30s", "15m", "1h", "2d" or raw seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let seconds = if let Some(value) = duration_str.strip_suffix('s') {
        value.trim().parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value
            .trim()
            .parse::<u64>()
            .map(|v| v * 60)
            .context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value
            .trim()
            .parse::<u64>()
            .map(|v| v * 3600)
            .context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value
            .trim()
            .parse::<u64>()
            .map(|v| v * 86400)
            .context("Invalid days value")?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30s', '5m', '1h', '2d'")?
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("forkwarden");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.api_version, "2022-11-28");
        assert_eq!(config.github.max_attempts, 5);
        assert_eq!(config.github.timeout, 30);
        assert!(config.cache.enabled);
        assert_eq!(config.sync.max_parallel, 1);
        assert!(config.issues.enabled);
        assert!(config.target.org.is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 0 ").unwrap(), Duration::ZERO);
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5w").is_err());
    }

    #[test]
    fn test_retry_policy_clamps_attempts() {
        let mut config = GitHubConfig::default();
        config.max_attempts = 0;
        assert_eq!(config.retry_policy().max_attempts, 1);
        config.max_attempts = 99;
        assert_eq!(config.retry_policy().max_attempts, 10);
        config.max_attempts = 3;
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_FORKWARDEN_HOME", "/test/home");

        let mut config = Config::default();
        config.cache.path = "${TEST_FORKWARDEN_HOME}/cache.json".to_string();
        config.policy.path = "${TEST_FORKWARDEN_HOME}/policy.json".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.cache.path, "/test/home/cache.json");
        assert_eq!(config.policy.path, "/test/home/policy.json");

        env::remove_var("TEST_FORKWARDEN_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        assert!(Config::load(nonexistent_path).is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.target.org = Some("acme-forks".to_string());
        config.cache.ref_ttl = "10m".to_string();
        config.sync.max_parallel = 4;
        config
            .values
            .insert("GH_BRANCH_PREFIX".to_string(), "acme".to_string());

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.target.org.as_deref(), Some("acme-forks"));
        assert_eq!(loaded.cache.ref_ttl().unwrap(), Duration::from_secs(600));
        assert_eq!(loaded.sync.max_parallel, 4);
        assert_eq!(loaded.values.get("GH_BRANCH_PREFIX").unwrap(), "acme");
    }

    #[test]
    fn test_invalid_values_rejected_at_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        std::fs::write(&config_path, "sync:\n  max_parallel: 0\n").unwrap();
        assert!(Config::load(&config_path).is_err());

        std::fs::write(&config_path, "cache:\n  ref_ttl: \"later\"\n").unwrap();
        assert!(Config::load(&config_path).is_err());

        std::fs::write(&config_path, "github:\n  auth_method: \"magic\"\n").unwrap();
        assert!(Config::load(&config_path).is_err());
    }

    #[test]
    fn test_cli_target_overrides() {
        let mut config = Config::default();
        config.target.org = Some("from-file".to_string());

        let config = config.with_target(Some("from-cli".to_string()), None);
        assert_eq!(config.target_org().unwrap(), "from-cli");
        assert!(config.target.repo.is_none());

        assert!(Config::default().target_org().is_err());
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("forkwarden"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_startup_values_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let value_file = temp_dir.path().join("prefix");
        std::fs::write(&value_file, "from-file\n").unwrap();

        let mut environment = BTreeMap::new();
        environment.insert(
            "GH_BRANCH_PREFIX_FILE".to_string(),
            value_file.to_string_lossy().into_owned(),
        );
        environment.insert("GH_BRANCH_PREFIX".to_string(), "from-env".to_string());
        environment.insert("GH_BRANCH_STAGING".to_string(), "from-env".to_string());

        let mut configured = BTreeMap::new();
        configured.insert("GH_BRANCH_PRODUCT".to_string(), "from-config".to_string());

        let values = StartupValues::new(configured, environment);
        assert_eq!(values.value("GH_BRANCH_PRODUCT").as_deref(), Some("from-config"));
        assert_eq!(values.value("GH_BRANCH_PREFIX").as_deref(), Some("from-file"));
        assert_eq!(values.value("GH_BRANCH_STAGING").as_deref(), Some("from-env"));
        assert_eq!(values.value("GH_BRANCH_FEATURE"), None);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
github:
  api_url: "https://ghe.example.com/api/v3"
  auth_method: "token_file"
  token_file: "/run/secrets/token"
  max_attempts: 3
target:
  org: "acme-forks"
  repo: "widgets"
discovery:
  exclude_patterns: ["archived-*", "*.github.io"]
  exclude_regex: ["^tmp-"]
cache:
  enabled: false
  metadata_ttl: "2h"
  ref_ttl: "30s"
values:
  GH_BRANCH_PREFIX: "acme"
sync:
  max_parallel: 4
issues:
  enabled: false
logging:
  level: "debug"
  format: "json"
  color: false
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.github.api_url, "https://ghe.example.com/api/v3");
        assert_eq!(config.github.auth_method, "token_file");
        assert_eq!(config.github.token_file.as_deref(), Some("/run/secrets/token"));
        assert_eq!(config.github.max_attempts, 3);
        assert_eq!(config.target.repo.as_deref(), Some("widgets"));
        assert_eq!(config.discovery.exclude_patterns.len(), 2);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.metadata_ttl().unwrap(), Duration::from_secs(7200));
        assert_eq!(config.sync.max_parallel, 4);
        assert!(!config.issues.enabled);
        assert_eq!(config.logging.format, "json");
        assert!(!config.logging.color);
    }
}
