//! Branch policy loading and validation
//!
//! The policy document names the managed branches indirectly: `prefixEnv`
//! and each branch's `nameEnv` are keys resolved through a [`ValueSource`]
//! once at startup. Everything that could make the policy meaningless is
//! rejected here as a [`ValidationError`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::config::ValueSource;
use crate::error::ValidationError;
use crate::models::BranchRole;

/// What a branch is moved towards when promotion runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// The mirror branch's SHA
    Upstream,
    /// The product branch's SHA (lagged by one commit)
    Main,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Upstream => f.write_str("upstream"),
            Track::Main => f.write_str("main"),
        }
    }
}

/// Policy document as stored on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    pub prefix_env: String,
    pub create_order: Vec<String>,
    pub branches: Vec<BranchDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDocument {
    /// Key used by `createOrder`; defaults to the role name
    pub key: Option<String>,
    pub role: BranchRole,
    pub name_env: String,
    pub track: Track,
    #[serde(default = "default_update")]
    pub update: bool,
}

fn default_update() -> bool {
    true
}

/// A managed branch with its name resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSpec {
    pub key: String,
    pub role: BranchRole,
    pub name: String,
    /// `{prefix}/{name}`
    pub full_ref: String,
    pub track: Track,
    /// `false` means create-once: never moved after bootstrap
    pub update: bool,
}

/// Validated branch policy; `order` is the bootstrap order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPolicy {
    pub prefix: String,
    pub order: Vec<BranchSpec>,
    by_key: BTreeMap<String, usize>,
    product: usize,
}

impl BranchPolicy {
    /// Load and validate a policy file
    pub fn load(path: &Path, values: &dyn ValueSource) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read branch policy: {:?}", path))?;
        Self::from_json(&content, values)
            .with_context(|| format!("Invalid branch policy: {:?}", path))
    }

    pub fn from_json(content: &str, values: &dyn ValueSource) -> Result<Self> {
        let document: PolicyDocument =
            serde_json::from_str(content).context("Failed to parse branch policy JSON")?;
        Ok(Self::from_document(document, values)?)
    }

    pub fn from_document(
        document: PolicyDocument,
        values: &dyn ValueSource,
    ) -> Result<Self, ValidationError> {
        let prefix = resolve(values, &document.prefix_env, "branch prefix")?;
        validate_ref_name("branch prefix", &prefix)?;

        let mut specs: BTreeMap<String, BranchSpec> = BTreeMap::new();
        let mut roles = BTreeSet::new();
        let mut full_refs = BTreeSet::new();

        for branch in document.branches {
            let key = branch
                .key
                .clone()
                .unwrap_or_else(|| branch.role.as_str().to_string());
            if key.trim().is_empty() {
                return Err(ValidationError::Empty {
                    label: "branch key".to_string(),
                });
            }
            if branch.role == BranchRole::Mirror {
                return Err(policy_error(format!(
                    "branch `{}` cannot take the mirror role; the mirror is resolved at runtime",
                    key
                )));
            }
            if !roles.insert(branch.role) {
                return Err(policy_error(format!(
                    "role `{}` is assigned to more than one branch",
                    branch.role
                )));
            }
            if specs.contains_key(&key) {
                return Err(policy_error(format!("branch key `{}` is defined twice", key)));
            }

            match (branch.role, branch.track) {
                (BranchRole::Product, Track::Main) => {
                    return Err(policy_error("the product branch must track `upstream`"));
                }
                (role, Track::Upstream) if role != BranchRole::Product => {
                    return Err(policy_error(format!(
                        "branch `{}` ({}) cannot track `upstream`; only product does",
                        key, role
                    )));
                }
                _ => {}
            }

            let label = format!("{} branch name", key);
            let name = resolve(values, &branch.name_env, &label)?;
            validate_ref_name(&label, &name)?;

            let full_ref = format!("{}/{}", prefix, name);
            validate_ref_name(&format!("{} branch ref", key), &full_ref)?;
            if !full_refs.insert(full_ref.clone()) {
                return Err(policy_error(format!(
                    "`{}` is used by more than one branch",
                    full_ref
                )));
            }

            specs.insert(
                key.clone(),
                BranchSpec {
                    key,
                    role: branch.role,
                    name,
                    full_ref,
                    track: branch.track,
                    update: branch.update,
                },
            );
        }

        if !roles.contains(&BranchRole::Product) {
            return Err(policy_error("a branch with the product role is required"));
        }

        let order = order_branches(&document.create_order, specs)?;
        let by_key: BTreeMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(index, spec)| (spec.key.clone(), index))
            .collect();
        let product = order
            .iter()
            .position(|spec| spec.role == BranchRole::Product)
            .ok_or_else(|| policy_error("a branch with the product role is required"))?;

        let policy = Self {
            prefix,
            order,
            by_key,
            product,
        };
        debug!("Loaded branch policy: {}", policy.summary_line());
        Ok(policy)
    }

    pub fn by_key(&self, key: &str) -> Option<&BranchSpec> {
        self.by_key.get(key).map(|&index| &self.order[index])
    }

    /// The product branch, which every valid policy defines
    pub fn product(&self) -> &BranchSpec {
        &self.order[self.product]
    }

    pub fn by_role(&self, role: BranchRole) -> Option<&BranchSpec> {
        self.order.iter().find(|spec| spec.role == role)
    }

    /// Branches moved towards the downstream target after product changes
    pub fn promoted(&self) -> impl Iterator<Item = &BranchSpec> {
        self.order
            .iter()
            .filter(|spec| spec.track == Track::Main && spec.update)
    }

    /// Branches that are only ever created
    pub fn create_once(&self) -> impl Iterator<Item = &BranchSpec> {
        self.order.iter().filter(|spec| !spec.update)
    }

    /// One-line description, e.g. `product=acme/product, staging=acme/staging`
    pub fn summary_line(&self) -> String {
        self.order
            .iter()
            .map(|spec| format!("{}={}", spec.role, spec.full_ref))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn policy_error(message: impl Into<String>) -> ValidationError {
    ValidationError::Policy(message.into())
}

fn resolve(values: &dyn ValueSource, key: &str, label: &str) -> Result<String, ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::Empty {
            label: format!("{} key", label),
        });
    }
    values
        .value(key)
        .ok_or_else(|| ValidationError::MissingValue(key.to_string()))
}

/// Arrange branches in `createOrder`, checking it is complete and seed-safe
fn order_branches(
    create_order: &[String],
    mut specs: BTreeMap<String, BranchSpec>,
) -> Result<Vec<BranchSpec>, ValidationError> {
    let mut order: Vec<BranchSpec> = Vec::with_capacity(specs.len());
    let mut seen = BTreeSet::new();

    for key in create_order {
        if !seen.insert(key.clone()) {
            return Err(policy_error(format!(
                "createOrder lists `{}` more than once",
                key
            )));
        }
        let Some(spec) = specs.remove(key) else {
            return Err(policy_error(format!(
                "createOrder references undefined branch `{}`",
                key
            )));
        };

        if let Some(source) = spec.role.seed_source().filter(|r| *r != BranchRole::Mirror) {
            if !order.iter().any(|earlier| earlier.role == source) {
                let defined_later = specs.values().any(|s| s.role == source);
                return Err(policy_error(if defined_later {
                    format!(
                        "`{}` is seeded from the {} branch, which must come earlier in createOrder",
                        key, source
                    )
                } else {
                    format!(
                        "`{}` is seeded from the {} branch, which the policy does not define",
                        key, source
                    )
                }));
            }
        }
        order.push(spec);
    }

    if let Some(missing) = specs.keys().next() {
        return Err(policy_error(format!(
            "branch `{}` is missing from createOrder",
            missing
        )));
    }

    Ok(order)
}

/// Validate a branch or prefix name against git's ref-name rules
pub fn validate_ref_name(label: &str, value: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &'static str| ValidationError::InvalidRefName {
        label: label.to_string(),
        value: value.to_string(),
        reason,
    };

    if value.trim().is_empty() {
        return Err(ValidationError::Empty {
            label: label.to_string(),
        });
    }
    if value == "@" {
        return Err(invalid("`@` alone is reserved"));
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(invalid("leading or trailing `/`"));
    }
    if value.contains("//") {
        return Err(invalid("empty path component (`//`)"));
    }
    if value.contains("..") {
        return Err(invalid("contains `..`"));
    }
    if value.contains("@{") {
        return Err(invalid("contains `@{`"));
    }
    if value.ends_with(".lock") {
        return Err(invalid("ends with `.lock`"));
    }
    if value.chars().any(|c| c.is_control() || c == ' ') {
        return Err(invalid("contains whitespace or control characters"));
    }
    if value
        .chars()
        .any(|c| matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(invalid("contains one of `~ ^ : ? * [ \\`"));
    }
    for component in value.split('/') {
        if component.starts_with('.') || component.ends_with('.') {
            return Err(invalid("a path component starts or ends with `.`"));
        }
        if component.ends_with(".lock") {
            return Err(invalid("a path component ends with `.lock`"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const POLICY: &str = r#"{
        "prefixEnv": "GH_BRANCH_PREFIX",
        "createOrder": ["product", "staging", "feature", "snapshot"],
        "branches": [
            {"role": "product", "nameEnv": "GH_BRANCH_PRODUCT", "track": "upstream", "update": true},
            {"role": "staging", "nameEnv": "GH_BRANCH_STAGING", "track": "main", "update": true},
            {"role": "feature", "nameEnv": "GH_BRANCH_FEATURE", "track": "main", "update": true},
            {"role": "snapshot", "nameEnv": "GH_BRANCH_SNAPSHOT", "track": "main", "update": false}
        ]
    }"#;

    fn values() -> BTreeMap<String, String> {
        [
            ("GH_BRANCH_PREFIX", "acme"),
            ("GH_BRANCH_PRODUCT", "product"),
            ("GH_BRANCH_STAGING", "staging"),
            ("GH_BRANCH_FEATURE", "feature"),
            ("GH_BRANCH_SNAPSHOT", "snapshot-2024"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn document(content: &str) -> PolicyDocument {
        serde_json::from_str(content).unwrap()
    }

    fn load_err(content: &str) -> ValidationError {
        BranchPolicy::from_document(document(content), &values()).unwrap_err()
    }

    #[test]
    fn test_load_resolves_names_in_create_order() {
        let policy = BranchPolicy::from_json(POLICY, &values()).unwrap();

        assert_eq!(policy.prefix, "acme");
        let refs: Vec<&str> = policy.order.iter().map(|s| s.full_ref.as_str()).collect();
        assert_eq!(
            refs,
            ["acme/product", "acme/staging", "acme/feature", "acme/snapshot-2024"]
        );
        assert_eq!(policy.by_key("staging").unwrap().role, BranchRole::Staging);
        assert_eq!(policy.product().full_ref, "acme/product");
        assert_eq!(
            policy.by_role(BranchRole::Snapshot).unwrap().full_ref,
            "acme/snapshot-2024"
        );

        let promoted: Vec<BranchRole> = policy.promoted().map(|s| s.role).collect();
        assert_eq!(promoted, [BranchRole::Staging, BranchRole::Feature]);
        let once: Vec<BranchRole> = policy.create_once().map(|s| s.role).collect();
        assert_eq!(once, [BranchRole::Snapshot]);
    }

    #[test]
    fn test_missing_value_is_reported_by_key() {
        let mut values = values();
        values.remove("GH_BRANCH_FEATURE");
        let err = BranchPolicy::from_document(document(POLICY), &values).unwrap_err();
        assert_eq!(err, ValidationError::MissingValue("GH_BRANCH_FEATURE".to_string()));
    }

    #[test]
    fn test_bad_names_rejected() {
        let mut values = values();
        values.insert("GH_BRANCH_STAGING".to_string(), "stag..ing".to_string());
        let err = BranchPolicy::from_document(document(POLICY), &values).unwrap_err();
        assert_matches!(err, ValidationError::InvalidRefName { .. });
    }

    #[test]
    fn test_duplicate_refs_rejected() {
        let mut values = values();
        values.insert("GH_BRANCH_FEATURE".to_string(), "staging".to_string());
        let err = BranchPolicy::from_document(document(POLICY), &values).unwrap_err();
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("acme/staging"));
    }

    #[test]
    fn test_undefined_create_order_entry_rejected() {
        let err = load_err(&POLICY.replace(
            r#""createOrder": ["product", "staging", "feature", "snapshot"]"#,
            r#""createOrder": ["product", "staging", "feature", "snapshot", "hotfix"]"#,
        ));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("undefined branch `hotfix`"));
    }

    #[test]
    fn test_branch_missing_from_create_order_rejected() {
        let err = load_err(&POLICY.replace(
            r#""createOrder": ["product", "staging", "feature", "snapshot"]"#,
            r#""createOrder": ["product", "staging", "snapshot"]"#,
        ));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("`feature` is missing"));
    }

    #[test]
    fn test_seed_source_must_come_first() {
        let err = load_err(&POLICY.replace(
            r#""createOrder": ["product", "staging", "feature", "snapshot"]"#,
            r#""createOrder": ["staging", "product", "feature", "snapshot"]"#,
        ));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("must come earlier"));
    }

    #[test]
    fn test_product_must_track_upstream() {
        let err = load_err(&POLICY.replace(
            r#""nameEnv": "GH_BRANCH_PRODUCT", "track": "upstream""#,
            r#""nameEnv": "GH_BRANCH_PRODUCT", "track": "main""#,
        ));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("must track `upstream`"));
    }

    #[test]
    fn test_only_product_tracks_upstream() {
        let err = load_err(&POLICY.replace(
            r#""nameEnv": "GH_BRANCH_STAGING", "track": "main""#,
            r#""nameEnv": "GH_BRANCH_STAGING", "track": "upstream""#,
        ));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("cannot track `upstream`"));
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let err = load_err(&POLICY.replace(r#""role": "feature""#, r#""role": "staging""#));
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("more than one branch"));
    }

    #[test]
    fn test_product_role_required() {
        let err = load_err(
            r#"{
                "prefixEnv": "GH_BRANCH_PREFIX",
                "createOrder": [],
                "branches": []
            }"#,
        );
        assert_matches!(err, ValidationError::Policy(msg) if msg.contains("product role is required"));
    }

    #[test]
    fn test_unknown_track_fails_to_parse() {
        let content = POLICY.replace(r#""track": "main", "update": false"#, r#""track": "sideways""#);
        assert!(BranchPolicy::from_json(&content, &values()).is_err());
    }

    #[test]
    fn test_validate_ref_name_rules() {
        for good in ["acme", "acme/product", "release-1.2", "feat_x/y"] {
            assert!(validate_ref_name("name", good).is_ok(), "{} should be valid", good);
        }

        assert_matches!(validate_ref_name("name", "  "), Err(ValidationError::Empty { .. }));
        for bad in [
            "@",
            "/acme",
            "acme/",
            "acme//product",
            "a..b",
            "a@{b",
            "product.lock",
            "product.lock/x",
            "with space",
            "tab\tname",
            "a~1",
            "a^",
            "a:b",
            "a?",
            "a*",
            "a[b",
            "a\\b",
            ".hidden",
            "acme/.hidden",
            "trailing.",
        ] {
            assert_matches!(
                validate_ref_name("name", bad),
                Err(ValidationError::InvalidRefName { .. }),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
