use std::collections::{BTreeMap, BTreeSet};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod file_repository;

/// Priority assigned to a keyword rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Closed set of keyword categories driving hint routing and STRIDE bucketing.
///
/// External knowledge bases may carry categories this tool does not know; those
/// deserialize to [`KeywordCategory::Other`] and stay out of every derived view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordCategory {
    Authn,
    Authz,
    Csrf,
    Session,
    Credential,
    Database,
    Secret,
    BusinessLogic,
    TimeInterval,
    Logging,
    ApiEndpoint,
    #[serde(other)]
    Other,
}

/// Destination bucket for a keyword hit inside the evidence aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintRoute {
    Auth,
    Database,
    RiskyConfig,
}

impl KeywordCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authn => "authn",
            Self::Authz => "authz",
            Self::Csrf => "csrf",
            Self::Session => "session",
            Self::Credential => "credential",
            Self::Database => "database",
            Self::Secret => "secret",
            Self::BusinessLogic => "business_logic",
            Self::TimeInterval => "time_interval",
            Self::Logging => "logging",
            Self::ApiEndpoint => "api_endpoint",
            Self::Other => "other",
        }
    }

    /// Evidence hint bucket a hit of this category is routed into, if any.
    pub fn hint_route(self) -> Option<HintRoute> {
        match self {
            Self::Authn | Self::Authz | Self::Csrf | Self::Session | Self::Credential => {
                Some(HintRoute::Auth)
            }
            Self::Database => Some(HintRoute::Database),
            Self::Secret => Some(HintRoute::RiskyConfig),
            Self::BusinessLogic
            | Self::TimeInterval
            | Self::Logging
            | Self::ApiEndpoint
            | Self::Other => None,
        }
    }

    /// STRIDE bucket this category feeds in the report breakdown, if any.
    ///
    /// Categories without a mapping (`csrf`, `other`) are dropped from the
    /// STRIDE view only; they still appear among the raw keyword hits.
    pub fn stride_bucket(self) -> Option<StrideCategory> {
        match self {
            Self::Authn | Self::Credential | Self::Session => Some(StrideCategory::Spoofing),
            Self::BusinessLogic | Self::TimeInterval => Some(StrideCategory::Tampering),
            Self::Logging => Some(StrideCategory::Repudiation),
            Self::Secret | Self::Database => Some(StrideCategory::InformationDisclosure),
            Self::ApiEndpoint => Some(StrideCategory::DenialOfService),
            Self::Authz => Some(StrideCategory::ElevationOfPrivilege),
            Self::Csrf | Self::Other => None,
        }
    }
}

impl std::fmt::Display for KeywordCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a single content-matching rule used during scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    /// Match keyword, stored lowercased; matching is substring, case-insensitive.
    pub keyword: String,
    pub category: KeywordCategory,
    pub priority: Priority,
    /// Human-readable summary shown in rule listings.
    pub description: String,
}

impl KeywordRule {
    /// Construct a new rule, validating invariants before returning.
    pub fn new(
        keyword: impl Into<String>,
        category: KeywordCategory,
        priority: Priority,
        description: impl Into<String>,
    ) -> Result<Self, RuleValidationError> {
        let rule = Self {
            keyword: keyword.into().to_lowercase(),
            category,
            priority,
            description: description.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Validate invariants for existing rule definitions.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.keyword.trim().is_empty() {
            return Err(RuleValidationError::EmptyKeyword);
        }
        Ok(())
    }
}

/// Errors emitted while validating rule definitions.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleValidationError {
    #[error("keyword rule must not have a blank keyword")]
    EmptyKeyword,
}

/// Mutually exclusive file-classification outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileBucket {
    OpenApi,
    DbMigration,
    Config,
}

impl FileBucket {
    /// Fixed precedence used during classification; evaluation stops at the
    /// first bucket whose patterns match.
    pub const PRECEDENCE: [FileBucket; 3] = [Self::OpenApi, Self::DbMigration, Self::Config];
}

/// Compiled, case-insensitive glob sets for the three file buckets.
#[derive(Debug, Clone)]
pub struct FilePatternSet {
    openapi: GlobSet,
    db_migration: GlobSet,
    config: GlobSet,
}

impl Default for FilePatternSet {
    fn default() -> Self {
        Self {
            openapi: GlobSet::empty(),
            db_migration: GlobSet::empty(),
            config: GlobSet::empty(),
        }
    }
}

impl FilePatternSet {
    pub fn new(openapi: &[String], db_migration: &[String], config: &[String]) -> Self {
        Self {
            openapi: compile_globs(openapi),
            db_migration: compile_globs(db_migration),
            config: compile_globs(config),
        }
    }

    fn set_for(&self, bucket: FileBucket) -> &GlobSet {
        match bucket {
            FileBucket::OpenApi => &self.openapi,
            FileBucket::DbMigration => &self.db_migration,
            FileBucket::Config => &self.config,
        }
    }

    /// Classify a forward-slash relative path into at most one bucket.
    pub fn classify(&self, relative_path: &str) -> Option<FileBucket> {
        let lowered = relative_path.to_lowercase();
        FileBucket::PRECEDENCE
            .into_iter()
            .find(|bucket| self.set_for(*bucket).is_match(&lowered))
    }
}

fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern).case_insensitive(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!(%pattern, %err, "skipping invalid file pattern"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// STRIDE threat-categorization taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrideCategory {
    Spoofing,
    Tampering,
    Repudiation,
    #[serde(rename = "Information Disclosure")]
    InformationDisclosure,
    #[serde(rename = "Denial of Service")]
    DenialOfService,
    #[serde(rename = "Elevation of Privilege")]
    ElevationOfPrivilege,
}

impl StrideCategory {
    /// Report display order.
    pub const ALL: [StrideCategory; 6] = [
        Self::Spoofing,
        Self::Tampering,
        Self::Repudiation,
        Self::InformationDisclosure,
        Self::DenialOfService,
        Self::ElevationOfPrivilege,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Spoofing => "Spoofing",
            Self::Tampering => "Tampering",
            Self::Repudiation => "Repudiation",
            Self::InformationDisclosure => "Information Disclosure",
            Self::DenialOfService => "Denial of Service",
            Self::ElevationOfPrivilege => "Elevation of Privilege",
        }
    }
}

impl std::fmt::Display for StrideCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One threat definition from the threat knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatDefinition {
    pub name: String,
    pub stride_category: StrideCategory,
    /// Keywords linking this threat to observed evidence (compared case-insensitively).
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub default_likelihood: String,
    #[serde(default)]
    pub default_impact: String,
    #[serde(default)]
    pub recommended_controls: Vec<String>,
    #[serde(default)]
    pub questions_to_confirm: Vec<String>,
}

impl ThreatDefinition {
    /// Lowercased keyword set for intersection with observed evidence.
    pub fn keyword_set(&self) -> BTreeSet<String> {
        self.keywords.iter().map(|k| k.to_lowercase()).collect()
    }
}

/// Immutable, loaded-once rule model shared by the scanner and the synthesizer.
///
/// Construct one per rule source (never a process-wide singleton) and share it
/// by reference; it is read-only after load and safe for concurrent scans.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    keywords: BTreeMap<String, KeywordRule>,
    patterns: FilePatternSet,
    threats: Vec<ThreatDefinition>,
}

impl KnowledgeBase {
    /// Build from loaded rule sets. Duplicate keywords (after lowercasing)
    /// resolve to the last definition in `rules`.
    pub fn new(
        rules: Vec<KeywordRule>,
        patterns: FilePatternSet,
        threats: Vec<ThreatDefinition>,
    ) -> Self {
        let mut keywords = BTreeMap::new();
        for rule in rules {
            keywords.insert(rule.keyword.clone(), rule);
        }
        Self {
            keywords,
            patterns,
            threats,
        }
    }

    /// Look up a keyword rule, case-insensitively.
    pub fn lookup(&self, keyword: &str) -> Option<&KeywordRule> {
        self.keywords.get(&keyword.to_lowercase())
    }

    /// Classify a forward-slash relative path into at most one file bucket.
    pub fn classify(&self, relative_path: &str) -> Option<FileBucket> {
        self.patterns.classify(relative_path)
    }

    /// All keyword rules in deterministic (lexicographic) order.
    pub fn keyword_rules(&self) -> impl Iterator<Item = &KeywordRule> {
        self.keywords.values()
    }

    pub fn keyword_rule_count(&self) -> usize {
        self.keywords.len()
    }

    pub fn threats(&self) -> &[ThreatDefinition] {
        &self.threats
    }

    /// Threat definitions whose keyword sets intersect the observed keywords,
    /// paired with the intersection size, sorted descending by that size.
    /// Ties preserve knowledge-base order.
    pub fn threats_matching(
        &self,
        observed: &BTreeSet<String>,
    ) -> Vec<(&ThreatDefinition, usize)> {
        let observed: BTreeSet<String> = observed.iter().map(|k| k.to_lowercase()).collect();
        let mut matched: Vec<(&ThreatDefinition, usize)> = self
            .threats
            .iter()
            .filter_map(|threat| {
                let count = threat.keyword_set().intersection(&observed).count();
                (count > 0).then_some((threat, count))
            })
            .collect();
        matched.sort_by(|a, b| b.1.cmp(&a.1));
        matched
    }
}
