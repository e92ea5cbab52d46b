use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::kb::{FileBucket, HintRoute, KeywordCategory, Priority};

/// Single keyword match inside one file.
///
/// At most one hit exists per `(file_path, keyword)` pair within a scan; the
/// first occurrence wins and later ones are suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordHit {
    pub keyword: String,
    /// Relative, forward-slash normalized path.
    pub file_path: String,
    pub category: KeywordCategory,
    pub priority: Priority,
}

/// Authentication-related indicator derived from a keyword hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthHint {
    #[serde(rename = "type")]
    pub hint_type: String,
    pub file_path: String,
    pub category: KeywordCategory,
}

/// Database-technology indicator derived from a keyword hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbHint {
    #[serde(rename = "type")]
    pub hint_type: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskyConfigKind {
    SecretReference,
    DatabaseUrl,
}

/// Risky configuration indicator. `value` is always redacted: the keyword name
/// for secret references, a `scheme://<REDACTED>@host/...` form for URLs.
/// Raw file content never lands here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskyConfigHint {
    #[serde(rename = "type")]
    pub kind: RiskyConfigKind,
    pub value: String,
    pub file_path: String,
}

/// Frozen findings extracted from one repository's file tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub repo_name: String,
    pub scan_timestamp: String,
    pub openapi_files: Vec<String>,
    pub db_migration_files: Vec<String>,
    pub config_files: Vec<String>,
    pub keyword_hits: Vec<KeywordHit>,
    pub auth_hints: Vec<AuthHint>,
    pub db_hints: Vec<DbHint>,
    pub risky_config_hints: Vec<RiskyConfigHint>,
    pub file_counts: BTreeMap<String, usize>,
}

impl Evidence {
    pub fn high_priority_hits(&self) -> impl Iterator<Item = &KeywordHit> {
        self.keyword_hits
            .iter()
            .filter(|hit| hit.priority == Priority::High)
    }

    /// Observed keyword set (lowercased) for threat matching.
    pub fn observed_keywords(&self) -> BTreeSet<String> {
        self.keyword_hits
            .iter()
            .map(|hit| hit.keyword.to_lowercase())
            .collect()
    }

    /// Distinct db-hint types in first-seen order.
    pub fn distinct_db_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.db_hints
            .iter()
            .filter(|hint| seen.insert(hint.hint_type.as_str()))
            .map(|hint| hint.hint_type.as_str())
            .collect()
    }

    /// Distinct auth-hint types in first-seen order.
    pub fn distinct_auth_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.auth_hints
            .iter()
            .filter(|hint| seen.insert(hint.hint_type.as_str()))
            .map(|hint| hint.hint_type.as_str())
            .collect()
    }
}

/// Mutable accumulator owned by exactly one scan invocation.
///
/// Enforces the per-`(file, keyword)` deduplication invariant and computes
/// `file_counts` when frozen into an immutable [`Evidence`].
#[derive(Debug)]
pub struct EvidenceBuilder {
    evidence: Evidence,
    seen_hits: HashSet<(String, String)>,
}

impl EvidenceBuilder {
    pub fn new(repo_name: impl Into<String>, scan_timestamp: impl Into<String>) -> Self {
        Self {
            evidence: Evidence {
                repo_name: repo_name.into(),
                scan_timestamp: scan_timestamp.into(),
                openapi_files: Vec::new(),
                db_migration_files: Vec::new(),
                config_files: Vec::new(),
                keyword_hits: Vec::new(),
                auth_hints: Vec::new(),
                db_hints: Vec::new(),
                risky_config_hints: Vec::new(),
                file_counts: BTreeMap::new(),
            },
            seen_hits: HashSet::new(),
        }
    }

    /// Append a classified file path to its bucket list.
    pub fn record_classified(&mut self, bucket: FileBucket, relative_path: &str) {
        let list = match bucket {
            FileBucket::OpenApi => &mut self.evidence.openapi_files,
            FileBucket::DbMigration => &mut self.evidence.db_migration_files,
            FileBucket::Config => &mut self.evidence.config_files,
        };
        list.push(relative_path.to_string());
    }

    /// Record a keyword hit, routing it into the derived hint buckets.
    ///
    /// Returns `false` when the `(file_path, keyword)` pair was already
    /// recorded and the hit is suppressed.
    pub fn record_hit(&mut self, hit: KeywordHit) -> bool {
        let key = (hit.file_path.clone(), hit.keyword.clone());
        if !self.seen_hits.insert(key) {
            return false;
        }
        match hit.category.hint_route() {
            Some(HintRoute::Auth) => self.evidence.auth_hints.push(AuthHint {
                hint_type: hit.keyword.clone(),
                file_path: hit.file_path.clone(),
                category: hit.category,
            }),
            Some(HintRoute::Database) => self.evidence.db_hints.push(DbHint {
                hint_type: hit.keyword.clone(),
                file_path: hit.file_path.clone(),
            }),
            Some(HintRoute::RiskyConfig) => self.evidence.risky_config_hints.push(RiskyConfigHint {
                kind: RiskyConfigKind::SecretReference,
                value: hit.keyword.clone(),
                file_path: hit.file_path.clone(),
            }),
            None => {}
        }
        self.evidence.keyword_hits.push(hit);
        true
    }

    /// Record a redacted connection string found in a config file.
    pub fn record_database_url(&mut self, redacted_value: impl Into<String>, relative_path: &str) {
        self.evidence.risky_config_hints.push(RiskyConfigHint {
            kind: RiskyConfigKind::DatabaseUrl,
            value: redacted_value.into(),
            file_path: relative_path.to_string(),
        });
    }

    /// Freeze the accumulator: compute `file_counts` and hand out the
    /// immutable evidence value. The builder is consumed; no further mutation
    /// is possible.
    pub fn freeze(self) -> Evidence {
        let mut evidence = self.evidence;
        evidence
            .file_counts
            .insert("openapi_files".to_string(), evidence.openapi_files.len());
        evidence.file_counts.insert(
            "db_migration_files".to_string(),
            evidence.db_migration_files.len(),
        );
        evidence
            .file_counts
            .insert("config_files".to_string(), evidence.config_files.len());
        evidence
    }
}
