use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::evidence::Evidence;
use crate::kb::{KnowledgeBase, StrideCategory};
use crate::summaries::{SbomSummary, SecretScanSummary};

/// Identification for one scanning run, supplied by the caller. Generation of
/// timestamps and run ids belongs to the surrounding tooling; synthesis only
/// renders them, which keeps re-runs on identical inputs byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub org: String,
    pub mode: String,
    pub since_days: u32,
    pub depth: u32,
    pub run_timestamp: String,
    pub run_id: String,
}

/// Overall risk classification for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Derive the overall risk level. The High check runs first: secret findings
/// or more than 10 high-priority hits dominate everything else.
pub fn risk_level(evidence: &Evidence, secrets: &SecretScanSummary) -> RiskLevel {
    let high_priority = evidence.high_priority_hits().count();
    let total = evidence.keyword_hits.len();
    if secrets.findings_count > 0 || high_priority > 10 {
        RiskLevel::High
    } else if high_priority > 3 || total > 50 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Contract violations in synthesizer input. These indicate an upstream
/// invariant break and fail loudly instead of substituting defaults.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("evidence for `{repo}` is missing file count `{key}`")]
    MissingFileCount { repo: String, key: &'static str },
}

const MAX_THREAT_ROWS: usize = 20;
const MAX_QUESTIONS: usize = 20;
const MAX_STRIDE_KEYWORDS: usize = 10;
const CELL_LIMIT: usize = 50;

/// Maps extracted evidence onto threat definitions and renders the
/// threat-model document. Stateless apart from the shared knowledge base:
/// identical inputs always yield an identical report.
pub struct ThreatSynthesizer {
    kb: Arc<KnowledgeBase>,
}

impl ThreatSynthesizer {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Render the complete Markdown threat-model report.
    ///
    /// Section order is fixed: header, scan metadata, executive summary,
    /// asset table, threat table, STRIDE analysis, recommendations, reviewer
    /// questions, footer.
    pub fn render_threat_model(
        &self,
        evidence: &Evidence,
        secrets: &SecretScanSummary,
        sbom: &SbomSummary,
        run: &RunMetadata,
    ) -> Result<String, ReportError> {
        check_file_counts(evidence)?;
        let sections = vec![
            header(evidence, run),
            scan_metadata(run),
            self.executive_summary(evidence, secrets, sbom),
            asset_table(evidence),
            self.threat_table(evidence),
            stride_analysis(evidence),
            recommendations(evidence, secrets),
            self.reviewer_questions(evidence),
            footer(run),
        ];
        debug!(repo = %evidence.repo_name, "threat model report rendered");
        Ok(sections.join("\n"))
    }

    fn executive_summary(
        &self,
        evidence: &Evidence,
        secrets: &SecretScanSummary,
        sbom: &SbomSummary,
    ) -> String {
        let level = risk_level(evidence, secrets);
        let mut lines = vec![
            "## Executive Summary".to_string(),
            String::new(),
            format!("**Overall Risk Level:** {level}"),
            String::new(),
            format!(
                "- **Total Evidence Findings:** {}",
                evidence.keyword_hits.len()
            ),
            format!(
                "- **High-Priority Keywords:** {}",
                evidence.high_priority_hits().count()
            ),
            format!("- **Secret Findings:** {}", secrets.findings_count),
            format!("- **Total Packages (SBOM):** {}", sbom.package_count),
            format!("- **OpenAPI Specs Found:** {}", file_count(evidence, "openapi_files")),
            format!(
                "- **DB Migration Files:** {}",
                file_count(evidence, "db_migration_files")
            ),
            String::new(),
        ];
        if self.kb.threats().is_empty() {
            lines.push(
                "> Threat knowledge base was empty for this run; threat matching carries reduced confidence."
                    .to_string(),
            );
            lines.push(String::new());
        }
        lines.join("\n")
    }

    fn threat_table(&self, evidence: &Evidence) -> String {
        let mut lines = vec![
            "## Threat Analysis".to_string(),
            String::new(),
            "| Threat | STRIDE Category | Likelihood | Impact | Priority | Evidence | Recommended Controls | Questions to Confirm |".to_string(),
            "|--------|-----------------|------------|--------|----------|----------|----------------------|----------------------|".to_string(),
        ];

        let observed = evidence.observed_keywords();
        let relevant = self.kb.threats_matching(&observed);

        for (threat, match_count) in relevant.iter().take(MAX_THREAT_ROWS) {
            let controls: Vec<&str> = threat
                .recommended_controls
                .iter()
                .take(2)
                .map(String::as_str)
                .collect();
            let controls_cell = if controls.is_empty() {
                "N/A".to_string()
            } else {
                truncate_cell(&controls.join("; "))
            };
            let question_cell = threat
                .questions_to_confirm
                .first()
                .map(|q| truncate_cell(q))
                .unwrap_or_else(|| "N/A".to_string());
            lines.push(format!(
                "| {} | {} | {} | {} | TBD | {} keyword match(es) | {} | {} |",
                threat.name,
                threat.stride_category,
                threat.default_likelihood,
                threat.default_impact,
                match_count,
                controls_cell,
                question_cell,
            ));
        }

        if relevant.is_empty() {
            for (name, category, notes) in [
                ("Injection Attacks", "Tampering", "SQLi, XSS via user input"),
                ("Authentication Bypass", "Spoofing", "Weak session management"),
                (
                    "Data Exposure",
                    "Information Disclosure",
                    "Sensitive data in logs",
                ),
            ] {
                lines.push(format!(
                    "| {name} | {category} | TBD | TBD | TBD | {notes} | TBD | TBD |"
                ));
            }
        }

        lines.push(String::new());
        lines.join("\n")
    }

    fn reviewer_questions(&self, evidence: &Evidence) -> String {
        let mut lines = vec![
            "## Questions for Security Reviewers".to_string(),
            String::new(),
            "Please confirm the following during review:".to_string(),
            String::new(),
        ];

        let mut questions: Vec<String> = Vec::new();
        let push_unique = |questions: &mut Vec<String>, question: &str| {
            if !questions.iter().any(|q| q == question) {
                questions.push(question.to_string());
            }
        };

        // Questions attached to threats whose keywords intersect the evidence,
        // in hit order, then knowledge-base order.
        for hit in &evidence.keyword_hits {
            let keyword = hit.keyword.to_lowercase();
            for threat in self.kb.threats() {
                if threat.keyword_set().contains(&keyword) {
                    for question in &threat.questions_to_confirm {
                        push_unique(&mut questions, question);
                    }
                }
            }
        }

        // Pattern-group questions keyed off the high-priority keyword set.
        let high_keywords: BTreeSet<&str> = evidence
            .high_priority_hits()
            .map(|hit| hit.keyword.as_str())
            .collect();
        if high_keywords.contains("pvf_date") || high_keywords.iter().any(|k| k.contains("date")) {
            push_unique(
                &mut questions,
                "Is PVF_DATE (and all date fields) validated server-side?",
            );
        }
        if high_keywords.iter().any(|k| k.contains("risk")) {
            push_unique(&mut questions, "Are risk scores calculated server-side only?");
        }
        if high_keywords
            .iter()
            .any(|k| k.contains("hold") || k.contains("transaction"))
        {
            push_unique(
                &mut questions,
                "Are transaction holds enforced in the database (not client-side)?",
            );
        }
        if high_keywords
            .iter()
            .any(|k| k.contains("10m") || k.contains("30m") || k.contains("interval"))
        {
            push_unique(
                &mut questions,
                "Are time intervals calculated server-side using system time?",
            );
        }
        if !evidence.db_hints.is_empty() {
            push_unique(
                &mut questions,
                "Are database credentials stored in a secret manager or environment variables?",
            );
        }
        if !evidence.auth_hints.is_empty() {
            push_unique(&mut questions, "Is MFA implemented for sensitive operations?");
            push_unique(&mut questions, "Are JWT signatures validated on every request?");
        }

        for (idx, question) in questions.iter().take(MAX_QUESTIONS).enumerate() {
            lines.push(format!("{}. {}", idx + 1, question));
        }
        if questions.len() > MAX_QUESTIONS {
            lines.push(format!(
                "... and {} more questions",
                questions.len() - MAX_QUESTIONS
            ));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

fn check_file_counts(evidence: &Evidence) -> Result<(), ReportError> {
    for key in ["openapi_files", "db_migration_files", "config_files"] {
        if !evidence.file_counts.contains_key(key) {
            return Err(ReportError::MissingFileCount {
                repo: evidence.repo_name.clone(),
                key,
            });
        }
    }
    Ok(())
}

fn file_count(evidence: &Evidence, key: &str) -> usize {
    evidence.file_counts.get(key).copied().unwrap_or(0)
}

fn header(evidence: &Evidence, run: &RunMetadata) -> String {
    [
        "# Threat Model Report".to_string(),
        String::new(),
        format!("**Repository:** {}", evidence.repo_name),
        format!("**Organization:** {}", run.org),
        format!("**Report Date:** {}", run.run_timestamp),
        format!("**Report ID:** {}", run.run_id),
        String::new(),
    ]
    .join("\n")
}

fn scan_metadata(run: &RunMetadata) -> String {
    [
        "## Scan Metadata".to_string(),
        String::new(),
        format!("- **Scan Mode:** {}", run.mode),
        format!("- **Since Days:** {}", run.since_days),
        format!("- **Git Depth:** {}", run.depth),
        String::new(),
    ]
    .join("\n")
}

struct AssetRow {
    name: String,
    confidentiality: &'static str,
    integrity: &'static str,
    availability: &'static str,
    sensitivity: &'static str,
    evidence: String,
    notes: String,
}

fn asset_table(evidence: &Evidence) -> String {
    let mut lines = vec![
        "## Asset/Flow Inventory".to_string(),
        String::new(),
        "| Asset/Flow | Confidentiality | Integrity | Availability | Sensitivity | Evidence | Notes |"
            .to_string(),
        "|------------|-----------------|-----------|--------------|-------------|----------|-------|"
            .to_string(),
    ];

    let mut assets: Vec<AssetRow> = Vec::new();

    let user_hits = evidence
        .keyword_hits
        .iter()
        .filter(|hit| hit.keyword == "users")
        .count();
    if user_hits > 0 {
        assets.push(AssetRow {
            name: "User Data (USERS table)".into(),
            confidentiality: "High",
            integrity: "High",
            availability: "Medium",
            sensitivity: "High",
            evidence: format!("{user_hits} reference(s)"),
            notes: "Contains PII - check for encryption".into(),
        });
    }

    for db_type in evidence.distinct_db_types().into_iter().take(3) {
        let count = evidence
            .db_hints
            .iter()
            .filter(|hint| hint.hint_type == db_type)
            .count();
        assets.push(AssetRow {
            name: format!("Database ({db_type})"),
            confidentiality: "High",
            integrity: "High",
            availability: "High",
            sensitivity: "High",
            evidence: format!("{count} reference(s)"),
            notes: "Check connection string security".into(),
        });
    }

    if !evidence.openapi_files.is_empty() {
        assets.push(AssetRow {
            name: "REST API".into(),
            confidentiality: "Medium",
            integrity: "Medium",
            availability: "High",
            sensitivity: "Medium",
            evidence: format!("{} spec file(s)", evidence.openapi_files.len()),
            notes: "Review authentication and rate limiting".into(),
        });
    }

    let risk_hits = count_hits_containing(evidence, &["risk"]);
    if risk_hits > 0 {
        assets.push(AssetRow {
            name: "Risk Assessment Engine".into(),
            confidentiality: "Medium",
            integrity: "High",
            availability: "High",
            sensitivity: "High",
            evidence: format!("{risk_hits} reference(s)"),
            notes: "Verify scores are computed server-side".into(),
        });
    }

    let date_hits = count_hits_containing(evidence, &["date", "interval"]);
    if date_hits > 0 {
        assets.push(AssetRow {
            name: "Date/Time Validation".into(),
            confidentiality: "Low",
            integrity: "High",
            availability: "Medium",
            sensitivity: "Medium",
            evidence: format!("{date_hits} reference(s)"),
            notes: "Verify date fields are validated server-side".into(),
        });
    }

    let tx_hits = count_hits_containing(evidence, &["transaction", "hold"]);
    if tx_hits > 0 {
        assets.push(AssetRow {
            name: "Transaction Processing".into(),
            confidentiality: "Medium",
            integrity: "High",
            availability: "High",
            sensitivity: "High",
            evidence: format!("{tx_hits} reference(s)"),
            notes: "Verify hold enforcement".into(),
        });
    }

    if !evidence.auth_hints.is_empty() {
        let auth_types = evidence.distinct_auth_types();
        assets.push(AssetRow {
            name: "Authentication System".into(),
            confidentiality: "Medium",
            integrity: "High",
            availability: "High",
            sensitivity: "High",
            evidence: format!("{} type(s)", auth_types.len()),
            notes: auth_types
                .iter()
                .take(5)
                .copied()
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    if assets.is_empty() {
        assets.push(AssetRow {
            name: "Application (General)".into(),
            confidentiality: "TBD",
            integrity: "TBD",
            availability: "TBD",
            sensitivity: "TBD",
            evidence: "No specific assets identified".into(),
            notes: "Manual review required".into(),
        });
    }

    for asset in assets {
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            asset.name,
            asset.confidentiality,
            asset.integrity,
            asset.availability,
            asset.sensitivity,
            asset.evidence,
            asset.notes,
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn count_hits_containing(evidence: &Evidence, needles: &[&str]) -> usize {
    evidence
        .keyword_hits
        .iter()
        .filter(|hit| {
            let keyword = hit.keyword.to_lowercase();
            needles.iter().any(|needle| keyword.contains(needle))
        })
        .count()
}

fn stride_analysis(evidence: &Evidence) -> String {
    let mut lines = vec!["## STRIDE Analysis".to_string(), String::new()];

    let mut buckets: BTreeMap<StrideCategory, Vec<&str>> = BTreeMap::new();
    for hit in &evidence.keyword_hits {
        if let Some(bucket) = hit.category.stride_bucket() {
            buckets.entry(bucket).or_default().push(hit.keyword.as_str());
        }
    }

    for category in StrideCategory::ALL {
        let Some(keywords) = buckets.get(&category) else {
            continue;
        };
        if keywords.is_empty() {
            continue;
        }
        lines.push(format!("### {category}"));
        lines.push(String::new());
        lines.push(format!("**Indicators Found ({}):**", keywords.len()));
        let unique: BTreeSet<&str> = keywords.iter().copied().collect();
        for keyword in unique.iter().take(MAX_STRIDE_KEYWORDS) {
            lines.push(format!("- {keyword}"));
        }
        if keywords.len() > MAX_STRIDE_KEYWORDS {
            lines.push(format!(
                "- ... and {} more",
                keywords.len() - MAX_STRIDE_KEYWORDS
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn recommendations(evidence: &Evidence, secrets: &SecretScanSummary) -> String {
    let mut lines = vec!["## Recommendations".to_string(), String::new()];

    let mut items: Vec<(&str, String, String)> = Vec::new();

    if secrets.findings_count > 0 {
        items.push((
            "CRITICAL",
            format!("Remove {} potential secret(s)", secrets.findings_count),
            "Secret scanning detected potential secrets. Review and rotate any exposed credentials."
                .into(),
        ));
    }

    let high_priority = evidence.high_priority_hits().count();
    if high_priority > 0 {
        items.push((
            "HIGH",
            format!("Review {high_priority} high-priority code patterns"),
            "High-priority keywords detected. Verify server-side validation and business logic enforcement."
                .into(),
        ));
    }

    if !evidence.db_hints.is_empty() {
        items.push((
            "HIGH",
            "Review database connection security".into(),
            "Ensure credentials are stored in environment variables or a secret manager. Use least-privilege database accounts."
                .into(),
        ));
    }

    let auth_count = evidence.auth_hints.len();
    if auth_count > 5 {
        items.push((
            "MEDIUM",
            "Verify authentication/authorization implementation".into(),
            format!(
                "{auth_count} auth-related indicators found. Ensure MFA, proper session management, and JWT validation."
            ),
        ));
    }

    if !evidence.openapi_files.is_empty() {
        items.push((
            "MEDIUM",
            "Review API security controls".into(),
            "Ensure all endpoints have authentication, rate limiting, and input validation.".into(),
        ));
    }

    items.push((
        "LOW",
        "Implement comprehensive audit logging".into(),
        "Log all security-relevant events with user identity, timestamp, and action. Ensure logs are tamper-evident."
            .into(),
    ));

    for (priority, title, description) in items {
        lines.push(format!("### [{priority}] {title}"));
        lines.push(String::new());
        lines.push(description);
        lines.push(String::new());
    }

    lines.join("\n")
}

fn footer(run: &RunMetadata) -> String {
    [
        "---".to_string(),
        String::new(),
        format!(
            "*Report generated by tm-scan v{} on {}*",
            env!("CARGO_PKG_VERSION"),
            run.run_timestamp
        ),
        "*This is an automated threat model report based on static analysis. Manual review required.*"
            .to_string(),
        String::new(),
    ]
    .join("\n")
}

/// Truncate a table cell to 47 characters plus an ellipsis when it exceeds 50.
fn truncate_cell(text: &str) -> String {
    if text.chars().count() > CELL_LIMIT {
        let mut cell: String = text.chars().take(CELL_LIMIT - 3).collect();
        cell.push_str("...");
        cell
    } else {
        text.to_string()
    }
}

/// Human-readable Markdown summary of one repository's evidence.
pub fn render_evidence_summary(evidence: &Evidence) -> String {
    let mut lines = vec![
        format!("# Evidence Summary: {}", evidence.repo_name),
        String::new(),
        format!("**Scan Date:** {}", evidence.scan_timestamp),
        format!("**Repository:** {}", evidence.repo_name),
        String::new(),
        "## Overview".to_string(),
        String::new(),
        "| Category | Count |".to_string(),
        "|----------|-------|".to_string(),
        format!(
            "| OpenAPI/Swagger Files | {} |",
            file_count(evidence, "openapi_files")
        ),
        format!(
            "| DB Migration Files | {} |",
            file_count(evidence, "db_migration_files")
        ),
        format!("| Config Files | {} |", file_count(evidence, "config_files")),
        format!("| Keyword Hits | {} |", evidence.keyword_hits.len()),
        format!("| Auth Hints | {} |", evidence.auth_hints.len()),
        format!("| Database Hints | {} |", evidence.db_hints.len()),
        format!(
            "| Risky Config Hints | {} |",
            evidence.risky_config_hints.len()
        ),
        String::new(),
    ];

    push_file_section(
        &mut lines,
        "OpenAPI/Swagger Specifications",
        &evidence.openapi_files,
    );
    push_file_section(
        &mut lines,
        "Database Migration Files",
        &evidence.db_migration_files,
    );
    push_file_section(&mut lines, "Configuration Files", &evidence.config_files);

    let high_priority: Vec<_> = evidence.high_priority_hits().collect();
    if !high_priority.is_empty() {
        lines.push("## High Priority Keyword Hits".to_string());
        lines.push(String::new());
        lines.push("| Keyword | Category | File |".to_string());
        lines.push("|---------|----------|------|".to_string());
        for hit in high_priority.iter().take(50) {
            lines.push(format!(
                "| {} | {} | `{}` |",
                hit.keyword,
                hit.category,
                truncate_path(&hit.file_path, 60)
            ));
        }
        if high_priority.len() > 50 {
            lines.push(format!(
                "| ... | ... | ... and {} more |",
                high_priority.len() - 50
            ));
        }
        lines.push(String::new());
    }

    if !evidence.auth_hints.is_empty() {
        lines.push("## Authentication/Authorization Hints".to_string());
        lines.push(String::new());
        lines.push("| Type | Category | File |".to_string());
        lines.push("|------|----------|------|".to_string());
        for hint in evidence.auth_hints.iter().take(30) {
            lines.push(format!(
                "| {} | {} | `{}` |",
                hint.hint_type,
                hint.category,
                truncate_path(&hint.file_path, 50)
            ));
        }
        if evidence.auth_hints.len() > 30 {
            lines.push(format!(
                "| ... | ... | ... and {} more |",
                evidence.auth_hints.len() - 30
            ));
        }
        lines.push(String::new());
    }

    if !evidence.db_hints.is_empty() {
        lines.push("## Database Technology Hints".to_string());
        lines.push(String::new());
        let types: BTreeSet<&str> = evidence
            .db_hints
            .iter()
            .map(|hint| hint.hint_type.as_str())
            .collect();
        for db_type in types {
            let files: Vec<&str> = evidence
                .db_hints
                .iter()
                .filter(|hint| hint.hint_type == db_type)
                .map(|hint| hint.file_path.as_str())
                .collect();
            lines.push(format!("- **{}** found in {} file(s)", db_type, files.len()));
            for file in files.iter().take(5) {
                lines.push(format!("  - `{file}`"));
            }
            if files.len() > 5 {
                lines.push(format!("  - ... and {} more", files.len() - 5));
            }
        }
        lines.push(String::new());
    }

    if !evidence.risky_config_hints.is_empty() {
        lines.push("## Risky Configuration Hints".to_string());
        lines.push(String::new());
        lines.push("> **Note:** Values are redacted for security".to_string());
        lines.push(String::new());
        lines.push("| Type | Value (Redacted) | File |".to_string());
        lines.push("|------|------------------|------|".to_string());
        for hint in evidence.risky_config_hints.iter().take(30) {
            let kind = match hint.kind {
                crate::evidence::RiskyConfigKind::SecretReference => "secret_reference",
                crate::evidence::RiskyConfigKind::DatabaseUrl => "database_url",
            };
            let value: String = hint.value.chars().take(30).collect();
            lines.push(format!(
                "| {} | `{}` | `{}` |",
                kind,
                value,
                truncate_path(&hint.file_path, 40)
            ));
        }
        if evidence.risky_config_hints.len() > 30 {
            lines.push(format!(
                "| ... | ... | ... and {} more |",
                evidence.risky_config_hints.len() - 30
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn push_file_section(lines: &mut Vec<String>, title: &str, files: &[String]) {
    if files.is_empty() {
        return;
    }
    lines.push(format!("## {title}"));
    lines.push(String::new());
    for file in files.iter().take(20) {
        lines.push(format!("- `{file}`"));
    }
    if files.len() > 20 {
        lines.push(format!("- ... and {} more", files.len() - 20));
    }
    lines.push(String::new());
}

fn truncate_path(path: &str, max: usize) -> String {
    if path.chars().count() > max {
        let mut shortened: String = path.chars().take(max).collect();
        shortened.push_str("...");
        shortened
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceBuilder, KeywordHit};
    use crate::kb::{
        FilePatternSet, KeywordCategory, KnowledgeBase, Priority, ThreatDefinition,
    };

    fn hit(keyword: &str, file: &str, category: KeywordCategory, priority: Priority) -> KeywordHit {
        KeywordHit {
            keyword: keyword.into(),
            file_path: file.into(),
            category,
            priority,
        }
    }

    fn run_metadata() -> RunMetadata {
        RunMetadata {
            org: "acme".into(),
            mode: "quick".into(),
            since_days: 30,
            depth: 1,
            run_timestamp: "2024-01-01".into(),
            run_id: "20240101_000000".into(),
        }
    }

    fn threat(
        name: &str,
        stride: StrideCategory,
        keywords: &[&str],
        questions: &[&str],
    ) -> ThreatDefinition {
        ThreatDefinition {
            name: name.into(),
            stride_category: stride,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            default_likelihood: "Medium".into(),
            default_impact: "High".into(),
            recommended_controls: vec!["Control A".into(), "Control B".into(), "Control C".into()],
            questions_to_confirm: questions.iter().map(|q| q.to_string()).collect(),
        }
    }

    fn kb_with(threats: Vec<ThreatDefinition>) -> Arc<KnowledgeBase> {
        Arc::new(KnowledgeBase::new(
            Vec::new(),
            FilePatternSet::default(),
            threats,
        ))
    }

    fn sample_evidence() -> Evidence {
        let mut builder = EvidenceBuilder::new("demo-repo", "2024-01-01");
        builder.record_classified(crate::kb::FileBucket::OpenApi, "api/openapi.yaml");
        builder.record_hit(hit("users", "db/schema.sql", KeywordCategory::Database, Priority::High));
        builder.record_hit(hit("jwt", "src/auth.rs", KeywordCategory::Authn, Priority::High));
        builder.record_hit(hit(
            "password",
            "config/app.yaml",
            KeywordCategory::Secret,
            Priority::High,
        ));
        builder.record_hit(hit(
            "risk_score",
            "src/score.rs",
            KeywordCategory::BusinessLogic,
            Priority::High,
        ));
        builder.freeze()
    }

    #[test]
    fn risk_level_checks_high_first() {
        let empty = EvidenceBuilder::new("r", "t").freeze();
        let no_secrets = SecretScanSummary::default();
        let with_secrets = SecretScanSummary {
            findings_count: 1,
            ..Default::default()
        };

        assert_eq!(risk_level(&empty, &no_secrets), RiskLevel::Low);
        assert_eq!(risk_level(&empty, &with_secrets), RiskLevel::High);

        let mut builder = EvidenceBuilder::new("r", "t");
        for i in 0..4 {
            builder.record_hit(hit(
                "risk_score",
                &format!("f{i}.rs"),
                KeywordCategory::BusinessLogic,
                Priority::High,
            ));
        }
        let four_high = builder.freeze();
        assert_eq!(risk_level(&four_high, &no_secrets), RiskLevel::Medium);

        let mut builder = EvidenceBuilder::new("r", "t");
        for i in 0..11 {
            builder.record_hit(hit(
                "risk_score",
                &format!("f{i}.rs"),
                KeywordCategory::BusinessLogic,
                Priority::High,
            ));
        }
        let many_high = builder.freeze();
        assert_eq!(risk_level(&many_high, &no_secrets), RiskLevel::High);

        let mut builder = EvidenceBuilder::new("r", "t");
        for i in 0..51 {
            builder.record_hit(hit(
                "logger",
                &format!("f{i}.rs"),
                KeywordCategory::Logging,
                Priority::Low,
            ));
        }
        let many_total = builder.freeze();
        assert_eq!(risk_level(&many_total, &no_secrets), RiskLevel::Medium);
    }

    #[test]
    fn risk_level_is_monotonic_in_secret_findings() {
        for evidence in [sample_evidence(), EvidenceBuilder::new("r", "t").freeze()] {
            let without = risk_level(&evidence, &SecretScanSummary::default());
            let with = risk_level(
                &evidence,
                &SecretScanSummary {
                    findings_count: 1,
                    ..Default::default()
                },
            );
            assert!(with >= without);
        }
    }

    #[test]
    fn report_sections_appear_in_fixed_order() {
        let synthesizer = ThreatSynthesizer::new(kb_with(vec![threat(
            "Hardcoded secrets",
            StrideCategory::InformationDisclosure,
            &["password"],
            &["Are secrets rotated?"],
        )]));
        let report = synthesizer
            .render_threat_model(
                &sample_evidence(),
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .unwrap();

        let section_order = [
            "# Threat Model Report",
            "## Scan Metadata",
            "## Executive Summary",
            "## Asset/Flow Inventory",
            "## Threat Analysis",
            "## STRIDE Analysis",
            "## Recommendations",
            "## Questions for Security Reviewers",
            "*Report generated by tm-scan",
        ];
        let mut cursor = 0;
        for marker in section_order {
            let pos = report[cursor..]
                .find(marker)
                .unwrap_or_else(|| panic!("section `{marker}` missing or out of order"));
            cursor += pos;
        }
    }

    #[test]
    fn threat_table_orders_by_match_count_and_truncates_cells() {
        let long_control = "C".repeat(80);
        let mut one_match = threat(
            "single",
            StrideCategory::Spoofing,
            &["jwt"],
            &["Short question?"],
        );
        one_match.recommended_controls = vec![long_control];
        let two_matches = threat(
            "double",
            StrideCategory::Tampering,
            &["users", "password"],
            &[],
        );
        let synthesizer = ThreatSynthesizer::new(kb_with(vec![one_match, two_matches]));
        let report = synthesizer
            .render_threat_model(
                &sample_evidence(),
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .unwrap();

        let double_pos = report.find("| double |").expect("double threat row");
        let single_pos = report.find("| single |").expect("single threat row");
        assert!(double_pos < single_pos, "higher match count sorts first");
        assert!(report.contains("2 keyword match(es)"));
        // 47 chars + ellipsis
        let truncated = format!("{}...", "C".repeat(47));
        assert!(report.contains(&truncated));
        assert!(!report.contains(&"C".repeat(48)));
    }

    #[test]
    fn zero_threat_matches_emit_three_generic_rows() {
        let synthesizer = ThreatSynthesizer::new(kb_with(vec![threat(
            "unrelated",
            StrideCategory::Spoofing,
            &["kerberos"],
            &[],
        )]));
        let report = synthesizer
            .render_threat_model(
                &sample_evidence(),
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .unwrap();
        assert!(report.contains("| Injection Attacks | Tampering |"));
        assert!(report.contains("| Authentication Bypass | Spoofing |"));
        assert!(report.contains("| Data Exposure | Information Disclosure |"));
        let generic_rows = report
            .lines()
            .filter(|line| line.ends_with("| TBD | TBD |") && line.contains("| TBD | TBD | TBD |"))
            .count();
        assert_eq!(generic_rows, 3);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let synthesizer = ThreatSynthesizer::new(kb_with(vec![
            threat(
                "secrets",
                StrideCategory::InformationDisclosure,
                &["password"],
                &["Q1?", "Q2?"],
            ),
            threat("auth", StrideCategory::Spoofing, &["jwt"], &["Q2?", "Q3?"]),
        ]));
        let evidence = sample_evidence();
        let first = synthesizer
            .render_threat_model(
                &evidence,
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .unwrap();
        let second = synthesizer
            .render_threat_model(
                &evidence,
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_file_counts_fail_loudly() {
        let mut evidence = sample_evidence();
        evidence.file_counts.clear();
        let synthesizer = ThreatSynthesizer::new(kb_with(Vec::new()));
        let err = synthesizer
            .render_threat_model(
                &evidence,
                &SecretScanSummary::default(),
                &SbomSummary::default(),
                &run_metadata(),
            )
            .expect_err("cleared file_counts violate the evidence contract");
        assert!(matches!(err, ReportError::MissingFileCount { key, .. } if key == "openapi_files"));
    }

    #[test]
    fn empty_evidence_gets_placeholder_asset_row() {
        let evidence = EvidenceBuilder::new("bare", "2024-01-01").freeze();
        let table = asset_table(&evidence);
        assert!(table.contains("| Application (General) |"));
        assert!(table.contains("Manual review required"));
    }

    #[test]
    fn asset_rows_follow_trigger_order() {
        let table = asset_table(&sample_evidence());
        let users = table.find("User Data (USERS table)").unwrap();
        let api = table.find("REST API").unwrap();
        let risk = table.find("Risk Assessment Engine").unwrap();
        let auth = table.find("Authentication System").unwrap();
        assert!(users < api && api < risk && risk < auth);
    }

    #[test]
    fn stride_section_lists_unique_sorted_keywords_with_overflow() {
        let mut builder = EvidenceBuilder::new("r", "t");
        for i in 0..12 {
            builder.record_hit(hit(
                &format!("kw_{i:02}"),
                "a.rs",
                KeywordCategory::Authn,
                Priority::Low,
            ));
        }
        // Duplicate keyword in another file inflates the total, not the list.
        builder.record_hit(hit("kw_00", "b.rs", KeywordCategory::Authn, Priority::Low));
        let section = stride_analysis(&builder.freeze());
        assert!(section.contains("### Spoofing"));
        assert!(section.contains("**Indicators Found (13):**"));
        assert!(section.contains("- kw_00"));
        assert!(section.contains("- kw_09"));
        assert!(!section.contains("- kw_10\n- kw_11"), "list capped at 10");
        assert!(section.contains("- ... and 3 more"));
    }

    #[test]
    fn recommendations_follow_fixed_rule_order() {
        let mut builder = EvidenceBuilder::new("r", "t");
        builder.record_classified(crate::kb::FileBucket::OpenApi, "openapi.yaml");
        builder.record_hit(hit("jdbc", "a.rs", KeywordCategory::Database, Priority::High));
        for i in 0..6 {
            builder.record_hit(hit(
                &format!("login{i}"),
                "a.rs",
                KeywordCategory::Authn,
                Priority::Medium,
            ));
        }
        let evidence = builder.freeze();
        let secrets = SecretScanSummary {
            findings_count: 2,
            ..Default::default()
        };
        let section = recommendations(&evidence, &secrets);
        let critical = section.find("[CRITICAL] Remove 2 potential secret(s)").unwrap();
        let high = section.find("[HIGH] Review 1 high-priority code patterns").unwrap();
        let db = section.find("[HIGH] Review database connection security").unwrap();
        let auth = section
            .find("[MEDIUM] Verify authentication/authorization implementation")
            .unwrap();
        let api = section.find("[MEDIUM] Review API security controls").unwrap();
        let low = section
            .find("[LOW] Implement comprehensive audit logging")
            .unwrap();
        assert!(critical < high && high < db && db < auth && auth < api && api < low);
    }

    #[test]
    fn questions_deduplicate_and_cap_at_twenty() {
        let mut questions: Vec<String> = (0..25).map(|i| format!("Question {i:02}?")).collect();
        questions.push("Question 00?".into());
        let threat_def = ThreatDefinition {
            name: "many questions".into(),
            stride_category: StrideCategory::Tampering,
            keywords: vec!["users".into()],
            default_likelihood: "High".into(),
            default_impact: "High".into(),
            recommended_controls: Vec::new(),
            questions_to_confirm: questions.iter().map(|q| q.to_string()).collect(),
        };
        let synthesizer = ThreatSynthesizer::new(kb_with(vec![threat_def]));
        let section = synthesizer.reviewer_questions(&sample_evidence());
        assert!(section.contains("1. Question 00?"));
        assert!(section.contains("20. Question 19?"));
        assert!(!section.contains("21."));
        // 25 threat questions (deduped) + db-hint + 2 auth questions +
        // pattern-group questions, minus the 20 rendered.
        assert!(section.contains("more questions"));
    }

    #[test]
    fn evidence_summary_contains_overview_and_redacted_values() {
        let mut builder = EvidenceBuilder::new("demo", "2024-01-01");
        builder.record_classified(crate::kb::FileBucket::Config, "config/app.yaml");
        builder.record_hit(hit(
            "password",
            "config/app.yaml",
            KeywordCategory::Secret,
            Priority::High,
        ));
        builder.record_database_url("postgres://<REDACTED>@dbhost/...", "config/app.yaml");
        let summary = render_evidence_summary(&builder.freeze());
        assert!(summary.contains("# Evidence Summary: demo"));
        assert!(summary.contains("| Config Files | 1 |"));
        assert!(summary.contains("| Keyword Hits | 1 |"));
        assert!(summary.contains("postgres://<REDACTED>@dbhost/..."));
        assert!(summary.contains("## Risky Configuration Hints"));
    }
}
