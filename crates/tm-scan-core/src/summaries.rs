use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Redacted summary of an external secret-scanning run. Never contains raw
/// matched secret text. An absent summary is represented by `Default`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretScanSummary {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub findings_count: usize,
    #[serde(default)]
    pub findings_by_rule: BTreeMap<String, RuleFindings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFindings {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Summary of an external software-bill-of-materials run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SbomSummary {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub package_count: usize,
    #[serde(default)]
    pub packages_by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub packages_by_language: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_summaries_deserialize_with_defaults() {
        let secrets: SecretScanSummary =
            serde_json::from_str(r#"{"status": "completed", "findings_count": 2}"#).unwrap();
        assert_eq!(secrets.findings_count, 2);
        assert!(secrets.findings_by_rule.is_empty());

        let sbom: SbomSummary = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(sbom.package_count, 0);

        let absent = SecretScanSummary::default();
        assert_eq!(absent.findings_count, 0);
    }
}
