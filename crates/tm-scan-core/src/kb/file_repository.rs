use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::warn;

use super::{FilePatternSet, KeywordCategory, KeywordRule, KnowledgeBase, Priority, ThreatDefinition};

/// Loads the knowledge base from YAML documents (`kb-keywords.yaml` and
/// `kb-threats.yaml`) located under a base directory.
///
/// A missing or malformed source yields the corresponding empty rule set and a
/// warning; scanning and reporting continue with reduced signal, never abort.
pub struct FileKnowledgeRepository {
    base_path: PathBuf,
    cache: OnceCell<Arc<KnowledgeBase>>,
}

impl FileKnowledgeRepository {
    /// Create a repository rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    fn keywords_path(&self) -> PathBuf {
        self.base_path.join("kb-keywords.yaml")
    }

    fn threats_path(&self) -> PathBuf {
        self.base_path.join("kb-threats.yaml")
    }

    /// Load (once) and return the shared knowledge base.
    pub fn load(&self) -> Arc<KnowledgeBase> {
        Arc::clone(self.cache.get_or_init(|| {
            let (rules, patterns) = match self.try_load_keywords() {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not load keyword knowledge base");
                    (Vec::new(), FilePatternSet::default())
                }
            };
            let threats = match self.try_load_threats() {
                Ok(threats) => threats,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not load threat knowledge base");
                    Vec::new()
                }
            };
            Arc::new(KnowledgeBase::new(rules, patterns, threats))
        }))
    }

    fn try_load_keywords(&self) -> Result<(Vec<KeywordRule>, FilePatternSet)> {
        let path = self.keywords_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read keyword knowledge base at {}", path.display()))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in keyword knowledge base at {}", path.display()))?;
        let mapping = doc
            .as_mapping()
            .with_context(|| format!("keyword knowledge base at {} is not a mapping", path.display()))?;

        let mut rules = Vec::new();
        let mut patterns = FilePatternSet::default();
        for (key, value) in mapping {
            let Some(group) = key.as_str() else { continue };
            if group == "file_patterns" {
                match serde_yaml::from_value::<RawFilePatterns>(value.clone()) {
                    Ok(raw) => {
                        patterns = FilePatternSet::new(&raw.openapi, &raw.db_migration, &raw.config);
                    }
                    Err(err) => warn!(%err, "skipping malformed file_patterns group"),
                }
                continue;
            }
            // Non-list groups are ignored, matching the tolerant load policy.
            let Ok(entries) = serde_yaml::from_value::<Vec<RawKeywordEntry>>(value.clone()) else {
                warn!(%group, "skipping non-list keyword group");
                continue;
            };
            let group_category = category_from_name(group);
            for entry in entries {
                if entry.keyword.trim().is_empty() {
                    continue;
                }
                rules.push(KeywordRule {
                    keyword: entry.keyword.to_lowercase(),
                    category: entry.category.unwrap_or(group_category),
                    priority: entry.priority.unwrap_or_default(),
                    description: entry.description,
                });
            }
        }
        Ok((rules, patterns))
    }

    fn try_load_threats(&self) -> Result<Vec<ThreatDefinition>> {
        let path = self.threats_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read threat knowledge base at {}", path.display()))?;
        // `assets` and `sensitivity_levels` are inert metadata and stay unparsed.
        let doc: RawThreatDoc = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in threat knowledge base at {}", path.display()))?;
        Ok(doc
            .threats
            .into_iter()
            .filter(|threat| {
                if threat.name.trim().is_empty() {
                    warn!("skipping threat definition with blank name");
                    return false;
                }
                true
            })
            .collect())
    }
}

fn category_from_name(name: &str) -> KeywordCategory {
    serde_yaml::from_str(name).unwrap_or(KeywordCategory::Other)
}

#[derive(Deserialize)]
struct RawKeywordEntry {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    category: Option<KeywordCategory>,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Default)]
struct RawFilePatterns {
    #[serde(default)]
    openapi: Vec<String>,
    #[serde(default)]
    db_migration: Vec<String>,
    #[serde(default)]
    config: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawThreatDoc {
    #[serde(default)]
    threats: Vec<ThreatDefinition>,
}
