use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Domain signal terms whose presence in a repository name raises its scan
/// priority; each distinct term counts once.
pub const SIGNAL_KEYWORDS: &[&str] = &[
    "pvf",
    "date",
    "user",
    "oracle",
    "jdbc",
    "risk",
    "score",
    "transaction",
    "hold",
    "review",
    "deny",
    "browser",
    "agent",
    "case",
    "management",
    "popup",
    "interval",
    "10m",
    "30m",
    "auth",
    "security",
    "payment",
    "fraud",
    "compliance",
];

/// Primary languages that mark a repository as backend-shaped.
pub const BACKEND_LANGUAGES: &[&str] = &["java", "kotlin", "c#", "python", "go", "typescript"];

/// Repository metadata record as delivered by the hosting platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub primary_language: Option<PrimaryLanguage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryLanguage {
    pub name: String,
}

impl RepoMetadata {
    pub fn language_name(&self) -> Option<&str> {
        self.primary_language.as_ref().map(|lang| lang.name.as_str())
    }
}

/// Repository metadata extended with the derived priority score. The score is
/// transient output of the selector, never authoritative input.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRepo {
    #[serde(flatten)]
    pub repo: RepoMetadata,
    pub priority_score: i64,
}

/// Scores and ranks repository metadata records under a selection budget.
#[derive(Debug, Clone)]
pub struct RepoSelector {
    budget: usize,
}

impl RepoSelector {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Priority score for one repository:
    /// +10 per signal keyword found in the lowercased name, +5 for a
    /// backend-shaped primary language, +3 if private, +2 if an update
    /// timestamp is present.
    pub fn score(repo: &RepoMetadata) -> i64 {
        let name = repo.name.to_lowercase();
        let mut score = 0;
        for signal in SIGNAL_KEYWORDS {
            if name.contains(signal) {
                score += 10;
            }
        }
        let language = repo
            .language_name()
            .map(str::to_lowercase)
            .unwrap_or_default();
        if BACKEND_LANGUAGES.contains(&language.as_str()) {
            score += 5;
        }
        if repo.is_private {
            score += 3;
        }
        if repo.updated_at.is_some() {
            score += 2;
        }
        score
    }

    /// Score every repository, sort descending (stable: ties preserve input
    /// order for reproducibility) and truncate to the budget.
    pub fn select(&self, repos: &[RepoMetadata]) -> Vec<ScoredRepo> {
        let mut scored: Vec<ScoredRepo> = repos
            .iter()
            .cloned()
            .map(|repo| ScoredRepo {
                priority_score: Self::score(&repo),
                repo,
            })
            .collect();
        scored.sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
        scored.truncate(self.budget);
        debug!(
            selected = scored.len(),
            total = repos.len(),
            budget = self.budget,
            "repository selection complete"
        );
        scored
    }

    /// Names of repositories not selected, in input order.
    pub fn skipped(all: &[RepoMetadata], selected: &[ScoredRepo]) -> Vec<String> {
        let chosen: HashSet<&str> = selected.iter().map(|s| s.repo.name.as_str()).collect();
        all.iter()
            .filter(|repo| !chosen.contains(repo.name.as_str()))
            .map(|repo| repo.name.clone())
            .collect()
    }
}
