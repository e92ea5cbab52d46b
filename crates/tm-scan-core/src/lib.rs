pub mod evidence;
pub mod kb;
pub mod report;
pub mod scanner;
pub mod selector;
pub mod summaries;

pub use evidence::{
    AuthHint, DbHint, Evidence, EvidenceBuilder, KeywordHit, RiskyConfigHint, RiskyConfigKind,
};
pub use kb::{
    file_repository::FileKnowledgeRepository, FileBucket, FilePatternSet, KeywordCategory,
    KeywordRule, KnowledgeBase, Priority, RuleValidationError, StrideCategory, ThreatDefinition,
};
pub use report::{
    render_evidence_summary, risk_level, ReportError, RiskLevel, RunMetadata, ThreatSynthesizer,
};
pub use scanner::{EvidenceScanner, EXCLUDED_DIRS, MAX_CONTENT_BYTES};
pub use selector::{PrimaryLanguage, RepoMetadata, RepoSelector, ScoredRepo};
pub use summaries::{RuleFindings, SbomSummary, SecretScanSummary};
