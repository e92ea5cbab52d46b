use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::de::DeserializeOwned;
use tm_scan_core::{
    render_evidence_summary, EvidenceScanner, FileKnowledgeRepository, RepoMetadata, RepoSelector,
    RunMetadata, SbomSummary, SecretScanSummary, ThreatSynthesizer,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tm-scan",
    author,
    version,
    about = "Knowledge-base-driven threat model scanner"
)]
struct Cli {
    /// Directory containing the knowledge base (kb-keywords.yaml, kb-threats.yaml)
    #[arg(
        long = "kb-dir",
        value_name = "DIR",
        default_value = "./kb",
        global = true
    )]
    kb_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a repository tree and write evidence artifacts
    Scan {
        /// Root of the repository working tree to scan
        #[arg(long, value_name = "DIR")]
        repo_root: PathBuf,
        /// Repository name; defaults to the root directory's name
        #[arg(long, value_name = "NAME")]
        repo_name: Option<String>,
        /// Output directory for artifacts
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
        /// JSON summary produced by an external secret scanner
        #[arg(long, value_name = "FILE")]
        secrets_summary: Option<PathBuf>,
        /// JSON summary produced by an external SBOM tool
        #[arg(long, value_name = "FILE")]
        sbom_summary: Option<PathBuf>,
        /// Also render the Markdown threat model report
        #[arg(long)]
        report: bool,
        /// Organization name stamped into the report header
        #[arg(long, value_name = "ORG", default_value = "unknown")]
        org: String,
        /// Scan mode recorded in the report metadata
        #[arg(long, value_name = "MODE", default_value = "quick")]
        mode: String,
        /// Recency window recorded in the report metadata
        #[arg(long, value_name = "DAYS", default_value_t = 30)]
        since_days: u32,
        /// Clone depth recorded in the report metadata
        #[arg(long, value_name = "N", default_value_t = 1)]
        depth: u32,
    },
    /// Score and select repositories for scanning
    Select {
        /// JSON file with repository metadata from the hosting platform
        #[arg(long, value_name = "FILE")]
        repos_file: PathBuf,
        /// Maximum number of repositories to select
        #[arg(long, default_value_t = 50)]
        budget: usize,
        /// Optional directory for selected-repos.txt / skipped-repos.txt
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// List all loaded keyword rules
    ListRules {
        /// Emit rules as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            repo_root,
            repo_name,
            out,
            secrets_summary,
            sbom_summary,
            report,
            org,
            mode,
            since_days,
            depth,
        } => scan(ScanArgs {
            kb_dir: cli.kb_dir,
            repo_root,
            repo_name,
            out,
            secrets_summary,
            sbom_summary,
            report,
            org,
            mode,
            since_days,
            depth,
        }),
        Commands::Select {
            repos_file,
            budget,
            out,
        } => select(&repos_file, budget, out.as_deref()),
        Commands::ListRules { json } => list_rules(&cli.kb_dir, json),
    }
}

struct ScanArgs {
    kb_dir: PathBuf,
    repo_root: PathBuf,
    repo_name: Option<String>,
    out: PathBuf,
    secrets_summary: Option<PathBuf>,
    sbom_summary: Option<PathBuf>,
    report: bool,
    org: String,
    mode: String,
    since_days: u32,
    depth: u32,
}

fn scan(args: ScanArgs) -> Result<()> {
    let repo_name = match args.repo_name {
        Some(name) => name,
        None => args
            .repo_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("--repo-name required when the repo root has no directory name")?,
    };
    let now = Local::now();
    let run_timestamp = now.format("%Y-%m-%d").to_string();
    let run_id = now.format("%Y%m%d_%H%M%S").to_string();

    let kb = FileKnowledgeRepository::new(&args.kb_dir).load();
    if kb.keyword_rule_count() == 0 {
        eprintln!(
            "{}",
            "warning: keyword knowledge base is empty; scanning with reduced signal".yellow()
        );
    }
    let scanner = EvidenceScanner::new(kb.clone());
    let evidence = scanner.scan(&repo_name, &args.repo_root, &run_timestamp);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output directory {}", args.out.display()))?;
    let evidence_path = args.out.join("evidence.json");
    fs::write(
        &evidence_path,
        serde_json::to_string_pretty(&evidence).context("failed to serialize evidence")?,
    )
    .with_context(|| format!("failed to write {}", evidence_path.display()))?;

    let summary_path = args.out.join("evidence-summary.md");
    fs::write(&summary_path, render_evidence_summary(&evidence))
        .with_context(|| format!("failed to write {}", summary_path.display()))?;

    if args.report {
        let secrets: SecretScanSummary = read_json_or_default(args.secrets_summary.as_deref())?;
        let sbom: SbomSummary = read_json_or_default(args.sbom_summary.as_deref())?;
        let run = RunMetadata {
            org: args.org,
            mode: args.mode,
            since_days: args.since_days,
            depth: args.depth,
            run_timestamp,
            run_id,
        };
        let synthesizer = ThreatSynthesizer::new(kb);
        let report = synthesizer.render_threat_model(&evidence, &secrets, &sbom, &run)?;
        let report_path = args.out.join("threatmodel-report.md");
        fs::write(&report_path, report)
            .with_context(|| format!("failed to write {}", report_path.display()))?;
    }

    println!(
        "Scanned {repo}: {hits} keyword hit(s), {config} config file(s), {risky} risky config hint(s) -> {out}",
        repo = repo_name,
        hits = evidence.keyword_hits.len(),
        config = evidence.config_files.len(),
        risky = evidence.risky_config_hints.len(),
        out = args.out.display()
    );
    Ok(())
}

fn select(repos_file: &Path, budget: usize, out: Option<&Path>) -> Result<()> {
    let raw = fs::read_to_string(repos_file)
        .with_context(|| format!("failed to read repository list at {}", repos_file.display()))?;
    let repos: Vec<RepoMetadata> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid repository metadata in {}", repos_file.display()))?;

    let selector = RepoSelector::new(budget);
    let selected = selector.select(&repos);
    let skipped = RepoSelector::skipped(&repos, &selected);

    let rule = "=".repeat(60);
    println!("{rule}");
    println!(
        "{}",
        format!("Selected {} repositories for scanning", selected.len()).bold()
    );
    println!("{rule}");
    for (idx, scored) in selected.iter().enumerate() {
        let language = scored.repo.language_name().unwrap_or("Unknown");
        let updated = scored
            .repo
            .updated_at
            .as_deref()
            .map(|ts| ts.chars().take(10).collect::<String>())
            .unwrap_or_else(|| "Unknown".to_string());
        println!(
            "{idx:3}. {name:30} [Score: {score:3}] Lang: {language:15} Updated: {updated}",
            idx = idx + 1,
            name = scored.repo.name,
            score = scored.priority_score,
        );
    }
    println!("{rule}");

    if let Some(out) = out {
        fs::create_dir_all(out)
            .with_context(|| format!("failed to create output directory {}", out.display()))?;
        let selected_lines: String = selected
            .iter()
            .map(|scored| format!("{} (score: {})\n", scored.repo.name, scored.priority_score))
            .collect();
        let selected_path = out.join("selected-repos.txt");
        fs::write(&selected_path, selected_lines)
            .with_context(|| format!("failed to write {}", selected_path.display()))?;
        let skipped_path = out.join("skipped-repos.txt");
        let mut skipped_lines = skipped.join("\n");
        if !skipped_lines.is_empty() {
            skipped_lines.push('\n');
        }
        fs::write(&skipped_path, skipped_lines)
            .with_context(|| format!("failed to write {}", skipped_path.display()))?;
    }
    Ok(())
}

fn list_rules(kb_dir: &Path, json: bool) -> Result<()> {
    let kb = FileKnowledgeRepository::new(kb_dir).load();
    let rules: Vec<_> = kb.keyword_rules().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    println!("{} rule(s) loaded from {}", rules.len(), kb_dir.display());
    for rule in rules {
        println!(
            "- {keyword:<20} [{category:13}] priority {priority:6} :: {description}",
            keyword = rule.keyword,
            category = rule.category.as_str(),
            priority = rule.priority.as_str(),
            description = rule.description
        );
    }
    Ok(())
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read summary at {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid summary JSON in {}", path.display()))
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
