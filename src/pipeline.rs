use crate::analyzer::Analyzer;
use crate::index::IndexBuilder;
use crate::runtime::config::PipelineConfig;
use crate::runtime::logging::{log_event, log_skip, LogLevel};
use crate::types::{FormRecord, IndexDocument, SkipReason};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

pub const INDEX_FILE_NAME: &str = "_index.json";

type Outcome = Result<FormRecord, SkipReason>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub forms_written: usize,
    /// Skipped file counts keyed by reason code.
    pub skipped: BTreeMap<String, usize>,
    /// Form ids produced by more than one file; the later file won.
    pub duplicates: Vec<String>,
    /// Files whose analysis panicked; counted under `task_failed`.
    pub failed_files: Vec<PathBuf>,
}

pub async fn run(config: &PipelineConfig) -> Result<IndexDocument, String> {
    run_with_summary(config).await.map(|(index, _)| index)
}

pub async fn run_with_summary(
    config: &PipelineConfig,
) -> Result<(IndexDocument, RunSummary), String> {
    let analyzer = Arc::new(Analyzer::new(config.fallback_year));
    run_with_analyzer(config, analyzer).await
}

pub async fn run_with_analyzer(
    config: &PipelineConfig,
    analyzer: Arc<Analyzer>,
) -> Result<(IndexDocument, RunSummary), String> {
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|e| {
            format!(
                "Failed to create output directory {}: {e}",
                config.output_dir.display()
            )
        })?;

    let discovery_config = config.clone();
    let files = tokio::task::spawn_blocking(move || discover_form_files(&discovery_config))
        .await
        .map_err(|e| format!("Discovery task failed: {e}"))?;

    log_event(
        LogLevel::Info,
        &format!("Found {} IRS XSL files", files.len()),
        Some(json!({
            "root": config.root_dir.display().to_string(),
            "tax_year": config.target_year,
        })),
    );

    let outcomes = analyze_all(&files, analyzer, config.workers).await?;

    let mut summary = RunSummary {
        files_discovered: files.len(),
        ..RunSummary::default()
    };
    let mut builder = IndexBuilder::new();
    let mut written_from: HashMap<String, PathBuf> = HashMap::new();

    for (path, outcome) in files.iter().zip(outcomes) {
        let record = match outcome {
            Some(Ok(record)) => record,
            Some(Err(reason)) => {
                log_skip(path, &reason);
                *summary.skipped.entry(reason.as_str().to_string()).or_default() += 1;
                continue;
            }
            None => {
                *summary.skipped.entry("task_failed".to_string()).or_default() += 1;
                summary.failed_files.push(path.clone());
                continue;
            }
        };

        let written = write_form_record(&config.output_dir, &record).await?;
        if builder.record(&record).is_some() {
            let earlier = written_from
                .get(&record.form_id)
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            log_event(
                LogLevel::Warn,
                "duplicate form id, later file overwrites earlier",
                Some(json!({
                    "form_id": record.form_id,
                    "earlier": earlier,
                    "later": path.display().to_string(),
                })),
            );
            summary.duplicates.push(record.form_id.clone());
        }
        log_event(
            LogLevel::Debug,
            "wrote form",
            Some(json!({
                "form_id": record.form_id,
                "field_count": record.fields.len(),
                "file": written.display().to_string(),
            })),
        );
        written_from.insert(record.form_id.clone(), path.clone());
        summary.forms_written += 1;
    }

    let index = builder.build(config.target_year);
    let index_path = config.output_dir.join(INDEX_FILE_NAME);
    write_json(&index_path, &index).await?;

    log_event(
        LogLevel::Info,
        &format!(
            "Wrote {} form JSONs to {}",
            summary.forms_written,
            config.output_dir.display()
        ),
        Some(json!({ "index": index_path.display().to_string(), "form_count": index.form_count })),
    );

    Ok((index, summary))
}

/// Candidate stylesheets under the root, sorted by path.
pub fn discover_form_files(config: &PipelineConfig) -> Vec<PathBuf> {
    let year = config.target_year.to_string();
    let mut files: Vec<PathBuf> = WalkDir::new(&config.root_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| config.is_form_file_name(name))
        })
        .map(|entry| entry.into_path())
        .filter(|path| in_year_directory(path, &config.root_dir, &year))
        .collect();
    files.sort();
    files
}

fn in_year_directory(path: &Path, root: &Path, year: &str) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .parent()
        .map(|dir| {
            dir.components()
                .any(|c| matches!(c, Component::Normal(part) if part.to_str() == Some(year)))
        })
        .unwrap_or(false)
}

/// Analyzes every file on a bounded pool. The result at position `i` belongs to `files[i]`;
/// `None` marks a file whose analysis panicked or whose task was cancelled.
async fn analyze_all(
    files: &[PathBuf],
    analyzer: Arc<Analyzer>,
    workers: usize,
) -> Result<Vec<Option<Outcome>>, String> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, path) in files.iter().cloned().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| format!("Worker pool closed: {e}"))?;
        let analyzer = analyzer.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze_file(&path)));
            (idx, outcome.ok())
        });
    }

    let mut outcomes: Vec<Option<Outcome>> = (0..files.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Some(outcome))) => outcomes[idx] = Some(outcome),
            Ok((idx, None)) => log_event(
                LogLevel::Error,
                "analysis panicked",
                Some(json!({ "path": files[idx].display().to_string() })),
            ),
            Err(err) => log_event(
                LogLevel::Error,
                "analysis task failed",
                Some(json!({ "error": err.to_string() })),
            ),
        }
    }
    Ok(outcomes)
}

pub async fn write_form_record(output_dir: &Path, record: &FormRecord) -> Result<PathBuf, String> {
    let path = output_dir.join(record.file_name());
    write_json(&path, record).await?;
    Ok(path)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {}: {e}", path.display()))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| format!("Failed to write {}: {e}", path.display()))
}
