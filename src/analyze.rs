use crate::batch::{self, BatchError};
use crate::config::BenchConfig;
use crate::engine::SqliteLoader;
use crate::extract::{ExtractSettings, ExtractTrace, Extractor};
use crate::report::{group_records, ReportError, ReportTable};
use std::path::PathBuf;
use std::sync::Arc;

/// What one analysis pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeSummary {
    pub discovered: usize,
    pub records: usize,
    pub skipped: usize,
    pub groups: usize,
    /// Data rows written, average rows included.
    pub rows: usize,
    pub output: PathBuf,
}

#[derive(Debug)]
pub enum AnalyzeError {
    Batch(BatchError),
    Report(ReportError),
}

impl std::fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyzeError::Batch(e) => write!(f, "analysis failed: {e}"),
            AnalyzeError::Report(e) => write!(f, "report failed: {e}"),
        }
    }
}

impl std::error::Error for AnalyzeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalyzeError::Batch(e) => Some(e),
            AnalyzeError::Report(e) => Some(e),
        }
    }
}

impl From<BatchError> for AnalyzeError {
    fn from(e: BatchError) -> Self {
        AnalyzeError::Batch(e)
    }
}

impl From<ReportError> for AnalyzeError {
    fn from(e: ReportError) -> Self {
        AnalyzeError::Report(e)
    }
}

/// Analyze with the SQLite engine configured in `config.engine`.
pub async fn run(config: &BenchConfig) -> Result<AnalyzeSummary, AnalyzeError> {
    let extractor = Extractor::new(
        SqliteLoader::new(config.engine.exporter.clone()),
        ExtractSettings::from_config(config),
    );
    analyze(Arc::new(extractor), config).await
}

/// Discover traces, extract them concurrently and write the CSV report.
pub async fn analyze<E: ExtractTrace>(
    extractor: Arc<E>,
    config: &BenchConfig,
) -> Result<AnalyzeSummary, AnalyzeError> {
    let analysis = &config.analysis;
    let traces = batch::discover(&analysis.results_dir, &analysis.pattern)?;
    let discovered = traces.len();
    if discovered == 0 {
        tracing::warn!(
            dir = %analysis.results_dir.display(),
            pattern = %analysis.pattern,
            "no trace files found"
        );
    }

    let outcome = batch::run_batch(
        extractor,
        traces,
        analysis.max_workers,
        analysis.failure_policy,
    )
    .await?;

    let groups = group_records(&outcome.records);
    let table = ReportTable::build(&groups, config.report.sort_rows);
    table.write(&config.report.output)?;
    tracing::info!(
        "wrote {} rows to {}",
        table.rows.len(),
        config.report.output.display()
    );

    Ok(AnalyzeSummary {
        discovered,
        records: outcome.records.len(),
        skipped: outcome.skipped,
        groups: groups.len(),
        rows: table.rows.len(),
        output: config.report.output.clone(),
    })
}
