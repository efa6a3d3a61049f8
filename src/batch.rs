//! Concurrent extraction over a directory of traces.
//!
//! Each file is extracted on a blocking worker; at most `max_workers` run at
//! once. Results come back to the orchestrating task in completion order and
//! are slotted by discovery position, so downstream grouping never depends on
//! scheduling.

use crate::config::FailurePolicy;
use crate::extract::{ExtractError, ExtractTrace};
use crate::record::MetricRecord;
use crate::trace_file::TraceFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Errors that stop a batch.
#[derive(Debug)]
pub enum BatchError {
    /// The discovery glob itself is invalid.
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    /// A catalog query misbehaved for this file.
    Extract(ExtractError),
    /// The worker extracting this file panicked.
    Panicked { file: PathBuf, message: String },
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::Pattern { pattern, source } => {
                write!(f, "invalid trace pattern {pattern}: {source}")
            }
            BatchError::Extract(e) => write!(f, "extraction failed for {e}"),
            BatchError::Panicked { file, message } => {
                write!(f, "worker panicked on {}: {message}", file.display())
            }
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BatchError::Pattern { source, .. } => Some(source),
            BatchError::Extract(e) => Some(e),
            BatchError::Panicked { .. } => None,
        }
    }
}

/// Result of a completed batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records in discovery order.
    pub records: Vec<MetricRecord>,
    pub skipped: usize,
}

/// List trace files matching `pattern` under `dir`, sorted by path.
///
/// Files that cannot be inspected or whose names lack an attempt suffix are
/// logged and left out.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<TraceFile>, BatchError> {
    // Only the pattern part may carry wildcards.
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let full = Path::new(&escaped)
        .join(pattern)
        .to_string_lossy()
        .into_owned();
    let paths = glob::glob(&full).map_err(|e| BatchError::Pattern {
        pattern: full.clone(),
        source: e,
    })?;

    let mut found: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable path during discovery");
                None
            }
        })
        .filter(|p| p.is_file())
        .collect();
    found.sort();

    let mut traces = Vec::with_capacity(found.len());
    for path in found {
        match TraceFile::from_path(&path) {
            Ok(trace) => traces.push(trace),
            Err(e) => tracing::warn!(error = %e, "ignoring trace file"),
        }
    }
    tracing::info!(dir = %dir.display(), pattern, count = traces.len(), "discovered traces");
    Ok(traces)
}

enum TaskOutcome {
    Done(Result<Option<MetricRecord>, ExtractError>),
    Panicked(String),
    /// Never started because the batch was aborted.
    Cancelled,
}

/// Extract every trace with a bounded pool of blocking workers.
pub async fn run_batch<E: ExtractTrace>(
    extractor: Arc<E>,
    traces: Vec<TraceFile>,
    max_workers: usize,
    policy: FailurePolicy,
) -> Result<BatchOutcome, BatchError> {
    let total = traces.len();
    let names: Vec<(PathBuf, u32)> = traces
        .iter()
        .map(|t| (t.path.clone(), t.attempt))
        .collect();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for (index, trace) in traces.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let extractor = Arc::clone(&extractor);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, TaskOutcome::Cancelled);
            };
            let joined = tokio::task::spawn_blocking(move || extractor.extract(&trace)).await;
            let outcome = match joined {
                Ok(result) => TaskOutcome::Done(result),
                Err(e) => TaskOutcome::Panicked(e.to_string()),
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<MetricRecord>> = (0..total).map(|_| None).collect();
    let mut failures: Vec<(usize, BatchError)> = Vec::new();
    let mut completed = 0usize;
    let mut skipped = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = match joined {
            Ok(v) => v,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                // The wrapper task itself does no fallible work.
                tracing::error!(error = %e, "batch task failed");
                continue;
            }
        };
        let (file, attempt) = &names[index];

        let failure = match outcome {
            TaskOutcome::Cancelled => continue,
            TaskOutcome::Done(Ok(Some(record))) => {
                slots[index] = Some(record);
                None
            }
            TaskOutcome::Done(Ok(None)) => {
                skipped += 1;
                None
            }
            TaskOutcome::Done(Err(e)) => Some(BatchError::Extract(e)),
            TaskOutcome::Panicked(message) => Some(BatchError::Panicked {
                file: file.clone(),
                message,
            }),
        };

        completed += 1;
        tracing::info!(
            file = %file.display(),
            attempt = *attempt,
            completed,
            total,
            "processed trace"
        );

        if let Some(err) = failure {
            tracing::error!(error = %err, "trace extraction failed");
            if policy == FailurePolicy::FailFast {
                semaphore.close();
                tasks.abort_all();
                return Err(err);
            }
            failures.push((index, err));
        }
    }

    if !failures.is_empty() {
        let count = failures.len();
        failures.sort_by_key(|(index, _)| *index);
        tracing::error!(failed = count, total, "batch finished with failures");
        if let Some((_, first)) = failures.into_iter().next() {
            return Err(first);
        }
    }

    let records: Vec<MetricRecord> = slots.into_iter().flatten().collect();
    tracing::info!(records = records.len(), skipped, total, "batch complete");
    Ok(BatchOutcome { records, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::QueryError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fake extractor driven by the file name: `skip`, `bad` and `panic`
    /// stems behave accordingly, everything else yields a record.
    struct ByName {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ByName {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl ExtractTrace for ByName {
        fn extract(&self, trace: &TraceFile) -> Result<Option<MetricRecord>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if trace.base_name.starts_with("skip") {
                return Ok(None);
            }
            if trace.base_name.starts_with("bad") {
                return Err(ExtractError {
                    file: trace.path.clone(),
                    source: QueryError::AmbiguousResult {
                        query: "fake",
                        rows: 2,
                        columns: 1,
                    },
                });
            }
            if trace.base_name.starts_with("panic") {
                panic!("boom");
            }
            Ok(Some(record_for(trace)))
        }
    }

    fn record_for(trace: &TraceFile) -> MetricRecord {
        MetricRecord {
            trace: trace.clone(),
            game_busy_s: trace.attempt as f64,
            fps: Some(60.0),
            replay_frames: 600,
            trace_rate_kb_s: Some(100.0),
            used_cpu_percent: Some(50.0),
            game_cpu_percent: Some(25.0),
            processes: Vec::new(),
            analyzed_duration_s: 10.0,
            cpus: 8,
            cpu_freq_ghz: 2.0,
        }
    }

    fn traces(names: &[&str]) -> Vec<TraceFile> {
        names
            .iter()
            .map(|n| TraceFile::with_size(Path::new(n), 10).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_records_in_discovery_order() {
        let ex = Arc::new(ByName::new(Duration::from_millis(5)));
        let input = traces(&["b~c_1.p", "a~c_1.p", "b~c_2.p", "a~c_2.p"]);
        let out = run_batch(ex, input, 4, FailurePolicy::CompleteAll)
            .await
            .unwrap();
        let names: Vec<&str> = out.records.iter().map(|r| r.trace.test_name.as_str()).collect();
        assert_eq!(names, vec!["b~c_1", "a~c_1", "b~c_2", "a~c_2"]);
        assert_eq!(out.skipped, 0);
    }

    #[tokio::test]
    async fn test_skips_contribute_nothing() {
        let ex = Arc::new(ByName::new(Duration::ZERO));
        let input = traces(&["a~c_1.p", "skip~c_1.p", "a~c_2.p"]);
        let out = run_batch(ex, input, 2, FailurePolicy::CompleteAll)
            .await
            .unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.skipped, 1);
    }

    #[tokio::test]
    async fn test_pool_is_bounded() {
        let ex = Arc::new(ByName::new(Duration::from_millis(20)));
        let names: Vec<String> = (1..=12).map(|i| format!("a~c_{i}.p")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let out = run_batch(Arc::clone(&ex), traces(&refs), 3, FailurePolicy::CompleteAll)
            .await
            .unwrap();
        assert_eq!(out.records.len(), 12);
        assert!(ex.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_complete_all_attempts_every_file() {
        let ex = Arc::new(ByName::new(Duration::ZERO));
        let input = traces(&["a~c_1.p", "bad~c_1.p", "a~c_2.p", "bad~c_2.p", "a~c_3.p"]);
        let err = run_batch(Arc::clone(&ex), input, 1, FailurePolicy::CompleteAll)
            .await
            .unwrap_err();
        assert_eq!(ex.calls.load(Ordering::SeqCst), 5);
        // The first failure in discovery order is reported.
        match err {
            BatchError::Extract(e) => assert_eq!(e.file, PathBuf::from("bad~c_1.p")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fail_fast_stops_early() {
        let ex = Arc::new(ByName::new(Duration::from_millis(5)));
        let mut names = vec!["bad~c_1.p".to_string()];
        names.extend((1..=20).map(|i| format!("a~c_{i}.p")));
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let err = run_batch(Arc::clone(&ex), traces(&refs), 1, FailurePolicy::FailFast)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Extract(_)));
        assert!(ex.calls.load(Ordering::SeqCst) < 21);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_and_reported() {
        let ex = Arc::new(ByName::new(Duration::ZERO));
        let input = traces(&["a~c_1.p", "panic~c_1.p", "a~c_2.p"]);
        let err = run_batch(Arc::clone(&ex), input, 2, FailurePolicy::CompleteAll)
            .await
            .unwrap_err();
        assert_eq!(ex.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, BatchError::Panicked { .. }));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let ex = Arc::new(ByName::new(Duration::ZERO));
        let out = run_batch(ex, Vec::new(), 64, FailurePolicy::CompleteAll)
            .await
            .unwrap();
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b~c_1.perfetto", "a~c_2.perfetto", "a~c_1.perfetto", "noattempt.perfetto"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(dir.path().join("a~c_3.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("d~c_1.perfetto")).unwrap();

        let found = discover(dir.path(), "*.perfetto").unwrap();
        let names: Vec<&str> = found.iter().map(|t| t.test_name.as_str()).collect();
        assert_eq!(names, vec!["a~c_1", "a~c_2", "b~c_1"]);
    }

    #[test]
    fn test_discover_dir_with_glob_characters() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run[1]");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("a~c_1.perfetto"), b"x").unwrap();
        // `run[1]` read as a pattern would match this directory instead.
        let sibling = root.path().join("run1");
        std::fs::create_dir(&sibling).unwrap();
        std::fs::write(sibling.join("b~c_1.perfetto"), b"x").unwrap();

        let found = discover(&dir, "*.perfetto").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].test_name, "a~c_1");
        assert_eq!(found[0].path, dir.join("a~c_1.perfetto"));
    }

    #[test]
    fn test_discover_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(dir.path(), "[*.perfetto").unwrap_err();
        assert!(matches!(err, BatchError::Pattern { .. }));
    }
}
