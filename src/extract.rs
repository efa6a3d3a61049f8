//! Per-trace metric extraction.
//!
//! All CPU shares and the frame rate are computed inside the replay-frame
//! window: from the first to the last marker slice emitted by the workload.
//! Setup and teardown outside that window are ignored.

use crate::config::{BenchConfig, ProcessFilter};
use crate::engine::{EngineLoader, TraceQueryEngine};
use crate::queries::{self, Window};
use crate::record::{MetricRecord, ProcessShare};
use crate::scalar::{query_f64, query_i64, QueryError};
use crate::trace_file::TraceFile;
use std::path::PathBuf;

const KHZ_PER_GHZ: f64 = 1_000_000.0;

/// What to look for in each trace.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    /// Process name of the replay workload.
    pub package: String,
    /// LIKE pattern for replay-frame marker tracks.
    pub marker_pattern: String,
    pub processes: Vec<ProcessFilter>,
    pub reference_cpu: u32,
}

impl ExtractSettings {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            package: config.workload.package.clone(),
            marker_pattern: config.workload.marker_pattern(),
            processes: config.analysis.processes.clone(),
            reference_cpu: config.analysis.reference_cpu,
        }
    }

    fn game_filter(&self) -> ProcessFilter {
        ProcessFilter {
            label: "\"Game\"".to_string(),
            name: self.package.clone(),
            prefix: false,
        }
    }
}

/// Extraction failed in a way that points at a broken query, not at the data.
#[derive(Debug)]
pub struct ExtractError {
    pub file: PathBuf,
    pub source: QueryError,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.file.display(), self.source)
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Turns one trace file into at most one record.
pub trait ExtractTrace: Send + Sync + 'static {
    /// `Ok(None)` means the file was skipped (empty or unreadable).
    fn extract(&self, trace: &TraceFile) -> Result<Option<MetricRecord>, ExtractError>;
}

/// Extractor backed by a trace-query engine.
pub struct Extractor<L> {
    loader: L,
    settings: ExtractSettings,
}

impl<L: EngineLoader> Extractor<L> {
    pub fn new(loader: L, settings: ExtractSettings) -> Self {
        Self { loader, settings }
    }

    fn metrics(
        &self,
        engine: &dyn TraceQueryEngine,
        trace: &TraceFile,
    ) -> Result<MetricRecord, QueryError> {
        let s = &self.settings;
        let window = Window {
            start_ns: query_i64(engine, &queries::marker_start(&s.marker_pattern))?,
            end_ns: query_i64(engine, &queries::marker_end(&s.marker_pattern))?,
        };
        let window_ms = query_f64(engine, &queries::marker_period_ms(&s.marker_pattern))?;
        let frames = query_i64(engine, &queries::marker_count(&s.marker_pattern))?;
        let replay_s = query_f64(engine, &queries::replay_period_ms(&s.package))? / 1000.0;

        if window_ms == 0.0 {
            tracing::warn!(
                file = %trace.path.display(),
                frames,
                "replay-frame window is empty, rates reported as N/A"
            );
        }
        if replay_s == 0.0 {
            tracing::warn!(
                file = %trace.path.display(),
                "replay duration is zero, data rate reported as N/A"
            );
        }

        let game_busy_ms = query_f64(engine, &queries::process_busy_ms(&s.game_filter(), window))?;
        let all_busy_ms = query_f64(engine, &queries::all_busy_ms(window))?;

        let mut processes = Vec::with_capacity(s.processes.len());
        for filter in &s.processes {
            let busy_ms = query_f64(engine, &queries::process_busy_ms(filter, window))?;
            processes.push(ProcessShare {
                label: filter.label.clone(),
                percent: percent_of(busy_ms, window_ms),
            });
        }

        let cpus = query_i64(engine, &queries::cpu_count(window.start_ns))?;
        let freq_khz = query_f64(
            engine,
            &queries::cpu_avg_freq(window.start_ns, s.reference_cpu),
        )?;

        Ok(MetricRecord {
            trace: trace.clone(),
            game_busy_s: round_to(game_busy_ms / 1000.0, 2),
            fps: ratio(frames as f64, window_ms / 1000.0).map(|v| round_to(v, 2)),
            replay_frames: frames,
            trace_rate_kb_s: ratio(trace.size_kb(), replay_s).map(|v| round_to(v, 1)),
            used_cpu_percent: percent_of(all_busy_ms, window_ms),
            game_cpu_percent: percent_of(game_busy_ms, window_ms),
            processes,
            analyzed_duration_s: round_to(window_ms / 1000.0, 2),
            cpus,
            cpu_freq_ghz: round_to(freq_khz / KHZ_PER_GHZ, 2),
        })
    }
}

impl<L: EngineLoader + 'static> ExtractTrace for Extractor<L> {
    fn extract(&self, trace: &TraceFile) -> Result<Option<MetricRecord>, ExtractError> {
        if trace.size == 0 {
            tracing::info!(file = %trace.path.display(), "skipped empty trace");
            return Ok(None);
        }

        let engine = match self.loader.load(&trace.path) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(error = %e, "skipped unreadable trace");
                return Ok(None);
            }
        };

        match self.metrics(engine.as_ref(), trace) {
            Ok(record) => Ok(Some(record)),
            // The engine failing mid-read means damaged pages, not a bad query.
            Err(QueryError::Engine { query, source }) => {
                tracing::warn!(
                    file = %trace.path.display(),
                    query = %query,
                    error = %source,
                    "skipped unreadable trace"
                );
                Ok(None)
            }
            Err(e) => Err(ExtractError {
                file: trace.path.clone(),
                source: e,
            }),
        }
    }
}

/// `numerator / denominator`, or `None` when the denominator is zero.
fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Share of the window in percent, rounded to two decimals.
fn percent_of(busy_ms: f64, window_ms: f64) -> Option<f64> {
    ratio(100.0 * busy_ms, window_ms).map(|v| round_to(v, 2))
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
