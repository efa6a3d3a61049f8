/// Per-trace metric records and their column view.
use crate::trace_file::TraceFile;

pub const TEST_NAME_COLUMN: &str = "Test name";
/// Busy seconds of the replay workload; the secondary report sort key.
pub const GAME_BUSY_COLUMN: &str = "\"Game\" s";

/// A report cell value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    /// The value could not be computed (zero denominator, mixed inputs).
    NotAvailable,
}

impl MetricValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(i as f64),
            MetricValue::Float(f) => Some(f),
            MetricValue::NotAvailable => None,
        }
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(MetricValue::NotAvailable, MetricValue::Float)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(v) if v.is_nan() => write!(f, "nan"),
            MetricValue::Float(v) if v.is_infinite() => {
                write!(f, "{}", if *v > 0.0 { "inf" } else { "-inf" })
            }
            // Whole numbers keep one decimal so averages read as 11.0, not 11.
            MetricValue::Float(v) if v.fract() == 0.0 => write!(f, "{v:.1}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::NotAvailable => write!(f, "N/A"),
        }
    }
}

/// CPU share of one tracked process filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessShare {
    pub label: String,
    /// `None` when the analysis window is empty.
    pub percent: Option<f64>,
}

/// Metrics extracted from one trace. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub trace: TraceFile,
    pub game_busy_s: f64,
    pub fps: Option<f64>,
    pub replay_frames: i64,
    pub trace_rate_kb_s: Option<f64>,
    pub used_cpu_percent: Option<f64>,
    pub game_cpu_percent: Option<f64>,
    pub processes: Vec<ProcessShare>,
    pub analyzed_duration_s: f64,
    pub cpus: i64,
    pub cpu_freq_ghz: f64,
}

impl MetricRecord {
    /// Metric columns in report order, excluding the test name.
    pub fn cells(&self) -> Vec<(String, MetricValue)> {
        let mut cells = vec![
            (GAME_BUSY_COLUMN.to_string(), MetricValue::Float(self.game_busy_s)),
            ("FPS".to_string(), self.fps.into()),
            ("Replay frames".to_string(), MetricValue::Int(self.replay_frames)),
            ("Perfetto size KB/s".to_string(), self.trace_rate_kb_s.into()),
            ("Used CPU time %".to_string(), self.used_cpu_percent.into()),
            ("\"Game\" %".to_string(), self.game_cpu_percent.into()),
        ];
        for share in &self.processes {
            cells.push((format!("{} %", share.label), share.percent.into()));
        }
        cells.extend([
            (
                "Analyzed part duration s".to_string(),
                MetricValue::Float(self.analyzed_duration_s),
            ),
            ("CPUs".to_string(), MetricValue::Int(self.cpus)),
            ("CPU freq GHz".to_string(), MetricValue::Float(self.cpu_freq_ghz)),
        ]);
        cells
    }
}
