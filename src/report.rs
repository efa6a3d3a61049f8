//! Grouping, averaging and CSV output.
//!
//! Records are grouped by base name in order of first appearance. Each group
//! contributes an average row followed by its attempt rows; the table is then
//! stably sorted by scenario (test name up to the first `~`) and busy seconds.

use crate::extract::round_to;
use crate::record::{MetricRecord, MetricValue, GAME_BUSY_COLUMN, TEST_NAME_COLUMN};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const SCENARIO_SEPARATOR: char = '~';

/// One report line: a test name plus ordered metric cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub test_name: String,
    pub cells: Vec<(String, MetricValue)>,
}

impl ReportRow {
    pub fn from_record(record: &MetricRecord) -> Self {
        Self {
            test_name: record.trace.test_name.clone(),
            cells: record.cells(),
        }
    }

    pub fn get(&self, column: &str) -> Option<MetricValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| *v)
    }

    fn scenario(&self) -> &str {
        self.test_name
            .split(SCENARIO_SEPARATOR)
            .next()
            .unwrap_or(&self.test_name)
    }

    /// Busy seconds for sorting; unavailable values sort last.
    fn busy_key(&self) -> f64 {
        self.get(GAME_BUSY_COLUMN)
            .and_then(MetricValue::as_f64)
            .unwrap_or(f64::INFINITY)
    }
}

/// All attempts of one logical test and their average.
#[derive(Debug, Clone, PartialEq)]
pub struct TestGroup {
    pub base_name: String,
    pub attempts: Vec<ReportRow>,
    pub average: ReportRow,
}

/// Group records by base name, keeping first-appearance order.
pub fn group_records(records: &[MetricRecord]) -> Vec<TestGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut attempts: HashMap<String, Vec<ReportRow>> = HashMap::new();

    for record in records {
        let base = &record.trace.base_name;
        if !attempts.contains_key(base) {
            order.push(base.clone());
        }
        attempts
            .entry(base.clone())
            .or_default()
            .push(ReportRow::from_record(record));
    }

    order
        .into_iter()
        .filter_map(|base_name| {
            let rows = attempts.remove(&base_name)?;
            let average = average_row(&base_name, &rows);
            Some(TestGroup {
                base_name,
                attempts: rows,
                average,
            })
        })
        .collect()
}

/// Mean of every column of the first row, rounded to one decimal.
///
/// A column missing from some row, or unavailable in any row, averages to
/// `N/A` without affecting the other columns.
pub fn average_row(base_name: &str, rows: &[ReportRow]) -> ReportRow {
    let Some(first) = rows.first() else {
        return ReportRow {
            test_name: base_name.to_string(),
            cells: Vec::new(),
        };
    };

    let cells = first
        .cells
        .iter()
        .map(|(column, _)| {
            let values: Option<Vec<f64>> = rows
                .iter()
                .map(|row| row.get(column).and_then(MetricValue::as_f64))
                .collect();
            let value = match values {
                Some(values) => {
                    let mean = values.iter().sum::<f64>() / values.len() as f64;
                    MetricValue::Float(round_to(mean, 1))
                }
                None => {
                    tracing::debug!(base_name, column = %column, "column not averageable");
                    MetricValue::NotAvailable
                }
            };
            (column.clone(), value)
        })
        .collect();

    ReportRow {
        test_name: base_name.to_string(),
        cells,
    }
}

/// The final ordered report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    /// Lay out groups as average-then-attempts and optionally sort.
    pub fn build(groups: &[TestGroup], sort_rows: bool) -> Self {
        let mut rows = Vec::new();
        for group in groups {
            rows.push(group.average.clone());
            rows.extend(group.attempts.iter().cloned());
        }
        if sort_rows {
            sort_rows_by_scenario(&mut rows);
        }

        let mut columns = vec![TEST_NAME_COLUMN.to_string()];
        for row in &rows {
            for (name, _) in &row.cells {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }

        Self { columns, rows }
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_line(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            let fields: Vec<String> = self
                .columns
                .iter()
                .map(|column| {
                    if column == TEST_NAME_COLUMN {
                        row.test_name.clone()
                    } else {
                        row.get(column).map(|v| v.to_string()).unwrap_or_default()
                    }
                })
                .collect();
            push_csv_line(&mut out, fields.iter().map(String::as_str));
        }
        out
    }

    /// Atomically write the CSV: temp file in the same directory, then rename.
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.csv".to_string());
        let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, self.to_csv()).map_err(|e| ReportError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| ReportError::Rename {
            from: tmp_path,
            to: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// Stable sort by (scenario, busy seconds ascending).
pub fn sort_rows_by_scenario(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| {
        a.scenario()
            .cmp(b.scenario())
            .then_with(|| a.busy_key().total_cmp(&b.busy_key()))
    });
}

fn push_csv_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Errors from writing the report file.
#[derive(Debug)]
pub enum ReportError {
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Write { path, source } => {
                write!(f, "failed to write report {}: {source}", path.display())
            }
            ReportError::Rename { from, to, source } => write!(
                f,
                "failed to rename {} -> {}: {source}",
                from.display(),
                to.display()
            ),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::Write { source, .. } => Some(source),
            ReportError::Rename { source, .. } => Some(source),
        }
    }
}
