//! Analytical query catalog over the exported trace tables.
//!
//! Every query here yields at most one row with one column. Durations come
//! back in whole milliseconds (integer division of nanosecond sums), matching
//! how the trace processor reports them.

use crate::config::ProcessFilter;
use crate::engine::Param;

/// A catalog query with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Short identifier used in logs and errors.
    pub name: &'static str,
    pub sql: &'static str,
    pub params: Vec<Param>,
}

/// The analysis window in trace nanoseconds: `[start_ns, end_ns)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_ns: i64,
    pub end_ns: i64,
}

const MARKER_START_SQL: &str = "\
SELECT MIN(s.ts) FROM slice s JOIN track t ON s.track_id = t.id
WHERE t.name LIKE ?1";

const MARKER_END_SQL: &str = "\
SELECT MAX(s.ts) FROM slice s JOIN track t ON s.track_id = t.id
WHERE t.name LIKE ?1";

const MARKER_PERIOD_MS_SQL: &str = "\
SELECT (MAX(s.ts) - MIN(s.ts)) / 1000000 AS dur_ms
FROM slice s JOIN track t ON s.track_id = t.id
WHERE t.name LIKE ?1";

const MARKER_COUNT_SQL: &str = "\
SELECT COUNT(*) FROM slice s JOIN track t ON s.track_id = t.id
WHERE t.name LIKE ?1";

const REPLAY_PERIOD_MS_SQL: &str = "\
SELECT (MAX(ts + dur) - (
    SELECT MIN(s.ts) FROM thread_state s
    JOIN thread t ON t.utid = s.utid
    JOIN process p ON p.upid = t.upid
    WHERE p.name = ?1 AND s.state = 'Running'
)) / 1000000 AS dur_ms
FROM thread_state";

const PROCESS_BUSY_MS_SQL: &str = "\
SELECT SUM(s.dur) / 1000000 AS dur_ms FROM thread_state s
JOIN thread t ON t.utid = s.utid
JOIN process p ON p.upid = t.upid
WHERE s.state = 'Running' AND p.name = ?1
  AND s.ts >= ?2 AND s.ts < ?3";

const PROCESS_PREFIX_BUSY_MS_SQL: &str = "\
SELECT SUM(s.dur) / 1000000 AS dur_ms FROM thread_state s
JOIN thread t ON t.utid = s.utid
JOIN process p ON p.upid = t.upid
WHERE s.state = 'Running' AND p.name LIKE ?1
  AND s.ts >= ?2 AND s.ts < ?3";

const ALL_BUSY_MS_SQL: &str = "\
SELECT SUM(s.dur) / 1000000 AS dur_ms FROM thread_state s
WHERE s.state = 'Running' AND s.ts >= ?1 AND s.ts < ?2";

const CPU_COUNT_SQL: &str = "\
SELECT COUNT(DISTINCT t.cpu) FROM counter c
JOIN cpu_counter_track t ON c.track_id = t.id
WHERE t.name = 'cpufreq' AND c.ts <= ?1";

const CPU_AVG_FREQ_SQL: &str = "\
SELECT AVG(c.value) AS freq FROM counter c
JOIN cpu_counter_track t ON c.track_id = t.id
WHERE t.name = 'cpufreq' AND t.cpu = ?2 AND c.ts <= ?1";

fn text(s: &str) -> Param {
    Param::Text(s.to_string())
}

/// First replay-frame marker timestamp (ns).
pub fn marker_start(marker_pattern: &str) -> Query {
    Query {
        name: "marker_start",
        sql: MARKER_START_SQL,
        params: vec![text(marker_pattern)],
    }
}

/// Last replay-frame marker timestamp (ns).
pub fn marker_end(marker_pattern: &str) -> Query {
    Query {
        name: "marker_end",
        sql: MARKER_END_SQL,
        params: vec![text(marker_pattern)],
    }
}

/// Duration between the first and last replay-frame marker (ms).
pub fn marker_period_ms(marker_pattern: &str) -> Query {
    Query {
        name: "marker_period_ms",
        sql: MARKER_PERIOD_MS_SQL,
        params: vec![text(marker_pattern)],
    }
}

pub fn marker_count(marker_pattern: &str) -> Query {
    Query {
        name: "marker_count",
        sql: MARKER_COUNT_SQL,
        params: vec![text(marker_pattern)],
    }
}

/// From the workload's first Running interval to the end of the last
/// thread_state interval in the trace (ms).
pub fn replay_period_ms(package: &str) -> Query {
    Query {
        name: "replay_period_ms",
        sql: REPLAY_PERIOD_MS_SQL,
        params: vec![text(package)],
    }
}

/// Running time of the matching process(es) that started inside the window (ms).
pub fn process_busy_ms(filter: &ProcessFilter, window: Window) -> Query {
    let (name, sql, pattern) = if filter.prefix {
        (
            "process_prefix_busy_ms",
            PROCESS_PREFIX_BUSY_MS_SQL,
            format!("{}%", filter.name),
        )
    } else {
        ("process_busy_ms", PROCESS_BUSY_MS_SQL, filter.name.clone())
    };
    Query {
        name,
        sql,
        params: vec![
            Param::Text(pattern),
            Param::Int(window.start_ns),
            Param::Int(window.end_ns),
        ],
    }
}

/// Running time of every thread inside the window (ms).
pub fn all_busy_ms(window: Window) -> Query {
    Query {
        name: "all_busy_ms",
        sql: ALL_BUSY_MS_SQL,
        params: vec![Param::Int(window.start_ns), Param::Int(window.end_ns)],
    }
}

/// Distinct CPUs with a frequency sample at or before `at_ns`.
pub fn cpu_count(at_ns: i64) -> Query {
    Query {
        name: "cpu_count",
        sql: CPU_COUNT_SQL,
        params: vec![Param::Int(at_ns)],
    }
}

/// Mean `cpufreq` value (kHz) of one CPU at or before `at_ns`.
pub fn cpu_avg_freq(at_ns: i64, cpu: u32) -> Query {
    Query {
        name: "cpu_avg_freq",
        sql: CPU_AVG_FREQ_SQL,
        params: vec![Param::Int(at_ns), Param::Int(i64::from(cpu))],
    }
}
