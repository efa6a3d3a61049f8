//! Builds small trace databases with the exported Perfetto table layout.

use rusqlite::{params, Connection};
use std::path::Path;

pub const GAME: &str = "com.lunarg.gfxreconstruct.replay";
pub const MARKER_TRACK: &str =
    "APP_0 com.lunarg.gfxreconstruct.replay/android.app.NativeActivity#1234";

const NS_PER_MS: i64 = 1_000_000;

pub struct TraceBuilder {
    conn: Connection,
    next_track: i64,
}

impl TraceBuilder {
    pub fn create(path: &Path) -> Self {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE process (upid INTEGER PRIMARY KEY, pid INTEGER, name TEXT);
             CREATE TABLE thread (utid INTEGER PRIMARY KEY, tid INTEGER, name TEXT, upid INTEGER);
             CREATE TABLE thread_state (
                 id INTEGER PRIMARY KEY, ts INTEGER, dur INTEGER, cpu INTEGER,
                 utid INTEGER, state TEXT);
             CREATE TABLE track (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE slice (
                 id INTEGER PRIMARY KEY, ts INTEGER, dur INTEGER, track_id INTEGER, name TEXT);
             CREATE TABLE cpu_counter_track (id INTEGER PRIMARY KEY, name TEXT, cpu INTEGER);
             CREATE TABLE counter (id INTEGER PRIMARY KEY, ts INTEGER, track_id INTEGER, value REAL);",
        )
        .unwrap();
        Self {
            conn,
            next_track: 1,
        }
    }

    /// Add a process with a single thread whose utid equals the upid.
    pub fn process(&mut self, upid: i64, name: &str) {
        self.conn
            .execute(
                "INSERT INTO process (upid, pid, name) VALUES (?1, ?1, ?2)",
                params![upid, name],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO thread (utid, tid, name, upid) VALUES (?1, ?1, ?2, ?1)",
                params![upid, name],
            )
            .unwrap();
    }

    pub fn state(&mut self, utid: i64, state: &str, ts_ms: i64, dur_ms: i64) {
        self.conn
            .execute(
                "INSERT INTO thread_state (ts, dur, cpu, utid, state) VALUES (?1, ?2, 0, ?3, ?4)",
                params![ts_ms * NS_PER_MS, dur_ms * NS_PER_MS, utid, state],
            )
            .unwrap();
    }

    pub fn running(&mut self, utid: i64, ts_ms: i64, dur_ms: i64) {
        self.state(utid, "Running", ts_ms, dur_ms);
    }

    /// Add `count` marker slices on a new track, `step_ms` apart.
    pub fn frames(&mut self, track_name: &str, start_ms: i64, count: i64, step_ms: i64) {
        let track = self.next_track;
        self.next_track += 1;
        self.conn
            .execute(
                "INSERT INTO track (id, name) VALUES (?1, ?2)",
                params![track, track_name],
            )
            .unwrap();
        for i in 0..count {
            self.conn
                .execute(
                    "INSERT INTO slice (ts, dur, track_id, name) VALUES (?1, 1000, ?2, 'frame')",
                    params![(start_ms + i * step_ms) * NS_PER_MS, track],
                )
                .unwrap();
        }
    }

    pub fn cpufreq(&mut self, cpu: i64, ts_ms: i64, khz: f64) {
        let track = 1000 + cpu;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO cpu_counter_track (id, name, cpu) VALUES (?1, 'cpufreq', ?2)",
                params![track, cpu],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO counter (ts, track_id, value) VALUES (?1, ?2, ?3)",
                params![ts_ms * NS_PER_MS, track, khz],
            )
            .unwrap();
    }
}

/// A trace with an 11-frame, 10 s replay window starting at 1 s.
///
/// Within the window the game runs for `game_busy_ms`, traced for 500 ms and
/// two kworkers for 500 ms in total. CPUs 0 and 1 report frequencies before
/// the window; CPU 0 averages 1.9 GHz.
pub fn standard_trace(path: &Path, game_busy_ms: i64) {
    let mut b = TraceBuilder::create(path);
    b.process(1, GAME);
    b.process(2, "/system/bin/traced");
    b.process(3, "kworker/0:1");
    b.process(4, "kworker/u16:2");

    b.frames(MARKER_TRACK, 1_000, 11, 1_000);

    // Before the window: starts the replay period but is not counted as busy.
    b.running(1, 500, 400);
    b.running(1, 2_000, game_busy_ms);
    // Starts at the last marker: outside the half-open window.
    b.running(1, 11_000, 1_000);

    b.running(2, 3_000, 500);
    b.state(2, "S", 6_000, 1_000);
    b.running(3, 4_000, 200);
    b.running(4, 5_000, 300);

    b.cpufreq(0, 100, 1_800_000.0);
    b.cpufreq(0, 900, 2_000_000.0);
    b.cpufreq(1, 100, 1_000_000.0);
    b.cpufreq(0, 5_000, 3_000_000.0);
}
