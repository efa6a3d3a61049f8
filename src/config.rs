use crate::modes::{CaptureMode, OverlayMode, ProfilerMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from bench.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BenchConfig {
    pub analysis: AnalysisConfig,
    pub workload: WorkloadConfig,
    pub report: ReportConfig,
    pub engine: EngineConfig,
    pub device: DeviceConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory the measure stage writes traces into and the analyze stage reads from.
    pub results_dir: PathBuf,
    /// Glob pattern, relative to `results_dir`.
    pub pattern: String,
    pub max_workers: usize,
    pub failure_policy: FailurePolicy,
    /// CPU whose `cpufreq` counter is reported as the reference frequency.
    pub reference_cpu: u32,
    /// Background processes whose CPU share is reported, in column order.
    pub processes: Vec<ProcessFilter>,
}

/// What the batch runner does when one file's extraction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Attempt every file, then report the first failure.
    #[default]
    CompleteAll,
    /// Abort outstanding work on the first failure.
    FailFast,
}

/// A named process filter. `label` becomes the `<label> %` report column.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProcessFilter {
    pub label: String,
    pub name: String,
    /// Match every process whose name starts with `name` (e.g. `kworker`).
    #[serde(default)]
    pub prefix: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Android package of the replay workload.
    pub package: String,
    pub activity: String,
    /// SQL LIKE pattern for the replay-frame marker tracks. Derived from
    /// `package` and `activity` when unset.
    pub marker_track: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output: PathBuf,
    /// Sort rows by scenario and busy seconds; otherwise keep group order.
    pub sort_rows: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command that converts a raw trace into a SQLite database.
    /// `{trace}` and `{output}` are substituted. Empty disables conversion.
    pub exporter: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adb: String,
    pub serial: Option<String>,
    pub poll_interval_secs: u64,
    pub process_exit_timeout_secs: u64,
    pub perfetto_session: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub attempts: u32,
    pub replays: Vec<String>,
    /// Host directory holding `<device model>/<replay>` files.
    pub replays_dir: PathBuf,
    pub device_replay_dir: String,
    pub perfetto_configs: Vec<String>,
    pub perfetto_configs_dir: PathBuf,
    pub capture_modes: Vec<CaptureMode>,
    pub overlay_modes: Vec<OverlayMode>,
    pub profiler_modes: Vec<ProfilerMode>,
    pub packages: Vec<PackageSpec>,
    pub launch_producer: PathBuf,
    /// Host command that starts the replay. `{replay}` is the on-device path.
    pub replay_command: Vec<String>,
    pub pause_between_runs_secs: u64,
}

/// An APK installed before the sweep when its package is missing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PackageSpec {
    pub package: String,
    pub apk: PathBuf,
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl BenchConfig {
    /// Load the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

impl WorkloadConfig {
    pub fn marker_pattern(&self) -> String {
        match &self.marker_track {
            Some(pattern) => pattern.clone(),
            None => format!("APP_% {}/{}%", self.package, self.activity),
        }
    }
}

// --- Default implementations ---

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("perfetto_results"),
            pattern: "*.perfetto".to_string(),
            max_workers: 64,
            failure_policy: FailurePolicy::default(),
            reference_cpu: 0,
            processes: default_processes(),
        }
    }
}

fn default_processes() -> Vec<ProcessFilter> {
    let exact = |label: &str, name: &str| ProcessFilter {
        label: label.to_string(),
        name: name.to_string(),
        prefix: false,
    };
    vec![
        exact("agi_launch_producer", "./tmp/agi_launch_producer"),
        exact("traced", "/system/bin/traced"),
        exact("traced_probes", "/system/bin/traced_probes"),
        ProcessFilter {
            label: "kworkers".to_string(),
            name: "kworker".to_string(),
            prefix: true,
        },
        exact("mali-gpuq-kthread", "mali-gpuq-kthread"),
        exact("surfaceflinger", "/system/bin/surfaceflinger"),
        exact(
            "android.hardware.power.stats-service.pixel",
            "/vendor/bin/hw/android.hardware.power.stats-service.pixel",
        ),
        exact(
            "android.hardware.power-service.pixel-libperfmgr",
            "/vendor/bin/hw/android.hardware.power-service.pixel-libperfmgr",
        ),
        exact("logd", "/system/bin/logd"),
        exact("logcat", "logcat"),
    ]
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            package: "com.lunarg.gfxreconstruct.replay".to_string(),
            activity: "android.app.NativeActivity".to_string(),
            marker_track: None,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("perfetto_data.csv"),
            sort_rows: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exporter: vec![
                "trace_processor_shell".to_string(),
                "-e".to_string(),
                "{output}".to_string(),
                "{trace}".to_string(),
            ],
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            serial: None,
            poll_interval_secs: 2,
            process_exit_timeout_secs: 30 * 60,
            perfetto_session: "session4345".to_string(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            replays: vec!["roblox.gfxr".to_string()],
            replays_dir: PathBuf::from("tests"),
            device_replay_dir: "/sdcard/Download".to_string(),
            perfetto_configs: vec!["perfetto-config-5-counters.txt".to_string()],
            perfetto_configs_dir: PathBuf::from("perfetto_configs"),
            capture_modes: vec![CaptureMode::None],
            overlay_modes: vec![OverlayMode::Layer],
            profiler_modes: vec![ProfilerMode::None],
            packages: vec![
                PackageSpec {
                    package: "com.google.android.gapid.arm64v8a".to_string(),
                    apk: PathBuf::from("apk/arm64/gapid-arm64-v8a.apk"),
                },
                PackageSpec {
                    package: "com.lunarg.gfxreconstruct.replay".to_string(),
                    apk: PathBuf::from("apk/arm64/replay-release.apk"),
                },
                PackageSpec {
                    package: "com.google.sokatoa".to_string(),
                    apk: PathBuf::from("apk/arm64/signed_sokatoa.apk"),
                },
            ],
            launch_producer: PathBuf::from("apk/arm64/agi_launch_producer"),
            replay_command: vec![
                "python3".to_string(),
                "gfxr/scripts/gfxrecon.py".to_string(),
                "replay".to_string(),
                "{replay}".to_string(),
            ],
            pause_between_runs_secs: 10,
        }
    }
}
