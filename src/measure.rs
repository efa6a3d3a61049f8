/// Measure stage: drive the device through every sweep configuration and
/// pull one Perfetto trace per run into the results directory.
use crate::bridge::{Bridge, BridgeCommand, BridgeError};
use crate::config::BenchConfig;
use crate::modes::{CaptureMode, OverlayMode, ProfilerMode, DEBUG_LAYERS, DEBUG_LAYER_APP};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEVICE_TMP: &str = "/data/local/tmp";
const DEVICE_PERFETTO_CONFIG: &str = "/data/misc/perfetto-configs/perfetto.txt";
const DEVICE_PERFETTO_TRACE: &str = "/data/misc/perfetto-traces/result.perfetto";
const PRODUCER_PROP: &str = "debug.graphics.gpu.profiler.perfetto";
const PRODUCER_STARTUP: Duration = Duration::from_millis(1500);
const PERFETTO_STARTUP: Duration = Duration::from_secs(1);

/// One planned benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub attempt: u32,
    pub replay: String,
    pub perfetto_config: String,
    pub capture: CaptureMode,
    pub overlay: OverlayMode,
    pub profiler: ProfilerMode,
    /// Host path the trace is pulled to.
    pub output: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub planned: usize,
    pub completed: usize,
    /// Runs whose output already existed.
    pub skipped: usize,
}

#[derive(Debug)]
pub enum MeasureError {
    Bridge(BridgeError),
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for MeasureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasureError::Bridge(e) => write!(f, "device command failed: {e}"),
            MeasureError::CreateDir { path, source } => {
                write!(f, "failed to create {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for MeasureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeasureError::Bridge(e) => Some(e),
            MeasureError::CreateDir { source, .. } => Some(source),
        }
    }
}

impl From<BridgeError> for MeasureError {
    fn from(e: BridgeError) -> Self {
        MeasureError::Bridge(e)
    }
}

/// Trace file name for a run: `<replay stem>~<config name><suffixes>_<attempt>.perfetto`.
pub fn output_name(
    replay: &str,
    perfetto_config: &str,
    capture: CaptureMode,
    overlay: OverlayMode,
    profiler: ProfilerMode,
    attempt: u32,
) -> String {
    let base = file_stem(replay);
    let config = file_stem(perfetto_config).replace("perfetto-config-", "");
    format!(
        "{base}~{config}{}{}{}_{attempt}.perfetto",
        capture.suffix(),
        overlay.suffix(),
        profiler.suffix()
    )
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// Expand the sweep into runs, attempts outermost and profiler modes innermost.
pub fn plan_runs(config: &BenchConfig) -> Vec<RunPlan> {
    let sweep = &config.sweep;
    let mut plans = Vec::new();
    for attempt in 1..=sweep.attempts {
        for replay in &sweep.replays {
            for perfetto_config in &sweep.perfetto_configs {
                for &capture in &sweep.capture_modes {
                    for &overlay in &sweep.overlay_modes {
                        for &profiler in &sweep.profiler_modes {
                            let name = output_name(
                                replay,
                                perfetto_config,
                                capture,
                                overlay,
                                profiler,
                                attempt,
                            );
                            plans.push(RunPlan {
                                attempt,
                                replay: replay.clone(),
                                perfetto_config: perfetto_config.clone(),
                                capture,
                                overlay,
                                profiler,
                                output: config.analysis.results_dir.join(name),
                            });
                        }
                    }
                }
            }
        }
    }
    plans
}

/// Drives one device through the sweep.
pub struct Measure<'a, B: Bridge + ?Sized> {
    bridge: &'a mut B,
    config: &'a BenchConfig,
}

impl<'a, B: Bridge + ?Sized> Measure<'a, B> {
    pub fn new(bridge: &'a mut B, config: &'a BenchConfig) -> Self {
        Self { bridge, config }
    }

    pub fn device_model(&mut self) -> Result<String, BridgeError> {
        let output = self.bridge.shell("getprop ro.product.model")?;
        Ok(output.stdout.trim().to_string())
    }

    /// Install every configured APK that is not on the device yet, then let
    /// the workload read replay files from shared storage.
    pub fn install_packages(&mut self) -> Result<(), BridgeError> {
        for spec in &self.config.sweep.packages {
            let installed = self.bridge.has_output(&format!(
                "cmd package list packages | grep -x -F 'package:{}'",
                spec.package
            ))?;
            if installed {
                tracing::debug!(package = %spec.package, "already installed");
                continue;
            }
            tracing::info!(package = %spec.package, apk = %spec.apk.display(), "installing");
            let apk = spec.apk.to_string_lossy().into_owned();
            self.bridge.exec(&BridgeCommand::adb(&[
                "install",
                "-g",
                "-t",
                "-r",
                "--force-queryable",
                apk.as_str(),
            ]))?;
        }
        self.bridge.shell(&format!(
            "appops set {} MANAGE_EXTERNAL_STORAGE allow",
            self.config.workload.package
        ))?;
        Ok(())
    }

    fn producer_name(&self) -> String {
        self.config
            .sweep
            .launch_producer
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "agi_launch_producer".to_string())
    }

    /// Push and start the launch producer. Returns whether it is running.
    pub fn start_launch_producer(&mut self) -> Result<bool, BridgeError> {
        let name = self.producer_name();
        let remote = format!("{DEVICE_TMP}/{name}");

        self.bridge.shell(&format!("setprop {PRODUCER_PROP} 1"))?;
        self.bridge.push(
            &self.config.sweep.launch_producer.to_string_lossy(),
            DEVICE_TMP,
        )?;
        self.bridge.shell(&format!("chmod +x {remote}"))?;

        let started = self
            .bridge
            .run(&BridgeCommand::shell(&format!("nohup {remote} > /dev/null 2>&1 &")))?;
        if !started.success() {
            tracing::warn!(status = ?started.status, stderr = %started.stderr.trim(), "launch producer start returned an error");
        }
        self.bridge.sleep(PRODUCER_STARTUP);

        match self.bridge.pidof(&name)? {
            Some(pid) => {
                tracing::info!(pid = %pid, "launch producer running");
                Ok(true)
            }
            None => {
                tracing::warn!(producer = %name, "launch producer not found after start");
                Ok(false)
            }
        }
    }

    pub fn stop_launch_producer(&mut self) -> Result<(), BridgeError> {
        let name = self.producer_name();
        self.bridge.shell(&format!("setprop {PRODUCER_PROP} 0"))?;
        match self.bridge.pidof(&name)? {
            Some(pid) => {
                self.bridge.shell(&format!("kill -9 {pid}"))?;
                tracing::info!(pid = %pid, "launch producer stopped");
            }
            None => tracing::warn!(producer = %name, "launch producer not running"),
        }
        Ok(())
    }

    fn reset_debug_layers(&mut self) -> Result<(), BridgeError> {
        self.bridge.shell("settings put global enable_gpu_debug_layers 0")?;
        self.bridge
            .shell(&format!("settings delete global {DEBUG_LAYERS}"))?;
        Ok(())
    }

    /// Poll `ps` until the workload package has exited.
    pub fn wait_for_exit(&mut self) -> Result<(), BridgeError> {
        let config = self.config;
        let package = &config.workload.package;
        let interval = Duration::from_secs(config.device.poll_interval_secs.max(1));
        let timeout = Duration::from_secs(config.device.process_exit_timeout_secs);
        let mut waited = Duration::ZERO;

        loop {
            let ps = self.bridge.run(&BridgeCommand::shell("ps"))?;
            if !ps.stdout.lines().any(|line| line.contains(package.as_str())) {
                tracing::debug!(waited_secs = waited.as_secs(), "workload exited");
                return Ok(());
            }
            if waited >= timeout {
                return Err(BridgeError::Timeout {
                    what: format!("{package} to exit"),
                    waited,
                });
            }
            self.bridge.sleep(interval);
            waited += interval;
        }
    }

    /// Execute one run end to end and pull its trace to `plan.output`.
    pub fn run_benchmark(&mut self, model: &str, plan: &RunPlan) -> Result<(), BridgeError> {
        let config = self.config;
        let sweep = &config.sweep;
        let device = &config.device;
        let package = &config.workload.package;

        let host_replay = sweep.replays_dir.join(model).join(&plan.replay);
        let device_replay = format!("{}/{}", sweep.device_replay_dir, plan.replay);
        tracing::info!(replay = %host_replay.display(), "pushing replay");
        let host = host_replay.to_string_lossy().into_owned();
        let remote_dir = format!("{}/", sweep.device_replay_dir);
        self.bridge.exec(&BridgeCommand::adb(&[
            "push",
            "--sync",
            host.as_str(),
            remote_dir.as_str(),
        ]))?;

        self.reset_debug_layers()?;
        self.bridge
            .shell(&format!("settings delete global {DEBUG_LAYER_APP}"))?;
        self.bridge
            .shell(&format!("settings put global gpu_debug_app {package}"))?;

        plan.capture.apply(&mut *self.bridge)?;
        plan.overlay.apply(&mut *self.bridge)?;
        plan.profiler.apply(&mut *self.bridge)?;

        let debug_app = self.bridge.shell("settings get global gpu_debug_app")?;
        let debug_app = debug_app.stdout.trim();
        if !debug_app.is_empty() && debug_app != "null" {
            self.bridge
                .shell("settings put global enable_gpu_debug_layers 1")?;
        }

        let perfetto_config = sweep.perfetto_configs_dir.join(&plan.perfetto_config);
        self.bridge
            .push(&perfetto_config.to_string_lossy(), DEVICE_PERFETTO_CONFIG)?;
        self.bridge.shell(&format!(
            "perfetto --txt -c {DEVICE_PERFETTO_CONFIG} -o {DEVICE_PERFETTO_TRACE} --detach={}",
            device.perfetto_session
        ))?;
        self.bridge.sleep(PERFETTO_STARTUP);

        self.bridge
            .shell("cmd power set-fixed-performance-mode-enabled true")?;

        let launch: Vec<String> = sweep
            .replay_command
            .iter()
            .map(|arg| arg.replace("{replay}", &device_replay))
            .collect();
        tracing::info!(output = %plan.output.display(), "replaying");
        self.bridge.exec(&BridgeCommand::Host(launch))?;
        self.wait_for_exit()?;

        self.bridge
            .shell("cmd power set-fixed-performance-mode-enabled false")?;
        self.bridge.shell(&format!(
            "perfetto --attach={} --stop",
            device.perfetto_session
        ))?;
        self.bridge
            .pull(DEVICE_PERFETTO_TRACE, &plan.output.to_string_lossy())?;

        if plan.capture == CaptureMode::Capture {
            self.bridge
                .shell(&format!("rm {}/test*.gfxr", sweep.device_replay_dir))?;
        }

        self.reset_debug_layers()?;
        self.bridge.shell("settings delete global gpu_debug_app")?;
        Ok(())
    }

    fn run_plans(&mut self, plans: &[RunPlan]) -> Result<SweepSummary, MeasureError> {
        let model = self.device_model()?;
        tracing::info!(model = %model, "device model");

        let mut summary = SweepSummary {
            planned: plans.len(),
            ..Default::default()
        };
        let pause = Duration::from_secs(self.config.sweep.pause_between_runs_secs);

        for plan in plans {
            if plan.output.exists() {
                tracing::debug!(output = %plan.output.display(), "output exists, skipping");
                summary.skipped += 1;
                continue;
            }
            if summary.completed > 0 {
                self.bridge.sleep(pause);
            }
            self.run_benchmark(&model, plan)?;
            tracing::info!(
                attempt = plan.attempt,
                output = %plan.output.display(),
                "run complete"
            );
            summary.completed += 1;
        }
        Ok(summary)
    }
}

/// Run the full sweep: install, start the producer, run every plan whose
/// output does not exist yet, stop the producer.
pub fn run_sweep<B: Bridge + ?Sized>(
    bridge: &mut B,
    config: &BenchConfig,
) -> Result<SweepSummary, MeasureError> {
    let results_dir = &config.analysis.results_dir;
    std::fs::create_dir_all(results_dir).map_err(|e| MeasureError::CreateDir {
        path: results_dir.clone(),
        source: e,
    })?;

    let plans = plan_runs(config);
    let mut measure = Measure::new(bridge, config);
    measure.install_packages()?;
    measure.start_launch_producer()?;

    let result = measure.run_plans(&plans);
    let stopped = measure.stop_launch_producer();

    let summary = result?;
    stopped?;
    tracing::info!(
        planned = summary.planned,
        completed = summary.completed,
        skipped = summary.skipped,
        "sweep finished"
    );
    Ok(summary)
}
