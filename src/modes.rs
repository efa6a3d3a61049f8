/// Instrumentation modes toggled on the device before each run.
///
/// Each mode maps to a file-name suffix and to the device properties and
/// global settings that enable its layer.
use crate::bridge::{Bridge, BridgeError};
use serde::Deserialize;

const GFXR_LAYER: &str = "VK_LAYER_LUNARG_gfxreconstruct";
const GFXR_LAYER_APP: &str = "com.lunarg.gfxreconstruct.replay";
const AGI_LAYER: &str = "CPUTiming";
const AGI_LAYER_APP: &str = "com.google.android.gapid.arm64v8a";
const SOKATOA_LAYER: &str = "VK_LAYER_GOOGLE_sokatoa";
const SOKATOA_LAYER_APP: &str = "com.google.sokatoa";

pub const DEBUG_LAYERS: &str = "gpu_debug_layers";
pub const DEBUG_LAYER_APP: &str = "gpu_debug_layer_app";

/// Capture/replay layer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    None,
    /// Page-guard memory tracking, no capture.
    Tracking,
    /// Page-guard memory tracking with the capture trigger on.
    Capture,
    TrackingAssisted,
    CaptureAssisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayMode {
    None,
    /// AGI CPU timing layer.
    Layer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilerMode {
    None,
    /// Sokatoa layer with its perfetto producer.
    Layer,
}

impl CaptureMode {
    pub fn suffix(self) -> &'static str {
        match self {
            CaptureMode::None => "",
            CaptureMode::Tracking => "_gfxr_tracking",
            CaptureMode::Capture => "_gfxr_capture",
            CaptureMode::TrackingAssisted => "_gfxr_tracking_assisted",
            CaptureMode::CaptureAssisted => "_gfxr_capture_assisted",
        }
    }

    fn memory_tracking(self) -> Option<&'static str> {
        match self {
            CaptureMode::None => None,
            CaptureMode::Tracking | CaptureMode::Capture => Some("page_guard"),
            CaptureMode::TrackingAssisted | CaptureMode::CaptureAssisted => Some("assisted"),
        }
    }

    pub fn apply<B: Bridge + ?Sized>(self, bridge: &mut B) -> Result<(), BridgeError> {
        if let Some(tracking) = self.memory_tracking() {
            bridge.shell(&format!(
                "setprop debug.gfxrecon.memory_tracking_mode {tracking}"
            ))?;
            add_to_global_setting(bridge, DEBUG_LAYERS, GFXR_LAYER)?;
            add_to_global_setting(bridge, DEBUG_LAYER_APP, GFXR_LAYER_APP)?;
        }
        // Only the capture mode writes files; the trigger is reset otherwise.
        let trigger = if self == CaptureMode::Capture {
            "True"
        } else {
            "False"
        };
        bridge.shell(&format!(
            "setprop debug.gfxrecon.capture_android_trigger {trigger}"
        ))?;
        Ok(())
    }
}

impl OverlayMode {
    pub fn suffix(self) -> &'static str {
        match self {
            OverlayMode::None => "",
            OverlayMode::Layer => "_agi",
        }
    }

    pub fn apply<B: Bridge + ?Sized>(self, bridge: &mut B) -> Result<(), BridgeError> {
        if self == OverlayMode::Layer {
            add_to_global_setting(bridge, DEBUG_LAYERS, AGI_LAYER)?;
            add_to_global_setting(bridge, DEBUG_LAYER_APP, AGI_LAYER_APP)?;
        }
        Ok(())
    }
}

impl ProfilerMode {
    pub fn suffix(self) -> &'static str {
        match self {
            ProfilerMode::None => "",
            ProfilerMode::Layer => "_sokatoa",
        }
    }

    pub fn apply<B: Bridge + ?Sized>(self, bridge: &mut B) -> Result<(), BridgeError> {
        if self != ProfilerMode::Layer {
            return Ok(());
        }
        add_to_global_setting(bridge, DEBUG_LAYERS, SOKATOA_LAYER)?;
        add_to_global_setting(bridge, DEBUG_LAYER_APP, SOKATOA_LAYER_APP)?;
        for prop in [
            "debug.sokatoa.perfetto.enabled true",
            "debug.sokatoa.gfxr.enabled false",
            "debug.sokatoa.start.frame 50",
            "debug.sokatoa.end.frame 100",
            "debug.sokatoa.frame.offset 0",
        ] {
            bridge.shell(&format!("setprop {prop}"))?;
        }
        Ok(())
    }
}

/// Append `value` to a colon-separated global setting.
///
/// An unset setting reads back as `null` and is replaced outright. A value
/// already in the list is left alone.
pub fn add_to_global_setting<B: Bridge + ?Sized>(
    bridge: &mut B,
    name: &str,
    value: &str,
) -> Result<(), BridgeError> {
    let current = bridge.shell(&format!("settings get global {name}"))?;
    let current = current.stdout.trim();

    let updated = if current == "null" || current.is_empty() {
        value.to_string()
    } else if current.split(':').any(|v| v == value) {
        tracing::debug!(setting = name, value, "already present, skipping");
        return Ok(());
    } else {
        format!("{current}:{value}")
    };

    bridge.shell(&format!("settings put global {name} {updated}"))?;
    tracing::debug!(setting = name, value = %updated, "updated global setting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::fake::FakeBridge;

    #[test]
    fn test_suffixes() {
        assert_eq!(CaptureMode::None.suffix(), "");
        assert_eq!(CaptureMode::Capture.suffix(), "_gfxr_capture");
        assert_eq!(
            CaptureMode::TrackingAssisted.suffix(),
            "_gfxr_tracking_assisted"
        );
        assert_eq!(OverlayMode::Layer.suffix(), "_agi");
        assert_eq!(ProfilerMode::Layer.suffix(), "_sokatoa");
        assert_eq!(ProfilerMode::None.suffix(), "");
    }

    #[test]
    fn test_add_to_unset_setting() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get global gpu_debug_layers", "null\n", 0);
        add_to_global_setting(&mut bridge, DEBUG_LAYERS, "CPUTiming").unwrap();
        assert!(bridge.ran("settings put global gpu_debug_layers CPUTiming"));
    }

    #[test]
    fn test_add_appends_with_colon() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get global gpu_debug_layers", "A\n", 0);
        add_to_global_setting(&mut bridge, DEBUG_LAYERS, "B").unwrap();
        assert!(bridge.ran("settings put global gpu_debug_layers A:B"));
    }

    #[test]
    fn test_add_skips_present_value() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get global gpu_debug_layers", "A:B\n", 0);
        add_to_global_setting(&mut bridge, DEBUG_LAYERS, "B").unwrap();
        assert!(!bridge.ran("settings put"));
    }

    #[test]
    fn test_add_propagates_failure() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get", "", 255);
        let err = add_to_global_setting(&mut bridge, DEBUG_LAYERS, "B").unwrap_err();
        assert!(matches!(err, BridgeError::CommandFailed { .. }));
    }

    #[test]
    fn test_capture_mode_sets_tracking_and_trigger() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get", "null", 0);
        CaptureMode::Capture.apply(&mut bridge).unwrap();
        assert!(bridge.ran("memory_tracking_mode page_guard"));
        assert!(bridge.ran("settings put global gpu_debug_layers VK_LAYER_LUNARG_gfxreconstruct"));
        assert!(bridge.ran("capture_android_trigger True"));
    }

    #[test]
    fn test_assisted_tracking_has_no_trigger() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get", "null", 0);
        CaptureMode::TrackingAssisted.apply(&mut bridge).unwrap();
        assert!(bridge.ran("memory_tracking_mode assisted"));
        assert!(bridge.ran("capture_android_trigger False"));
    }

    #[test]
    fn test_none_modes_touch_only_the_trigger() {
        let mut bridge = FakeBridge::new();
        CaptureMode::None.apply(&mut bridge).unwrap();
        OverlayMode::None.apply(&mut bridge).unwrap();
        ProfilerMode::None.apply(&mut bridge).unwrap();
        assert_eq!(
            bridge.log,
            vec!["adb shell setprop debug.gfxrecon.capture_android_trigger False"]
        );
    }

    #[test]
    fn test_profiler_layer_frame_range() {
        let mut bridge = FakeBridge::new();
        bridge.respond("settings get", "null", 0);
        ProfilerMode::Layer.apply(&mut bridge).unwrap();
        assert!(bridge.ran("setprop debug.sokatoa.start.frame 50"));
        assert!(bridge.ran("setprop debug.sokatoa.end.frame 100"));
        assert!(bridge.ran("settings put global gpu_debug_layer_app com.google.sokatoa"));
    }
}
