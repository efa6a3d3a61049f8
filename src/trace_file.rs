/// Trace file identity: `{base_name}_{attempt}.{ext}`, where the base name
/// itself is usually `{scenario}~{config_descriptor}`.
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ATTEMPT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<base>.+)_(?P<attempt>\d+)$").unwrap());

/// One captured trace on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFile {
    pub path: PathBuf,
    pub size: u64,
    /// File name without extension, e.g. `roblox~5-counters_agi_2`.
    pub test_name: String,
    /// Logical test identity shared by all attempts, e.g. `roblox~5-counters_agi`.
    pub base_name: String,
    pub attempt: u32,
}

/// Errors from inspecting a trace file.
#[derive(Debug)]
pub enum TraceFileError {
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file name does not end in `_<attempt>`.
    Name { path: PathBuf },
}

impl std::fmt::Display for TraceFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceFileError::Metadata { path, source } => {
                write!(f, "failed to stat {}: {source}", path.display())
            }
            TraceFileError::Name { path } => write!(
                f,
                "trace file name {} does not end in _<attempt>",
                path.display()
            ),
        }
    }
}

impl std::error::Error for TraceFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceFileError::Metadata { source, .. } => Some(source),
            TraceFileError::Name { .. } => None,
        }
    }
}

impl TraceFile {
    /// Inspect a file on disk.
    pub fn from_path(path: &Path) -> Result<Self, TraceFileError> {
        let size = std::fs::metadata(path)
            .map_err(|e| TraceFileError::Metadata {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();
        Self::with_size(path, size)
    }

    /// Build from a path and a known size without touching the file system.
    pub fn with_size(path: &Path, size: u64) -> Result<Self, TraceFileError> {
        let name_err = || TraceFileError::Name {
            path: path.to_path_buf(),
        };
        let test_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(name_err)?;
        let caps = ATTEMPT_SUFFIX.captures(test_name).ok_or_else(name_err)?;
        let attempt = caps["attempt"].parse().map_err(|_| name_err())?;

        Ok(Self {
            path: path.to_path_buf(),
            size,
            test_name: test_name.to_string(),
            base_name: caps["base"].to_string(),
            attempt,
        })
    }

    /// Size in KiB, as reported in the data-rate column.
    pub fn size_kb(&self) -> f64 {
        self.size as f64 / 1024.0
    }
}
