/// Core types and structures for nospawn
use crate::error::{NospawnError, Result};
use crate::registry::BlockedOperation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the preload library when `--shim` is absent
pub const SHIM_ENV_VAR: &str = "NOSPAWN_PRELOAD";

/// File name of the preload library produced by the `nospawn-preload` crate
pub const SHIM_FILE_NAME: &str = "libnospawn_preload.so";

/// Exit status reported when the wall-clock timeout fires
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Marker printed after the captured output of a timed-out program
pub const INTERRUPT_MARKER: &str = "<interrupted>";

/// Launcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Path of the preload library (resolved from the environment when absent)
    pub shim: Option<PathBuf>,
    /// Working directory of the launched program
    pub workdir: Option<PathBuf>,
    /// Wall clock time limit
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Extra environment variables for the launched program
    pub environment: Vec<(String, String)>,
    /// Start from the launcher's own environment instead of an empty one
    pub inherit_env: bool,
    /// Replace the workdir path with `.` in captured output
    pub scrub_workdir: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            shim: None,
            workdir: None,
            timeout: Duration::from_secs(10),
            environment: Vec::new(),
            inherit_env: true,
            scrub_workdir: true,
        }
    }
}

impl LaunchConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| NospawnError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }
}

/// How a launched program ended
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LaunchStatus {
    /// Exited on its own without touching a blocked primitive
    Completed,
    /// Terminated by the preload library
    Blocked,
    /// Killed after exceeding the wall clock limit
    TimedOut,
    /// Killed by a signal it did not get from the launcher
    Signaled,
}

/// Result of running one program under the preload library
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchReport {
    pub status: LaunchStatus,
    /// Exit code of the process
    pub exit_code: Option<i32>,
    /// Signal that terminated the process (if any)
    pub signal: Option<i32>,
    /// Operation the program attempted, when it was blocked
    pub blocked: Option<BlockedOperation>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Wall clock time used (in seconds)
    pub wall_time: f64,
}

impl LaunchReport {
    /// Exit status a shell wrapper should report for this run
    pub fn exit_code_for_shell(&self) -> i32 {
        match self.status {
            LaunchStatus::TimedOut => TIMEOUT_EXIT_CODE,
            _ => match (self.exit_code, self.signal) {
                (Some(code), _) => code,
                (None, Some(signal)) => 128 + signal,
                (None, None) => 1,
            },
        }
    }
}

/// Durations in config files are plain seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| serde::de::Error::custom(format!("invalid timeout {}: {}", secs, e)))
    }
}
