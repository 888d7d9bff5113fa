/// Run a program with the preload library injected and watch how it ends
use crate::error::{NospawnError, Result};
use crate::registry::{BlockedOperation, DENIED_EXIT_CODE};
use crate::types::{LaunchConfig, LaunchReport, LaunchStatus, SHIM_ENV_VAR, SHIM_FILE_NAME};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::{CommandExt, ExitStatusExt};

const PRELOAD_VAR: &str = "LD_PRELOAD";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TERM_GRACE: Duration = Duration::from_millis(100);

/// Runs programs under the preload library
pub struct Launcher {
    config: LaunchConfig,
    shim: PathBuf,
}

impl Launcher {
    /// Create a launcher, resolving the preload library up front
    pub fn new(config: LaunchConfig) -> Result<Self> {
        let shim = resolve_shim(config.shim.as_deref())?;
        if let Some(ref workdir) = config.workdir {
            if !workdir.is_dir() {
                return Err(NospawnError::Config(format!(
                    "Working directory does not exist: {}",
                    workdir.display()
                )));
            }
        }
        log::debug!("Using preload library {}", shim.display());
        Ok(Self { config, shim })
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn shim(&self) -> &Path {
        &self.shim
    }

    /// Value of `LD_PRELOAD` handed to the program: the shim first, then
    /// whatever the launcher's environment already preloads
    pub fn preload_value(&self) -> String {
        let existing = if self.config.inherit_env {
            std::env::var(PRELOAD_VAR).unwrap_or_default()
        } else {
            String::new()
        };
        compose_preload(&self.shim, &existing)
    }

    /// Run `command` to completion or until the wall clock limit
    pub fn run(&self, command: &[String]) -> Result<LaunchReport> {
        if command.is_empty() {
            return Err(NospawnError::Config("Empty command provided".to_string()));
        }

        let start_time = Instant::now();

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]);
        if let Some(ref workdir) = self.config.workdir {
            cmd.current_dir(workdir);
        }
        if !self.config.inherit_env {
            cmd.env_clear();
            cmd.env("PATH", "/usr/local/bin:/usr/bin:/bin");
        }
        for (key, value) in &self.config.environment {
            cmd.env(key, value);
        }
        cmd.env(PRELOAD_VAR, self.preload_value())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout reaches everything the program left behind
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| NospawnError::Process(format!("Failed to start process: {}", e)))?;
        log::info!("Started {:?} as pid {}", command, child.id());

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let timed_out = self.wait_with_timeout(&mut child)?;
        let exit_status = child
            .wait()
            .map_err(|e| NospawnError::Process(format!("Failed to reap process: {}", e)))?;

        // Something outside the process group may still hold the pipes open
        let deadline = Instant::now().max(start_time + self.config.timeout) + TERM_GRACE;
        let stdout = self.scrub(collect(stdout_reader, deadline));
        let stderr = self.scrub(collect(stderr_reader, deadline));
        let wall_time = start_time.elapsed().as_secs_f64();

        let exit_code = exit_status.code();
        let signal = {
            #[cfg(unix)]
            {
                exit_status.signal()
            }
            #[cfg(not(unix))]
            {
                None
            }
        };

        let blocked = if exit_code == Some(DENIED_EXIT_CODE) {
            detect_blocked(&stdout)
        } else {
            None
        };

        let status = if timed_out {
            LaunchStatus::TimedOut
        } else if let Some(op) = blocked {
            log::warn!("{:?} attempted {} and was terminated", command, op);
            LaunchStatus::Blocked
        } else if signal.is_some() {
            LaunchStatus::Signaled
        } else {
            LaunchStatus::Completed
        };

        Ok(LaunchReport {
            status,
            exit_code,
            signal,
            blocked,
            stdout,
            stderr,
            wall_time,
        })
    }

    /// Poll until the child exits; returns true when the limit was hit and
    /// the child had to be killed
    fn wait_with_timeout(&self, child: &mut Child) -> Result<bool> {
        let timeout = self.config.timeout;
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return Ok(false),
                Ok(None) => {
                    if started.elapsed() >= timeout {
                        log::warn!(
                            "Wall time limit of {:?} exceeded, terminating pid {}",
                            timeout,
                            child.id()
                        );
                        terminate_process(child.id());
                        return Ok(true);
                    }
                }
                Err(e) => {
                    return Err(NospawnError::Process(format!(
                        "Process monitoring error: {}",
                        e
                    )));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn scrub(&self, text: String) -> String {
        match self.config.workdir {
            Some(ref workdir) if self.config.scrub_workdir => scrub_workdir(&text, workdir),
            _ => text,
        }
    }
}

/// Find the preload library: explicit path, then `NOSPAWN_PRELOAD`, then
/// next to the running executable
pub fn resolve_shim(explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(SHIM_ENV_VAR) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => sibling_of_current_exe()?,
        },
    };

    if !candidate.is_file() {
        return Err(NospawnError::ShimNotFound(candidate));
    }
    // Relative LD_PRELOAD entries resolve against the program's cwd.
    Ok(std::fs::canonicalize(&candidate)?)
}

fn sibling_of_current_exe() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        NospawnError::Config(format!(
            "Cannot locate {}: set {} or pass --shim",
            SHIM_FILE_NAME, SHIM_ENV_VAR
        ))
    })?;
    Ok(dir.join(SHIM_FILE_NAME))
}

/// Put `shim` in front of an existing `LD_PRELOAD` list, dropping duplicates
pub fn compose_preload(shim: &Path, existing: &str) -> String {
    let shim = shim.to_string_lossy();
    let mut entries = vec![shim.to_string()];
    entries.extend(
        existing
            .split(|c: char| c == ':' || c.is_whitespace())
            .filter(|entry| !entry.is_empty() && *entry != shim)
            .map(str::to_string),
    );
    entries.join(":")
}

/// Replace every occurrence of `workdir` in `text` with `.`
pub fn scrub_workdir(text: &str, workdir: &Path) -> String {
    let needle = workdir.to_string_lossy();
    let needle = needle.trim_end_matches('/');
    if needle.is_empty() {
        return text.to_string();
    }
    text.replace(needle, ".")
}

/// The operation named by the last diagnostic line of `stdout`, if any
pub fn detect_blocked(stdout: &str) -> Option<BlockedOperation> {
    stdout.lines().rev().find_map(BlockedOperation::from_diagnostic)
}

/// Output of one pipe, filled by a reader thread
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Capture> {
    pipe.map(|mut pipe| {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let reader = thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut sink) = sink.lock() {
                            sink.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        Capture { buffer, reader }
    })
}

/// Everything read so far, waiting for end of file no later than `deadline`
fn collect(capture: Option<Capture>, deadline: Instant) -> String {
    let Some(capture) = capture else {
        return String::new();
    };
    while !capture.reader.is_finished() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if capture.reader.is_finished() {
        let _ = capture.reader.join();
    } else {
        log::warn!("Output pipe still open after the program ended, keeping partial output");
    }
    let bytes = capture
        .buffer
        .lock()
        .map(|buffer| buffer.clone())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Terminate a process group gracefully then forcefully
fn terminate_process(pid: u32) {
    let pgid = Pid::from_raw(pid as i32);
    if let Err(e) = signal::killpg(pgid, Signal::SIGTERM) {
        log::debug!("SIGTERM to group {} failed: {}", pgid, e);
    }

    thread::sleep(TERM_GRACE);

    if let Err(e) = signal::killpg(pgid, Signal::SIGKILL) {
        log::debug!("SIGKILL to group {} failed: {}", pgid, e);
    }
}
