/// Launcher behavior, exercised with a stand-in preload library
use assert_cmd::Command;
use nospawn::types::{INTERRUPT_MARKER, TIMEOUT_EXIT_CODE};
use nospawn::{BlockedOperation, LaunchConfig, LaunchStatus, Launcher, NospawnError};
use predicates::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

fn launcher_with_fake_shim(dir: &tempfile::TempDir) -> LaunchConfig {
    LaunchConfig {
        shim: Some(crate::fake_shim(dir)),
        ..LaunchConfig::default()
    }
}

fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

#[test]
fn test_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(launcher_with_fake_shim(&dir)).expect("Failed to create launcher");

    let report = launcher
        .run(&command(&["/bin/sh", "-c", "echo out; echo err >&2; exit 3"]))
        .expect("Failed to run");

    assert_eq!(report.status, LaunchStatus::Completed);
    assert_eq!(report.exit_code, Some(3));
    assert_eq!(report.blocked, None);
    assert_eq!(report.stdout, "out\n");
    assert!(report.stderr.contains("err"));
    assert_eq!(report.exit_code_for_shell(), 3);
}

#[test]
fn test_preload_variable_reaches_program() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(launcher_with_fake_shim(&dir)).unwrap();

    let report = launcher
        .run(&command(&["/bin/sh", "-c", "echo \"$LD_PRELOAD\""]))
        .unwrap();

    let first = report.stdout.trim().split(':').next().unwrap().to_string();
    assert_eq!(first, launcher.shim().to_string_lossy());
}

#[test]
fn test_diagnostic_with_denied_code_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(launcher_with_fake_shim(&dir)).unwrap();

    let report = launcher
        .run(&command(&["/bin/sh", "-c", "echo partial; echo 'vfork not allowed'; exit 1"]))
        .unwrap();

    assert_eq!(report.status, LaunchStatus::Blocked);
    assert_eq!(report.blocked, Some(BlockedOperation::Vfork));
}

#[test]
fn test_diagnostic_with_other_code_is_not_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(launcher_with_fake_shim(&dir)).unwrap();

    let report = launcher
        .run(&command(&["/bin/sh", "-c", "echo 'fork not allowed'; exit 2"]))
        .unwrap();

    assert_eq!(report.status, LaunchStatus::Completed);
    assert_eq!(report.blocked, None);
}

#[test]
fn test_timeout_kills_program() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = launcher_with_fake_shim(&dir);
    config.timeout = Duration::from_millis(300);
    let launcher = Launcher::new(config).unwrap();

    let report = launcher.run(&command(&["/bin/sleep", "30"])).unwrap();

    assert_eq!(report.status, LaunchStatus::TimedOut);
    assert!(report.wall_time < 10.0, "took {}s", report.wall_time);
    assert_eq!(report.exit_code_for_shell(), TIMEOUT_EXIT_CODE);
}

#[test]
fn test_timeout_kills_background_children() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = launcher_with_fake_shim(&dir);
    config.timeout = Duration::from_millis(300);
    let launcher = Launcher::new(config).unwrap();

    // The background sleep inherits the output pipes
    let started = Instant::now();
    let report = launcher
        .run(&command(&["/bin/sh", "-c", "/bin/sleep 30 & /bin/sleep 30"]))
        .unwrap();

    assert_eq!(report.status, LaunchStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
}

#[test]
fn test_escaped_pipe_holder_does_not_stall_launcher() {
    let setsid = Path::new("/usr/bin/setsid");
    if !setsid.exists() {
        println!("Skipping pipe holder test - setsid not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = launcher_with_fake_shim(&dir);
    config.timeout = Duration::from_millis(500);
    let launcher = Launcher::new(config).unwrap();

    let script = format!("{} /bin/sleep 5 & echo started", setsid.display());
    let started = Instant::now();
    let report = launcher.run(&command(&["/bin/sh", "-c", &script])).unwrap();

    assert_eq!(report.status, LaunchStatus::Completed);
    assert_eq!(report.stdout, "started\n");
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
}

#[test]
fn test_workdir_is_scrubbed() {
    let dir = tempfile::tempdir().unwrap();
    let (_work, workdir) = crate::canonical_tempdir();
    let mut config = launcher_with_fake_shim(&dir);
    config.workdir = Some(workdir.clone());
    let launcher = Launcher::new(config).unwrap();

    let report = launcher.run(&command(&["/bin/pwd"])).unwrap();
    assert_eq!(report.stdout, ".\n");

    let mut config = launcher_with_fake_shim(&dir);
    config.workdir = Some(workdir.clone());
    config.scrub_workdir = false;
    let report = Launcher::new(config).unwrap().run(&command(&["/bin/pwd"])).unwrap();
    assert_eq!(report.stdout.trim(), workdir.to_string_lossy());
}

#[test]
fn test_clean_environment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = launcher_with_fake_shim(&dir);
    config.inherit_env = false;
    config.environment.push(("JOB".to_string(), "42".to_string()));
    let launcher = Launcher::new(config).unwrap();

    let report = launcher
        .run(&command(&["/bin/sh", "-c", "echo \"$JOB:${HOME:-unset}\""]))
        .unwrap();
    assert_eq!(report.stdout, "42:unset\n");
}

#[test]
fn test_empty_command_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(launcher_with_fake_shim(&dir)).unwrap();
    assert!(matches!(launcher.run(&[]), Err(NospawnError::Config(_))));
}

#[test]
fn test_missing_workdir_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = launcher_with_fake_shim(&dir);
    config.workdir = Some(dir.path().join("does-not-exist"));
    assert!(matches!(Launcher::new(config), Err(NospawnError::Config(_))));
}

#[test]
fn test_cli_missing_shim() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["run", "--shim"])
        .arg(dir.path().join("missing.so"))
        .args(["--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Preload library not found"));
}

#[test]
fn test_cli_timeout_prints_marker() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["run", "--timeout", "0.3", "--shim"])
        .arg(crate::fake_shim(&dir))
        .args(["--", "/bin/sleep", "30"])
        .assert()
        .code(TIMEOUT_EXIT_CODE)
        .stdout(predicate::str::contains(INTERRUPT_MARKER));
}

#[test]
fn test_cli_rejects_unrepresentable_timeout() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["run", "--timeout", "1e30", "--shim"])
        .arg(crate::fake_shim(&dir))
        .args(["--", "/bin/true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid timeout"));
}

#[test]
fn test_cli_config_file_and_env_flag() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("launch.json");
    let config = serde_json::json!({
        "shim": crate::fake_shim(&dir),
        "timeout": 5,
        "environment": [["GREETING", "from-config"]],
    });
    std::fs::write(&config_path, config.to_string()).unwrap();

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config_path)
        .args(["--env", "NAME=flag", "--", "/bin/sh", "-c", "echo $GREETING $NAME"])
        .assert()
        .success()
        .stdout(predicate::eq("from-config flag\n"));
}

#[test]
fn test_cli_rejects_bad_env_pair() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["run", "--env", "=oops", "--shim"])
        .arg(crate::fake_shim(&dir))
        .args(["--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}

#[test]
fn test_cli_list_json() {
    let assert = Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["list", "--json"])
        .assert()
        .success();

    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&assert.get_output().stdout).expect("list is not JSON");
    assert_eq!(entries.len(), BlockedOperation::ALL.len());

    let fork = entries.iter().find(|e| e["symbol"] == "fork").unwrap();
    assert_eq!(fork["core"], true);
    assert_eq!(fork["family"], "fork");

    let clone = entries.iter().find(|e| e["symbol"] == "clone").unwrap();
    assert_eq!(clone["default"], false);
    assert_eq!(clone["feature"], "clone");
}

#[test]
fn test_cli_list_family_filter() {
    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["list", "--family", "spawn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("posix_spawnp"))
        .stdout(predicate::str::contains("execve").not());

    Command::cargo_bin("nospawn-run")
        .unwrap()
        .args(["list", "--family", "threads"])
        .assert()
        .failure();
}
