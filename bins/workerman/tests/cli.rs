//! CLI scenario tests against the built binary.
//!
//! The deterministic precondition scenarios run everywhere. The full
//! start/status/stop cycle forks real masters and workers, so it is
//! ignored by default; run it manually with `--ignored`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn write_config(dir: &Path, worker_count: usize) -> PathBuf {
    let config_path = dir.join("workerman.yaml");
    let config = format!(
        concat!(
            "name: echo\n",
            "path: {}\n",
            "listeners:\n",
            "  - name: echo\n",
            "    transport: tcp\n",
            "    address: 127.0.0.1:0\n",
            "    protocol: text\n",
            "    worker_count: {}\n",
        ),
        dir.display(),
        worker_count
    );
    std::fs::write(&config_path, config).unwrap();
    config_path
}

fn workerman(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_workerman"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_status_without_master_reports_not_running() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);

    let output = workerman(&config, &["status"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output)
        .contains("Cannot collect worker status, workerman is not running."));
}

#[test]
fn test_stop_without_master_reports_not_running() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);

    let output = workerman(&config, &["stop"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Cannot stop workerman, workerman is not running."));
}

#[test]
fn test_restart_without_master_reports_not_running() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);

    let output = workerman(&config, &["restart", "--graceful"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Cannot restart workerman, workerman is not running."));
}

#[test]
fn test_start_while_running_reports_already_running() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);
    // a pid file is the running-master marker
    std::fs::write(tmp.path().join("process.pid"), "12345").unwrap();

    let output = workerman(&config, &["start"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Cannot start workerman, workerman already running."));
}

#[test]
fn test_status_info_describes_columns() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);

    let output = workerman(&config, &["status", "--info"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    for column in [
        "id",
        "listen",
        "memory",
        "peak_memory",
        "start_time",
        "connections",
        "timers",
    ] {
        assert!(stdout.contains(column), "missing column {column}");
    }
}

#[test]
fn test_missing_config_fails() {
    let output = workerman(Path::new("/nonexistent/workerman.yaml"), &["status"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("file operation failed"));
}

/// Full daemon lifecycle: start two workers, collect status, stop, and
/// verify the rendezvous directory is clean. Forks real processes.
#[test]
#[ignore]
fn test_daemon_start_status_stop_cycle() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), 2);
    let pid_file = tmp.path().join("process.pid");

    let started = workerman(&config, &["start", "--daemon"]);
    assert_eq!(started.status.code(), Some(0), "{}", stderr_of(&started));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !pid_file.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(pid_file.exists(), "master never wrote its pid file");

    let status = workerman(&config, &["status"]);
    assert_eq!(status.status.code(), Some(0), "{}", stderr_of(&status));
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("M"), "master row missing:\n{stdout}");
    assert!(stdout.contains("echo"), "worker rows missing:\n{stdout}");

    let stopped = workerman(&config, &["stop", "--graceful"]);
    assert_eq!(stopped.status.code(), Some(0), "{}", stderr_of(&stopped));
    assert!(!pid_file.exists());
    for file in ["status.workerman", "shutdown.workerman", "restart.workerman"] {
        assert!(!tmp.path().join(file).exists(), "{file} left behind");
    }
}
