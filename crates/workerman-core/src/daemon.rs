//! Daemonization and stdio redirection.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::process;
use std::thread;
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, fork, setsid, ForkResult};
use tracing::error;

use workerman_common::{Error, Result};
use workerman_rendezvous::RendezvousDir;

/// How long the intermediate parent waits for the daemonized master to
/// write its pid file: 10 probes, 500 ms apart.
const VERIFY_STEPS: u32 = 10;
const VERIFY_INTERVAL: Duration = Duration::from_millis(500);

/// Where the caller ends up after a daemonize.
pub enum DaemonOutcome {
    /// Still the CLI process; the daemon start succeeded or failed.
    ParentExit { success: bool },
    /// The detached grandchild; continue into master startup.
    RunMaster,
}

/// Double fork: `fork` → `setsid` → `fork`. The grandchild becomes the
/// master. The intermediate parent polls for the pid file and exits with
/// the verdict; the original process reaps it and reports to the operator.
pub fn daemonize(dir: &RendezvousDir) -> Result<DaemonOutcome> {
    match unsafe { fork() }.map_err(|e| Error::fork("daemonize", e))? {
        ForkResult::Parent { child } => {
            let success = matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0)));
            Ok(DaemonOutcome::ParentExit { success })
        }
        ForkResult::Child => {
            if let Err(e) = setsid() {
                error!(error = %e, "setsid failed");
                process::exit(1);
            }
            match unsafe { fork() } {
                Ok(ForkResult::Parent { .. }) => {
                    for _ in 0..VERIFY_STEPS {
                        if dir.pid_file().exists() {
                            process::exit(0);
                        }
                        thread::sleep(VERIFY_INTERVAL);
                    }
                    process::exit(1);
                }
                Ok(ForkResult::Child) => {
                    redirect_stdin_stdout_to_null();
                    Ok(DaemonOutcome::RunMaster)
                }
                Err(e) => {
                    error!(error = %e, "daemonize second fork failed");
                    process::exit(1);
                }
            }
        }
    }
}

/// Redirects stderr to the given file, appending. The terminal fd is gone
/// afterwards; everything written to stderr lands in the file.
pub fn redirect_stderr(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::file_io(path, e))?;
    dup2(file.as_raw_fd(), 2).map_err(|e| Error::file_io(path, format!("dup2 failed: {e}")))?;
    Ok(())
}

fn redirect_stdin_stdout_to_null() {
    if let Ok(null) = OpenOptions::new().read(true).write(true).open("/dev/null") {
        let _ = dup2(null.as_raw_fd(), 0);
        let _ = dup2(null.as_raw_fd(), 1);
    }
}
