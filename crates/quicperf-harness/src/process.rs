//! Spawning and stopping the protocol server/client processes.
//!
//! The runner only talks to [`ProcessLauncher`] / [`ProcessHandle`], so
//! tests can substitute scripted fakes for real binaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Server,
    Client,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessRole::Server => "server",
            ProcessRole::Client => "client",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub role: ProcessRole,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// stdout and stderr both go here.
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Had already exited before the stop request.
    AlreadyExited(ProcessExit),
    /// Exited within the grace period after SIGINT.
    Graceful(ProcessExit),
    /// Needed SIGKILL.
    Killed,
}

pub trait ProcessHandle: Send {
    fn id(&self) -> u32;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Ask the process to stop, escalating to a kill after `grace`.
    fn terminate(&mut self, grace: Duration) -> io::Result<StopOutcome>;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let log = File::create(&spec.log_path)?;
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;

        tracing::info!(
            role = %spec.role,
            pid = child.id(),
            program = %spec.program.display(),
            "process started"
        );
        Ok(Box::new(SystemProcess {
            child,
            role: spec.role,
        }))
    }
}

struct SystemProcess {
    child: Child,
    role: ProcessRole,
}

impl ProcessHandle for SystemProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }

    fn terminate(&mut self, grace: Duration) -> io::Result<StopOutcome> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(StopOutcome::AlreadyExited(status.into()));
        }

        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            // SAFETY: `pid` is our own child which has not been reaped yet
            // (try_wait above returned None), so it cannot have been recycled.
            unsafe {
                libc::kill(pid, libc::SIGINT);
            }
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                tracing::info!(role = %self.role, "process exited cleanly");
                return Ok(StopOutcome::Graceful(status.into()));
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        tracing::warn!(role = %self.role, "process didn't exit cleanly, killing");
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(StopOutcome::Killed)
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ProcessExit),
    TimedOut,
    Cancelled,
}

/// Polls `handle` until it exits, `deadline` passes or `cancel` is set.
pub fn wait_until(
    handle: &mut dyn ProcessHandle,
    deadline: Instant,
    cancel: &AtomicBool,
    poll: Duration,
) -> io::Result<WaitOutcome> {
    loop {
        if let Some(exit) = handle.try_wait()? {
            return Ok(WaitOutcome::Exited(exit));
        }
        if cancel.load(Ordering::Relaxed) {
            return Ok(WaitOutcome::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(dir: &std::path::Path, role: ProcessRole, script: &str) -> LaunchSpec {
        LaunchSpec {
            role,
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            workdir: dir.to_path_buf(),
            log_path: dir.join(format!("{role}.log")),
        }
    }

    #[test]
    fn output_is_captured_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sh(dir.path(), ProcessRole::Client, "echo hello; echo oops >&2");
        let mut h = SystemLauncher.launch(&spec).unwrap();
        let never = AtomicBool::new(false);
        let out = wait_until(
            h.as_mut(),
            Instant::now() + Duration::from_secs(10),
            &never,
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(matches!(out, WaitOutcome::Exited(e) if e.success));
        let log = std::fs::read_to_string(&spec.log_path).unwrap();
        assert!(log.contains("hello"));
        assert!(log.contains("oops"));
    }

    #[test]
    fn wait_times_out_then_terminate_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = SystemLauncher
            .launch(&sh(dir.path(), ProcessRole::Server, "exec sleep 30"))
            .unwrap();
        let never = AtomicBool::new(false);
        let out = wait_until(
            h.as_mut(),
            Instant::now() + Duration::from_millis(100),
            &never,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(out, WaitOutcome::TimedOut);

        let stop = h.terminate(Duration::from_secs(5)).unwrap();
        assert!(matches!(stop, StopOutcome::Graceful(_) | StopOutcome::Killed));
        assert!(h.try_wait().unwrap().is_some());
    }

    #[test]
    fn sigint_ignoring_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = SystemLauncher
            .launch(&sh(dir.path(), ProcessRole::Server, "trap '' INT; exec sleep 30"))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let stop = h.terminate(Duration::from_millis(200)).unwrap();
        assert_eq!(stop, StopOutcome::Killed);
    }

    #[test]
    fn terminate_after_exit_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = SystemLauncher
            .launch(&sh(dir.path(), ProcessRole::Client, "exit 3"))
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));
        let stop = h.terminate(Duration::from_secs(1)).unwrap();
        assert_eq!(
            stop,
            StopOutcome::AlreadyExited(ProcessExit {
                code: Some(3),
                success: false
            })
        );
    }

    #[test]
    fn cancellation_interrupts_wait() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = SystemLauncher
            .launch(&sh(dir.path(), ProcessRole::Client, "exec sleep 30"))
            .unwrap();
        let cancel = AtomicBool::new(true);
        let out = wait_until(
            h.as_mut(),
            Instant::now() + Duration::from_secs(30),
            &cancel,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(out, WaitOutcome::Cancelled);
        h.terminate(Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn missing_binary_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            program: dir.path().join("does-not-exist"),
            ..sh(dir.path(), ProcessRole::Server, "")
        };
        assert!(SystemLauncher.launch(&spec).is_err());
    }
}
