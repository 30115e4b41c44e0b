//! Running a step's external tool
//!
//! [`StepExecutor`] is the seam between scheduling and the outside world. The
//! [`ProcessExecutor`] spawns the tool, captures its output, and checks the termination
//! status explicitly: anything other than a zero exit code is an error.

use super::CancellationToken;
use crate::{
    chain::CompilationStep,
    error::{StepExecutionError, StepFailure},
};
use std::{
    io::Read,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often a running process is checked for exit, timeout and cancellation
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Executes a single compilation step
///
/// Implementations must write every declared output to its staging path and return
/// `Ok(())` only if the step succeeded. They are shared by all worker threads.
pub trait StepExecutor: Sync {
    fn execute(&self, step: &CompilationStep, cancel: &CancellationToken) -> Result<(), StepExecutionError>;
}

impl<T: StepExecutor + ?Sized> StepExecutor for &T {
    fn execute(&self, step: &CompilationStep, cancel: &CancellationToken) -> Result<(), StepExecutionError> {
        (**self).execute(step, cancel)
    }
}

/// Runs steps as child processes
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProcessExecutor {
    /// Creates an executor that kills steps running longer than `timeout`
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    fn wait(&self, child: &mut Child, cancel: &CancellationToken) -> Result<ExitStatus, StepFailure> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(StepFailure::Wait)? {
                return Ok(status);
            }

            let failure = if cancel.is_cancelled() {
                StepFailure::Cancelled
            } else if let Some(timeout) = self.timeout.filter(|timeout| started.elapsed() >= *timeout) {
                StepFailure::TimedOut(timeout)
            } else {
                thread::sleep(self.poll_interval);
                continue;
            };

            kill_process_tree(child);
            let _ = child.wait();
            return Err(failure);
        }
    }
}

impl StepExecutor for ProcessExecutor {
    fn execute(&self, step: &CompilationStep, cancel: &CancellationToken) -> Result<(), StepExecutionError> {
        let error = |failure, stdout, stderr| StepExecutionError {
            program: step.program().to_string(),
            args: step.display_args(),
            failure,
            stdout,
            stderr,
        };

        if cancel.is_cancelled() {
            return Err(error(StepFailure::Cancelled, String::new(), String::new()));
        }

        let mut command = Command::new(step.program());
        command.args(step.args_os()).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        // Own process group, so helpers forked by the tool can be killed along with it
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command.spawn().map_err(|e| error(StepFailure::Spawn(e), String::new(), String::new()))?;

        // Drain both pipes on their own threads so a chatty tool cannot block on a full pipe
        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);
        let status = self.wait(&mut child, cancel);
        let stdout = join_capture(stdout);
        let stderr = join_capture(stderr);

        match status {
            Ok(status) if status.success() => {
                if !stderr.trim().is_empty() {
                    tracing::debug!("{} reported: {}", step.program(), stderr.trim());
                }
                Ok(())
            }
            Ok(status) => {
                let failure = status.code().map_or(StepFailure::Terminated, StepFailure::ExitCode);
                Err(error(failure, stdout, stderr))
            }
            Err(failure) => Err(error(failure, stdout, stderr)),
        }
    }
}

/// Kills the tool and every process it forked
///
/// The reader threads only finish once every holder of the pipes is gone, so killing the
/// direct child alone would leave the step waiting on its descendants.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    match libc::pid_t::try_from(child.id()) {
        // SAFETY: the group id is the pid of a child spawned with `process_group(0)` that has not been reaped yet
        Ok(group) if unsafe { libc::killpg(group, libc::SIGKILL) } == 0 => {}
        // The process may have exited in the meantime, in which case kill fails harmlessly
        _ => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

fn capture(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_capture(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|handle| handle.join().ok()).unwrap_or_default()
}
