//! Process-group supervision shared by every executor.

use std::io::{Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::{ExecError, ExecOptions, ExecOutput, Interrupt};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `command` as the leader of a new process group.
///
/// Waits until the leader has exited and both output pipes are closed. The
/// whole group is killed at the deadline, when the stop flag of `options` is
/// raised, or when `interrupt` is raised. Only the last one is an error.
pub(crate) fn run_in_group(
    mut command: Command,
    options: &ExecOptions,
    interrupt: &Interrupt,
) -> Result<ExecOutput, ExecError> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .process_group(0)
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|source| ExecError::Spawn { program, source })?;
    let pid = child.id();

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), options.stdin.clone()) {
        thread::spawn(move || {
            // The command may exit without reading its input.
            let _ = pipe.write_all(input.as_bytes());
        });
    }
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = options.timeout.map(|t| Instant::now() + t);
    let mut exited: Option<ExitStatus> = None;
    let outcome = loop {
        if interrupt.is_raised() {
            kill_group(pid);
            if exited.is_none() {
                let _ = child.wait();
            }
            collect(stdout);
            collect(stderr);
            return Err(ExecError::Interrupted { pid });
        }
        if exited.is_none() {
            exited = child.try_wait()?;
        }
        if exited.is_some() && is_drained(&stdout) && is_drained(&stderr) {
            break Outcome::Finished;
        }
        if options.stop.as_ref().is_some_and(Interrupt::is_raised) {
            break Outcome::Stopped;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break Outcome::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    if outcome == Outcome::Finished {
        return Ok(ExecOutput {
            pid,
            stdout: collect(stdout),
            stderr: collect(stderr),
            code: exited.map(exit_code).unwrap_or(-1),
            timed_out: false,
            stopped: false,
        });
    }

    if outcome == Outcome::TimedOut {
        warn!(pid, timeout = ?options.timeout, title = options.title.as_deref().unwrap_or(""), "command timed out, killing its process group");
    } else {
        debug!(pid, "stop requested, killing process group");
    }
    kill_group(pid);
    let status = match exited {
        Some(status) => status,
        None => child.wait()?,
    };
    let code = exit_code(status);
    let timed_out = outcome == Outcome::TimedOut;
    Ok(ExecOutput {
        pid: if timed_out { 0 } else { pid },
        stdout: collect(stdout),
        stderr: collect(stderr),
        code: if timed_out && code == 0 { -1 } else { code },
        timed_out,
        stopped: !timed_out,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    /// Killed at the deadline.
    TimedOut,
    /// Killed because its stop flag was raised.
    Stopped,
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn is_drained(reader: &Option<JoinHandle<Vec<u8>>>) -> bool {
    reader.as_ref().map_or(true, JoinHandle::is_finished)
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// SIGKILL every process of the group led by `pgid`.
pub(crate) fn kill_group(pgid: u32) {
    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => debug!(pgid, "killed process group"),
        Err(error) => warn!(pgid, %error, "unable to kill process group"),
    }
}
