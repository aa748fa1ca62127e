//! Command execution on a node.
//!
//! Every command runs in its own process group so that a timeout or an
//! interrupt can take down the whole tree it started, background jobs
//! included.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod local;
mod process;
#[cfg(test)]
pub(crate) mod scripted;
mod ssh;

pub use local::LocalExecutor;
pub use ssh::{shell_quote, SshExecutor};

/// Framework failures of an execution. A non-zero exit code or a timeout
/// is not an error, it is reported in [`ExecOutput`].
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unable to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error while running a command")]
    Io(#[from] std::io::Error),
    #[error("interrupted while running process {pid}")]
    Interrupted { pid: u32 },
    #[error("unable to transfer {path:?}, got return code {code}: {output}")]
    Transfer {
        path: PathBuf,
        code: i32,
        output: String,
    },
}

/// Outcome of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Pid of the group leader, 0 when the command was killed on timeout.
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `128 + signal` when killed by a signal.
    pub code: i32,
    pub timed_out: bool,
    /// Killed because its stop flag was raised, not a failure of its own.
    #[serde(default)]
    pub stopped: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }

    /// Stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Per-call execution parameters.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Kill the process group after this long.
    pub timeout: Option<Duration>,
    /// Written to the command's stdin, which is then closed.
    pub stdin: Option<String>,
    /// Prepended to `PATH`.
    pub bin_path: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Human readable description used in logs.
    pub title: Option<String>,
    /// Log the command before running it.
    pub show_cmd: bool,
    /// Raised to end the command early, for instance when a sibling script
    /// of the same run finished. The output is returned as usual.
    pub stop: Option<Interrupt>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn bin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin_path = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn show_cmd(mut self, v: bool) -> Self {
        self.show_cmd = v;
        self
    }

    pub fn stop(mut self, stop: Interrupt) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Something that can run shell commands, locally or on a remote host.
pub trait Executor: Send + Sync + fmt::Debug {
    fn exec(&self, cmd: &str, options: &ExecOptions) -> Result<ExecOutput, ExecError>;

    /// Working directory of the commands, if not the current one.
    fn path(&self) -> Option<&Path>;

    fn is_local(&self) -> bool;

    /// Copy `local` into the working directory as `name`.
    fn send_file(&self, _local: &Path, _name: &str) -> Result<(), ExecError> {
        Ok(())
    }

    /// Remove `name` from the working directory.
    fn remove_file(&self, name: &str) -> Result<(), ExecError>;
}

/// Shared flag raised on user interrupt.
///
/// Running commands poll it; once raised, they kill their process group
/// and return [`ExecError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag on SIGINT/SIGTERM. Can only be installed once per process.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.0.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `PATH` with `bin` in front.
fn prefixed_path(bin: &Path) -> Option<std::ffi::OsString> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let paths = std::iter::once(bin.to_owned()).chain(std::env::split_paths(&current));
    std::env::join_paths(paths).ok()
}
