use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::process::run_in_group;
use super::{prefixed_path, ExecError, ExecOptions, ExecOutput, Executor, Interrupt};

/// Runs commands on this machine through `<mode> -c`.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    path: Option<PathBuf>,
    mode: String,
    interrupt: Interrupt,
}

impl LocalExecutor {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            path: None,
            mode: "bash".to_owned(),
            interrupt,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Interpreter used to run commands, `bash` by default.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    fn command(&self, cmd: &str, options: &ExecOptions) -> Command {
        let mut command = Command::new(&self.mode);
        command.arg("-c").arg(cmd);
        if let Some(path) = &self.path {
            command.current_dir(path);
        }
        if let Some(path) = options.bin_path.as_deref().and_then(prefixed_path) {
            command.env("PATH", path);
        }
        command.envs(options.env.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl Executor for LocalExecutor {
    fn exec(&self, cmd: &str, options: &ExecOptions) -> Result<ExecOutput, ExecError> {
        if options.show_cmd {
            info!(bin_path = ?options.bin_path, "executing locally:\n{cmd}");
        } else if let Some(title) = &options.title {
            debug!(title, "executing locally");
        }
        run_in_group(self.command(cmd, options), options, &self.interrupt)
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn is_local(&self) -> bool {
        true
    }

    fn remove_file(&self, name: &str) -> Result<(), ExecError> {
        let path = match &self.path {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
