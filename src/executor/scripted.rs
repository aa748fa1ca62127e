//! Test double answering commands from a queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ExecError, ExecOptions, ExecOutput, Executor};

/// Replays canned outputs and records every command it receives.
///
/// When the queue is empty, commands succeed with no output.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedExecutor {
    responses: Arc<Mutex<VecDeque<ExecOutput>>>,
    calls: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    path: Option<PathBuf>,
    local: bool,
}

impl ScriptedExecutor {
    pub fn remote() -> Self {
        Self::default()
    }

    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }

    pub fn reply(self, code: i32, stdout: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(ExecOutput {
                pid: 1,
                stdout: stdout.to_owned(),
                stderr: String::new(),
                code,
                ..ExecOutput::default()
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, cmd: &str, _options: &ExecOptions) -> Result<ExecOutput, ExecError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(cmd.to_owned());
        }
        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        Ok(next.unwrap_or(ExecOutput {
            pid: 1,
            ..ExecOutput::default()
        }))
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn send_file(&self, _local: &Path, name: &str) -> Result<(), ExecError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(name.to_owned());
        }
        Ok(())
    }

    fn remove_file(&self, _name: &str) -> Result<(), ExecError> {
        Ok(())
    }
}
