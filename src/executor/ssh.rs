use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::process::run_in_group;
use super::{ExecError, ExecOptions, ExecOutput, Executor, Interrupt};

/// Runs commands on a remote host through the `ssh` client.
///
/// The local `ssh` process leads the process group, so a timeout kills the
/// client. `sshd` starts the remote shell as a session leader, and the
/// shell writes its pid, which is also its process group, to a file under
/// `/tmp`. When the command times out, is stopped or is interrupted, a
/// second connection kills that remote group.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: Option<String>,
    addr: String,
    port: u16,
    path: Option<PathBuf>,
    mode: String,
    interrupt: Interrupt,
}

impl SshExecutor {
    pub fn new(addr: impl Into<String>, interrupt: Interrupt) -> Self {
        Self {
            user: None,
            addr: addr.into(),
            port: 22,
            path: None,
            mode: "bash".to_owned(),
            interrupt,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// `user@addr`, or `addr` alone.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.addr),
            None => self.addr.clone(),
        }
    }

    /// [`Self::remote_command`] recording the remote process group in
    /// `group_file` for the length of the command.
    pub fn guarded_command(&self, cmd: &str, options: &ExecOptions, group_file: &str) -> String {
        let file = shell_quote(group_file);
        format!(
            "echo $$ > {file}; {}; npf_status=$?; rm -f {file}; exit $npf_status",
            self.remote_command(cmd, options)
        )
    }

    /// Kill the process group recorded in `group_file`, then remove it.
    pub fn teardown_command(group_file: &str) -> String {
        let file = shell_quote(group_file);
        format!("test -s {file} && kill -9 -\"$(cat {file})\"; rm -f {file}")
    }

    /// The shell line run on the remote host.
    pub fn remote_command(&self, cmd: &str, options: &ExecOptions) -> String {
        let mut line = String::new();
        if let Some(path) = &self.path {
            line.push_str(&format!("cd {} && ", shell_quote(&path.to_string_lossy())));
        }
        if let Some(bin) = &options.bin_path {
            line.push_str(&format!(
                "export PATH={}:\"$PATH\" && ",
                shell_quote(&bin.to_string_lossy())
            ));
        }
        for (key, value) in &options.env {
            line.push_str(&format!("export {key}={} && ", shell_quote(value)));
        }
        line.push_str(&format!("{} -c {}", self.mode, shell_quote(cmd)));
        line
    }

    fn ssh(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .args(["-o", "BatchMode=yes"])
            .args(["-p", &self.port.to_string()])
            .arg(self.destination());
        command
    }

    /// Best effort: the command already failed, a teardown failure is only
    /// logged. Uses its own flag since the shared one may be raised.
    fn teardown(&self, group_file: &str) {
        let mut command = self.ssh();
        command.arg(Self::teardown_command(group_file));
        let options = ExecOptions::new().timeout(Some(TEARDOWN_TIMEOUT));
        match run_in_group(command, &options, &Interrupt::new()) {
            Ok(output) if output.success() => {
                debug!(destination = %self.destination(), group_file, "killed remote process group")
            }
            Ok(output) => warn!(
                destination = %self.destination(),
                code = output.code,
                "unable to kill remote process group: {}",
                output.combined().trim()
            ),
            Err(error) => warn!(destination = %self.destination(), %error, "unable to kill remote process group"),
        }
    }

    fn remote_file(&self, name: &str) -> String {
        match &self.path {
            Some(path) => path.join(name).to_string_lossy().into_owned(),
            None => name.to_owned(),
        }
    }
}

impl Executor for SshExecutor {
    fn exec(&self, cmd: &str, options: &ExecOptions) -> Result<ExecOutput, ExecError> {
        let group_file = group_file();
        let remote = self.guarded_command(cmd, options, &group_file);
        if options.show_cmd {
            info!(destination = %self.destination(), "executing remotely:\n{remote}");
        } else if let Some(title) = &options.title {
            debug!(title, destination = %self.destination(), "executing remotely");
        }
        let mut command = self.ssh();
        command.arg(remote);
        let result = run_in_group(command, options, &self.interrupt);
        match &result {
            Ok(output) if output.timed_out || output.stopped => self.teardown(&group_file),
            Err(ExecError::Interrupted { .. }) => self.teardown(&group_file),
            _ => {}
        }
        result
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn is_local(&self) -> bool {
        false
    }

    fn send_file(&self, local: &Path, name: &str) -> Result<(), ExecError> {
        let mut command = Command::new("scp");
        command
            .args(["-o", "BatchMode=yes"])
            .args(["-P", &self.port.to_string()])
            .arg(local)
            .arg(format!("{}:{}", self.destination(), self.remote_file(name)));
        let output = run_in_group(command, &ExecOptions::new(), &self.interrupt)?;
        if !output.success() {
            return Err(ExecError::Transfer {
                path: local.to_owned(),
                code: output.code,
                output: output.combined(),
            });
        }
        Ok(())
    }

    fn remove_file(&self, name: &str) -> Result<(), ExecError> {
        let cmd = format!("rm -f {}", shell_quote(name));
        let output = self.exec(&cmd, &ExecOptions::new().title("Removing file"))?;
        if !output.success() {
            return Err(ExecError::Transfer {
                path: PathBuf::from(self.remote_file(name)),
                code: output.code,
                output: output.combined(),
            });
        }
        Ok(())
    }
}

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique per command across concurrent runs and harness processes.
fn group_file() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "/tmp/npf-{}-{}-{:08x}.pgid",
        std::process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed),
        rand::random::<u32>()
    )
}

/// Quote `text` as a single POSIX shell word.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::time::Instant;

    #[test]
    fn should_quote_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("a b"), "'a b'");
    }

    #[test]
    fn should_build_destination() {
        let executor = SshExecutor::new("10.0.0.5", Interrupt::new()).with_user(Some("bench".into()));
        assert_eq!(executor.destination(), "bench@10.0.0.5");
        let anonymous = SshExecutor::new("server", Interrupt::new());
        assert_eq!(anonymous.destination(), "server");
    }

    #[test]
    fn should_build_remote_command() {
        let executor = SshExecutor::new("10.0.0.5", Interrupt::new())
            .with_path(Some(PathBuf::from("/data")));
        let options = ExecOptions::new().bin_path("/data/bin").env("RATE", "10");
        assert_eq!(
            executor.remote_command("echo '$RATE'", &options),
            r#"cd '/data' && export PATH='/data/bin':"$PATH" && export RATE='10' && bash -c 'echo '\''$RATE'\'''"#
        );
    }

    #[test]
    fn should_record_remote_group_around_command() {
        let executor = SshExecutor::new("10.0.0.5", Interrupt::new());
        assert_eq!(
            executor.guarded_command("iperf3 -s", &ExecOptions::new(), "/tmp/npf-1.pgid"),
            "echo $$ > '/tmp/npf-1.pgid'; bash -c 'iperf3 -s'; npf_status=$?; rm -f '/tmp/npf-1.pgid'; exit $npf_status"
        );
    }

    #[test]
    fn should_build_teardown_killing_recorded_group() {
        assert_eq!(
            SshExecutor::teardown_command("/tmp/npf-1.pgid"),
            r#"test -s '/tmp/npf-1.pgid' && kill -9 -"$(cat '/tmp/npf-1.pgid')"; rm -f '/tmp/npf-1.pgid'"#
        );
    }

    #[test]
    fn should_use_distinct_group_files() {
        let first = group_file();
        let second = group_file();
        assert_ne!(first, second);
        assert!(first.starts_with("/tmp/npf-") && first.ends_with(".pgid"));
    }

    #[test]
    fn should_kill_remote_group_with_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let group_file = dir.path().join("run.pgid").to_string_lossy().into_owned();
        let marker = dir.path().join("survivor");
        let executor = SshExecutor::new("server", Interrupt::new());
        let cmd = format!("(sleep 1; touch '{}') & sleep 30", marker.display());

        // Stand in for sshd: the remote shell leads its own process group.
        let mut remote = Command::new("sh");
        remote
            .arg("-c")
            .arg(executor.guarded_command(&cmd, &ExecOptions::new(), &group_file))
            .process_group(0);
        let mut child = remote.spawn().unwrap();
        let started = Instant::now();
        while std::fs::read_to_string(&group_file).map_or(true, |pid| pid.trim().is_empty()) {
            assert!(started.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut teardown = Command::new("sh");
        teardown.arg("-c").arg(SshExecutor::teardown_command(&group_file));
        let output = run_in_group(teardown, &ExecOptions::new(), &Interrupt::new()).unwrap();
        assert!(output.success(), "{}", output.combined());

        assert_eq!(child.wait().unwrap().signal(), Some(9));
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
        assert!(!Path::new(&group_file).exists());
    }

    #[test]
    fn should_pass_port_and_batch_mode() {
        let executor = SshExecutor::new("server", Interrupt::new()).with_port(2222);
        let command = executor.ssh();
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-o", "BatchMode=yes", "-p", "2222", "server"]);
    }
}
