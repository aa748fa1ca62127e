//! Execution targets and their network interfaces.

use std::collections::BTreeMap;
use std::fmt;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::config::parse_bool;
use crate::error::{ClusterError, ConnectivityError, Location};
use crate::executor::{ExecOptions, ExecOutput, Executor, Interrupt, LocalExecutor, SshExecutor};
use crate::nic::{Nic, NicField, NIC_SLOTS};
use crate::options::HarnessOptions;
use crate::tags::TagSet;

/// Marker file proving a node sees the experiment path.
pub const ACCESS_MARKER: &str = ".access_test";

const PROBE_CMD: &str = "pwd;ls -al;test -e .access_test && echo 'access_ok' && if ! type 'unbuffer' ; then ( ( sudo apt-get update && sudo apt-get install -y expect ) || sudo yum install -y expect ) && sudo echo 'test' ; else sudo echo 'test' ; fi";
const ECHO_CMD: &str = "echo -n 'test'";
const LSHW_CMD: &str = "sudo lshw -class network -businfo -quiet";

/// Settable node fields of a cluster file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Addr,
    Port,
    Arch,
    Nfs,
    Path,
    User,
    Mode,
    Multi,
}

impl FromStr for NodeField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "addr" => NodeField::Addr,
            "port" => NodeField::Port,
            "arch" => NodeField::Arch,
            "nfs" => NodeField::Nfs,
            "path" => NodeField::Path,
            "user" => NodeField::User,
            "mode" => NodeField::Mode,
            "multi" => NodeField::Multi,
            _ => return Err(s.to_owned()),
        })
    }
}

/// Connection and layout settings of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub addr: String,
    pub port: u16,
    pub user: Option<String>,
    /// Experiment path on the node; the global one when unset.
    pub path: Option<PathBuf>,
    pub arch: String,
    /// Whether the node shares the experiment path with this host.
    pub nfs: bool,
    /// Interpreter of the scripts.
    pub mode: String,
    /// Number of parallel instances of each script on this node.
    pub multi: Option<u32>,
}

impl NodeConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            port: 22,
            user: None,
            path: None,
            arch: String::new(),
            nfs: true,
            mode: "bash".to_owned(),
            multi: None,
        }
    }

    /// Set one field from text, `Err` with the offending value.
    pub fn set(&mut self, field: NodeField, value: &str) -> Result<(), String> {
        let value = value.trim();
        match field {
            NodeField::Addr => self.addr = value.to_owned(),
            NodeField::Port => self.port = value.parse().map_err(|_| value.to_owned())?,
            NodeField::Arch => self.arch = value.to_owned(),
            NodeField::Nfs => self.nfs = parse_bool(value).ok_or_else(|| value.to_owned())?,
            NodeField::Path => self.path = Some(PathBuf::from(value)),
            NodeField::User => self.user = Some(value.to_owned()).filter(|u| !u.is_empty()),
            NodeField::Mode => self.mode = value.to_owned(),
            NodeField::Multi => self.multi = Some(value.parse().map_err(|_| value.to_owned())?),
        }
        Ok(())
    }
}

/// Lifecycle of a node during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    /// Read from its cluster file.
    Configured,
    /// No cluster file, defaults in use.
    Unparsed,
    ReachabilityChecked,
    NicDiscovered,
    Ready,
}

fn nic_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?P<tag>-?[a-zA-Z][a-zA-Z0-9]*):)?(?P<idx>[0-9]+):(?P<field>[a-zA-Z]+)=(?P<val>.*)$")
            .expect("nic line pattern is valid")
    })
}

fn var_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(?P<tag>-?[a-zA-Z][a-zA-Z0-9]*):)?(?P<var>[a-zA-Z]+)=(?P<val>.*)$")
            .expect("node var pattern is valid")
    })
}

/// A local or remote execution target.
pub struct Node {
    name: String,
    pub config: NodeConfig,
    nics: Vec<Nic>,
    active_nics: Vec<usize>,
    state: NodeState,
    pub ip: Option<String>,
    local: bool,
    executor: Box<dyn Executor>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("addr", &self.config.addr)
            .field("state", &self.state)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl Node {
    fn with_executor(name: String, config: NodeConfig, local: bool, executor: Box<dyn Executor>) -> Self {
        Self {
            name,
            config,
            nics: Nic::random_slots(),
            active_nics: (0..NIC_SLOTS).collect(),
            state: NodeState::Created,
            ip: None,
            local,
            executor,
        }
    }

    /// The node of this host.
    pub fn local(options: &HarnessOptions, interrupt: &Interrupt) -> Self {
        let config = NodeConfig::new("localhost");
        let executor = Box::new(LocalExecutor::new(interrupt.clone()).with_path(&options.experiment_path));
        let mut node = Self::with_executor("localhost".to_owned(), config, true, executor);
        node.ip = Some("127.0.0.1".to_owned());
        node
    }

    /// A remote node reached over SSH.
    pub fn remote(name: impl Into<String>, config: NodeConfig, interrupt: &Interrupt) -> Self {
        let executor = Box::new(ssh_executor(&config, interrupt));
        Self::with_executor(name.into(), config, false, executor)
    }

    #[cfg(test)]
    pub(crate) fn scripted(name: &str, config: NodeConfig, executor: crate::executor::scripted::ScriptedExecutor) -> Self {
        let local = executor.is_local();
        Self::with_executor(name.to_owned(), config, local, Box::new(executor))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    /// Rebuild the executor after a configuration change.
    pub fn reconnect(&mut self, interrupt: &Interrupt) {
        self.executor = if self.local {
            let mut executor = LocalExecutor::new(interrupt.clone()).with_mode(self.config.mode.clone());
            let path = self
                .config
                .path
                .clone()
                .or_else(|| self.executor.path().map(Path::to_path_buf));
            if let Some(path) = path {
                executor = executor.with_path(path);
            }
            Box::new(executor)
        } else {
            Box::new(ssh_executor(&self.config, interrupt))
        };
    }

    /// Where commands of this node run.
    pub fn experiment_path(&self, options: &HarnessOptions) -> PathBuf {
        self.config
            .path
            .clone()
            .unwrap_or_else(|| options.experiment_path.clone())
    }

    /// NIC by position in the active list.
    pub fn get_nic(&self, index: usize) -> Result<&Nic, ClusterError> {
        self.active_nics
            .get(index)
            .and_then(|slot| self.nics.get(*slot))
            .ok_or_else(|| ClusterError::NoSuchNic {
                node: self.name.clone(),
                index,
            })
    }

    pub fn active_nics(&self) -> &[usize] {
        &self.active_nics
    }

    /// Restrict the visible NICs to `slots`, in that order.
    pub fn set_active_nics(&mut self, slots: Vec<usize>) -> Result<(), ClusterError> {
        if let Some(bad) = slots.iter().find(|s| **s >= NIC_SLOTS) {
            return Err(ClusterError::NoSuchNic {
                node: self.name.clone(),
                index: *bad,
            });
        }
        self.active_nics = slots;
        Ok(())
    }

    /// Read `cluster/<name>.node` when it can be found.
    pub fn load_cluster_file(&mut self, options: &HarnessOptions) -> Result<(), ClusterError> {
        let file_name = if self.name.ends_with(".node") {
            format!("cluster/{}", self.name)
        } else {
            format!("cluster/{}.node", self.name)
        };
        let Some(path) = options.find_local(&file_name) else {
            info!(node = %self.name, "{file_name} could not be found, using default parameters");
            self.state = NodeState::Unparsed;
            return Ok(());
        };
        let source = std::fs::read_to_string(&path).map_err(|source| ClusterError::Io {
            path: path.clone(),
            source,
        })?;
        self.apply_node_file(&source, &path, &options.tags)
    }

    /// Apply the lines of a node file. Later lines win.
    pub fn apply_node_file(&mut self, source: &str, path: &Path, tags: &TagSet) -> Result<(), ClusterError> {
        let file = path.display().to_string();
        for (index, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            let location = || Location::new(file.clone(), index + 1);
            let bad_value = |field: &str, value: &str| ClusterError::BadNodeValue {
                location: location(),
                field: field.to_owned(),
                value: value.to_owned(),
            };
            if let Some(captures) = nic_line_pattern().captures(line) {
                if captures.name("tag").is_some_and(|t| !tags.satisfies_scope(t.as_str())) {
                    continue;
                }
                let field: NicField = captures["field"].parse().map_err(|field| ClusterError::UnknownNodeField {
                    location: location(),
                    field,
                })?;
                let value = &captures["val"];
                let slot: usize = captures["idx"]
                    .parse()
                    .ok()
                    .filter(|slot| *slot < NIC_SLOTS)
                    .ok_or_else(|| bad_value("nic index", &captures["idx"]))?;
                self.nics[slot]
                    .set(field, value)
                    .map_err(|_| bad_value(field.as_str(), value))?;
                continue;
            }
            if let Some(captures) = var_line_pattern().captures(line) {
                if captures.name("tag").is_some_and(|t| !tags.satisfies_scope(t.as_str())) {
                    continue;
                }
                let field: NodeField = captures["var"].parse().map_err(|field| ClusterError::UnknownNodeField {
                    location: location(),
                    field,
                })?;
                let value = &captures["val"];
                self.config
                    .set(field, value)
                    .map_err(|value| bad_value(&captures["var"], &value))?;
                continue;
            }
            return Err(ClusterError::UnknownNodeLine {
                location: location(),
                line: line.to_owned(),
            });
        }
        self.state = NodeState::Configured;
        Ok(())
    }

    /// Check that the local executor sees the access marker.
    pub fn check_local_access(&mut self, options: &HarnessOptions) -> Result<(), ConnectivityError> {
        let marker = self.experiment_path(options).join(ACCESS_MARKER);
        let cmd = format!("pwd && test -e {}", crate::executor::shell_quote(&marker.to_string_lossy()));
        let output = self.executor.exec(&cmd, &ExecOptions::new().title("Local access test"))?;
        if output.code != 0 {
            return Err(ConnectivityError::LocalAccess {
                path: marker.display().to_string(),
                output: output.combined(),
            });
        }
        self.state = NodeState::ReachabilityChecked;
        Ok(())
    }

    /// Resolve the address and probe a remote node.
    pub fn check_access(&mut self, options: &HarnessOptions) -> Result<(), ConnectivityError> {
        let addr = self.config.addr.clone();
        let resolved = (addr.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|source| ConnectivityError::Resolve {
                addr: addr.clone(),
                source,
            })?
            .next();
        self.ip = resolved.map(|a| a.ip().to_string());
        self.probe(options)
    }

    fn probe(&mut self, options: &HarnessOptions) -> Result<(), ConnectivityError> {
        info!(node = %self.name, addr = %self.config.addr, "testing connection");
        if !self.config.nfs {
            info!(node = %self.name, "remote is not shared through nfs, sending {ACCESS_MARKER}");
            let marker = options.experiment_path.join(ACCESS_MARKER);
            self.executor.send_file(&marker, ACCESS_MARKER)?;
        }
        let probe = self
            .executor
            .exec(PROBE_CMD, &ExecOptions::new().title("SSH dependencies installation"))?;
        if !self.config.nfs {
            if let Err(error) = self.executor.remove_file(ACCESS_MARKER) {
                warn!(node = %self.name, %error, "unable to remove {ACCESS_MARKER}");
            }
        }
        if probe.code != 0 {
            let echo = self.executor.exec(ECHO_CMD, &ExecOptions::new().title("SSH echo test"))?;
            let path = self.experiment_path(options).display().to_string();
            diagnose(&probe, &echo, self.config.user.as_deref(), &self.config.addr, &path)?;
        }
        self.state = NodeState::ReachabilityChecked;
        Ok(())
    }

    /// Probe the NICs of a node that has no cluster file.
    pub fn discover_nics(&mut self) -> Result<(), ConnectivityError> {
        if self.state == NodeState::Configured {
            return Ok(());
        }
        info!(node = %self.name, "looking for NICs, write cluster/{}.node to skip this", self.name);
        let listing = self
            .executor
            .exec(LSHW_CMD, &ExecOptions::new().title("Listing network devices"))?;
        if listing.code != 0 {
            warn!(
                node = %self.name,
                output = %listing.combined(),
                "no configuration file and the NICs could not be found automatically"
            );
            return Ok(());
        }

        let mut by_speed: BTreeMap<u64, Vec<Nic>> = BTreeMap::new();
        for (pci, ifname) in parse_businfo(&listing.stdout) {
            let cmd = device_probe_cmd(&ifname);
            let output = self
                .executor
                .exec(&cmd, &ExecOptions::new().title(format!("Getting device {ifname} info")))?;
            let probe = parse_device_probe(&output.stdout);
            if probe.speed.is_none() {
                warn!(node = %self.name, %ifname, "cannot find speed of device");
            }
            let mut nic = Nic::new(0, probe.mac, probe.ip, ifname);
            nic.pci = pci;
            nic.speed = probe.speed;
            by_speed.entry(probe.speed.unwrap_or(0)).or_default().push(nic);
        }

        let discovered = by_speed.into_values().rev().flatten().take(NIC_SLOTS);
        for (slot, mut nic) in discovered.enumerate() {
            nic.index = slot;
            info!(
                node = %self.name,
                "{slot}:pci={} {slot}:ifname={} {slot}:mac={} {slot}:ip={}",
                nic.pci, nic.ifname, nic.mac, nic.ip
            );
            self.nics[slot] = nic;
        }
        self.state = NodeState::NicDiscovered;
        Ok(())
    }

    pub fn mark_ready(&mut self) {
        self.state = NodeState::Ready;
    }
}

fn ssh_executor(config: &NodeConfig, interrupt: &Interrupt) -> SshExecutor {
    SshExecutor::new(config.addr.clone(), interrupt.clone())
        .with_user(config.user.clone())
        .with_port(config.port)
        .with_path(config.path.clone())
        .with_mode(config.mode.clone())
}

/// Pick the failure behind a failed combined probe, using the echo-only
/// probe to tell transport problems from environment problems.
pub fn diagnose(
    probe: &ExecOutput,
    echo: &ExecOutput,
    user: Option<&str>,
    addr: &str,
    path: &str,
) -> Result<(), ConnectivityError> {
    if echo.code != 0 || last_line(&echo.stdout) != "test" {
        return Err(ConnectivityError::Unreachable {
            user: user.map(str::to_owned),
            addr: addr.to_owned(),
            code: echo.code,
            output: echo.combined(),
        });
    }
    if !probe.stdout.contains("access_ok") {
        return Err(ConnectivityError::MarkerMissing {
            path: path.to_owned(),
        });
    }
    if last_line(&probe.stdout) != "test" {
        return Err(ConnectivityError::Misconfigured {
            user: user.map(str::to_owned),
            addr: addr.to_owned(),
            code: probe.code,
            output: probe.combined(),
        });
    }
    Ok(())
}

fn last_line(text: &str) -> &str {
    text.trim_end().lines().last().unwrap_or("").trim()
}

/// `(pci, ifname)` of every device listed by `lshw -businfo`.
pub fn parse_businfo(listing: &str) -> Vec<(String, String)> {
    let Some(rule) = listing.find("====") else {
        return Vec::new();
    };
    let header = listing[..rule].lines().last().unwrap_or("");
    let description = header.find("Description").map(|pos| pos.saturating_sub(1));
    listing[rule..]
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = match description {
                Some(end) if end < line.len() => line.get(..end).unwrap_or(line),
                _ => line,
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 3 {
                return None;
            }
            let pci = words[0].split_once('@').map_or(words[0], |(_, id)| id);
            Some((pci.to_owned(), words[1].to_owned()))
        })
        .collect()
}

fn device_probe_cmd(ifname: &str) -> String {
    format!(
        "( sudo ethtool {ifname} | grep Speed | grep -oE '[0-9]+' ) || echo '0'\n\
         cat /sys/class/net/{ifname}/address\n\
         ( /sbin/ifconfig {ifname} | grep 'inet addr:' | cut -d: -f2| cut -d' ' -f1 ) || echo ''"
    )
}

/// Parsed output of the per-device probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProbe {
    pub speed: Option<u64>,
    pub mac: String,
    pub ip: String,
}

/// Speed, MAC then IP, one per line.
pub fn parse_device_probe(output: &str) -> DeviceProbe {
    let mut lines = output.lines().map(str::trim);
    DeviceProbe {
        speed: lines.next().and_then(|s| s.parse().ok()),
        mac: lines.next().unwrap_or_default().to_owned(),
        ip: lines.next().unwrap_or_default().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::ScriptedExecutor;

    fn output(code: i32, stdout: &str) -> ExecOutput {
        ExecOutput {
            pid: 1,
            stdout: stdout.to_owned(),
            stderr: String::new(),
            code,
            ..ExecOutput::default()
        }
    }

    fn remote(executor: ScriptedExecutor) -> Node {
        Node::scripted("server", NodeConfig::new("10.0.0.5"), executor)
    }

    #[test]
    fn should_apply_node_file_last_match_wins() {
        let mut node = remote(ScriptedExecutor::remote());
        let source = "\
# server
addr=10.0.0.9
0:ifname=eth4
0:ip=192.168.0.1
ipv6:0:ip=fe80::1
1:speed=100000
nfs=0
path=/data/npf
";
        node.apply_node_file(source, Path::new("cluster/server.node"), &TagSet::from_iter(["ipv6"]))
            .unwrap();
        let nic = node.get_nic(0).unwrap();
        assert_eq!(nic.ifname, "eth4");
        assert_eq!(nic.ip, "fe80::1");
        assert_eq!(node.get_nic(1).unwrap().speed, Some(100_000));
        assert_eq!(node.config.addr, "10.0.0.9");
        assert!(!node.config.nfs);
        assert_eq!(node.config.path, Some(PathBuf::from("/data/npf")));
        assert_eq!(node.state(), NodeState::Configured);
    }

    #[test]
    fn should_skip_lines_of_inactive_tags() {
        let mut node = remote(ScriptedExecutor::remote());
        node.apply_node_file("0:ip=10.1.1.1\ndpdk:0:ip=10.2.2.2\n", Path::new("n.node"), &TagSet::new())
            .unwrap();
        assert_eq!(node.get_nic(0).unwrap().ip, "10.1.1.1");
    }

    #[test]
    fn should_reject_unknown_field_with_location() {
        let mut node = remote(ScriptedExecutor::remote());
        let err = node
            .apply_node_file("addr=a\nflavor=vanilla\n", Path::new("cluster/x.node"), &TagSet::new())
            .unwrap_err();
        assert!(matches!(err, ClusterError::UnknownNodeField { .. }));
        assert!(err.to_string().starts_with("cluster/x.node:2:"));
    }

    #[test]
    fn should_reject_unknown_line() {
        let mut node = remote(ScriptedExecutor::remote());
        let err = node
            .apply_node_file("just some text\n", Path::new("x.node"), &TagSet::new())
            .unwrap_err();
        assert!(matches!(err, ClusterError::UnknownNodeLine { .. }));
    }

    #[test]
    fn should_report_missing_nic() {
        let mut node = remote(ScriptedExecutor::remote());
        node.set_active_nics(vec![3, 1]).unwrap();
        assert_eq!(node.get_nic(1).unwrap().index, 1);
        assert!(matches!(node.get_nic(2), Err(ClusterError::NoSuchNic { index: 2, .. })));
        assert!(node.set_active_nics(vec![40]).is_err());
    }

    #[test]
    fn should_be_unparsed_without_cluster_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = HarnessOptions::new().experiment_path(dir.path());
        let mut node = Node::scripted("npf-test-absent-host", NodeConfig::new("absent"), ScriptedExecutor::remote());
        node.load_cluster_file(&options).unwrap();
        assert_eq!(node.state(), NodeState::Unparsed);
    }

    #[test]
    fn should_load_cluster_file_from_experiment_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cluster")).unwrap();
        std::fs::write(dir.path().join("cluster/npf-test-dut.node"), "port=2222\nuser=bench\n").unwrap();
        let options = HarnessOptions::new().experiment_path(dir.path());
        let mut node = Node::scripted("npf-test-dut", NodeConfig::new("dut"), ScriptedExecutor::remote());
        node.load_cluster_file(&options).unwrap();
        assert_eq!(node.config.port, 2222);
        assert_eq!(node.config.user.as_deref(), Some("bench"));
    }

    #[test]
    fn should_diagnose_unreachable_node() {
        let err = diagnose(&output(255, ""), &output(255, ""), Some("bench"), "10.0.0.5", "/data").unwrap_err();
        assert!(matches!(err, ConnectivityError::Unreachable { code: 255, .. }));
        assert!(err.to_string().contains("user bench on node 10.0.0.5"));
    }

    #[test]
    fn should_diagnose_missing_marker() {
        let err = diagnose(&output(1, "/data\n"), &output(0, "test"), None, "10.0.0.5", "/data").unwrap_err();
        assert!(matches!(err, ConnectivityError::MarkerMissing { .. }));
    }

    #[test]
    fn should_diagnose_broken_sudo() {
        let err = diagnose(
            &output(1, "/data\naccess_ok\nsudo: a password is required\n"),
            &output(0, "test"),
            Some("bench"),
            "10.0.0.5",
            "/data",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectivityError::Misconfigured { .. }));
    }

    #[test]
    fn should_push_marker_when_nfs_off() {
        let executor = ScriptedExecutor::remote().reply(0, "/data\naccess_ok\ntest\n");
        let mut node = remote(executor.clone());
        node.config.nfs = false;
        node.probe(&HarnessOptions::new()).unwrap();
        assert_eq!(executor.sent(), vec![ACCESS_MARKER]);
        assert_eq!(node.state(), NodeState::ReachabilityChecked);
    }

    #[test]
    fn should_run_echo_probe_after_failure() {
        let executor = ScriptedExecutor::remote()
            .reply(1, "/data\n")
            .reply(0, "test");
        let mut node = remote(executor.clone());
        let err = node.probe(&HarnessOptions::new()).unwrap_err();
        assert!(matches!(err, ConnectivityError::MarkerMissing { .. }));
        assert_eq!(executor.calls(), vec![PROBE_CMD, ECHO_CMD]);
    }

    const LSHW: &str = "\
Bus info          Device      Class          Description
========================================================
pci@0000:00:1f.6  eno1        network        Ethernet Connection I219-LM
pci@0000:03:00.0  ens1f0      network        MT27800 Family [ConnectX-5]
pci@0000:04:00.0              network        Wireless
";

    #[test]
    fn should_parse_businfo_listing() {
        let devices = parse_businfo(LSHW);
        assert_eq!(
            devices,
            vec![
                ("0000:00:1f.6".to_owned(), "eno1".to_owned()),
                ("0000:03:00.0".to_owned(), "ens1f0".to_owned()),
            ]
        );
    }

    #[test]
    fn should_parse_device_probe() {
        let probe = parse_device_probe("100000\n0c:42:a1:00:00:01\n10.0.0.1\n");
        assert_eq!(probe.speed, Some(100_000));
        assert_eq!(probe.mac, "0c:42:a1:00:00:01");
        assert_eq!(probe.ip, "10.0.0.1");
        assert_eq!(parse_device_probe("").speed, None);
    }

    #[test]
    fn should_order_discovered_nics_fastest_first() {
        let executor = ScriptedExecutor::remote()
            .reply(0, LSHW)
            .reply(0, "1000\naa:00:00:00:00:01\n10.0.0.1\n")
            .reply(0, "100000\naa:00:00:00:00:02\n10.0.0.2\n");
        let mut node = remote(executor);
        node.discover_nics().unwrap();
        assert_eq!(node.get_nic(0).unwrap().ifname, "ens1f0");
        assert_eq!(node.get_nic(1).unwrap().ifname, "eno1");
        assert_eq!(node.get_nic(1).unwrap().pci, "0000:00:1f.6");
        assert_eq!(node.state(), NodeState::NicDiscovered);
    }

    #[test]
    fn should_skip_discovery_when_configured() {
        let executor = ScriptedExecutor::remote();
        let mut node = remote(executor.clone());
        node.apply_node_file("0:ifname=eth9\n", Path::new("n.node"), &TagSet::new()).unwrap();
        node.discover_nics().unwrap();
        assert!(executor.calls().is_empty());
        assert_eq!(node.get_nic(0).unwrap().ifname, "eth9");
    }
}
