//! Cluster bootstrap: role to node resolution.
//!
//! Roles are mapped on the command line with
//! `role=[user@]addr[:path][,var=value]...`. Every address is backed by one
//! [`Node`], shared by all the roles mapped to it. The `default` role always
//! resolves to this host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::config::parse_bool;
use crate::error::{ClusterError, ConnectivityError, Error};
use crate::executor::Interrupt;
use crate::nic::NicField;
use crate::node::{Node, NodeConfig, ACCESS_MARKER};
use crate::options::HarnessOptions;

pub const DEFAULT_ROLE: &str = "default";
pub const LOCALHOST: &str = "localhost";

fn mapping_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<role>[a-zA-Z0-9_]+)=(?:(?P<user>[a-zA-Z0-9_.-]+)@)?(?P<addr>[a-zA-Z0-9.-]+)(?::(?P<path>[a-zA-Z0-9_./~-]+))?$")
            .expect("cluster mapping pattern is valid")
    })
}

fn nic_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{(?P<role>[a-zA-Z0-9_]+):(?P<idx>[0-9]+):(?P<field>[a-zA-Z]+)\}")
            .expect("nic reference pattern is valid")
    })
}

/// One `--cluster` argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterMapping {
    pub role: String,
    pub user: Option<String>,
    pub addr: String,
    pub path: Option<PathBuf>,
    pub nfs: Option<bool>,
    pub nics: Option<Vec<usize>>,
    pub multi: Option<u32>,
    pub mode: Option<String>,
}

impl ClusterMapping {
    pub fn parse(text: &str) -> Result<Self, ClusterError> {
        let mut parts = text.split(',').map(str::trim);
        let head = parts.next().unwrap_or_default();
        let captures = mapping_pattern()
            .captures(head)
            .ok_or_else(|| ClusterError::BadMapping(text.to_owned()))?;
        let mut mapping = Self {
            role: captures["role"].to_owned(),
            user: captures.name("user").map(|u| u.as_str().to_owned()),
            addr: captures["addr"].to_owned(),
            path: captures.name("path").map(|p| PathBuf::from(p.as_str())),
            ..Self::default()
        };
        for part in parts.filter(|p| !p.is_empty()) {
            let (var, value) = part
                .split_once('=')
                .ok_or_else(|| ClusterError::BadMapping(text.to_owned()))?;
            let (var, value) = (var.trim(), value.trim());
            let bad = || ClusterError::BadClusterValue {
                var: var.to_owned(),
                value: value.to_owned(),
            };
            match var {
                "nfs" => mapping.nfs = Some(parse_bool(value).ok_or_else(bad)?),
                "path" => mapping.path = Some(PathBuf::from(value)),
                "nic" => {
                    let nics = value
                        .split('+')
                        .map(|n| n.trim().parse::<usize>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| bad())?;
                    mapping.nics = Some(nics);
                }
                "multi" => mapping.multi = Some(value.parse().map_err(|_| bad())?),
                "mode" => mapping.mode = Some(value.to_owned()),
                _ => return Err(ClusterError::UnknownClusterVar(var.to_owned())),
            }
        }
        Ok(mapping)
    }

    pub fn is_local(&self) -> bool {
        self.addr == LOCALHOST
    }
}

/// Nodes keyed by address, created once per invocation.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: IndexMap<String, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, node: Node) {
        self.nodes.insert(key.into(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }
}

/// The role and node a script is running for, used to resolve `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleContext {
    pub role: String,
    /// Registry key of the node, when bound to one.
    pub node: Option<String>,
}

impl RoleContext {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            node: None,
        }
    }

    pub fn on_node(mut self, key: impl Into<String>) -> Self {
        self.node = Some(key.into());
        self
    }
}

/// Marker file created in the experiment path for the duration of the
/// bootstrap.
struct AccessMarker {
    path: PathBuf,
}

impl AccessMarker {
    fn create(dir: &Path) -> Result<Self, ConnectivityError> {
        let path = dir.join(ACCESS_MARKER);
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| ConnectivityError::Marker {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path })
    }
}

impl Drop for AccessMarker {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), %error, "unable to remove access marker");
        }
    }
}

/// Role to node table of one invocation.
#[derive(Debug)]
pub struct Cluster {
    registry: NodeRegistry,
    roles: IndexMap<String, Vec<String>>,
    fallback: HashMap<String, String>,
    /// Set once a mapping names the default role; until then it holds the
    /// implicit local node.
    default_mapped: bool,
}

impl Cluster {
    /// Build the cluster from the command line mappings.
    ///
    /// Creates this host's node under the `default` role, then one node per
    /// distinct address. Remote nodes are probed when both `do_test` and
    /// `do_conntest` are set.
    pub fn bootstrap(
        options: &HarnessOptions,
        mappings: &[ClusterMapping],
        interrupt: &Interrupt,
    ) -> Result<Self, Error> {
        if !options.experiment_path.is_dir() {
            return Err(ClusterError::ExperimentPath(options.experiment_path.clone()).into());
        }
        let _marker = AccessMarker::create(&options.experiment_path)?;

        let mut local = Node::local(options, interrupt);
        local.load_cluster_file(options)?;
        local.reconnect(interrupt);
        let local_path = local.experiment_path(options);
        let _local_marker = if local_path != options.experiment_path {
            Some(AccessMarker::create(&local_path)?)
        } else {
            None
        };
        if options.do_conntest {
            local.check_local_access(options)?;
        }
        let mut cluster = Self::with_local(local);

        for mapping in mappings {
            let key = if mapping.is_local() {
                LOCALHOST.to_owned()
            } else {
                mapping.addr.clone()
            };
            if !cluster.registry.contains(&key) {
                let node = connect(mapping, options, interrupt)?;
                cluster.registry.insert(key.clone(), node);
            }
            if let Some(node) = cluster.registry.get_mut(&key) {
                apply_mapping_vars(node, mapping, interrupt)?;
            }
            cluster.assign(&mapping.role, key);
        }

        for key in cluster.roles.values().flatten().cloned().collect::<Vec<_>>() {
            if let Some(node) = cluster.registry.get_mut(&key) {
                node.mark_ready();
            }
        }
        Ok(cluster)
    }

    /// A cluster made of this host only.
    pub fn with_local(local: Node) -> Self {
        let mut registry = NodeRegistry::new();
        registry.insert(LOCALHOST, local);
        let mut roles = IndexMap::new();
        roles.insert(DEFAULT_ROLE.to_owned(), vec![LOCALHOST.to_owned()]);
        Self {
            registry,
            roles,
            fallback: HashMap::new(),
            default_mapped: false,
        }
    }

    fn assign(&mut self, role: &str, key: String) {
        let replaces_implicit = role == DEFAULT_ROLE && !self.default_mapped;
        if role == DEFAULT_ROLE {
            self.default_mapped = true;
        }
        match self.roles.get_mut(role) {
            Some(nodes) if !replaces_implicit => {
                warn!(
                    role,
                    "role has multiple nodes and will be executed by multiple machines, fix --cluster if this is not intended"
                );
                nodes.push(key);
            }
            _ => {
                self.roles.insert(role.to_owned(), vec![key]);
            }
        }
    }

    /// Register `node` under `key` and append it to the nodes of `role`.
    pub fn add_node(&mut self, role: &str, key: impl Into<String>, node: Node) {
        let key = key.into();
        self.registry.insert(key.clone(), node);
        self.assign(role, key);
    }

    /// Whether `role` was given at least one node.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Map a role that is not defined to another one.
    pub fn set_fallback(&mut self, role: impl Into<String>, target: impl Into<String>) {
        self.fallback.insert(role.into(), target.into());
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn local(&self) -> Option<&Node> {
        self.registry.get(LOCALHOST)
    }

    /// Declared roles, in mapping order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Registry keys of the nodes of `role`, resolved like [`Cluster::role_for`].
    pub fn keys_for(&self, role: Option<&str>, context: Option<&RoleContext>) -> Result<Vec<String>, ClusterError> {
        let mut role = role.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_ROLE);
        if role == "self" {
            let context = context.ok_or(ClusterError::SelfWithoutContext)?;
            if let Some(node) = &context.node {
                return Ok(vec![node.clone()]);
            }
            role = context.role.as_str();
        }
        if !self.roles.contains_key(role) {
            if let Some(target) = self.fallback.get(role) {
                role = target.as_str();
            }
        }
        self.roles
            .get(role)
            .or_else(|| self.roles.get(DEFAULT_ROLE))
            .cloned()
            .ok_or_else(|| ClusterError::UnknownRole(role.to_owned()))
    }

    /// Nodes executing `role`.
    ///
    /// An empty role is `default`. `self` needs a context. A role that is
    /// not mapped goes through the fallback map, then falls back to
    /// `default`.
    pub fn role_for(&self, role: Option<&str>, context: Option<&RoleContext>) -> Result<Vec<&Node>, ClusterError> {
        Ok(self
            .keys_for(role, context)?
            .iter()
            .filter_map(|key| self.registry.get(key))
            .collect())
    }

    /// Replace `${role:idx:field}` with the NIC field of the first node of
    /// `role`. Unknown fields are left as is.
    pub fn substitute_nics(&self, text: &str, context: Option<&RoleContext>) -> Result<String, ClusterError> {
        if !text.contains("${") {
            return Ok(text.to_owned());
        }
        let mut failure = None;
        let replaced = nic_ref_pattern().replace_all(text, |caps: &Captures<'_>| {
            match self.resolve_nic_ref(caps, context) {
                Ok(Some(value)) => value,
                Ok(None) => caps[0].to_owned(),
                Err(error) => {
                    failure.get_or_insert(error);
                    caps[0].to_owned()
                }
            }
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(replaced.into_owned()),
        }
    }

    fn resolve_nic_ref(&self, caps: &Captures<'_>, context: Option<&RoleContext>) -> Result<Option<String>, ClusterError> {
        let Ok(field) = caps["field"].parse::<NicField>() else {
            return Ok(None);
        };
        let Ok(index) = caps["idx"].parse::<usize>() else {
            return Ok(None);
        };
        let nodes = self.role_for(Some(&caps["role"]), context)?;
        let Some(node) = nodes.first() else {
            return Err(ClusterError::UnknownRole(caps["role"].to_owned()));
        };
        Ok(Some(node.get_nic(index)?.get(field)))
    }
}

/// Create, configure and probe the node behind a remote mapping.
fn connect(mapping: &ClusterMapping, options: &HarnessOptions, interrupt: &Interrupt) -> Result<Node, Error> {
    let mut config = NodeConfig::new(mapping.addr.clone());
    config.user = mapping.user.clone();
    config.path = mapping.path.clone();
    let mut node = Node::remote(mapping.addr.clone(), config, interrupt);
    node.load_cluster_file(options)?;
    if let Some(nfs) = mapping.nfs {
        node.config.nfs = nfs;
    }
    if let Some(path) = &mapping.path {
        node.config.path = Some(path.clone());
    }
    if node.config.path.is_none() {
        node.config.path = Some(absolute(&options.experiment_path));
    }
    node.reconnect(interrupt);

    if options.do_test && options.do_conntest {
        node.check_access(options)?;
    }
    if options.do_test {
        node.discover_nics()?;
    }
    info!(node = %node.name(), addr = %node.config.addr, "node ready");
    Ok(node)
}

fn apply_mapping_vars(node: &mut Node, mapping: &ClusterMapping, interrupt: &Interrupt) -> Result<(), ClusterError> {
    if let Some(nics) = &mapping.nics {
        node.set_active_nics(nics.clone())?;
    }
    if let Some(multi) = mapping.multi {
        node.config.multi = Some(multi);
    }
    if let Some(mode) = &mapping.mode {
        node.config.mode = mode.clone();
        node.reconnect(interrupt);
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::ScriptedExecutor;
    use crate::executor::{ExecOptions, Executor};

    fn offline(dir: &Path) -> HarnessOptions {
        HarnessOptions::new()
            .experiment_path(dir)
            .do_test(false)
            .do_conntest(false)
    }

    fn mappings(args: &[&str]) -> Vec<ClusterMapping> {
        args.iter().map(|a| ClusterMapping::parse(a).unwrap()).collect()
    }

    #[test]
    fn should_parse_full_mapping() {
        let mapping = ClusterMapping::parse("worker=user@10.0.0.5:/data,nfs=0,nic=0+1").unwrap();
        assert_eq!(mapping.role, "worker");
        assert_eq!(mapping.user.as_deref(), Some("user"));
        assert_eq!(mapping.addr, "10.0.0.5");
        assert_eq!(mapping.path, Some(PathBuf::from("/data")));
        assert_eq!(mapping.nfs, Some(false));
        assert_eq!(mapping.nics, Some(vec![0, 1]));
    }

    #[test]
    fn should_parse_bare_mapping() {
        let mapping = ClusterMapping::parse("server=dut-1").unwrap();
        assert_eq!(mapping.addr, "dut-1");
        assert_eq!(mapping.user, None);
        assert_eq!(mapping.path, None);
    }

    #[test]
    fn should_reject_unknown_cluster_var() {
        let err = ClusterMapping::parse("worker=10.0.0.5,speed=10").unwrap_err();
        assert!(matches!(err, ClusterError::UnknownClusterVar(var) if var == "speed"));
    }

    #[test]
    fn should_reject_malformed_mapping() {
        assert!(matches!(ClusterMapping::parse("worker"), Err(ClusterError::BadMapping(_))));
        assert!(matches!(
            ClusterMapping::parse("worker=10.0.0.5,nic=a+b"),
            Err(ClusterError::BadClusterValue { .. })
        ));
    }

    #[test]
    fn should_bootstrap_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let options = offline(dir.path());
        let cluster = Cluster::bootstrap(
            &options,
            &mappings(&["worker=user@10.0.0.5:/data,nfs=0,nic=0+1"]),
            &Interrupt::new(),
        )
        .unwrap();
        let nodes = cluster.role_for(Some("worker"), None).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].config.addr, "10.0.0.5");
        assert!(!nodes[0].config.nfs);
        assert_eq!(nodes[0].active_nics(), &[0, 1]);
        assert!(!dir.path().join(ACCESS_MARKER).exists());
    }

    #[test]
    fn should_fan_out_role_in_mapping_order() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Cluster::bootstrap(
            &offline(dir.path()),
            &mappings(&["worker=10.0.0.5", "worker=10.0.0.6"]),
            &Interrupt::new(),
        )
        .unwrap();
        let addrs: Vec<_> = cluster
            .role_for(Some("worker"), None)
            .unwrap()
            .iter()
            .map(|n| n.config.addr.clone())
            .collect();
        assert_eq!(addrs, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn should_fan_out_repeated_default_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Cluster::bootstrap(
            &offline(dir.path()),
            &mappings(&["default=10.0.0.5", "default=10.0.0.6"]),
            &Interrupt::new(),
        )
        .unwrap();
        let addrs: Vec<_> = cluster
            .role_for(Some(DEFAULT_ROLE), None)
            .unwrap()
            .iter()
            .map(|n| n.config.addr.clone())
            .collect();
        assert_eq!(addrs, vec!["10.0.0.5", "10.0.0.6"]);
        assert!(cluster.role_for(None, None).unwrap().iter().all(|n| !n.is_local()));
    }

    #[test]
    fn should_share_node_between_roles() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Cluster::bootstrap(
            &offline(dir.path()),
            &mappings(&["client=10.0.0.5", "server=10.0.0.5", "dut=localhost"]),
            &Interrupt::new(),
        )
        .unwrap();
        assert_eq!(cluster.registry().len(), 2);
        assert!(cluster.role_for(Some("dut"), None).unwrap()[0].is_local());
    }

    #[test]
    fn should_fail_on_missing_experiment_path() {
        let dir = tempfile::tempdir().unwrap();
        let options = offline(&dir.path().join("missing"));
        let err = Cluster::bootstrap(&options, &[], &Interrupt::new()).unwrap_err();
        assert!(matches!(err, Error::Cluster(ClusterError::ExperimentPath(_))));
    }

    #[test]
    fn should_check_local_access() {
        let dir = tempfile::tempdir().unwrap();
        let options = HarnessOptions::new().experiment_path(dir.path()).do_test(false);
        let cluster = Cluster::bootstrap(&options, &[], &Interrupt::new()).unwrap();
        assert!(cluster.local().is_some());
    }

    #[test]
    fn should_run_local_node_in_its_cluster_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cluster")).unwrap();
        std::fs::write(
            dir.path().join("cluster/localhost.node"),
            format!("path={}\n", work.path().display()),
        )
        .unwrap();
        let options = HarnessOptions::new().experiment_path(dir.path()).do_test(false);
        let cluster = Cluster::bootstrap(&options, &[], &Interrupt::new()).unwrap();

        let local = cluster.local().unwrap();
        assert_eq!(local.executor().path(), Some(work.path()));
        let output = local.executor().exec("pwd", &ExecOptions::new()).unwrap();
        assert_eq!(
            Path::new(output.stdout.trim()).canonicalize().unwrap(),
            work.path().canonicalize().unwrap()
        );
        assert!(!work.path().join(ACCESS_MARKER).exists());
    }

    fn scripted_cluster() -> Cluster {
        let mut local = Node::scripted(LOCALHOST, NodeConfig::new(LOCALHOST), ScriptedExecutor::local());
        local
            .apply_node_file("0:ip=127.0.0.1\n", Path::new("localhost.node"), &Default::default())
            .unwrap();
        let mut cluster = Cluster::with_local(local);
        let mut server = Node::scripted("dut", NodeConfig::new("dut"), ScriptedExecutor::remote());
        server
            .apply_node_file("0:ip=10.0.0.1\n1:ip=10.0.1.1\n1:mac=aa:bb:cc:dd:ee:ff\n", Path::new("dut.node"), &Default::default())
            .unwrap();
        cluster.registry.insert("dut", server);
        cluster.assign("server", "dut".to_owned());
        cluster
    }

    #[test]
    fn should_resolve_default_and_fallback_roles() {
        let mut cluster = scripted_cluster();
        assert!(cluster.role_for(None, None).unwrap()[0].is_local());
        assert!(cluster.role_for(Some(""), None).unwrap()[0].is_local());
        assert!(cluster.role_for(Some("client"), None).unwrap()[0].is_local());
        cluster.set_fallback("router", "server");
        assert_eq!(cluster.role_for(Some("router"), None).unwrap()[0].name(), "dut");
    }

    #[test]
    fn should_require_context_for_self() {
        let cluster = scripted_cluster();
        assert!(matches!(cluster.role_for(Some("self"), None), Err(ClusterError::SelfWithoutContext)));
        let context = RoleContext::new("server");
        assert_eq!(cluster.role_for(Some("self"), Some(&context)).unwrap()[0].name(), "dut");
        let bound = RoleContext::new("client").on_node(LOCALHOST);
        assert!(cluster.role_for(Some("self"), Some(&bound)).unwrap()[0].is_local());
    }

    #[test]
    fn should_substitute_nic_references() {
        let cluster = scripted_cluster();
        let text = "ping ${server:1:ip} from ${default:0:ip} via ${server:1:mac} ${server:0:color}";
        assert_eq!(
            cluster.substitute_nics(text, None).unwrap(),
            "ping 10.0.1.1 from 127.0.0.1 via aa:bb:cc:dd:ee:ff ${server:0:color}"
        );
        let context = RoleContext::new("server");
        assert_eq!(cluster.substitute_nics("${self:0:ip}", Some(&context)).unwrap(), "10.0.0.1");
        assert!(matches!(
            cluster.substitute_nics("${self:0:ip}", None),
            Err(ClusterError::SelfWithoutContext)
        ));
    }
}
