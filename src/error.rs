//! Error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::executor::ExecError;

/// Position of a line inside a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    /// One-based line number.
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Malformed variable declaration or override.
#[derive(Debug, Error, PartialEq)]
pub enum VariableError {
    #[error("expected `name=value`, got `{0}`")]
    MissingAssignment(String),
    #[error("invalid variable name `{0}`")]
    InvalidName(String),
    #[error("invalid range `{0}`")]
    InvalidRange(String),
    #[error("variable `{0}` has no values")]
    EmptyDomain(String),
    #[error("range `{0}` expands to {1} values, more than {max}", max = crate::variable::MAX_RANGE_VALUES)]
    RangeTooLarge(String, usize),
}

/// Errors in a test specification. Fatal for the file being parsed.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("{location}: unknown section line `{header}`")]
    UnknownSection { location: Location, header: String },
    #[error("{location}: only one section of type `{kind}` is allowed")]
    DuplicateSection { location: Location, kind: String },
    #[error("{location}: only script sections take arguments (`{kind}` has `{params}`)")]
    UnexpectedArguments {
        location: Location,
        kind: String,
        params: String,
    },
    #[error("{location}: {source}")]
    Variable {
        location: Location,
        #[source]
        source: VariableError,
    },
    #[error("{0}")]
    Override(VariableError),
    #[error("variable `{0}` has an empty domain and cannot be expanded")]
    EmptyDomain(String),
    #[error("unable to read specification {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while building the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("bad definition of cluster parameter `{0}`")]
    BadMapping(String),
    #[error("unknown cluster variable `{0}`")]
    UnknownClusterVar(String),
    #[error("invalid value `{value}` for cluster variable `{var}`")]
    BadClusterValue { var: String, value: String },
    #[error("{location}: unknown node config line `{line}`")]
    UnknownNodeLine { location: Location, line: String },
    #[error("{location}: unknown node field `{field}`")]
    UnknownNodeField { location: Location, field: String },
    #[error("{location}: invalid value `{value}` for `{field}`")]
    BadNodeValue {
        location: Location,
        field: String,
        value: String,
    },
    #[error("node {node} has no nic number {index}")]
    NoSuchNic { node: String, index: usize },
    #[error("using `self` without a role context, usually `self` was used in a %file")]
    SelfWithoutContext,
    #[error("role `{0}` is not mapped and no default role exists")]
    UnknownRole(String),
    #[error("the experiment root {0:?} is not accessible, define it with --experiment-path and make sure it is writable")]
    ExperimentPath(PathBuf),
    #[error("unable to read node file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Connectivity failures. Fatal for the node concerned.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("could not resolve hostname `{addr}`")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not communicate with{} node {addr}, got return code {code}: {output}", user_suffix(.user))]
    Unreachable {
        user: Option<String>,
        addr: String,
        code: i32,
        output: String,
    },
    #[error("could not find the access test file at {path}. Verify the path= parameter in the cluster file and that this directory already exists. It must match --experiment-path on the remote when nfs is active. If the path is not shared across nodes, set nfs=0")]
    MarkerMissing { path: String },
    #[error("could not communicate with{} node {addr}: unbuffer (expect package) could not be installed or passwordless sudo is not working, got return code {code}: {output}", user_suffix(.user))]
    Misconfigured {
        user: Option<String>,
        addr: String,
        code: i32,
        output: String,
    },
    #[error("the local executor could not find the file created at {path}. Check your --experiment-path argument! Output: {output}")]
    LocalAccess { path: String, output: String },
    #[error("unable to create access marker {path:?}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

fn user_suffix(user: &Option<String>) -> String {
    user.as_ref()
        .map(|u| format!(" user {u} on"))
        .unwrap_or_default()
}

/// Any error raised by the harness.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("unable to write {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
