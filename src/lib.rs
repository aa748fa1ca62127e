//! # npf-harness
//!
//! Test-specification compiler and execution-topology engine for network
//! performance regression testing.
//!
//! A test specification ("testie") is a text file split into `%` sections:
//! variables whose cartesian product forms the test matrix, a config
//! section, scripts bound to roles, files written before each run and a
//! requirement check. Roles are mapped onto local or SSH-reachable nodes
//! from the command line, and every command runs in its own process group
//! so a timeout or an interrupt leaves nothing behind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use npf_harness::{Cluster, ClusterMapping, HarnessOptions, Interrupt, MatrixRunner, TestSpecification};
//!
//! let options = HarnessOptions::from_env();
//! let interrupt = Interrupt::new();
//! let mappings = vec![ClusterMapping::parse("server=user@10.0.0.5:/data,nfs=0")?];
//! let cluster = Cluster::bootstrap(&options, &mappings, &interrupt)?;
//!
//! let testie = TestSpecification::parse(
//!     "iperf",
//!     "%variables\nrate=10,100\n%script@server\niperf3 -s\n%script\niperf3 -c ${server:0:ip} -b ${rate}M\n",
//!     &options.tags,
//! )?;
//! let record = MatrixRunner::with_config(&cluster, options).run(&testie)?;
//! println!("{} points", record.points.len());
//! # Ok::<(), npf_harness::Error>(())
//! ```

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod expander;
pub mod nic;
pub mod node;
pub mod options;
pub mod report;
pub mod result;
pub mod runner;
pub mod section;
pub mod tags;
pub mod testie;
pub mod variable;

pub use cluster::{Cluster, ClusterMapping, NodeRegistry, RoleContext};
pub use config::{ConfigSection, ConfigValue, DictLookup};
pub use discovery::discover;
pub use error::{ClusterError, ConnectivityError, Error, Result, SpecError, VariableError};
pub use executor::{ExecError, ExecOptions, ExecOutput, Executor, Interrupt, LocalExecutor, SshExecutor};
pub use expander::{Assignment, MatrixExpander};
pub use nic::{Nic, NicField};
pub use node::{Node, NodeConfig, NodeState};
pub use options::HarnessOptions;
pub use report::{ConsoleReporter, JsonReporter, Reporter};
pub use result::{PointRecord, RunRecord, ScriptRecord, TestieRecord};
pub use runner::MatrixRunner;
pub use section::{Section, SectionKind};
pub use tags::TagSet;
pub use testie::{Overrides, TestSpecification};
pub use variable::Variable;
