//! Run-wide options of the harness.

use std::path::{Path, PathBuf};

use crate::tags::TagSet;

/// Policy shared by every testie of one invocation.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Active tags.
    pub tags: TagSet,
    /// Run the commands of the tests. When off, bootstrap only.
    pub do_test: bool,
    /// Probe remote nodes before using them.
    pub do_conntest: bool,
    /// Run the scripts of one matrix point in parallel.
    pub allow_mp: bool,
    /// Working directory of every command, shared across nodes when nfs is on.
    pub experiment_path: PathBuf,
    /// Extra folders searched for cluster files and testies.
    pub search_path: Vec<PathBuf>,
    /// Output directory for JSON run records.
    pub output_dir: PathBuf,
    /// Log every rendered command before running it.
    pub show_cmd: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            tags: TagSet::new(),
            do_test: true,
            do_conntest: true,
            allow_mp: true,
            experiment_path: PathBuf::from("."),
            search_path: Vec::new(),
            output_dir: PathBuf::from("results"),
            show_cmd: false,
        }
    }
}

impl HarnessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from environment variables.
    ///
    /// Supported variables:
    /// - `NPF_TAGS`: comma separated active tags
    /// - `NPF_EXPERIMENT_PATH`: experiment path (default: `.`)
    /// - `NPF_OUTPUT_DIR`: output directory (default: `results`)
    /// - `NPF_SEARCH_PATH`: colon separated extra search folders
    /// - `NPF_NO_MP`: disable parallel scripts
    /// - `NPF_NO_CONNTEST`: skip connectivity probes
    pub fn from_env() -> Self {
        let mut opts = Self::default();

        if let Ok(v) = std::env::var("NPF_TAGS") {
            opts.tags = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("NPF_EXPERIMENT_PATH") {
            opts.experiment_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NPF_OUTPUT_DIR") {
            opts.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("NPF_SEARCH_PATH") {
            opts.search_path = std::env::split_paths(&v).collect();
        }
        if let Ok(v) = std::env::var("NPF_NO_MP") {
            opts.allow_mp = !env_flag(&v);
        }
        if let Ok(v) = std::env::var("NPF_NO_CONNTEST") {
            opts.do_conntest = !env_flag(&v);
        }

        opts
    }

    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn do_test(mut self, v: bool) -> Self {
        self.do_test = v;
        self
    }

    pub fn do_conntest(mut self, v: bool) -> Self {
        self.do_conntest = v;
        self
    }

    pub fn allow_mp(mut self, v: bool) -> Self {
        self.allow_mp = v;
        self
    }

    pub fn experiment_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.experiment_path = path.into();
        self
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_path.push(path.into());
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn show_cmd(mut self, v: bool) -> Self {
        self.show_cmd = v;
        self
    }

    /// Locate `relative` in the working directory, the experiment path,
    /// then every search folder. The first existing candidate wins.
    pub fn find_local(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return relative.exists().then(|| relative.to_owned());
        }
        std::iter::once(Path::new("."))
            .chain(std::iter::once(self.experiment_path.as_path()))
            .chain(self.search_path.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(relative))
            .find(|candidate| candidate.exists())
    }
}

fn env_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}
