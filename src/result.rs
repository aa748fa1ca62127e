//! Run records handed to reporters and to the regression layer.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::executor::ExecOutput;

/// One script executed on one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub role: String,
    pub node: String,
    /// Instance number when the node runs several copies (`multi`).
    #[serde(default)]
    pub instance: u32,
    pub output: ExecOutput,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// One repetition of a matrix point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u64,
    pub scripts: Vec<ScriptRecord>,
    /// Wall-clock time of the whole run.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunRecord {
    /// Every script exited with 0 before its timeout. Scripts stopped
    /// because a sibling ended do not count.
    pub fn success(&self) -> bool {
        self.scripts
            .iter()
            .filter(|s| !s.output.stopped)
            .all(|s| s.output.success())
    }

    /// Scripts killed when a sibling ended.
    pub fn stopped(&self) -> usize {
        self.scripts.iter().filter(|s| s.output.stopped).count()
    }

    pub fn timed_out(&self) -> bool {
        self.scripts.iter().any(|s| s.output.timed_out)
    }
}

/// All runs of one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    pub index: usize,
    pub assignment: IndexMap<String, String>,
    pub runs: Vec<RunRecord>,
    /// Why the point was not run, e.g. a failed `%require`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl PointRecord {
    pub fn failed_runs(&self) -> usize {
        self.runs.iter().filter(|r| !r.success()).count()
    }
}

/// Everything produced for one test specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestieRecord {
    pub testie: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub tags: Vec<String>,
    pub points: Vec<PointRecord>,
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Unix time in milliseconds.
    pub started_at: String,
    /// Why the whole specification was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl TestieRecord {
    /// Load a record from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn run_count(&self) -> usize {
        self.points.iter().map(|p| p.runs.len()).sum()
    }

    pub fn failed_runs(&self) -> usize {
        self.points.iter().map(PointRecord::failed_runs).sum()
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_nanos().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u128::deserialize(d)?;
        let nanos = u64::try_from(nanos).map_err(serde::de::Error::custom)?;
        Ok(Duration::from_nanos(nanos))
    }
}
