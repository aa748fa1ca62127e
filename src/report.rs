//! Pluggable reporters for run records.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::expander::Assignment;
use crate::result::{PointRecord, TestieRecord};
use crate::testie::TestSpecification;

/// Trait for run record reporters.
pub trait Reporter: Send + Sync {
    /// Called before the first point of a specification.
    fn testie_start(&self, _testie: &TestSpecification, _points: usize) {}

    /// Called when a matrix point starts.
    fn point_start(&self, _index: usize, _assignment: &Assignment) {}

    /// Called when every run of a point completed.
    fn point_end(&self, _point: &PointRecord) {}

    /// Called when a specification completes, or is skipped.
    fn testie_end(&self, _record: &TestieRecord) {}
}

/// Logs progress through `tracing`.
pub struct ConsoleReporter {
    show_output: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self { show_output: false }
    }

    /// Also log the stdout of every script.
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    fn format_duration(d: Duration) -> String {
        if d.as_secs() > 0 {
            format!("{:.2}s", d.as_secs_f64())
        } else if d.as_millis() > 0 {
            format!("{:.2}ms", d.as_secs_f64() * 1000.0)
        } else {
            format!("{:.2}µs", d.as_secs_f64() * 1_000_000.0)
        }
    }

    fn format_assignment(assignment: &Assignment) -> String {
        assignment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn testie_start(&self, testie: &TestSpecification, points: usize) {
        let title = testie
            .info
            .as_ref()
            .and_then(|i| i.title())
            .unwrap_or(testie.name());
        info!(testie = %testie.name(), points, runs = testie.config.n_runs(), "{title}");
    }

    fn point_start(&self, index: usize, assignment: &Assignment) {
        info!(point = index, "{}", Self::format_assignment(assignment));
    }

    fn point_end(&self, point: &PointRecord) {
        if let Some(reason) = &point.skipped {
            warn!(point = point.index, "skipped: {reason}");
            return;
        }
        let durations: Vec<_> = point
            .runs
            .iter()
            .map(|r| Self::format_duration(r.duration))
            .collect();
        let failed = point.failed_runs();
        if failed > 0 {
            warn!(point = point.index, failed, "runs: [{}]", durations.join(", "));
        } else {
            info!(point = point.index, "runs: [{}]", durations.join(", "));
        }
        if self.show_output {
            for script in point.runs.iter().flat_map(|r| &r.scripts) {
                info!(role = %script.role, node = %script.node, "{}", script.output.stdout.trim_end());
            }
        }
    }

    fn testie_end(&self, record: &TestieRecord) {
        if let Some(reason) = &record.skipped {
            warn!(testie = %record.testie, "skipped: {reason}");
            return;
        }
        info!(
            testie = %record.testie,
            failed = record.failed_runs(),
            "completed {} runs over {} points in {}",
            record.run_count(),
            record.points.len(),
            Self::format_duration(record.total_duration)
        );
    }
}

/// Writes one JSON document per specification.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Where the record of `testie` is written.
    pub fn path_for(&self, testie: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", testie.replace('/', "_")))
    }
}

impl Reporter for JsonReporter {
    fn testie_end(&self, record: &TestieRecord) {
        if let Err(e) = write_json_record(&self.output_dir, &self.path_for(&record.testie), record) {
            warn!(error = %e, "failed to write JSON results");
        }
    }
}

fn write_json_record(output_dir: &Path, path: &Path, record: &TestieRecord) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "results written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_format_duration_in_appropriate_units() {
        assert!(ConsoleReporter::format_duration(Duration::from_secs(2)).contains('s'));
        assert!(ConsoleReporter::format_duration(Duration::from_millis(500)).contains("ms"));
        assert!(ConsoleReporter::format_duration(Duration::from_micros(100)).contains("µs"));
    }

    #[test]
    fn should_format_assignment_in_order() {
        let assignment = Assignment::from([
            ("size".to_string(), "64".to_string()),
            ("rate".to_string(), "10".to_string()),
        ]);
        assert_eq!(ConsoleReporter::format_assignment(&assignment), "size=64, rate=10");
    }

    #[test]
    fn should_write_record_named_after_testie() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = JsonReporter::new(dir.path().join("results"));
        let record = TestieRecord {
            testie: "tcp/iperf".to_string(),
            path: None,
            tags: vec![],
            points: vec![],
            total_duration: Duration::ZERO,
            started_at: "0".to_string(),
            skipped: None,
        };
        reporter.testie_end(&record);
        let written = dir.path().join("results/tcp_iperf.json");
        assert_eq!(reporter.path_for("tcp/iperf"), written);
        assert_eq!(TestieRecord::load(&written).unwrap().testie, "tcp/iperf");
    }
}
