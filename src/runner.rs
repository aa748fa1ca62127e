//! The matrix runner.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cluster::{Cluster, RoleContext, DEFAULT_ROLE};
use crate::config::parse_bool;
use crate::error::{ClusterError, Error};
use crate::executor::{ExecError, ExecOptions, ExecOutput, Interrupt};
use crate::expander::Assignment;
use crate::node::Node;
use crate::options::HarnessOptions;
use crate::report::{ConsoleReporter, JsonReporter, Reporter};
use crate::result::{PointRecord, RunRecord, ScriptRecord, TestieRecord};
use crate::section::RequireSection;
use crate::testie::TestSpecification;

/// Granularity of the wait before a delayed script starts.
const DELAY_SLICE: Duration = Duration::from_millis(10);

/// Runs every point of a specification's matrix on a bootstrapped cluster.
///
/// # Example
///
/// ```rust,no_run
/// use npf_harness::{Cluster, HarnessOptions, Interrupt, MatrixRunner, TestSpecification};
///
/// let options = HarnessOptions::from_env();
/// let interrupt = Interrupt::new();
/// let cluster = Cluster::bootstrap(&options, &[], &interrupt)?;
/// let testie = TestSpecification::from_file("tests/iperf.npf", &options.tags)?;
///
/// let mut runner = MatrixRunner::with_config(&cluster, options);
/// runner.interrupt(interrupt.clone());
/// let record = runner.run(&testie)?;
/// println!("{} runs", record.run_count());
/// # Ok::<(), npf_harness::Error>(())
/// ```
pub struct MatrixRunner<'c> {
    cluster: &'c Cluster,
    options: HarnessOptions,
    reporters: Vec<Box<dyn Reporter>>,
    interrupt: Interrupt,
}

/// One script instance bound to a node.
struct Job<'a> {
    role: String,
    key: String,
    node: &'a Node,
    instance: u32,
    multi: u32,
    command: String,
    delay: Duration,
    autokill: bool,
}

impl<'c> MatrixRunner<'c> {
    /// Create a runner with options from the environment.
    pub fn new(cluster: &'c Cluster) -> Self {
        Self::with_config(cluster, HarnessOptions::from_env())
    }

    /// Create a runner with explicit options.
    pub fn with_config(cluster: &'c Cluster, options: HarnessOptions) -> Self {
        // Default reporters: console (always) + JSON
        let reporters: Vec<Box<dyn Reporter>> = vec![
            Box::new(ConsoleReporter::new()),
            Box::new(JsonReporter::new(options.output_dir.clone())),
        ];
        Self {
            cluster,
            options,
            reporters,
            interrupt: Interrupt::new(),
        }
    }

    /// Abort between points and during script delays when `interrupt` is
    /// raised. Pass the flag the cluster's executors were built with.
    pub fn interrupt(&mut self, interrupt: Interrupt) -> &mut Self {
        self.interrupt = interrupt;
        self
    }

    /// Replace reporters with a custom set.
    pub fn reporters(&mut self, reporters: Vec<Box<dyn Reporter>>) -> &mut Self {
        self.reporters = reporters;
        self
    }

    /// Add an additional reporter.
    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) -> &mut Self {
        self.reporters.push(reporter);
        self
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// Run every point of `testie`, `n_runs` times each.
    ///
    /// Failing scripts and timeouts are recorded, not raised. An interrupt
    /// aborts the whole run with [`ExecError::Interrupted`].
    pub fn run(&self, testie: &TestSpecification) -> Result<TestieRecord, Error> {
        let started = Instant::now();
        let mut record = TestieRecord {
            testie: testie.name().to_owned(),
            path: testie.path().map(Path::to_path_buf),
            tags: testie.tags().iter().map(str::to_owned).collect(),
            points: Vec::new(),
            total_duration: Duration::ZERO,
            started_at: chrono_timestamp(),
            skipped: None,
        };

        let missing = testie.missing_required_tags();
        if !missing.is_empty() {
            record.skipped = Some(format!("missing required tags: {}", missing.join(", ")));
            return Ok(self.finish(record, started));
        }
        if !self.options.do_test {
            record.skipped = Some("tests are disabled".to_owned());
            return Ok(self.finish(record, started));
        }

        let points = testie.expand()?;
        for r in &self.reporters {
            r.testie_start(testie, points.len());
        }

        for (index, assignment) in points.into_iter().enumerate() {
            if self.interrupt.is_raised() {
                return Err(ExecError::Interrupted { pid: 0 }.into());
            }
            for r in &self.reporters {
                r.point_start(index, &assignment);
            }
            let point = self.run_point(testie, index, assignment)?;
            for r in &self.reporters {
                r.point_end(&point);
            }
            record.points.push(point);
        }

        Ok(self.finish(record, started))
    }

    fn finish(&self, mut record: TestieRecord, started: Instant) -> TestieRecord {
        record.total_duration = started.elapsed();
        for r in &self.reporters {
            r.testie_end(&record);
        }
        record
    }

    fn run_point(&self, testie: &TestSpecification, index: usize, assignment: Assignment) -> Result<PointRecord, Error> {
        let mut point = PointRecord {
            index,
            assignment,
            runs: Vec::new(),
            skipped: None,
        };
        if let Some(require) = &testie.require {
            if let Some(reason) = self.check_require(testie, require, &point.assignment)? {
                point.skipped = Some(reason);
                return Ok(point);
            }
        }
        self.write_files(testie, &point.assignment)?;
        for run in 0..testie.config.n_runs() {
            let record = self.run_once(testie, &point.assignment, run)?;
            if !record.success() {
                debug!(point = index, run, "run failed");
            }
            point.runs.push(record);
        }
        Ok(point)
    }

    /// `Some(reason)` when the requirements do not hold for this point.
    fn check_require(
        &self,
        testie: &TestSpecification,
        require: &RequireSection,
        assignment: &Assignment,
    ) -> Result<Option<String>, Error> {
        let context = RoleContext::new(require.role());
        let command = self.render(testie, &require.content, assignment, Some(&context))?;
        let options = self.exec_options(testie).title("require");
        for node in self.cluster.role_for(Some(require.role()), Some(&context))? {
            let output = node.executor().exec(&command, &options)?;
            if !output.success() {
                return Ok(Some(format!(
                    "requirement failed on {}: {}",
                    node.name(),
                    output.combined().trim()
                )));
            }
        }
        Ok(None)
    }

    /// Write the `%file` sections to the experiment path and copy them to
    /// the remote nodes that do not share it.
    fn write_files(&self, testie: &TestSpecification, assignment: &Assignment) -> Result<(), Error> {
        for file in &testie.files {
            let content = self.render(testie, &file.content, assignment, None)?;
            let path = self.options.experiment_path.join(&file.name);
            std::fs::write(&path, content).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            for (_, node) in self.cluster.registry().iter() {
                if !node.is_local() && !node.config.nfs {
                    node.executor().send_file(&path, &file.name)?;
                }
            }
        }
        Ok(())
    }

    fn run_once(&self, testie: &TestSpecification, assignment: &Assignment, run: u64) -> Result<RunRecord, Error> {
        let jobs = self.jobs(testie, assignment)?;
        let options = self.exec_options(testie);
        let started = Instant::now();

        let scripts = if self.options.allow_mp && jobs.len() > 1 {
            let stop = Interrupt::new();
            thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter()
                    .map(|job| {
                        let options = options.clone().stop(stop.clone());
                        let stop = &stop;
                        let interrupt = &self.interrupt;
                        scope.spawn(move || job.execute(options, Some(stop), interrupt))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect::<Result<Vec<_>, ExecError>>()
            })?
        } else {
            jobs.iter()
                .map(|job| job.execute(options.clone(), None, &self.interrupt))
                .collect::<Result<Vec<_>, ExecError>>()?
        };

        Ok(RunRecord {
            run,
            scripts,
            duration: started.elapsed(),
        })
    }

    /// Every script instance of one run, in declaration order, rendered for
    /// the node it runs on.
    fn jobs<'a>(&'a self, testie: &TestSpecification, assignment: &Assignment) -> Result<Vec<Job<'a>>, Error> {
        let autokill = testie.config.get_bool("autokill").unwrap_or(true);
        let mut jobs = Vec::new();
        for script in &testie.scripts {
            let role = self.script_role(testie, script.role());
            let context = RoleContext::new(role.clone());
            for key in self.cluster.keys_for(Some(role.as_str()), Some(&context))? {
                let node = self
                    .cluster
                    .registry()
                    .get(&key)
                    .ok_or_else(|| ClusterError::UnknownRole(role.clone()))?;
                let bound = context.clone().on_node(key.clone());
                let command = self.render(testie, &script.content, assignment, Some(&bound))?;
                let multi = node.config.multi.unwrap_or(1).max(1);
                for instance in 0..multi {
                    jobs.push(Job {
                        role: role.clone(),
                        key: key.clone(),
                        node,
                        instance,
                        multi,
                        command: command.clone(),
                        delay: script.delay(),
                        autokill: script
                            .params
                            .get("autokill")
                            .and_then(|v| parse_bool(v))
                            .unwrap_or(autokill),
                    });
                }
            }
        }
        Ok(jobs)
    }

    /// Role a script runs as, through the `default_role_map` config entry
    /// when the cluster does not define it.
    fn script_role(&self, testie: &TestSpecification, declared: Option<&str>) -> String {
        let role = declared.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_ROLE);
        if self.cluster.has_role(role) {
            return role.to_owned();
        }
        let Some(lookup) = testie.config.get_dict("default_role_map") else {
            return role.to_owned();
        };
        if lookup.is_degraded() {
            warn!(testie = %testie.name(), "default_role_map is not a mapping");
        }
        lookup
            .into_map()
            .get(role)
            .cloned()
            .unwrap_or_else(|| role.to_owned())
    }

    fn render(
        &self,
        testie: &TestSpecification,
        text: &str,
        assignment: &Assignment,
        context: Option<&RoleContext>,
    ) -> Result<String, ClusterError> {
        let text = testie.variables.render(text, assignment);
        self.cluster.substitute_nics(&text, context)
    }

    fn exec_options(&self, testie: &TestSpecification) -> ExecOptions {
        ExecOptions::new()
            .timeout(testie.config.timeout())
            .show_cmd(self.options.show_cmd)
    }
}

impl Job<'_> {
    fn execute(
        &self,
        options: ExecOptions,
        stop: Option<&Interrupt>,
        interrupt: &Interrupt,
    ) -> Result<ScriptRecord, ExecError> {
        if !self.wait_delay(stop, interrupt)? {
            debug!(role = %self.role, node = %self.key, "run ended during the script delay, not starting it");
            return Ok(self.record(
                ExecOutput {
                    code: -1,
                    stopped: true,
                    ..ExecOutput::default()
                },
                Duration::ZERO,
            ));
        }
        let options = options
            .title(format!("{}@{}#{}", self.role, self.key, self.instance))
            .env("NPF_ROLE", self.role.as_str())
            .env("NPF_NODE", self.node.name())
            .env("NPF_MULTI", self.multi.to_string())
            .env("NPF_MULTI_ID", self.instance.to_string());

        let started = Instant::now();
        let output = self.node.executor().exec(&self.command, &options)?;
        let duration = started.elapsed();

        if self.autokill {
            if let Some(stop) = stop {
                if !stop.is_raised() {
                    debug!(role = %self.role, node = %self.key, "script ended, stopping the others");
                }
                stop.raise();
            }
        }

        Ok(self.record(output, duration))
    }

    /// Sleep through the script delay. `false` when a sibling ended first.
    fn wait_delay(&self, stop: Option<&Interrupt>, interrupt: &Interrupt) -> Result<bool, ExecError> {
        let deadline = Instant::now() + self.delay;
        loop {
            if interrupt.is_raised() {
                return Err(ExecError::Interrupted { pid: 0 });
            }
            if stop.is_some_and(Interrupt::is_raised) {
                return Ok(false);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(true);
            }
            thread::sleep(left.min(DELAY_SLICE));
        }
    }

    fn record(&self, output: ExecOutput, duration: Duration) -> ScriptRecord {
        ScriptRecord {
            role: self.role.clone(),
            node: self.key.clone(),
            instance: self.instance,
            output,
            duration,
        }
    }
}

fn chrono_timestamp() -> String {
    // Unix time in milliseconds, unique enough for quick successive runs
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_millis())
}
