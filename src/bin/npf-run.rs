//! npf-run: run network performance test specifications on a cluster.
//!
//! ## Model
//!
//! 1. **Bootstrap once**: `--cluster role=[user@]addr[:path][,var=val]...`
//!    mappings are resolved into nodes, probed, and their NICs discovered.
//! 2. **Compile each testie**: sections are filtered by the active tags and
//!    `--variables` / `--config` overrides are applied last.
//! 3. **Run the matrix**: every point runs `n_runs` times, results are
//!    written as JSON to the output directory.
//!
//! ## Expected Layout
//!
//! ```text
//! experiment/
//!   cluster/
//!     server.node     # per-node NIC and field overrides
//!   tests/
//!     iperf.npf
//!     forward.npf
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use npf_harness::{
    discover, Cluster, ClusterMapping, ConsoleReporter, Error, ExecError, HarnessOptions, Interrupt,
    JsonReporter, MatrixRunner, Overrides, Reporter, TestSpecification, TestieRecord,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "npf-run",
    about = "Run network performance test specifications",
    long_about = "
npf-run compiles test specifications (testies) into a matrix of variable
assignments and runs their scripts on the nodes given by --cluster.

Example:
    npf-run --testie tests/iperf.npf
    npf-run --testie tests --filter 'tcp*' --tags fast
    npf-run --testie tests/iperf.npf --cluster server=user@10.0.0.5,nfs=0
    npf-run --testie tests/iperf.npf --variables rate=100 --config n_runs=1
"
)]
struct Cli {
    // ========================================================================
    // Test Selection
    // ========================================================================
    /// Test specification file, or folder searched for *.npf / *.testie
    #[arg(long, default_value = "tests")]
    testie: PathBuf,

    /// Filter specifications of a folder by glob pattern on their name
    #[arg(long)]
    filter: Option<String>,

    /// Active tags, comma or space separated
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    tags: Vec<String>,

    // ========================================================================
    // Overrides
    // ========================================================================
    /// Variable overrides, `[tag:]name=value`
    #[arg(long, num_args = 1..)]
    variables: Vec<String>,

    /// Config overrides, `[tag:]name=value`
    #[arg(long, num_args = 1..)]
    config: Vec<String>,

    // ========================================================================
    // Cluster
    // ========================================================================
    /// Role mappings, `role=[user@]addr[:path][,var=val]...`
    #[arg(long, num_args = 1..)]
    cluster: Vec<String>,

    /// Only bootstrap the cluster, do not run any test
    #[arg(long)]
    no_test: bool,

    /// Skip connectivity probes of remote nodes
    #[arg(long)]
    no_conntest: bool,

    /// Run the scripts of a point one after another
    #[arg(long)]
    no_mp: bool,

    /// Working directory of every command
    #[arg(long)]
    experiment_path: Option<PathBuf>,

    /// Extra folders searched for testies and cluster files
    #[arg(long)]
    search_path: Vec<PathBuf>,

    // ========================================================================
    // Output Control
    // ========================================================================
    /// Output directory for JSON results
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Log every command before running it
    #[arg(long)]
    show_cmd: bool,

    /// Log the output of every script
    #[arg(long)]
    show_full: bool,

    /// Keep going when a testie fails to compile or run
    #[arg(long)]
    no_fail_fast: bool,

    /// Verbose output
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Quiet mode (minimal output, only errors)
    #[arg(long, short = 'q')]
    quiet: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_cli(&cli);
    init_tracing(verbosity);

    let records = run(cli, verbosity)?;

    let failed = records
        .iter()
        .filter(|r| r.failed_runs() > 0)
        .count();
    if failed > 0 {
        if verbosity.is_normal() {
            eprintln!("\n❌ {} of {} testie(s) had failing runs", failed, records.len());
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli, verbosity: Verbosity) -> Result<Vec<TestieRecord>> {
    let options = build_options(&cli);

    let interrupt = Interrupt::new();
    interrupt
        .install_handler()
        .context("unable to install the interrupt handler")?;

    // Step 1: Bootstrap the cluster
    let mappings = cli
        .cluster
        .iter()
        .map(|m| ClusterMapping::parse(m).with_context(|| format!("invalid cluster mapping `{m}`")))
        .collect::<Result<Vec<_>>>()?;
    let cluster = Cluster::bootstrap(&options, &mappings, &interrupt).context("cluster bootstrap failed")?;

    if verbosity.is_verbose() {
        for (key, node) in cluster.registry().iter() {
            eprintln!("🖧  {} -> {} ({:?})", key, node.config.addr, node.state());
        }
    }
    if !options.do_test {
        return Ok(Vec::new());
    }

    // Step 2: Discover testies
    let root = if cli.testie.exists() {
        cli.testie.clone()
    } else {
        options
            .find_local(&cli.testie)
            .with_context(|| format!("testie {} not found", cli.testie.display()))?
    };
    let files = discover(&root, cli.filter.as_deref())
        .with_context(|| format!("unable to list testies in {}", root.display()))?;
    if files.is_empty() {
        if verbosity.is_normal() {
            eprintln!("⚠️  No testie found in {}", root.display());
        }
        return Ok(Vec::new());
    }

    let overrides = cli
        .variables
        .iter()
        .fold(Overrides::new(), |o, v| o.variable(v.as_str()));
    let overrides = cli.config.iter().fold(overrides, |o, c| o.config(c.as_str()));

    // Step 3: Run them
    let mut runner = MatrixRunner::with_config(&cluster, options.clone());
    runner.interrupt(interrupt.clone());
    if cli.show_full {
        let reporters: Vec<Box<dyn Reporter>> = vec![
            Box::new(ConsoleReporter::new().show_output(true)),
            Box::new(JsonReporter::new(options.output_dir.clone())),
        ];
        runner.reporters(reporters);
    }

    let mut records = Vec::new();
    for file in &files {
        match run_testie(&runner, file, &options, &overrides) {
            Ok(record) => records.push(record),
            Err(e) if is_interrupt(&e) => bail!("interrupted"),
            Err(e) if cli.no_fail_fast => error!("{:#}", e),
            Err(e) => return Err(e),
        }
    }

    // Step 4: Report results
    report_results(&records, verbosity);
    Ok(records)
}

fn run_testie(
    runner: &MatrixRunner<'_>,
    file: &Path,
    options: &HarnessOptions,
    overrides: &Overrides,
) -> Result<TestieRecord> {
    let mut testie = TestSpecification::from_file(file, &options.tags)
        .with_context(|| format!("unable to compile {}", file.display()))?;
    testie
        .apply_overrides(overrides)
        .with_context(|| format!("invalid override for {}", file.display()))?;
    runner
        .run(&testie)
        .with_context(|| format!("unable to run {}", testie.name()))
}

fn is_interrupt(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<Error>(),
        Some(Error::Exec(ExecError::Interrupted { .. }))
    )
}

/// Environment first, then the command line.
fn build_options(cli: &Cli) -> HarnessOptions {
    let mut options = HarnessOptions::from_env()
        .do_test(!cli.no_test)
        .show_cmd(cli.show_cmd);
    for tag in &cli.tags {
        options = options.tag(tag.trim());
    }
    if cli.no_conntest {
        options = options.do_conntest(false);
    }
    if cli.no_mp {
        options = options.allow_mp(false);
    }
    if let Some(path) = &cli.experiment_path {
        options = options.experiment_path(path);
    }
    for path in &cli.search_path {
        options = options.search_path(path);
    }
    if let Some(dir) = &cli.output_dir {
        options = options.output_dir(dir);
    }
    options
}

// ============================================================================
// Verbosity Control
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_cli(cli: &Cli) -> Self {
        if cli.quiet {
            Verbosity::Quiet
        } else if cli.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn is_quiet(&self) -> bool {
        *self == Verbosity::Quiet
    }

    fn is_normal(&self) -> bool {
        !self.is_quiet()
    }

    fn is_verbose(&self) -> bool {
        *self == Verbosity::Verbose
    }

    fn default_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ============================================================================
// Results Reporting
// ============================================================================

/// Print summary of all testie records.
fn report_results(records: &[TestieRecord], verbosity: Verbosity) {
    if records.is_empty() || verbosity.is_quiet() {
        return;
    }

    eprintln!("Summary:");

    let total_duration: Duration = records.iter().map(|r| r.total_duration).sum();

    for record in records {
        let status = match (&record.skipped, record.failed_runs()) {
            (Some(_), _) => "-",
            (None, 0) => "✓",
            (None, _) => "✗",
        };
        let detail = match &record.skipped {
            Some(reason) => format!("skipped: {reason}"),
            None => format!("{} runs, {} failed", record.run_count(), record.failed_runs()),
        };

        eprintln!(
            "  {} {} ({:.2}s, {})",
            status,
            record.testie,
            record.total_duration.as_secs_f64(),
            detail
        );
    }

    eprintln!("Total time: {:.2}s", total_duration.as_secs_f64());
}
