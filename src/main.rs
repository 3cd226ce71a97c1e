use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use kube_audit::config;
use kube_audit::engine::{AuditEngine, RunReport};
use kube_audit::facts::SystemProcesses;
use kube_audit::filter::FilterOpts;
use kube_audit::model::{NodeType, State};
use kube_audit::probe::ShellProber;
use kube_audit::report::{OutputFormat, Reporter, Sections};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kube-audit", version, about = "Run security benchmark checks against a Kubernetes node")]
struct Cli {
    #[command(subcommand)]
    command: Target,

    /// Directory holding config.yaml and per-version benchmark directories
    #[arg(long, global = true, default_value = "cfg")]
    config_dir: PathBuf,

    /// Kubernetes version whose benchmark to run (detected when omitted)
    #[arg(long, global = true)]
    kube_version: Option<String>,

    /// Run only these groups (comma separated)
    #[arg(short = 'g', long, global = true, default_value = "")]
    group: String,

    /// Run only these checks (comma separated)
    #[arg(short = 'c', long, global = true, default_value = "")]
    check: String,

    /// Run scored checks
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    scored: bool,

    /// Run unscored checks
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    unscored: bool,

    /// Wait this long for each probe before reporting WARN (e.g. 30s, 2m)
    #[arg(long, global = true, default_value = "30s", value_parser = humantime::parse_duration)]
    probe_timeout: Duration,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Write results to this file instead of stdout
    #[arg(long, global = true)]
    outputfile: Option<PathBuf>,

    /// Disable printing of results section
    #[arg(long, global = true, default_value_t = false)]
    noresults: bool,

    /// Disable printing of remediations section
    #[arg(long, global = true, default_value_t = false)]
    noremediations: bool,

    /// Disable printing of summary section
    #[arg(long, global = true, default_value_t = false)]
    nosummary: bool,

    /// Print the probe output of failing checks
    #[arg(long, global = true, default_value_t = false)]
    include_test_output: bool,

    /// Exit 2 if any check FAILs, 1 if any WARNs
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,

    /// More logging (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Target {
    /// Run benchmark checks for a Kubernetes master node
    Master {
        /// Alternative benchmark file for master checks
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Run benchmark checks for a Kubernetes worker node
    Node {
        /// Alternative benchmark file for node checks
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Run master checks if master components are running, then node checks
    Auto,
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run(cli: &Cli) -> anyhow::Result<Vec<RunReport>> {
    let version = match &cli.kube_version {
        Some(v) => v.clone(),
        None => config::detect_version()?,
    };
    let (config, bench_dir) = config::load_for_version(&cli.config_dir, &version)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;

    let prober = ShellProber::with_timeout(cli.probe_timeout);
    let processes = SystemProcesses;
    let engine = AuditEngine::new(&config, &processes, &prober);

    let targets: Vec<(NodeType, Option<PathBuf>)> = match &cli.command {
        Target::Master { file } => vec![(NodeType::Master, file.clone())],
        Target::Node { file } => vec![(NodeType::Node, file.clone())],
        Target::Auto if engine.is_master() => vec![(NodeType::Master, None), (NodeType::Node, None)],
        Target::Auto => vec![(NodeType::Node, None)],
    };

    let filter = FilterOpts {
        group_list: cli.group.clone(),
        check_list: cli.check.clone(),
        scored: cli.scored,
        unscored: cli.unscored,
    };

    let mut reports = Vec::with_capacity(targets.len());
    for (node_type, file) in targets {
        let benchmark = file.unwrap_or_else(|| bench_dir.join(format!("{}.yaml", node_type)));
        let report = engine
            .run(node_type, &benchmark, &filter)
            .with_context(|| format!("error setting up {} controls", node_type))?;
        reports.push(report);
    }
    Ok(reports)
}

fn emit(cli: &Cli, reports: &[RunReport]) -> anyhow::Result<()> {
    let format = if cli.json { OutputFormat::Json } else { OutputFormat::Text };
    let sections = Sections {
        results: !cli.noresults,
        remediations: !cli.noremediations,
        summary: !cli.nosummary,
        test_output: cli.include_test_output,
    };
    let reporter = Reporter::new(format, sections);

    let mut out = String::new();
    for report in reports {
        out.push_str(&reporter.render(&report.controls, &report.summary).context("failed to render results")?);
        out.push('\n');
    }

    match &cli.outputfile {
        Some(path) => std::fs::write(path, out).with_context(|| format!("failed to write to output file {}", path.display())),
        None => {
            print!("{}", out);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let reports = match run(&cli) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = emit(&cli, &reports) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    if cli.strict {
        let worst = reports.iter().map(|r| r.summary.status()).fold(State::Pass, |acc, s| match (acc, s) {
            (State::Fail, _) | (_, State::Fail) => State::Fail,
            (State::Warn, _) | (_, State::Warn) => State::Warn,
            _ => State::Pass,
        });
        match worst {
            State::Fail => std::process::exit(2),
            State::Warn => std::process::exit(1),
            _ => {}
        }
    }
}
