use anyhow::{Context, Result};
use calico::logging::init_tracing;
use calico::{RunConfig, Sandbox, parse_file};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "calico",
    about = "Grade an interactive command-line program against a test specification",
    version
)]
struct Args {
    /// Path to the test specification file
    spec: PathBuf,

    /// Directory to run the tests in
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Only check that the specification is valid
    #[arg(long)]
    validate: bool,

    /// Do not print per-case progress
    #[arg(short, long)]
    quiet: bool,

    /// Append debug logs to log.txt in the test directory
    #[arg(long)]
    log: bool,

    /// Print debug logs to stderr
    #[arg(long)]
    debug: bool,

    /// Default timeout for each expectation, in seconds
    #[arg(long, env = "CALICO_TIMEOUT")]
    timeout: Option<u64>,

    /// Run only the named case (repeatable)
    #[arg(short, long = "case", value_name = "NAME")]
    cases: Vec<String>,

    /// Run every case outside the sandbox
    #[arg(long)]
    no_sandbox: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let spec = std::path::absolute(&args.spec)
        .with_context(|| format!("Failed to resolve {}", args.spec.display()))?;
    if let Some(dir) = &args.directory {
        std::env::set_current_dir(dir)
            .with_context(|| format!("Failed to enter directory: {}", dir.display()))?;
    }

    let log_file = args.log.then(|| PathBuf::from("log.txt"));
    let _guard = init_tracing(args.debug, log_file.as_deref());

    let suite = match parse_file(&spec) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };
    debug!("loaded {} test cases from {}", suite.len(), spec.display());

    if args.validate {
        info!("{} is valid", spec.display());
        return Ok(());
    }

    let sandbox = if args.no_sandbox {
        None
    } else {
        let root = std::env::current_dir().context("Failed to read current directory")?;
        let sandbox = Sandbox::detect(&root);
        if sandbox.is_none() {
            debug!("fakechroot not found, running sandboxed cases directly");
        }
        sandbox
    };

    let mut config = RunConfig::default().quiet(args.quiet).with_sandbox(sandbox);
    if let Some(secs) = args.timeout {
        config = config.with_global_timeout(Duration::from_secs(secs));
    }

    let selected = (!args.cases.is_empty()).then_some(args.cases.as_slice());
    let report = suite
        .run(selected, &config)
        .await
        .context("Failed to run test suite")?;

    println!("Grade: {} / {}", report.points, report.total_points);
    Ok(())
}
