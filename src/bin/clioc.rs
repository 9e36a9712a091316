use anyhow::{Context, Result};
use calico::logging::init_tracing;
use calico::{ConsoleTerminal, Recorder};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clioc",
    about = "Record runs of an interactive program into a calico test specification",
    version
)]
struct Args {
    /// Write the specification here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(long)]
    debug: bool,

    /// Command to record, with its arguments
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(args.debug, None);

    let mut recorder = Recorder::new(args.command, ConsoleTerminal::new());
    recorder.run().await.context("Failed to record session")?;
    let spec = recorder.into_suite().to_string();

    match &args.output {
        Some(path) => std::fs::write(path, &spec)
            .with_context(|| format!("Failed to write specification: {}", path.display()))?,
        None => print!("{spec}"),
    }
    Ok(())
}
