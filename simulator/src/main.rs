use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::generator::volume::build_volume;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::runner::Runner;

mod generator;
mod workflow;

/// Offline driver: generates a synthetic volume scan and pushes it through
/// the QC pipeline with a configured or default workflow.
#[derive(Parser, Debug)]
#[command(author, version, about = "Offline radar QC workflow driver")]
struct Args {
    /// YAML workflow config; omit to use the built-in default workflow.
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// Sweeps per generated volume (ignored when --workflow is given).
    #[arg(long, default_value_t = 2)]
    sweeps: usize,

    /// Beams per sweep (ignored when --workflow is given).
    #[arg(long, default_value_t = 90)]
    beams: usize,

    /// Gates per beam (ignored when --workflow is given).
    #[arg(long, default_value_t = 64)]
    gates: usize,

    /// Generator seed (ignored when --workflow is given).
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write the run summary to this path as JSON.
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::from_args(args.sweeps, args.beams, args.gates, args.seed),
    };

    let volume = build_volume(&config.generator).context("generating volume")?;
    let summary = Runner::new(config).execute(volume)?;

    println!(
        "Offline run -> beams {}/{}, sweeps scored {}, passed through {}, gates suppressed {}, errors {}",
        summary.beams_out,
        summary.beams_in,
        summary.sweeps_scored,
        summary.sweeps_passed_through,
        summary.gates_suppressed,
        summary.errors
    );

    if let Some(path) = &args.summary_json {
        let text =
            serde_json::to_string_pretty(&summary).context("serializing run summary")?;
        fs::write(path, text)
            .with_context(|| format!("writing summary to {}", path.display()))?;
    }

    Ok(())
}
