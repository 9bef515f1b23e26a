use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ecoweave_engine::{cut_fanout, FanoutConfig};

use crate::snapshot::{self, EcoArgs};

#[derive(Args, Debug, Default, Clone)]
#[command(about = "Split the fan-out of a net across replicated drivers")]
pub struct FanoutArgs {
    /// Design snapshot to modify
    #[arg(value_name = "SNAPSHOT", value_hint = clap::ValueHint::FilePath)]
    pub snapshot: PathBuf,

    /// Name of the physical net to split
    #[arg(value_name = "NET")]
    pub net: String,

    /// Number of drivers after the split, the original one included
    #[arg(value_name = "SPLIT_COUNT", value_parser = clap::value_parser!(u32).range(1..))]
    pub split_count: u32,

    /// Where to write the modified snapshot
    #[arg(value_name = "OUTPUT", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Seed for clustering the sinks
    #[arg(long, default_value_t = FanoutConfig::default().seed)]
    pub seed: u64,

    /// Upper bound on clustering rounds
    #[arg(long, default_value_t = FanoutConfig::default().max_iterations)]
    pub max_iterations: usize,

    /// Let replicas take free slots in sites that are already in use
    #[arg(long)]
    pub allow_used_sites: bool,

    #[command(flatten)]
    pub eco: EcoArgs,
}

pub fn execute(args: FanoutArgs) -> Result<()> {
    let mut design = snapshot::load(&args.snapshot)?;
    let net = design
        .net_by_name(&args.net)
        .with_context(|| format!("Net {} not found in {}", args.net, args.snapshot.display()))?;
    let config = FanoutConfig {
        max_iterations: args.max_iterations,
        only_use_empty_sites: !args.allow_used_sites,
        seed: args.seed,
    };

    let result = cut_fanout(&mut design, net, args.split_count as usize, &config, &(&args.eco).into())
        .with_context(|| format!("Failed to split fan-out of {}", args.net))?;
    for (net, pins) in &result.assignments {
        println!("{}: {} sinks", design.netlist.net_path(*net), pins.len());
    }

    snapshot::save(&design, &args.output)
}
