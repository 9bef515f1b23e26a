use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use ecoweave_engine::{fuse_lut_input_cone, EcoConfig};

use crate::snapshot::{self, EcoArgs};

#[derive(Args, Debug, Default, Clone)]
#[command(about = "Merge the LUT cones in front of input pins into single LUTs")]
pub struct FuseArgs {
    /// Design snapshot to modify
    #[arg(value_name = "SNAPSHOT", value_hint = clap::ValueHint::FilePath)]
    pub snapshot: PathBuf,

    /// Where to write the modified snapshot
    #[arg(value_name = "OUTPUT", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Hierarchical input pins whose cones are fused, e.g. `core/reg/D`
    #[arg(value_name = "PINS", required = true)]
    pub pins: Vec<String>,

    #[command(flatten)]
    pub eco: EcoArgs,
}

pub fn execute(args: FuseArgs) -> Result<()> {
    let mut design = snapshot::load(&args.snapshot)?;
    let config: EcoConfig = (&args.eco).into();

    for path in &args.pins {
        let pin = design
            .netlist
            .pin_by_path(path)
            .with_context(|| format!("Pin {path} not found"))?;
        let fused = fuse_lut_input_cone(&mut design, &pin, &config)
            .with_context(|| format!("Failed to fuse the cone in front of {path}"))?;
        match fused {
            Some(cell) => println!("{} {} -> {}", "✓".green(), path, design.cell(cell).name.bold()),
            None => println!("{} {} has nothing to fuse", "!".yellow(), path),
        }
    }

    snapshot::save(&design, &args.output)
}
