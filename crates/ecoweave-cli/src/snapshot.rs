use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use ecoweave_engine::EcoConfig;
use ecoweave_netlist::Design;

/// Options shared by every recipe.
#[derive(Args, Debug, Default, Clone)]
pub struct EcoArgs {
    /// Only warn when a terminal is shared with a cell whose instance path
    /// starts with this prefix
    #[arg(long, env = "ECOWEAVE_WARN_IF_CELL_INST_STARTS_WITH", value_name = "PREFIX")]
    pub warn_if_cell_inst_starts_with: Option<String>,
}

impl From<&EcoArgs> for EcoConfig {
    fn from(args: &EcoArgs) -> Self {
        EcoConfig {
            warn_if_cell_inst_starts_with: args
                .warn_if_cell_inst_starts_with
                .clone()
                .filter(|p| !p.is_empty()),
        }
    }
}

pub fn load(path: &Path) -> Result<Design> {
    log::debug!("Reading {}", path.display());
    Design::load(path).with_context(|| format!("Failed to load design snapshot: {}", path.display()))
}

pub fn save(design: &Design, path: &Path) -> Result<()> {
    design
        .save(path)
        .with_context(|| format!("Failed to write design snapshot: {}", path.display()))?;
    eprintln!("{} Wrote {}", "✓".green(), path.display().to_string().bold());
    Ok(())
}
