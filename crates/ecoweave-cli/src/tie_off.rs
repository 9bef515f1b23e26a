use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use ecoweave_engine::{TieOffConfig, TieOffInserter};
use ecoweave_netlist::PinName;

use crate::snapshot::{self, EcoArgs};

#[derive(Args, Debug, Default, Clone)]
#[command(about = "Drive top-level input ports from constant LUTs")]
pub struct TieOffArgs {
    /// Design snapshot to modify
    #[arg(value_name = "SNAPSHOT", value_hint = clap::ValueHint::FilePath)]
    pub snapshot: PathBuf,

    /// Where to write the modified snapshot
    #[arg(value_name = "OUTPUT", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Top-level input ports to tie, `port` or `port[bit]`
    #[arg(value_name = "PORTS", required = true)]
    pub ports: Vec<String>,

    /// Site the first constant LUT is searched around
    #[arg(long, value_name = "SITE")]
    pub hint_site: Option<String>,

    /// Tie to logic one instead of zero
    #[arg(long)]
    pub high: bool,

    #[command(flatten)]
    pub eco: EcoArgs,
}

pub fn execute(args: TieOffArgs) -> Result<()> {
    let mut design = snapshot::load(&args.snapshot)?;
    let hint = match &args.hint_site {
        Some(name) => Some(
            design
                .device()
                .site_by_name(name)
                .with_context(|| format!("Site {name} not found on {}", design.device().name()))?,
        ),
        None => None,
    };
    let config = TieOffConfig {
        value: args.high,
        region: None,
    };
    let mut inserter = TieOffInserter::new(&design, hint, config, (&args.eco).into());

    for port in &args.ports {
        let pin: PinName = port.parse().with_context(|| format!("Invalid port name {port}"))?;
        let cell = inserter
            .insert_tie_off(&mut design, &pin.port, pin.bit)
            .with_context(|| format!("Failed to tie off {port}"))?;
        println!("{port}: {}", design.cell(cell).name);
    }

    snapshot::save(&design, &args.output)
}
