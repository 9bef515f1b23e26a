use clap::{Parser, Subcommand};

mod fanout;
mod fuse;
mod snapshot;
mod tie_off;

#[derive(Parser)]
#[command(name = "ecoweave")]
#[command(about = "Engineering-change recipes for placed and routed FPGA designs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a high fan-out net across replicated drivers
    #[command(alias = "f")]
    Fanout(fanout::FanoutArgs),

    /// Merge the LUT cones in front of input pins into single LUTs
    Fuse(fuse::FuseArgs),

    /// Drive top-level input ports from constant LUTs
    TieOff(tie_off::TieOffArgs),
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fanout(args) => fanout::execute(args),
        Commands::Fuse(args) => fuse::execute(args),
        Commands::TieOff(args) => tie_off::execute(args),
    }
}
