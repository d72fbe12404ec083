use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pricebox")]
#[command(about = "Retail price-file harvester", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download files for a date (default: today) across chains
    Run(RunArgs),
    /// Probe every enabled chain's listing without downloading
    Check(CheckArgs),
    /// Keep harvesting on a timer until interrupted
    Watch(WatchArgs),
    /// Write the documented sample configuration and exit
    Init(InitArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Target date as dd/MM/yyyy (the portals' own format)
    #[arg(long)]
    pub date: Option<String>,

    /// Restrict the batch to these chain ids (repeatable)
    #[arg(long = "chain")]
    pub chains: Vec<String>,

    /// Overwrite files that already exist in the output tree
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Target date as dd/MM/yyyy (default: today)
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Interval between batches (e.g. "6h", "30m")
    #[arg(long, default_value = "6h")]
    pub every: String,
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Where to write the sample configuration
    #[arg(long, default_value = "config/pricebox.toml")]
    pub path: PathBuf,
}
