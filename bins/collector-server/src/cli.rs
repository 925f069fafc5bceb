use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "collector-server", about = "Telemetry aggregation and persistence pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read records and persist them until EOF or Ctrl+C
    Serve(ServeArgs),
    /// Validate the configuration and print the worker plan
    Check(CheckArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to TOML config file
    #[arg(long, default_value = "config.toml", env = "COLLECTOR_CONFIG")]
    pub config: PathBuf,

    /// Newline-delimited JSON records; stdin when omitted
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Path to TOML config file
    #[arg(long, default_value = "config.toml", env = "COLLECTOR_CONFIG")]
    pub config: PathBuf,
}
