//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "feynman", about = "Runtime visualization viewer tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect as the viewer and print every event as one JSON line
    Tail(TailOpts),
    /// Print the effective session configuration as TOML
    Config(ConfigOpts),
}

#[derive(clap::Args)]
pub struct TailOpts {
    /// Viewer endpoint of a running session
    #[arg(long, env = "FEYNMAN_URL", default_value = "ws://127.0.0.1:5678/")]
    pub addr: String,

    /// Only print events of this kind (repeatable)
    #[arg(long = "kind", short = 'k')]
    pub kinds: Vec<String>,

    /// Keep reconnecting after the session goes away
    #[arg(long)]
    pub follow: bool,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    /// TOML file to load before applying FEYNMAN_* variables
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}
