//! feynman: terminal-side tools for a running visualization session.

use clap::Parser;

mod cli;
mod cmd_config;
mod cmd_tail;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    feynman::init_logging();

    match args.command {
        cli::Command::Tail(opts) => {
            let kinds = cmd_tail::parse_kinds(&opts.kinds)?;
            cmd_tail::cmd_tail(&opts.addr, &kinds, opts.follow).await?;
        }
        cli::Command::Config(opts) => {
            cmd_config::cmd_config(opts.config.as_deref())?;
        }
    }

    Ok(())
}
