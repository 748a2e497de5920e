//! snapcache - incremental server-tree snapshots
//!
//! Main binary entry point for the command-line interface.

use anyhow::Result;
use clap::Parser;
use snapcache::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Cli::parse();
    opts.init_logging()?;

    let engine = opts.engine()?;

    match opts.command {
        Commands::New(args) => cli::new::run(&engine, args).await,
        Commands::Load(args) => cli::load::run(&engine, args).await,
        Commands::List(args) => cli::list::run(&engine, args),
        Commands::Info(args) => cli::info::run(&engine, args),
        Commands::Watch(args) => cli::watch::run(engine, args).await,
    }
}
