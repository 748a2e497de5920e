//! Command-line interface for snapcache.
//!
//! A thin surface over [`crate::BackupEngine`]: every subcommand maps onto one
//! engine entry point.

use crate::{BackupEngine, Config, EnginePaths, LoggingHost};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

pub mod info;
pub mod list;
pub mod load;
pub mod new;
pub mod watch;

/// snapcache - incremental snapshots of a server directory
#[derive(Parser)]
#[command(name = "snapcache")]
#[command(about = "Incremental server-tree snapshots with content-addressed caching")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Root of the server tree to back up
    #[arg(short, long, default_value = ".", global = true)]
    pub root: PathBuf,

    /// Data directory holding `backups/` and `cached/` (defaults to <root>/plugins/snapcache)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// YAML configuration file (defaults to <data-dir>/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of the terminal
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new backup
    New(new::NewArgs),
    /// Restore a backup into the server tree
    Load(load::LoadArgs),
    /// List available backups
    List(list::ListArgs),
    /// Show storage information
    Info(info::InfoArgs),
    /// Run automatic backups until interrupted
    Watch(watch::WatchArgs),
}

impl Cli {
    pub fn init_logging(&self) -> crate::Result<()> {
        match &self.log_file {
            Some(path) => crate::logging::init_file_logging(path, self.verbose),
            None => crate::logging::init_logging(self.verbose),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.root.join("plugins").join("snapcache"))
    }

    /// Load configuration and build an engine for a standalone run
    pub fn engine(&self) -> crate::Result<BackupEngine> {
        let data_dir = self.data_dir();
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.yml"));
        let config = Config::load(config_path)?;

        BackupEngine::new(config, EnginePaths::new(&self.root, &data_dir), Arc::new(LoggingHost))
    }
}
