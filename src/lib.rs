//! # snapcache
//!
//! Point-in-time snapshots of a large, mostly static server tree.
//!
//! ## Features
//!
//! - **Exclusions**: glob patterns where `dir/*` excludes everything below `dir/`
//! - **Content cache**: large, rarely-changing files (the server jar, world
//!   indexes) are copied into a cache only when their SHA-256 changes, and
//!   archives carry a small `.reference` entry instead of the file body
//! - **Archives**: zip or 7z containers with identical logical content
//! - **Restore**: extracts into a staging directory and places cached files
//!   straight from the cache
//! - **Retention**: keeps the newest `robot.max` archives by name
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapcache::{BackupEngine, Config, EnginePaths, LoggingHost};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> snapcache::Result<()> {
//! let paths = EnginePaths::new("./server", "./server/plugins/Backup");
//! let engine = BackupEngine::new(Config::default(), paths, Arc::new(LoggingHost))?;
//!
//! let report = engine.create_snapshot("").await?;
//! println!("Backup written to {}", report.archive.display());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod exclude;
pub mod host;
pub mod logging;
pub mod retention;
pub mod scanner;
pub mod scheduler;

// Re-export commonly used types
pub use backup::{BackupEngine, EngineState, RestoreReport, SnapshotReport};
pub use config::{CompressionMethod, Config, EnginePaths};
pub use error::{Error, Result};
pub use host::{Host, LoggingHost};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
