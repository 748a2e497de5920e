//! Capabilities the snapshot engine needs from the application it backs up.
//!
//! The engine never saves worlds, kicks players or restarts anything itself;
//! it asks the host through this trait.

use tracing::info;

pub trait Host: Send + Sync {
    /// Stop automatic saving and flush all in-memory state to disk.
    ///
    /// Called on the caller's thread before any file is read.
    fn quiesce(&self);

    /// Re-enable automatic saving. Always called after [`Host::quiesce`],
    /// whether or not the snapshot succeeded.
    fn resume(&self);

    /// Disconnect active sessions ahead of a restart
    fn disconnect_sessions(&self, message: &str);

    /// Perform an orderly shutdown so the restored tree is loaded on next start
    fn request_restart(&self);
}

/// Host for standalone use: there is no live application, so every request is
/// only logged.
#[derive(Debug, Default, Clone)]
pub struct LoggingHost;

impl Host for LoggingHost {
    fn quiesce(&self) {
        info!("Quiesce requested (no live host attached)");
    }

    fn resume(&self) {
        info!("Resume requested (no live host attached)");
    }

    fn disconnect_sessions(&self, message: &str) {
        info!("Disconnect requested: {}", message);
    }

    fn request_restart(&self) {
        info!("Restart requested (no live host attached)");
    }
}
