//! Configuration for the snapshot engine.
//!
//! The YAML layout keeps the key names server operators already use:
//!
//! ```yaml
//! server_jar: paper.jar
//! compression-method: 7zp
//! kick:
//!   enabled: true
//!   message: "A backup has been loaded, server is restarting!"
//! robot:
//!   enabled: false
//!   every: 1d
//!   max: 5
//! optimizations:
//!   exclude: ["logs/*", "cache/*"]
//!   cached: ["world.dat"]
//! ```

use crate::{scheduler, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Archive container selected by `compression-method`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompressionMethod {
    Zip,
    SevenZip,
}

impl CompressionMethod {
    /// File extension (without the dot) used for archives of this method
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionMethod::Zip => "zip",
            CompressionMethod::SevenZip => "7z",
        }
    }
}

impl Default for CompressionMethod {
    fn default() -> Self {
        CompressionMethod::SevenZip
    }
}

impl From<String> for CompressionMethod {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "zip" => CompressionMethod::Zip,
            "7z" | "7zp" => CompressionMethod::SevenZip,
            other => {
                warn!("Unsupported compression method '{}', falling back to 7z", other);
                CompressionMethod::SevenZip
            }
        }
    }
}

impl From<CompressionMethod> for String {
    fn from(value: CompressionMethod) -> Self {
        value.extension().to_string()
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_jar: String,
    #[serde(rename = "compression-method")]
    pub compression_method: CompressionMethod,
    pub kick: KickConfig,
    pub robot: RobotConfig,
    pub optimizations: OptimizationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KickConfig {
    pub enabled: bool,
    pub message: String,
}

/// Automatic backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub enabled: bool,
    pub every: String,
    /// Number of archives kept by retention
    pub max: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub exclude: Vec<String>,
    pub cached: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_jar: "paper.jar".to_string(),
            compression_method: CompressionMethod::default(),
            kick: KickConfig::default(),
            robot: RobotConfig::default(),
            optimizations: OptimizationConfig::default(),
        }
    }
}

impl Default for KickConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            message: "A backup has been loaded, server is restarting!".to_string(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            every: "1d".to_string(),
            max: 5,
        }
    }
}

impl Config {
    /// Load config from a YAML file, falling back to defaults if it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as YAML, creating the parent directory if needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, serde_yaml::to_string(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.robot.max == 0 {
            return Err(Error::Config {
                reason: "robot.max must be at least 1".to_string(),
            });
        }

        if self.server_jar.trim().is_empty() {
            return Err(Error::Config {
                reason: "server_jar must not be empty".to_string(),
            });
        }

        self.backup_interval()?;
        Ok(())
    }

    /// Files tracked by the content cache: the configured list plus the server jar
    pub fn cacheable_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for name in self
            .optimizations
            .cached
            .iter()
            .chain(std::iter::once(&self.server_jar))
        {
            let name = name.replace('\\', "/");
            if !name.is_empty() && !files.contains(&name) {
                files.push(name);
            }
        }
        files
    }

    pub fn backup_interval(&self) -> Result<Duration> {
        scheduler::parse_interval(&self.robot.every)
    }
}

/// Filesystem locations the engine operates on
#[derive(Debug, Clone)]
pub struct EnginePaths {
    /// Root of the live working tree
    pub root: PathBuf,
    /// Where finished archives are stored
    pub backup_dir: PathBuf,
    /// Content cache store
    pub cache_dir: PathBuf,
}

impl EnginePaths {
    /// Lay out `backups/` and `cached/` under the given data directory
    pub fn new<P: AsRef<Path>, D: AsRef<Path>>(root: P, data_dir: D) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            root: root.as_ref().to_path_buf(),
            backup_dir: data_dir.join("backups"),
            cache_dir: data_dir.join("cached"),
        }
    }

    /// Create the backup and cache directories and canonicalize all three paths.
    ///
    /// The engine compares these paths against each other and against walked
    /// entries, so a relative root next to an absolute data directory must
    /// resolve to the same spelling. A root that does not exist yet is kept as given.
    pub fn resolve(self) -> Result<Self> {
        fs::create_dir_all(&self.backup_dir)?;
        fs::create_dir_all(&self.cache_dir)?;

        let root = match fs::canonicalize(&self.root) {
            Ok(root) => root,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.root,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            root,
            backup_dir: fs::canonicalize(&self.backup_dir)?,
            cache_dir: fs::canonicalize(&self.cache_dir)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_jar, "paper.jar");
        assert_eq!(config.compression_method, CompressionMethod::SevenZip);
        assert_eq!(config.robot.max, 5);
        assert_eq!(config.robot.every, "1d");
        assert!(config.kick.enabled);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server_jar: purpur.jar
compression-method: zip
robot:
  enabled: true
  every: 6h
  max: 3
optimizations:
  exclude:
    - "logs/*"
  cached:
    - world.dat
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.compression_method, CompressionMethod::Zip);
        assert_eq!(config.robot.max, 3);
        assert_eq!(config.backup_interval().unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(config.optimizations.exclude, vec!["logs/*".to_string()]);
        assert_eq!(
            config.cacheable_files(),
            vec!["world.dat".to_string(), "purpur.jar".to_string()]
        );
        // unspecified sections keep their defaults
        assert!(config.kick.enabled);
    }

    #[test]
    fn test_unknown_compression_falls_back_to_7z() {
        let config = Config::from_yaml_str("compression-method: rar\n").unwrap();
        assert_eq!(config.compression_method, CompressionMethod::SevenZip);

        let config = Config::from_yaml_str("compression-method: 7zp\n").unwrap();
        assert_eq!(config.compression_method.extension(), "7z");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.robot.max = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.robot.every = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cacheable_files_deduplicated() {
        let mut config = Config::default();
        config.optimizations.cached = vec!["paper.jar".to_string(), "world.dat".to_string()];
        assert_eq!(
            config.cacheable_files(),
            vec!["paper.jar".to_string(), "world.dat".to_string()]
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("conf").join("config.yml");

        let mut config = Config::default();
        config.optimizations.cached.push("world.dat".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.optimizations.cached, vec!["world.dat".to_string()]);
        assert_eq!(loaded.compression_method, CompressionMethod::SevenZip);
    }

    #[test]
    fn test_resolve_canonicalizes_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("server");
        fs::create_dir_all(root.join("world")).unwrap();

        let paths = EnginePaths::new(root.join("world/.."), root.join("plugins/snapcache"))
            .resolve()
            .unwrap();
        let root = fs::canonicalize(&root).unwrap();
        assert_eq!(paths.root, root);
        assert_eq!(paths.backup_dir, root.join("plugins/snapcache/backups"));
        assert_eq!(paths.cache_dir, root.join("plugins/snapcache/cached"));
        assert!(paths.backup_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
    }
}
