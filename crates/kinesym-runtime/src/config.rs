//! Runtime configuration – reads/writes `~/.kinesym/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use kinesym_collision::{CollisionError, CollisionRegistry, KinematicChain};
use kinesym_compile::FunctionCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised while reading or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted settings of a kinesym process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory of compiled-function artifacts.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Entries per joint in every collision proximity list.
    #[serde(default = "default_collision_list_size")]
    pub collision_list_size: usize,

    /// Root link of the robot.
    #[serde(default = "default_robot_root")]
    pub robot_root: String,

    /// Root frame of the world that contacts are reported in.
    #[serde(default = "default_world_root")]
    pub world_root: String,
}

fn home_dir() -> PathBuf {
    PathBuf::from(
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

fn default_cache_dir() -> PathBuf {
    home_dir().join(".kinesym").join("compiled")
}
fn default_collision_list_size() -> usize {
    15
}
fn default_robot_root() -> String {
    "base_link".to_string()
}
fn default_world_root() -> String {
    "map".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            collision_list_size: default_collision_list_size(),
            robot_root: default_robot_root(),
            world_root: default_world_root(),
        }
    }
}

/// `~/.kinesym/config.toml`.
pub fn config_path() -> PathBuf {
    home_dir().join(".kinesym").join("config.toml")
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.  Environment
    /// overrides are applied either way.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).map_err(io)
    }

    /// Apply `KINESYM_*` environment overrides.
    ///
    /// | Variable | Config field |
    /// |---|---|
    /// | `KINESYM_CACHE_DIR` | `cache_dir` |
    /// | `KINESYM_COLLISION_LIST_SIZE` | `collision_list_size` |
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KINESYM_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KINESYM_COLLISION_LIST_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.collision_list_size = size;
        }
    }

    /// Compiled-function cache rooted at [`cache_dir`](Self::cache_dir).
    pub fn function_cache(&self) -> FunctionCache {
        FunctionCache::new(&self.cache_dir)
    }

    /// A fresh registry for one cycle, using the configured roots and list
    /// size.
    pub fn collision_registry<'k, K>(&self, kinematics: &'k K) -> Result<CollisionRegistry<'k, K>, CollisionError>
    where
        K: KinematicChain + ?Sized,
    {
        CollisionRegistry::new(
            kinematics,
            self.robot_root.as_str(),
            &self.world_root,
            self.collision_list_size,
        )
    }
}
