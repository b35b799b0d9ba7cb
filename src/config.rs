use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub const DEFAULT_MAX_RESOURCES: usize = 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Builtins archive held in memory, searched before the factory's own backend.
#[derive(Clone, Debug, Default)]
pub struct BuiltinsArchive {
    pub manifest: Vec<u8>,
    pub index: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FactoryParams {
    /// Capacity of the resource cache. Loads fail once it is full.
    pub max_resources: usize,
    /// Initial capacity of the shared load buffer.
    pub buffer_size: usize,
    /// Keep path strings of cached resources, needed to report reloads by path.
    pub reload_support: bool,
    pub http_cache: bool,
    pub http_cache_dir: PathBuf,
    pub live_update: bool,
    /// Root of the per-project application support directories.
    pub support_root: PathBuf,
    pub engine_version: String,
    pub public_key_path: Option<PathBuf>,
    #[serde(skip)]
    pub builtins: Option<BuiltinsArchive>,
}

impl Default for FactoryParams {
    fn default() -> Self {
        let support_root = std::env::temp_dir().join("resstore");
        FactoryParams {
            max_resources: DEFAULT_MAX_RESOURCES,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reload_support: false,
            http_cache: false,
            http_cache_dir: support_root.join("http-cache"),
            live_update: false,
            support_root,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            public_key_path: None,
            builtins: None,
        }
    }
}

impl FactoryParams {
    /// Read parameters from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<FactoryParams, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn from_toml_str(s: &str) -> Result<FactoryParams, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

/// Install a formatting subscriber as the global default. Calling it again is a no-op.
pub fn init_logging(max_level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(max_level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
