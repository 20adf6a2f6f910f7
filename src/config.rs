use std::fs;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::keys::{self, ProductKey};

pub const CONFIG_FILE_NAME: &str = ".mcs-archive.json";
pub const DEFAULT_ARCHIVE_DIR: &str = "mcsdata";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub archive_root: Option<String>,
    #[serde(default)]
    pub batch_granularity: Option<BatchGranularity>,
}

/// How missing products are grouped into import batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchGranularity {
    /// Ten-day windows, `product_key / 1000`.
    #[default]
    DayDecile,
    Day,
    Month,
}

impl BatchGranularity {
    pub fn batch_of(self, product: ProductKey) -> i64 {
        match self {
            BatchGranularity::DayDecile => keys::day_decile(product),
            BatchGranularity::Day => product / 100,
            BatchGranularity::Month => product / 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub archive_root: Utf8PathBuf,
    pub batch_granularity: BatchGranularity,
}

impl ResolvedConfig {
    pub fn with_root(archive_root: Utf8PathBuf) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            archive_root,
            batch_granularity: BatchGranularity::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `~/.mcs-archive.json` when none is given. A missing
    /// default file means all defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ArchiveError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => match default_config_path() {
                Some(path) => path,
                None => return Self::resolve_config(Config::default()),
            },
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| ArchiveError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ArchiveError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ArchiveError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version != SCHEMA_VERSION {
            return Err(ArchiveError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let archive_root = match config.archive_root {
            Some(root) => expand_home(&root)?,
            None => default_archive_root()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            archive_root,
            batch_granularity: config.batch_granularity.unwrap_or_default(),
        })
    }
}

fn home_dir() -> Option<Utf8PathBuf> {
    let base = BaseDirs::new()?;
    Utf8PathBuf::from_path_buf(base.home_dir().to_path_buf()).ok()
}

pub fn default_config_path() -> Option<Utf8PathBuf> {
    home_dir().map(|home| home.join(CONFIG_FILE_NAME))
}

pub fn default_archive_root() -> Result<Utf8PathBuf, ArchiveError> {
    home_dir()
        .map(|home| home.join(DEFAULT_ARCHIVE_DIR))
        .ok_or_else(|| ArchiveError::ConfigParse("home directory is not available".to_string()))
}

fn expand_home(root: &str) -> Result<Utf8PathBuf, ArchiveError> {
    match root.strip_prefix("~/") {
        Some(rest) => home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| ArchiveError::ConfigParse(format!("cannot expand {root}"))),
        None => Ok(Utf8PathBuf::from(root)),
    }
}
