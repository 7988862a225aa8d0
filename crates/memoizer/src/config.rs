use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Controls how long memoized results are kept.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoizerConfig {
    /// How long a result is kept after it was computed.
    ///
    /// `null` or a zero duration keeps results forever.
    #[serde(with = "humantime_serde")]
    pub default_expiration: Option<Duration>,

    /// How often expired results are removed from memory.
    ///
    /// `null` or a zero duration disables the background sweep.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Option<Duration>,
}

impl Default for MemoizerConfig {
    fn default() -> Self {
        Self {
            default_expiration: Some(Duration::from_secs(5 * 60)),
            cleanup_interval: Some(Duration::from_secs(10 * 60)),
        }
    }
}

impl MemoizerConfig {
    /// Loads the configuration from a YAML file, or returns the defaults without a `path`.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Self::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}
