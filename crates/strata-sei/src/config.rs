use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pacer::DEFAULT_INTERVAL;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    Version(u32),
    #[error("stamp.interval_ms must be greater than zero")]
    ZeroInterval,
    #[error("stamp.count must be at least 1")]
    ZeroCount,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeiToolConfigInput {
    pub version: u32,
    pub stamp: StampConfigInput,
    pub probe: ProbeConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StampConfigInput {
    pub interval_ms: Option<u64>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfigInput {
    pub json: Option<bool>,
    pub warn_above_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampConfig {
    pub interval: Duration,
    pub count: u32,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeConfig {
    pub json: bool,
    /// Log a warning for every delay above this.
    pub warn_above: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiToolConfig {
    pub version: u32,
    pub stamp: StampConfig,
    pub probe: ProbeConfig,
}

impl Default for SeiToolConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            stamp: StampConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl SeiToolConfigInput {
    pub fn resolve(self) -> Result<SeiToolConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::Version(version));
        }

        let stamp = self.stamp.resolve_over(&StampConfig::default())?;

        Ok(SeiToolConfig {
            version,
            stamp,
            probe: ProbeConfig {
                json: self.probe.json.unwrap_or(false),
                warn_above: self.probe.warn_above_ms.map(Duration::from_millis),
            },
        })
    }
}

impl StampConfigInput {
    /// Apply the values that are set on top of `base`.
    ///
    /// Used both for the file's `[stamp]` table and for command-line
    /// overrides, so the same bounds hold either way.
    pub fn resolve_over(self, base: &StampConfig) -> Result<StampConfig, ConfigError> {
        let interval = match self.interval_ms {
            Some(0) => return Err(ConfigError::ZeroInterval),
            Some(ms) => Duration::from_millis(ms),
            None => base.interval,
        };
        let count = match self.count {
            Some(0) => return Err(ConfigError::ZeroCount),
            Some(n) => n,
            None => base.count,
        };
        Ok(StampConfig { interval, count })
    }
}

impl SeiToolConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(SeiToolConfig::default());
        }
        let parsed: SeiToolConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }
}
