use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::sample::Metric;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_opacity_percent")]
    pub opacity_percent: u8,
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Visibility {
    #[serde(default = "default_shown")]
    pub cpu: bool,
    #[serde(default = "default_shown")]
    pub ram: bool,
    #[serde(default = "default_shown")]
    pub disk: bool,
    #[serde(default = "default_shown")]
    pub network: bool,
    #[serde(default = "default_shown")]
    pub gpu: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            visibility: Visibility::default(),
            interval_ms: default_interval_ms(),
            opacity_percent: default_opacity_percent(),
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            cpu: true,
            ram: true,
            disk: true,
            network: true,
            gpu: true,
        }
    }
}

impl Visibility {
    pub fn is_shown(&self, metric: Metric) -> bool {
        match metric {
            Metric::Cpu => self.cpu,
            Metric::Ram => self.ram,
            Metric::Disk => self.disk,
            Metric::Network => self.network,
            Metric::Gpu => self.gpu,
        }
    }

    pub fn set(&mut self, metric: Metric, shown: bool) {
        match metric {
            Metric::Cpu => self.cpu = shown,
            Metric::Ram => self.ram = shown,
            Metric::Disk => self.disk = shown,
            Metric::Network => self.network = shown,
            Metric::Gpu => self.gpu = shown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            info!(path = %path_ref.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(path_ref)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        let text = serde_yaml::to_string(self)?;
        fs::write(path_ref, text).map_err(|source| ConfigError::Write {
            path: path_ref.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !INTERVAL_MS_RANGE.contains(&self.interval_ms) {
            return Err(ConfigError::Validation(
                "interval_ms must be in range 500..5000".to_string(),
            ));
        }
        if !(50..=100).contains(&self.opacity_percent) {
            return Err(ConfigError::Validation(
                "opacity_percent must be in range 50..100".to_string(),
            ));
        }
        if !REFRESH_MS_RANGE.contains(&self.refresh_ms) {
            return Err(ConfigError::Validation(
                "refresh_ms must be in range 16..1000".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(
            self.interval_ms
                .clamp(*INTERVAL_MS_RANGE.start(), *INTERVAL_MS_RANGE.end()),
        )
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(
            self.refresh_ms
                .clamp(*REFRESH_MS_RANGE.start(), *REFRESH_MS_RANGE.end()),
        )
    }

    pub fn opacity_alpha(&self) -> u8 {
        (u32::from(self.opacity_percent.min(100)) * 255 / 100) as u8
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<Config>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let cfg = Config::load_or_default(&path)?;
        Ok(Self::with_config(path, cfg))
    }

    pub fn with_config(path: impl Into<PathBuf>, cfg: Config) -> Self {
        let (tx, _rx) = watch::channel(cfg);
        Self {
            path: path.into(),
            tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    /// Applies `change`, validates, persists, then notifies subscribers.
    /// On error nothing is saved or broadcast.
    pub fn update(&self, change: impl FnOnce(&mut Config)) -> Result<(), ConfigError> {
        let mut next = self.current();
        change(&mut next);
        next.validate()?;
        next.save_to_file(&self.path)?;
        self.tx.send_replace(next);
        Ok(())
    }

    pub fn reload(&self) -> Result<(), ConfigError> {
        let cfg = Config::load_or_default(&self.path)?;
        self.tx.send_if_modified(|current| {
            if *current == cfg {
                return false;
            }
            *current = cfg;
            true
        });
        Ok(())
    }
}

const INTERVAL_MS_RANGE: RangeInclusive<u64> = 500..=5000;
const REFRESH_MS_RANGE: RangeInclusive<u64> = 16..=1000;

const fn default_shown() -> bool {
    true
}

const fn default_interval_ms() -> u64 {
    1500
}

const fn default_opacity_percent() -> u8 {
    85
}

const fn default_refresh_ms() -> u64 {
    250
}
