//! Session configuration loaded from YAML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::{DetectorParams, SubPixParams};
use crate::geometry::PatternSize;
use crate::harris::HarrisParams;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Pattern must have at least 2 rows and 2 columns, got {rows}x{cols}")]
    InvalidPattern { rows: usize, cols: usize },
}

/// Everything a session needs besides the frames themselves. Missing keys
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pattern: PatternSize,
    /// Intrinsics and distortion records written by calibration.
    pub parameters_path: PathBuf,
    /// OBJ model for the mesh overlay.
    pub mesh_path: PathBuf,
    pub subpix: SubPixParams,
    pub harris: HarrisParams,
    pub detector: DetectorParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            pattern: PatternSize::default(),
            parameters_path: PathBuf::from("data.csv"),
            mesh_path: PathBuf::from("cow.obj"),
            subpix: SubPixParams::default(),
            harris: HarrisParams::default(),
            detector: DetectorParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern.rows < 2 || self.pattern.cols < 2 {
            return Err(ConfigError::InvalidPattern {
                rows: self.pattern.rows,
                cols: self.pattern.cols,
            });
        }
        Ok(())
    }
}
