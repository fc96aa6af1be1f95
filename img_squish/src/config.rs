//! Run configuration
//!
//! Loaded from a JSON file (`config.json` unless told otherwise). Every field
//! is optional in the file; missing fields take the defaults below.

use crate::error::{Result, SquishError};
use serde::{Deserialize, Serialize};
use shared_utils::normalize_extension;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker count; `None` means one per logical CPU
    pub threads: Option<usize>,
    pub min_improvement_pct: f64,
    /// Seconds without a finished image before a stall is reported
    pub hang_timeout: u64,
    pub recursive: bool,
    pub skip_extensions: Vec<String>,
    pub jpegxl_quality: u8,
    pub jpegxl_effort: u8,
    pub webp_method: u8,
    /// Per-codec deadline in seconds
    pub conversion_timeout: u64,
    pub max_animated_frames: usize,
    pub log_file: String,
    pub enable_notifications: bool,
    /// Learner statistics, relative paths resolve against the working directory
    pub stats_file: String,
    pub enable_vision: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: None,
            min_improvement_pct: 5.0,
            hang_timeout: 300,
            recursive: true,
            skip_extensions: vec![".webp".to_string(), ".jxl".to_string()],
            jpegxl_quality: 100,
            jpegxl_effort: 9,
            webp_method: 6,
            conversion_timeout: 300,
            max_animated_frames: 1000,
            log_file: "image-squisher.log".to_string(),
            enable_notifications: true,
            stats_file: ".image-squisher-stats.json".to_string(),
            enable_vision: true,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            SquishError::Config(format!("invalid JSON in {}: {}", path.display(), e))
        })?;
        config.validate()
    }

    /// Check ranges and normalize `skip_extensions` to `.ext` form.
    pub fn validate(mut self) -> Result<Self> {
        fn check(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(SquishError::Config(msg.to_string()))
            }
        }

        check(self.threads != Some(0), "threads must be >= 1")?;
        check(
            (0.0..=100.0).contains(&self.min_improvement_pct),
            "min_improvement_pct must be between 0 and 100",
        )?;
        check(self.hang_timeout >= 1, "hang_timeout must be >= 1")?;
        check(
            (1..=100).contains(&self.jpegxl_quality),
            "jpegxl_quality must be between 1 and 100",
        )?;
        check(self.jpegxl_effort <= 9, "jpegxl_effort must be between 0 and 9")?;
        check(self.webp_method <= 6, "webp_method must be between 0 and 6")?;
        check(
            self.conversion_timeout >= 1,
            "conversion_timeout must be >= 1",
        )?;
        check(
            self.max_animated_frames >= 1,
            "max_animated_frames must be >= 1",
        )?;

        self.skip_extensions = self
            .skip_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect();
        Ok(self)
    }

    pub fn write_default(path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&Self::default())?;
        fs::write(path, text + "\n")?;
        Ok(())
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_secs(self.hang_timeout)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout)
    }

    pub fn stats_path(&self) -> PathBuf {
        PathBuf::from(&self.stats_file)
    }
}
