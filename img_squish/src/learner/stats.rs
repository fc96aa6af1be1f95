//! Persisted learner statistics.
//!
//! The on-disk layout is a single JSON object:
//!
//! ```json
//! {
//!   "total_processed": 12,
//!   "by_original_format": { ".png": { "jxl": 3, "webp": 8, "original": 1 } },
//!   "by_color_mode": { ... },
//!   "by_size_category": { ... },
//!   "by_dimensions": { ... },
//!   "by_vision_features": { "variability_low": { ... } },
//!   "by_source_folder": { ... },
//!   "predictions": [ { "predicted": "webp", "actual": "webp", "correct": true, "features": { ... } } ]
//! }
//! ```

use crate::converter::FormatTag;
use crate::error::Result;
use crate::selection::Winner;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Prediction records kept; older ones are dropped first.
pub const MAX_PREDICTIONS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeCounts {
    pub jxl: u64,
    pub webp: u64,
    pub original: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.jxl + self.webp + self.original
    }

    /// Samples where a conversion won.
    pub fn decided(&self) -> u64 {
        self.jxl + self.webp
    }

    pub fn get(&self, winner: Winner) -> u64 {
        match winner {
            Winner::Jxl => self.jxl,
            Winner::Webp => self.webp,
            Winner::Original => self.original,
        }
    }

    pub fn increment(&mut self, winner: Winner) {
        match winner {
            Winner::Jxl => self.jxl += 1,
            Winner::Webp => self.webp += 1,
            Winner::Original => self.original += 1,
        }
    }

    /// The conversion format that won more often, `None` on a tie.
    pub fn leader(&self) -> Option<FormatTag> {
        if self.jxl > self.webp {
            Some(FormatTag::Jxl)
        } else if self.webp > self.jxl {
            Some(FormatTag::Webp)
        } else {
            None
        }
    }
}

pub type CategoryCounts = BTreeMap<String, OutcomeCounts>;

/// Learner dimensions. Source folder is tracked and reported but never votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    OriginalFormat,
    ColorMode,
    SizeCategory,
    Dimensions,
    SourceFolder,
    VisionFeatures,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::OriginalFormat,
        Dimension::ColorMode,
        Dimension::SizeCategory,
        Dimension::Dimensions,
        Dimension::SourceFolder,
        Dimension::VisionFeatures,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::OriginalFormat => "Original Format",
            Dimension::ColorMode => "Color Mode",
            Dimension::SizeCategory => "Size Category",
            Dimension::Dimensions => "Dimensions",
            Dimension::SourceFolder => "Source Folder",
            Dimension::VisionFeatures => "Vision Features",
        }
    }
}

/// Image characteristics captured alongside each prediction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSnapshot {
    pub format: String,
    pub color_mode: String,
    pub size_cat: String,
    pub dim_cat: String,
    pub source_folder: String,
}

impl FeatureSnapshot {
    /// Category value for `dimension`; vision categories are not snapshotted.
    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::OriginalFormat => Some(&self.format),
            Dimension::ColorMode => Some(&self.color_mode),
            Dimension::SizeCategory => Some(&self.size_cat),
            Dimension::Dimensions => Some(&self.dim_cat),
            Dimension::SourceFolder => Some(&self.source_folder),
            Dimension::VisionFeatures => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub predicted: FormatTag,
    pub actual: Winner,
    pub correct: bool,
    pub features: FeatureSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerStatistics {
    pub total_processed: u64,
    pub by_original_format: CategoryCounts,
    pub by_color_mode: CategoryCounts,
    pub by_size_category: CategoryCounts,
    pub by_dimensions: CategoryCounts,
    pub by_vision_features: CategoryCounts,
    pub by_source_folder: CategoryCounts,
    pub predictions: VecDeque<PredictionRecord>,
}

impl LearnerStatistics {
    /// Read statistics from `path`. Missing or corrupt files give empty stats.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No learner statistics, starting fresh");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt learner statistics discarded");
                Self::default()
            }
        }
    }

    /// Write to a sibling temp file, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn dimension(&self, dimension: Dimension) -> &CategoryCounts {
        match dimension {
            Dimension::OriginalFormat => &self.by_original_format,
            Dimension::ColorMode => &self.by_color_mode,
            Dimension::SizeCategory => &self.by_size_category,
            Dimension::Dimensions => &self.by_dimensions,
            Dimension::SourceFolder => &self.by_source_folder,
            Dimension::VisionFeatures => &self.by_vision_features,
        }
    }

    pub fn dimension_mut(&mut self, dimension: Dimension) -> &mut CategoryCounts {
        match dimension {
            Dimension::OriginalFormat => &mut self.by_original_format,
            Dimension::ColorMode => &mut self.by_color_mode,
            Dimension::SizeCategory => &mut self.by_size_category,
            Dimension::Dimensions => &mut self.by_dimensions,
            Dimension::SourceFolder => &mut self.by_source_folder,
            Dimension::VisionFeatures => &mut self.by_vision_features,
        }
    }

    /// Bump the counter for `category`, creating it on first sight.
    pub fn count(&mut self, dimension: Dimension, category: &str, winner: Winner) {
        self.dimension_mut(dimension)
            .entry(category.to_string())
            .or_default()
            .increment(winner);
    }

    pub fn push_prediction(&mut self, record: PredictionRecord) {
        self.predictions.push_back(record);
        while self.predictions.len() > MAX_PREDICTIONS {
            self.predictions.pop_front();
        }
    }
}

/// Byte-size bucket of the original file.
pub fn size_category(bytes: u64) -> &'static str {
    bucket(bytes)
}

/// Pixel-count bucket, same thresholds as the byte buckets.
pub fn dimension_category(width: u32, height: u32) -> &'static str {
    bucket(u64::from(width) * u64::from(height))
}

fn bucket(value: u64) -> &'static str {
    match value {
        v if v < 100_000 => "tiny",
        v if v < 500_000 => "small",
        v if v < 2_000_000 => "medium",
        v if v < 10_000_000 => "large",
        _ => "huge",
    }
}
