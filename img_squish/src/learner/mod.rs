//! Format learner
//!
//! Tracks which format won for each image characteristic and predicts the
//! likely winner for new images by weighted voting:
//!
//! - a dimension votes only with at least [`MIN_VOTE_SAMPLES`] jxl+webp wins
//! - the original-format dimension votes with weight 2, all others with 1
//! - a prediction needs a margin of more than one vote
//!
//! One [`FormatLearner`] is shared by all workers; its statistics sit behind a
//! mutex so prediction, bookkeeping and periodic saves are serialized.

pub mod report;
pub mod stats;

use crate::converter::FormatTag;
use crate::probe::{probe, ImageInfo};
use crate::selection::Winner;
use crate::vision::{categorize, FeatureExtractor, VisionCategories};
use shared_utils::{dotted_extension, parent_folder_name};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub use self::stats::{
    dimension_category, size_category, Dimension, FeatureSnapshot, LearnerStatistics,
    OutcomeCounts, PredictionRecord,
};

pub const MIN_VOTE_SAMPLES: u64 = 3;
pub const SAVE_INTERVAL: u64 = 10;

/// Categorical view of one image, derived once and reused for prediction
/// and recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProfile {
    pub original_format: String,
    pub color_mode: String,
    pub size_cat: String,
    pub dim_cat: String,
    pub source_folder: String,
    pub vision: VisionCategories,
}

impl ImageProfile {
    pub fn from_info(
        path: &Path,
        original_size: u64,
        info: &ImageInfo,
        vision: VisionCategories,
    ) -> Self {
        Self {
            original_format: dotted_extension(path),
            color_mode: info.color_mode.clone(),
            size_cat: size_category(original_size).to_string(),
            dim_cat: dimension_category(info.width, info.height).to_string(),
            source_folder: parent_folder_name(path),
            vision,
        }
    }

    pub fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            format: self.original_format.clone(),
            color_mode: self.color_mode.clone(),
            size_cat: self.size_cat.clone(),
            dim_cat: self.dim_cat.clone(),
            source_folder: self.source_folder.clone(),
        }
    }

    /// `(dimension, category)` pairs this image falls into.
    fn categories(&self) -> Vec<(Dimension, String)> {
        let mut out = vec![
            (Dimension::OriginalFormat, self.original_format.clone()),
            (Dimension::ColorMode, self.color_mode.clone()),
            (Dimension::SizeCategory, self.size_cat.clone()),
            (Dimension::Dimensions, self.dim_cat.clone()),
            (Dimension::SourceFolder, self.source_folder.clone()),
        ];
        out.extend(self.vision.iter().map(|(feature, value)| {
            (Dimension::VisionFeatures, format!("{}_{}", feature, value))
        }));
        out
    }
}

/// Vote over the learned statistics. Pure; used under the learner lock.
pub fn predict_from_stats(stats: &LearnerStatistics, profile: &ImageProfile) -> Option<FormatTag> {
    let (mut jxl, mut webp) = (0u32, 0u32);

    for (dimension, category) in profile.categories() {
        let weight = match dimension {
            Dimension::OriginalFormat => 2,
            Dimension::SourceFolder => continue,
            _ => 1,
        };
        let Some(counts) = stats.dimension(dimension).get(&category) else {
            continue;
        };
        if counts.decided() < MIN_VOTE_SAMPLES {
            continue;
        }
        match counts.leader() {
            Some(FormatTag::Jxl) => jxl += weight,
            Some(FormatTag::Webp) => webp += weight,
            None => {}
        }
    }

    if jxl > webp + 1 {
        Some(FormatTag::Jxl)
    } else if webp > jxl + 1 {
        Some(FormatTag::Webp)
    } else {
        None
    }
}

pub struct FormatLearner {
    stats_path: PathBuf,
    stats: Mutex<LearnerStatistics>,
    extractor: Arc<dyn FeatureExtractor>,
}

impl FormatLearner {
    /// Load statistics from `stats_path` (empty if missing or corrupt).
    pub fn open(stats_path: &Path, extractor: Arc<dyn FeatureExtractor>) -> Self {
        let stats = LearnerStatistics::load(stats_path);
        info!(
            path = %stats_path.display(),
            total_processed = stats.total_processed,
            vision = extractor.name(),
            "Format learner ready"
        );
        Self {
            stats_path: stats_path.to_path_buf(),
            stats: Mutex::new(stats),
            extractor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LearnerStatistics> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Characterize an image. `None` when its header cannot be read; such
    /// images are left out of learning.
    pub fn profile(&self, path: &Path, original_size: u64) -> Option<ImageProfile> {
        match probe(path) {
            Ok(info) => {
                let vision = categorize(&self.extractor.extract(path));
                Some(ImageProfile::from_info(path, original_size, &info, vision))
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Image excluded from learning");
                None
            }
        }
    }

    pub fn predict(&self, profile: &ImageProfile) -> Option<FormatTag> {
        predict_from_stats(&self.lock(), profile)
    }

    /// Profile the file at `path` and predict.
    pub fn predict_for(&self, path: &Path, original_size: u64) -> Option<FormatTag> {
        self.profile(path, original_size)
            .and_then(|profile| self.predict(&profile))
    }

    /// Record an outcome. The prediction for this image is made first, against
    /// the statistics as they were before this observation.
    pub fn record(
        &self,
        profile: &ImageProfile,
        winner: Winner,
        original_size: u64,
        jxl_size: Option<u64>,
        webp_size: Option<u64>,
    ) {
        let mut stats = self.lock();
        let predicted = predict_from_stats(&stats, profile);

        stats.total_processed += 1;

        if let Some(predicted) = predicted {
            stats.push_prediction(PredictionRecord {
                predicted,
                actual: winner,
                correct: Winner::from(predicted) == winner,
                features: profile.snapshot(),
            });
        }

        for (dimension, category) in profile.categories() {
            stats.count(dimension, &category, winner);
        }

        debug!(
            format = %profile.original_format,
            winner = %winner,
            predicted = ?predicted,
            original_size,
            jxl_size = ?jxl_size,
            webp_size = ?webp_size,
            "Learner recorded outcome"
        );

        if stats.total_processed % SAVE_INTERVAL == 0 {
            self.save_locked(&stats);
        }
    }

    fn save_locked(&self, stats: &LearnerStatistics) {
        if let Err(e) = stats.save(&self.stats_path) {
            warn!(
                path = %self.stats_path.display(),
                error = %e,
                "Failed to save learner statistics"
            );
        }
    }

    /// Persist now. Failures are logged and otherwise ignored.
    pub fn save(&self) {
        let stats = self.lock();
        self.save_locked(&stats);
    }

    pub fn snapshot(&self) -> LearnerStatistics {
        self.lock().clone()
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    pub fn statistics_summary(&self) -> String {
        report::statistics_summary(&self.lock())
    }

    pub fn detailed_report(&self) -> String {
        report::detailed_report(&self.lock())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::profile;
    use super::*;
    use crate::vision::NoVision;
    use image::RgbImage;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn learner(dir: &Path) -> FormatLearner {
        FormatLearner::open(&dir.join("stats.json"), Arc::new(NoVision))
    }

    #[test]
    fn test_first_record_creates_category() {
        let temp = TempDir::new().unwrap();
        let l = learner(temp.path());
        let p = profile(".png", "RGB", "tiny", "tiny");

        l.record(&p, Winner::Webp, 1000, Some(900), Some(800));

        let stats = l.snapshot();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(
            stats.by_original_format[".png"],
            OutcomeCounts { jxl: 0, webp: 1, original: 0 }
        );
        assert_eq!(stats.by_source_folder["set"].webp, 1);
        assert!(stats.predictions.is_empty());
    }

    #[test]
    fn test_needs_three_samples_to_vote() {
        let temp = TempDir::new().unwrap();
        let l = learner(temp.path());
        let p = profile(".png", "RGB", "tiny", "tiny");

        l.record(&p, Winner::Webp, 1, None, None);
        l.record(&p, Winner::Webp, 1, None, None);
        assert_eq!(l.predict(&p), None);

        l.record(&p, Winner::Webp, 1, None, None);
        assert_eq!(l.predict(&p), Some(FormatTag::Webp));
    }

    #[test]
    fn test_format_vote_alone_is_enough() {
        let mut stats = LearnerStatistics::default();
        for _ in 0..3 {
            stats.count(Dimension::OriginalFormat, ".jpg", Winner::Jxl);
        }
        // every other dimension is unseen, so only the weight-2 vote counts
        let p = profile(".jpg", "L", "huge", "huge");
        assert_eq!(predict_from_stats(&stats, &p), Some(FormatTag::Jxl));
    }

    #[test]
    fn test_single_weight_vote_is_not_enough() {
        let mut stats = LearnerStatistics::default();
        for _ in 0..5 {
            stats.count(Dimension::ColorMode, "RGBA", Winner::Webp);
        }
        let p = profile(".png", "RGBA", "small", "small");
        assert_eq!(predict_from_stats(&stats, &p), None);
    }

    #[test]
    fn test_source_folder_never_votes() {
        let mut stats = LearnerStatistics::default();
        for _ in 0..10 {
            stats.count(Dimension::SourceFolder, "set", Winner::Jxl);
            stats.count(Dimension::ColorMode, "RGB", Winner::Jxl);
        }
        let p = profile(".png", "RGB", "tiny", "tiny");
        assert_eq!(predict_from_stats(&stats, &p), None);
    }

    #[test]
    fn test_vision_categories_vote() {
        let mut stats = LearnerStatistics::default();
        for _ in 0..3 {
            stats.count(Dimension::VisionFeatures, "texture_smooth", Winner::Webp);
            stats.count(Dimension::ColorMode, "RGB", Winner::Webp);
        }
        let mut p = profile(".png", "RGB", "tiny", "tiny");
        assert_eq!(predict_from_stats(&stats, &p), None);
        p.vision.insert("texture".into(), "smooth".into());
        assert_eq!(predict_from_stats(&stats, &p), Some(FormatTag::Webp));
    }

    #[test]
    fn test_prediction_records_track_correctness() {
        let temp = TempDir::new().unwrap();
        let l = learner(temp.path());
        let p = profile(".png", "RGB", "tiny", "tiny");
        for _ in 0..3 {
            l.record(&p, Winner::Webp, 1, None, None);
        }
        l.record(&p, Winner::Jxl, 1, None, None);

        let stats = l.snapshot();
        assert_eq!(stats.predictions.len(), 1);
        let rec = &stats.predictions[0];
        assert_eq!(rec.predicted, FormatTag::Webp);
        assert_eq!(rec.actual, Winner::Jxl);
        assert!(!rec.correct);
        assert_eq!(rec.features.format, ".png");
    }

    #[test]
    fn test_saves_every_tenth_record() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.json");
        let l = FormatLearner::open(&path, Arc::new(NoVision));
        let p = profile(".gif", "RGBA", "tiny", "tiny");

        for _ in 0..9 {
            l.record(&p, Winner::Original, 1, None, None);
        }
        assert!(!path.exists());
        l.record(&p, Winner::Original, 1, None, None);
        assert_eq!(LearnerStatistics::load(&path).total_processed, 10);

        l.record(&p, Winner::Original, 1, None, None);
        l.save();
        let reopened = FormatLearner::open(&path, Arc::new(NoVision));
        assert_eq!(reopened.snapshot().total_processed, 11);
    }

    #[test]
    fn test_unwritable_stats_path_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing-dir").join("stats.json");
        let l = FormatLearner::open(&path, Arc::new(NoVision));
        l.record(&profile(".png", "RGB", "tiny", "tiny"), Winner::Jxl, 1, None, None);
        l.save();
        assert_eq!(l.snapshot().total_processed, 1);
    }

    #[test]
    fn test_profile_from_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("holiday");
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join("shot.PNG");
        RgbImage::new(800, 600).save_with_format(&path, image::ImageFormat::Png).unwrap();

        let l = learner(temp.path());
        let p = l.profile(&path, 150_000).unwrap();
        assert_eq!(p.original_format, ".png");
        assert_eq!(p.color_mode, "RGB");
        assert_eq!(p.size_cat, "small");
        assert_eq!(p.dim_cat, "small");
        assert_eq!(p.source_folder, "holiday");
        assert!(p.vision.is_empty());

        assert!(l.profile(&temp.path().join("nope.png"), 1).is_none());
        assert_eq!(l.predict_for(&temp.path().join("nope.png"), 1), None);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let l = Arc::new(learner(temp.path()));
        std::thread::scope(|s| {
            for t in 0..4 {
                let l = Arc::clone(&l);
                s.spawn(move || {
                    let p = profile(&format!(".f{}", t), "RGB", "tiny", "tiny");
                    for _ in 0..25 {
                        l.record(&p, Winner::Webp, 1, None, None);
                    }
                });
            }
        });
        let stats = l.snapshot();
        assert_eq!(stats.total_processed, 100);
        assert_eq!(stats.by_color_mode["RGB"].webp, 100);
    }

    fn arb_winner() -> impl Strategy<Value = Winner> {
        prop_oneof![Just(Winner::Original), Just(Winner::Jxl), Just(Winner::Webp)]
    }

    fn arb_counts() -> impl Strategy<Value = OutcomeCounts> {
        (0u64..6, 0u64..6, 0u64..6).prop_map(|(jxl, webp, original)| OutcomeCounts {
            jxl,
            webp,
            original,
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn counts_sum_to_records(
            records in prop::collection::vec((0usize..4, 0usize..3, arb_winner()), 1..60)
        ) {
            let temp = TempDir::new().unwrap();
            let l = learner(temp.path());
            let formats = [".png", ".jpg", ".gif", ".bmp"];
            let modes = ["RGB", "RGBA", "L"];
            for (f, m, winner) in &records {
                l.record(&profile(formats[*f], modes[*m], "tiny", "tiny"), *winner, 1, None, None);
            }
            let stats = l.snapshot();
            let n = records.len() as u64;
            prop_assert_eq!(stats.total_processed, n);
            let dims = [
                Dimension::OriginalFormat,
                Dimension::ColorMode,
                Dimension::SizeCategory,
                Dimension::Dimensions,
            ];
            for dim in dims {
                let sum: u64 = stats.dimension(dim).values().map(|c| c.total()).sum();
                prop_assert_eq!(sum, n);
            }
        }

        #[test]
        fn prediction_needs_margin_and_samples(
            fmt in arb_counts(),
            mode in arb_counts(),
            size in arb_counts(),
            dims in arb_counts(),
        ) {
            let mut stats = LearnerStatistics::default();
            stats.by_original_format.insert(".png".into(), fmt);
            stats.by_color_mode.insert("RGB".into(), mode);
            stats.by_size_category.insert("tiny".into(), size);
            stats.by_dimensions.insert("tiny".into(), dims);

            let mut jxl = 0i32;
            let mut webp = 0i32;
            for (counts, weight) in [(fmt, 2), (mode, 1), (size, 1), (dims, 1)] {
                if counts.decided() >= MIN_VOTE_SAMPLES {
                    if counts.jxl > counts.webp { jxl += weight; }
                    if counts.webp > counts.jxl { webp += weight; }
                }
            }

            let predicted = predict_from_stats(&stats, &profile(".png", "RGB", "tiny", "tiny"));
            match predicted {
                Some(FormatTag::Jxl) => prop_assert!(jxl - webp > 1),
                Some(FormatTag::Webp) => prop_assert!(webp - jxl > 1),
                None => prop_assert!((jxl - webp).abs() <= 1),
            }
        }
    }
}
