//! Perceptual feature extraction
//!
//! Cheap statistics that hint at how an image will compress: pixel
//! variability, colour clustering, gradient energy and local texture.
//! Features are only ever consumed through [`categorize`], which turns them
//! into coarse buckets for the learner.
//!
//! Extraction never fails: an image that cannot be decoded yields an empty
//! feature set, and the [`NoVision`] extractor always does.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub type VisionFeatures = BTreeMap<String, f64>;
pub type VisionCategories = BTreeMap<String, String>;

pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, path: &Path) -> VisionFeatures;
}

/// Selected when vision analysis is disabled.
#[derive(Debug, Default)]
pub struct NoVision;

impl FeatureExtractor for NoVision {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn extract(&self, _path: &Path) -> VisionFeatures {
        VisionFeatures::new()
    }
}

#[derive(Debug, Clone)]
pub struct PixelStatsExtractor {
    pub clusters: usize,
    pub max_samples: usize,
    pub max_iter: usize,
    pub restarts: usize,
    pub seed: u64,
}

impl Default for PixelStatsExtractor {
    fn default() -> Self {
        Self {
            clusters: 8,
            max_samples: 10_000,
            max_iter: 100,
            restarts: 10,
            seed: 0,
        }
    }
}

impl FeatureExtractor for PixelStatsExtractor {
    fn name(&self) -> &'static str {
        "pixel-stats"
    }

    fn extract(&self, path: &Path) -> VisionFeatures {
        match image::open(path) {
            Ok(img) => self.extract_rgb(&img.to_rgb8()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Vision analysis skipped");
                VisionFeatures::new()
            }
        }
    }
}

pub fn extractor_for(enabled: bool) -> Arc<dyn FeatureExtractor> {
    if enabled {
        Arc::new(PixelStatsExtractor::default())
    } else {
        Arc::new(NoVision)
    }
}

fn mean_var(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (mut n, mut sum, mut sum_sq) = (0usize, 0.0, 0.0);
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    (mean, (sum_sq / n as f64 - mean * mean).max(0.0))
}

/// Linear-interpolated percentile, `q` in `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn grayscale(img: &RgbImage) -> Vec<f64> {
    img.pixels()
        .map(|p| (f64::from(p[0]) + f64::from(p[1]) + f64::from(p[2])) / 3.0)
        .collect()
}

impl PixelStatsExtractor {
    pub fn extract_rgb(&self, img: &RgbImage) -> VisionFeatures {
        let mut features = VisionFeatures::new();
        if img.width() == 0 || img.height() == 0 {
            return features;
        }
        pixel_variability(img, &mut features);
        self.color_complexity(img, &mut features);
        let gray = grayscale(img);
        edge_density(&gray, img.width() as usize, img.height() as usize, &mut features);
        texture(&gray, img.width() as usize, img.height() as usize, &mut features);
        features
    }

    fn sample_pixels(&self, img: &RgbImage, rng: &mut StdRng) -> Vec<[f64; 3]> {
        let raw = img.as_raw();
        let at = |i: usize| {
            [
                f64::from(raw[i * 3]),
                f64::from(raw[i * 3 + 1]),
                f64::from(raw[i * 3 + 2]),
            ]
        };
        let count = raw.len() / 3;
        if count <= self.max_samples {
            return (0..count).map(at).collect();
        }
        rand::seq::index::sample(rng, count, self.max_samples)
            .into_iter()
            .map(at)
            .collect()
    }

    fn color_complexity(&self, img: &RgbImage, features: &mut VisionFeatures) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sample = self.sample_pixels(img, &mut rng);

        let distinct: HashSet<[u8; 3]> = sample
            .iter()
            .map(|p| [p[0] as u8, p[1] as u8, p[2] as u8])
            .collect();

        if distinct.len() < self.clusters {
            // too few colours to cluster: count quantized colours instead
            let quantized: HashSet<[u8; 3]> = distinct
                .iter()
                .map(|c| [c[0] / 32 * 32, c[1] / 32 * 32, c[2] / 32 * 32])
                .collect();
            let count = quantized.len() as f64;
            features.insert("color_complexity".into(), count);
            features.insert("dominant_colors".into(), count);
            features.insert("avg_color_distance".into(), 0.0);
            return;
        }

        let best = (0..self.restarts.max(1))
            .map(|_| kmeans(&sample, self.clusters, self.max_iter, &mut rng))
            .min_by(|a, b| a.inertia.total_cmp(&b.inertia));

        if let Some(fit) = best {
            features.insert("color_complexity".into(), fit.inertia);
            features.insert("dominant_colors".into(), fit.used_clusters as f64);
            features.insert("avg_color_distance".into(), fit.avg_distance);
        }
    }
}

fn pixel_variability(img: &RgbImage, features: &mut VisionFeatures) {
    let raw = img.as_raw();
    let (mean, var) = mean_var(raw.iter().map(|&v| f64::from(v)));
    let std = var.sqrt();
    features.insert("pixel_variance".into(), var);
    features.insert("pixel_std".into(), std);

    for (i, channel) in ["R", "G", "B"].iter().enumerate() {
        let (_, cvar) = mean_var(raw.iter().skip(i).step_by(3).map(|&v| f64::from(v)));
        features.insert(format!("{}_variance", channel), cvar);
        features.insert(format!("{}_std", channel), cvar.sqrt());
    }

    let cv = if mean > 0.0 { std / mean } else { 0.0 };
    features.insert("coefficient_of_variation".into(), cv);
}

struct KMeansFit {
    inertia: f64,
    used_clusters: usize,
    avg_distance: f64,
}

fn dist_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn nearest(point: &[f64; 3], centers: &[[f64; 3]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centers.iter().enumerate() {
        let d = dist_sq(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++ seeding followed by Lloyd iterations.
fn kmeans(points: &[[f64; 3]], k: usize, max_iter: usize, rng: &mut StdRng) -> KMeansFit {
    let mut centers: Vec<[f64; 3]> = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);
    let mut closest: Vec<f64> = points.iter().map(|p| dist_sq(p, &centers[0])).collect();

    while centers.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            closest
                .iter()
                .position(|&d| {
                    target -= d;
                    target <= 0.0
                })
                .unwrap_or(points.len() - 1)
        };
        let center = points[next];
        for (d, p) in closest.iter_mut().zip(points) {
            *d = d.min(dist_sq(p, &center));
        }
        centers.push(center);
    }

    let mut labels = vec![usize::MAX; points.len()];
    for _ in 0..max_iter {
        let mut changed = false;
        for (label, p) in labels.iter_mut().zip(points) {
            let (idx, _) = nearest(p, &centers);
            if *label != idx {
                *label = idx;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (&label, p) in labels.iter().zip(points) {
            counts[label] += 1;
            for c in 0..3 {
                sums[label][c] += p[c];
            }
        }
        for (i, center) in centers.iter_mut().enumerate() {
            if counts[i] > 0 {
                let n = counts[i] as f64;
                *center = [sums[i][0] / n, sums[i][1] / n, sums[i][2] / n];
            }
        }
    }

    let mut inertia = 0.0;
    let mut distance_sum = 0.0;
    let mut used = HashSet::new();
    for p in points {
        let (idx, d) = nearest(p, &centers);
        used.insert(idx);
        inertia += d;
        distance_sum += d.sqrt();
    }

    KMeansFit {
        inertia,
        used_clusters: used.len(),
        avg_distance: distance_sum / points.len() as f64,
    }
}

fn edge_density(gray: &[f64], width: usize, height: usize, features: &mut VisionFeatures) {
    let mut magnitude = Vec::with_capacity(gray.len());
    for y in 0..height {
        for x in 0..width {
            let v = gray[y * width + x];
            let h = if x == 0 { 0.0 } else { (v - gray[y * width + x - 1]).abs() };
            let vert = if y == 0 { 0.0 } else { (v - gray[(y - 1) * width + x]).abs() };
            magnitude.push((h * h + vert * vert).sqrt());
        }
    }

    let (mean, var) = mean_var(magnitude.iter().copied());
    let threshold = percentile(&magnitude, 90.0);
    let strong = magnitude.iter().filter(|&&m| m > threshold).count();

    features.insert("edge_density".into(), mean);
    features.insert("edge_variance".into(), var);
    features.insert(
        "strong_edge_ratio".into(),
        strong as f64 / magnitude.len() as f64,
    );
}

fn texture(gray: &[f64], width: usize, height: usize, features: &mut VisionFeatures) {
    let window = 5.min(width.min(height) / 10);
    let mut local = Vec::new();

    if window >= 3 {
        for top in (0..height - window).step_by(window) {
            for left in (0..width - window).step_by(window) {
                let cells = (top..top + window)
                    .flat_map(|y| (left..left + window).map(move |x| gray[y * width + x]));
                local.push(mean_var(cells).1);
            }
        }
    }

    if local.is_empty() {
        features.insert("local_variance".into(), 0.0);
        features.insert("texture_smoothness".into(), 0.0);
    } else {
        let local_variance = local.iter().sum::<f64>() / local.len() as f64;
        features.insert("local_variance".into(), local_variance);
        features.insert("texture_smoothness".into(), 1.0 / (1.0 + local_variance));
    }
}

/// Bucket raw features into the labels the learner votes on.
pub fn categorize(features: &VisionFeatures) -> VisionCategories {
    let mut categories = VisionCategories::new();

    if let Some(&var) = features.get("pixel_variance") {
        let label = if var < 1000.0 {
            "low"
        } else if var < 5000.0 {
            "medium"
        } else {
            "high"
        };
        categories.insert("variability".into(), label.into());
    }

    if let Some(&complexity) = features.get("color_complexity") {
        let label = if complexity < 100_000.0 {
            "simple"
        } else if complexity < 500_000.0 {
            "medium"
        } else {
            "complex"
        };
        categories.insert("color_complexity".into(), label.into());
    }

    if let Some(&edges) = features.get("edge_density") {
        let label = if edges < 10.0 {
            "low"
        } else if edges < 30.0 {
            "medium"
        } else {
            "high"
        };
        categories.insert("edge_density".into(), label.into());
    }

    if let Some(&smooth) = features.get("texture_smoothness") {
        let label = if smooth > 0.7 {
            "smooth"
        } else if smooth > 0.3 {
            "medium"
        } else {
            "rough"
        };
        categories.insert("texture".into(), label.into());
    }

    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn noisy(width: u32, height: u32) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(7);
        RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
    }

    #[test]
    fn test_flat_image_features() {
        let img = RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]));
        let f = PixelStatsExtractor::default().extract_rgb(&img);

        assert_eq!(f["R_variance"], 0.0);
        assert_eq!(f["edge_density"], 0.0);
        assert_eq!(f["strong_edge_ratio"], 0.0);
        assert_eq!(f["local_variance"], 0.0);
        assert_eq!(f["texture_smoothness"], 1.0);
        // one colour: quantized fallback instead of clustering
        assert_eq!(f["dominant_colors"], 1.0);
        assert_eq!(f["avg_color_distance"], 0.0);
        // overall variance spans the three channel values
        let expected = ((10.0f64 - 20.0).powi(2) + 0.0 + (30.0f64 - 20.0).powi(2)) / 3.0;
        assert!((f["pixel_variance"] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_noise_categorizes_as_busy() {
        let img = noisy(64, 64);
        let f = PixelStatsExtractor::default().extract_rgb(&img);
        let c = categorize(&f);
        assert_eq!(c["variability"], "high");
        assert_eq!(c["edge_density"], "high");
        assert_eq!(c["texture"], "rough");
        assert!(f["dominant_colors"] <= 8.0);
        assert!(f["strong_edge_ratio"] <= 0.1 + 1e-9);
    }

    #[test]
    fn test_kmeans_finds_separated_clusters() {
        let img = RgbImage::from_fn(32, 32, |x, y| {
            let base = ((x / 4 + y / 4 * 8) % 8) as u8 * 30;
            Rgb([base, base.wrapping_add((x % 2) as u8), base])
        });
        let f = PixelStatsExtractor::default().extract_rgb(&img);
        assert_eq!(f["dominant_colors"], 8.0);
        // only the 0/1 jitter is left inside each cluster
        assert!(f["avg_color_distance"] < 1.0);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let img = noisy(150, 120);
        let e = PixelStatsExtractor::default();
        assert_eq!(e.extract_rgb(&img), e.extract_rgb(&img));
    }

    #[test]
    fn test_small_image_skips_texture() {
        let img = noisy(20, 20);
        let f = PixelStatsExtractor::default().extract_rgb(&img);
        assert_eq!(f["local_variance"], 0.0);
        assert_eq!(f["texture_smoothness"], 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (0..=10).map(f64::from).collect();
        assert!((percentile(&values, 90.0) - 9.0).abs() < 1e-9);
        assert!((percentile(&[1.0, 2.0], 50.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_categorize_thresholds() {
        let mut f = VisionFeatures::new();
        f.insert("pixel_variance".into(), 999.0);
        f.insert("color_complexity".into(), 100_000.0);
        f.insert("edge_density".into(), 30.0);
        f.insert("texture_smoothness".into(), 0.3);
        let c = categorize(&f);
        assert_eq!(c["variability"], "low");
        assert_eq!(c["color_complexity"], "medium");
        assert_eq!(c["edge_density"], "high");
        assert_eq!(c["texture"], "rough");
        assert!(categorize(&VisionFeatures::new()).is_empty());
    }

    #[test]
    fn test_extractors_on_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("n.png");
        noisy(16, 16).save(&path).unwrap();

        assert!(!PixelStatsExtractor::default().extract(&path).is_empty());
        assert!(NoVision.extract(&path).is_empty());
        assert!(extractor_for(true).extract(&temp.path().join("missing.png")).is_empty());
        assert_eq!(extractor_for(false).name(), "disabled");
    }
}
