//! Text reports over learner statistics.

use super::stats::{Dimension, LearnerStatistics, OutcomeCounts, PredictionRecord};
use crate::converter::FormatTag;
use crate::selection::Winner;
use std::collections::BTreeSet;

const RULE_WIDTH: usize = 80;
const MIN_CATEGORY_SAMPLES: u64 = 3;
const MIN_METRIC_SAMPLES: usize = 3;
const MIN_PREDICTOR_SAMPLES: usize = 5;
const TOP_PREDICTORS: usize = 10;

fn distribution(counts: &OutcomeCounts) -> (f64, f64, f64) {
    let total = counts.total();
    if total == 0 {
        return (0.0, 0.0, 0.0);
    }
    let pct = |n: u64| n as f64 / total as f64 * 100.0;
    (pct(counts.jxl), pct(counts.webp), pct(counts.original))
}

/// Short per-format summary printed after every run.
pub fn statistics_summary(stats: &LearnerStatistics) -> String {
    if stats.total_processed == 0 {
        return "No statistics collected yet.".to_string();
    }

    let mut lines = vec![
        format!("Total images processed: {}", stats.total_processed),
        String::new(),
    ];

    if !stats.by_original_format.is_empty() {
        lines.push("By original format:".to_string());
        for (format, counts) in &stats.by_original_format {
            let total = counts.total();
            if total == 0 {
                continue;
            }
            let (jxl, webp, original) = distribution(counts);
            lines.push(format!(
                "  {}: JXL {:.1}%, WebP {:.1}%, Original {:.1}% (n={})",
                format, jxl, webp, original, total
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Confusion-matrix metrics for one category, all in percent except `f1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryMetrics {
    pub sensitivity: f64,
    pub specificity: f64,
    pub precision: f64,
    pub f1: f64,
    pub sample_size: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64 * 100.0
    }
}

/// Metrics for predictions that fell into `category` on `dimension`, scoring
/// `leader` as the positive class. `None` with fewer than three predictions.
pub fn category_metrics(
    predictions: &[&PredictionRecord],
    dimension: Dimension,
    category: &str,
    leader: FormatTag,
) -> Option<CategoryMetrics> {
    let relevant: Vec<&PredictionRecord> = predictions
        .iter()
        .copied()
        .filter(|p| p.features.value(dimension) == Some(category))
        .collect();
    if relevant.len() < MIN_METRIC_SAMPLES {
        return None;
    }

    let positive = Winner::from(leader);
    let (mut tp, mut fp, mut fn_, mut tn) = (0, 0, 0, 0);
    for p in &relevant {
        match (p.predicted == leader, p.actual == positive) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let sensitivity = ratio(tp, tp + fn_);
    let specificity = ratio(tn, tn + fp);
    let precision = ratio(tp, tp + fp);
    let f1 = if precision + sensitivity > 0.0 {
        2.0 * precision * sensitivity / (precision + sensitivity)
    } else {
        0.0
    };

    Some(CategoryMetrics {
        sensitivity,
        specificity,
        precision,
        f1,
        sample_size: relevant.len(),
    })
}

/// `(dimension label, category, accuracy %)`, best first.
pub fn best_predictors(stats: &LearnerStatistics) -> Vec<(&'static str, String, f64)> {
    let mut out = Vec::new();
    if stats.predictions.is_empty() {
        return out;
    }

    for dimension in Dimension::ALL {
        let categories: BTreeSet<&str> = stats
            .predictions
            .iter()
            .filter_map(|p| p.features.value(dimension))
            .filter(|c| !c.is_empty())
            .collect();

        for category in categories {
            let relevant: Vec<&PredictionRecord> = stats
                .predictions
                .iter()
                .filter(|p| p.features.value(dimension) == Some(category))
                .collect();
            if relevant.len() < MIN_PREDICTOR_SAMPLES {
                continue;
            }

            let jxl_wins = relevant.iter().filter(|p| p.actual == Winner::Jxl).count();
            let webp_wins = relevant.iter().filter(|p| p.actual == Winner::Webp).count();
            let leader = match jxl_wins.cmp(&webp_wins) {
                std::cmp::Ordering::Greater => FormatTag::Jxl,
                std::cmp::Ordering::Less => FormatTag::Webp,
                std::cmp::Ordering::Equal => continue,
            };

            let correct = relevant
                .iter()
                .filter(|p| p.predicted == leader && p.actual == Winner::from(leader))
                .count();
            out.push((dimension.label(), category.to_string(), ratio(correct, relevant.len())));
        }
    }

    out.sort_by(|a, b| b.2.total_cmp(&a.2));
    out
}

/// Full per-dimension analysis with prediction quality metrics.
pub fn detailed_report(stats: &LearnerStatistics) -> String {
    if stats.total_processed == 0 {
        return "No statistics collected yet. Process some images first.".to_string();
    }

    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut lines = vec![
        heavy.clone(),
        "FORMAT LEARNING DETAILED REPORT".to_string(),
        heavy.clone(),
        format!("Total images processed: {}", stats.total_processed),
        String::new(),
    ];

    if !stats.predictions.is_empty() {
        let total = stats.predictions.len();
        let correct = stats.predictions.iter().filter(|p| p.correct).count();
        lines.push(format!(
            "Overall Prediction Accuracy: {:.1}% ({}/{})",
            ratio(correct, total),
            correct,
            total
        ));
        lines.push(String::new());
    }

    let predictions: Vec<&PredictionRecord> = stats.predictions.iter().collect();

    for dimension in Dimension::ALL {
        let categories = stats.dimension(dimension);
        if categories.is_empty() {
            continue;
        }

        lines.push(light.clone());
        lines.push(format!("{} Analysis", dimension.label()));
        lines.push(light.clone());

        for (category, counts) in categories {
            let total = counts.total();
            if total < MIN_CATEGORY_SAMPLES {
                continue;
            }
            let (jxl, webp, original) = distribution(counts);
            let leader = counts.leader();

            lines.push(String::new());
            lines.push(format!("  Category: {}", category));
            lines.push(format!("    Samples: {}", total));
            lines.push(format!(
                "    Distribution: JXL {:.1}%, WebP {:.1}%, Original {:.1}%",
                jxl, webp, original
            ));
            lines.push(format!(
                "    Predicted Winner: {}",
                leader.map_or("TIE".to_string(), |f| f.name().to_uppercase())
            ));

            let Some(leader) = leader else { continue };
            // vision categories are not part of the prediction snapshot
            if dimension == Dimension::VisionFeatures {
                continue;
            }
            if let Some(m) = category_metrics(&predictions, dimension, category, leader) {
                lines.push(format!("    Sensitivity (TPR): {:.1}%", m.sensitivity));
                lines.push(format!("    Specificity (TNR): {:.1}%", m.specificity));
                lines.push(format!("    Precision: {:.1}%", m.precision));
                lines.push(format!("    F1 Score: {:.2}", m.f1));
                lines.push(format!("    Sample Size: {}", m.sample_size));
            }
        }
        lines.push(String::new());
    }

    lines.push(light.clone());
    lines.push("Summary: Best Predictors".to_string());
    lines.push(light);

    let best = best_predictors(stats);
    if best.is_empty() {
        lines.push("Not enough data yet. Process more images to see predictions.".to_string());
    } else {
        for (i, (label, category, accuracy)) in best.iter().take(TOP_PREDICTORS).enumerate() {
            lines.push(format!("{}. {} → {}: {:.1}% accuracy", i + 1, label, category, accuracy));
        }
    }

    lines.push(String::new());
    lines.push(heavy.clone());
    lines.push("Note: Images are tracked by source folder to account for image sets.".to_string());
    lines.push(heavy);

    lines.join("\n")
}
