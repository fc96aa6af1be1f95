//! Selection engine
//!
//! Picks the smallest of the original and the converted candidates, applies
//! the minimum-improvement rule, then swaps the winner into place. Every
//! failure on the way degrades to keeping the original untouched.

use crate::converter::{ConversionResult, FormatTag};
use serde::{Deserialize, Serialize};
use shared_utils::{dotted_extension, remove_if_exists, replace_original, verify_readable};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Original,
    Jxl,
    Webp,
}

impl Winner {
    pub const ALL: [Winner; 3] = [Winner::Original, Winner::Jxl, Winner::Webp];

    pub fn name(self) -> &'static str {
        match self {
            Winner::Original => "original",
            Winner::Jxl => "jxl",
            Winner::Webp => "webp",
        }
    }

    pub fn format(self) -> Option<FormatTag> {
        match self {
            Winner::Original => None,
            Winner::Jxl => Some(FormatTag::Jxl),
            Winner::Webp => Some(FormatTag::Webp),
        }
    }
}

impl From<FormatTag> for Winner {
    fn from(tag: FormatTag) -> Self {
        match tag {
            FormatTag::Jxl => Winner::Jxl,
            FormatTag::Webp => Winner::Webp,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOutcome {
    pub winner: Winner,
    pub final_path: PathBuf,
    pub original_size: u64,
    pub final_size: u64,
    /// False when the swap failed and the original was kept as a fallback
    pub success: bool,
    pub error: Option<String>,
}

impl SelectionOutcome {
    fn kept_original(source: &Path, original_size: u64) -> Self {
        Self {
            winner: Winner::Original,
            final_path: source.to_path_buf(),
            original_size,
            final_size: original_size,
            success: true,
            error: None,
        }
    }

    pub fn improvement_pct(&self) -> f64 {
        improvement_pct(self.original_size, self.final_size)
    }
}

/// `(original - candidate) / original * 100`, zero for an empty original.
pub fn improvement_pct(original_size: u64, candidate_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        (original_size as f64 - candidate_size as f64) / original_size as f64 * 100.0
    }
}

/// Decide the winner from sizes alone.
///
/// Candidates are considered in the order original, jxl, webp, and only a
/// strictly smaller size displaces the current best, so ties go to the
/// earlier one.
pub fn choose_winner(
    original_size: u64,
    jxl: &ConversionResult,
    webp: &ConversionResult,
    min_improvement_pct: f64,
) -> (Winner, u64) {
    let mut best = (Winner::Original, original_size);
    for result in [jxl, webp] {
        if let Some(size) = result.candidate_size() {
            if size < best.1 {
                best = (Winner::from(result.format), size);
            }
        }
    }

    if best.0 != Winner::Original && improvement_pct(original_size, best.1) < min_improvement_pct {
        debug!(
            candidate = %best.0,
            improvement = improvement_pct(original_size, best.1),
            threshold = min_improvement_pct,
            "Improvement below threshold"
        );
        return (Winner::Original, original_size);
    }
    best
}

/// Final path for a kept conversion: same stem, new extension. A source that
/// already carries the winning extension is overwritten in place.
pub fn target_path(source: &Path, format: FormatTag) -> PathBuf {
    if dotted_extension(source) == format.extension() {
        source.to_path_buf()
    } else {
        source.with_extension(&format.extension()[1..])
    }
}

fn cleanup(results: &[&ConversionResult]) {
    for result in results {
        if let Some(path) = &result.output {
            remove_if_exists(path);
        }
    }
}

/// Choose, swap and clean up. Never fails: problems are reported through
/// `success = false` with the original left in place.
pub fn select(
    source: &Path,
    original_size: u64,
    jxl: &ConversionResult,
    webp: &ConversionResult,
    min_improvement_pct: f64,
) -> SelectionOutcome {
    let (winner, _) = choose_winner(original_size, jxl, webp, min_improvement_pct);

    let (chosen, loser) = match winner {
        Winner::Original => {
            cleanup(&[jxl, webp]);
            return SelectionOutcome::kept_original(source, original_size);
        }
        Winner::Jxl => (jxl, webp),
        Winner::Webp => (webp, jxl),
    };
    cleanup(&[loser]);

    let (Some(candidate), Some(format)) = (chosen.output.as_deref(), winner.format()) else {
        return SelectionOutcome::kept_original(source, original_size);
    };
    let target = target_path(source, format);

    let replaced = replace_original(source, candidate, &target)
        .and_then(|path| verify_readable(&path).map(|size| (path, size)));
    match replaced {
        Ok((final_path, final_size)) => {
            info!(
                source = %source.display(),
                kept = %final_path.display(),
                format = %winner,
                original_size,
                final_size,
                improvement = improvement_pct(original_size, final_size),
                "Kept converted file"
            );
            SelectionOutcome {
                winner,
                final_path,
                original_size,
                final_size,
                success: true,
                error: None,
            }
        }
        Err(e) => {
            warn!(source = %source.display(), error = %e, "Replacement failed, keeping original");
            remove_if_exists(candidate);
            SelectionOutcome {
                success: false,
                error: Some(e.to_string()),
                ..SelectionOutcome::kept_original(source, original_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn candidate(format: FormatTag, size: Option<u64>) -> ConversionResult {
        match size {
            Some(size) => ConversionResult::succeeded(
                format,
                PathBuf::from(format!("/virtual/x.{}", format)),
                size,
            ),
            None => ConversionResult::failed(format),
        }
    }

    #[test]
    fn test_webp_wins_large_saving() {
        let (winner, size) = choose_winner(
            1_000_000,
            &candidate(FormatTag::Jxl, Some(600_000)),
            &candidate(FormatTag::Webp, Some(550_000)),
            5.0,
        );
        assert_eq!(winner, Winner::Webp);
        assert_eq!(size, 550_000);
        assert!((improvement_pct(1_000_000, size) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_saving_keeps_original() {
        let (winner, size) = choose_winner(
            100_000,
            &candidate(FormatTag::Jxl, Some(98_000)),
            &candidate(FormatTag::Webp, Some(97_000)),
            5.0,
        );
        assert_eq!(winner, Winner::Original);
        assert_eq!(size, 100_000);
    }

    #[test]
    fn test_ties_prefer_earlier_candidate() {
        let jxl = candidate(FormatTag::Jxl, Some(500));
        let webp = candidate(FormatTag::Webp, Some(500));
        assert_eq!(choose_winner(1000, &jxl, &webp, 5.0).0, Winner::Jxl);
        // equal to the original is not an improvement
        let same = candidate(FormatTag::Jxl, Some(1000));
        assert_eq!(
            choose_winner(1000, &same, &ConversionResult::failed(FormatTag::Webp), 0.0).0,
            Winner::Original
        );
    }

    #[test]
    fn test_failed_candidates_ignored() {
        let (winner, _) = choose_winner(
            1000,
            &ConversionResult::failed(FormatTag::Jxl),
            &candidate(FormatTag::Webp, Some(10)),
            5.0,
        );
        assert_eq!(winner, Winner::Webp);
    }

    #[test]
    fn test_zero_size_original() {
        let (winner, _) = choose_winner(
            0,
            &candidate(FormatTag::Jxl, Some(0)),
            &ConversionResult::failed(FormatTag::Webp),
            0.0,
        );
        assert_eq!(winner, Winner::Original);
    }

    #[test]
    fn test_target_path() {
        assert_eq!(
            target_path(Path::new("d/a.png"), FormatTag::Webp),
            PathBuf::from("d/a.webp")
        );
        assert_eq!(
            target_path(Path::new("d/a.WEBP"), FormatTag::Webp),
            PathBuf::from("d/a.WEBP")
        );
    }

    fn write_candidates(
        dir: &Path,
        jxl: u64,
        webp: u64,
    ) -> (PathBuf, ConversionResult, ConversionResult) {
        let source = dir.join("pic.png");
        fs::write(&source, vec![0u8; 1000]).unwrap();
        let jxl_path = dir.join("pic.png.tmp.jxl");
        let webp_path = dir.join("pic.png.tmp.webp");
        fs::write(&jxl_path, vec![1u8; jxl as usize]).unwrap();
        fs::write(&webp_path, vec![2u8; webp as usize]).unwrap();
        (
            source,
            ConversionResult::succeeded(FormatTag::Jxl, jxl_path, jxl),
            ConversionResult::succeeded(FormatTag::Webp, webp_path, webp),
        )
    }

    #[test]
    fn test_select_swaps_winner_and_cleans_loser() {
        let temp = TempDir::new().unwrap();
        let (source, jxl, webp) = write_candidates(temp.path(), 600, 550);

        let outcome = select(&source, 1000, &jxl, &webp, 5.0);
        assert!(outcome.success);
        assert_eq!(outcome.winner, Winner::Webp);
        assert_eq!(outcome.final_path, temp.path().join("pic.webp"));
        assert_eq!(outcome.final_size, 550);
        assert!(!source.exists());
        assert!(!jxl.output.unwrap().exists());
        assert!(!webp.output.unwrap().exists());
    }

    #[test]
    fn test_select_original_removes_all_candidates() {
        let temp = TempDir::new().unwrap();
        let (source, jxl, webp) = write_candidates(temp.path(), 990, 980);

        let outcome = select(&source, 1000, &jxl, &webp, 5.0);
        assert!(outcome.success);
        assert_eq!(outcome.winner, Winner::Original);
        assert_eq!(outcome.final_path, source);
        assert_eq!(fs::metadata(&source).unwrap().len(), 1000);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_select_falls_back_when_target_taken() {
        let temp = TempDir::new().unwrap();
        let (source, jxl, webp) = write_candidates(temp.path(), 100, 900);
        fs::write(temp.path().join("pic.jxl"), b"unrelated").unwrap();

        let outcome = select(&source, 1000, &jxl, &webp, 5.0);
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.winner, Winner::Original);
        assert_eq!(outcome.final_size, 1000);
        assert!(source.exists());
        assert!(!jxl.output.unwrap().exists());
        assert!(!webp.output.unwrap().exists());
        assert_eq!(fs::read(temp.path().join("pic.jxl")).unwrap(), b"unrelated");
    }

    fn arb_result(format: FormatTag) -> impl Strategy<Value = ConversionResult> {
        prop::option::of(0u64..2_000_000).prop_map(move |size| candidate(format, size))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn winner_never_larger_than_original(
            original in 0u64..2_000_000,
            jxl in arb_result(FormatTag::Jxl),
            webp in arb_result(FormatTag::Webp),
            min_pct in 0.0f64..100.0,
        ) {
            let (winner, size) = choose_winner(original, &jxl, &webp, min_pct);
            prop_assert!(winner == Winner::Original || size <= original);
            if winner == Winner::Original {
                prop_assert_eq!(size, original);
            } else {
                prop_assert!(improvement_pct(original, size) >= min_pct);
            }
        }

        #[test]
        fn below_threshold_always_original(
            original in 1u64..2_000_000,
            jxl in arb_result(FormatTag::Jxl),
            webp in arb_result(FormatTag::Webp),
            min_pct in 0.0f64..100.0,
        ) {
            let all_below = [&jxl, &webp].iter().all(|r| {
                r.candidate_size()
                    .map(|s| improvement_pct(original, s) < min_pct)
                    .unwrap_or(true)
            });
            prop_assume!(all_below);
            prop_assert_eq!(choose_winner(original, &jxl, &webp, min_pct).0, Winner::Original);
        }
    }
}
