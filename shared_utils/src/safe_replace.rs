//! Safe file replacement
//!
//! A converted candidate only takes the place of its source after it has been
//! verified readable, and the source is only deleted once the candidate sits at
//! its final path. Any failure leaves the source in place.
//!
//! ```no_run
//! use shared_utils::safe_replace::replace_original;
//! use std::path::Path;
//!
//! let kept = replace_original(
//!     Path::new("pics/a.png"),
//!     Path::new("pics/a.png.tmp.webp"),
//!     Path::new("pics/a.webp"),
//! )?;
//! # Ok::<(), shared_utils::safe_replace::ReplaceError>(())
//! ```

use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("{path} is not readable: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("refusing to overwrite existing file {0}")]
    TargetExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReplaceError + '_ {
    move |source| ReplaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Check that `path` exists, is non-empty and yields at least one byte.
/// Returns its size.
pub fn verify_readable(path: &Path) -> Result<u64, ReplaceError> {
    let unreadable = |reason: String| ReplaceError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".to_string()));
    }
    if metadata.len() == 0 {
        return Err(unreadable("file is empty (0 bytes)".to_string()));
    }

    let mut file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut buffer = [0u8; 1];
    match file.read(&mut buffer) {
        Ok(1) => Ok(metadata.len()),
        Ok(_) => Err(unreadable("no data could be read".to_string())),
        Err(e) => Err(unreadable(e.to_string())),
    }
}

/// Reserve `target` with an empty placeholder. Creation is exclusive, so of
/// several callers racing for the same path exactly one succeeds.
fn claim_target(target: &Path) -> Result<(), ReplaceError> {
    match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(ReplaceError::TargetExists(target.to_path_buf()))
        }
        Err(e) => Err(io_err(target)(e)),
    }
}

/// Move `candidate` to `target`, retiring `original`.
///
/// - `target == original`: atomic rename over the source.
/// - otherwise: claim `target` (which must not already exist), rename the
///   candidate over the claim, verify it, then delete `original`. If the
///   source cannot be deleted the move is rolled back.
///
/// The source's modification time is carried over to the kept file.
pub fn replace_original(
    original: &Path,
    candidate: &Path,
    target: &Path,
) -> Result<PathBuf, ReplaceError> {
    verify_readable(candidate)?;

    let mtime = fs::metadata(original)
        .map(|m| FileTime::from_last_modification_time(&m))
        .ok();

    if target == original {
        fs::rename(candidate, original).map_err(io_err(original))?;
        verify_readable(original)?;
    } else {
        claim_target(target)?;
        if let Err(e) = fs::rename(candidate, target) {
            let _ = fs::remove_file(target);
            return Err(io_err(target)(e));
        }

        if let Err(e) = verify_readable(target) {
            let _ = fs::remove_file(target);
            return Err(e);
        }

        if let Err(source) = fs::remove_file(original) {
            warn!(
                path = %original.display(),
                error = %source,
                "Could not remove source, rolling back"
            );
            let _ = fs::remove_file(target);
            return Err(ReplaceError::Io {
                path: original.to_path_buf(),
                source,
            });
        }
    }

    if let Some(mtime) = mtime {
        if let Err(e) = filetime::set_file_mtime(target, mtime) {
            warn!(path = %target.display(), error = %e, "Failed to preserve modification time");
        }
    }

    debug!(from = %original.display(), to = %target.display(), "Replaced source file");
    Ok(target.to_path_buf())
}

/// Best-effort removal of a leftover temporary file.
pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_verify_readable() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.bin");
        let empty = temp.path().join("empty.bin");
        fs::write(&good, b"abc").unwrap();
        fs::write(&empty, b"").unwrap();

        assert_eq!(verify_readable(&good).unwrap(), 3);
        assert!(verify_readable(&empty).is_err());
        assert!(verify_readable(&temp.path().join("missing")).is_err());
        assert!(verify_readable(temp.path()).is_err());
    }

    #[test]
    fn test_replace_with_new_extension() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.png");
        let candidate = temp.path().join("a.png.tmp.webp");
        let target = temp.path().join("a.webp");
        fs::write(&original, vec![0u8; 100]).unwrap();
        fs::write(&candidate, vec![1u8; 40]).unwrap();

        let old_mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&original, old_mtime).unwrap();

        let kept = replace_original(&original, &candidate, &target).unwrap();
        assert_eq!(kept, target);
        assert!(!original.exists());
        assert!(!candidate.exists());
        assert_eq!(fs::metadata(&target).unwrap().len(), 40);

        let kept_mtime = FileTime::from_last_modification_time(&fs::metadata(&target).unwrap());
        assert_eq!(kept_mtime, old_mtime);
    }

    #[test]
    fn test_replace_in_place() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.webp");
        let candidate = temp.path().join("a.webp.tmp.webp");
        fs::write(&original, vec![0u8; 100]).unwrap();
        fs::write(&candidate, vec![1u8; 10]).unwrap();

        replace_original(&original, &candidate, &original).unwrap();
        assert_eq!(fs::read(&original).unwrap(), vec![1u8; 10]);
        assert!(!candidate.exists());
    }

    #[test]
    fn test_existing_target_protects_everything() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.png");
        let candidate = temp.path().join("a.png.tmp.jxl");
        let target = temp.path().join("a.jxl");
        fs::write(&original, b"source").unwrap();
        fs::write(&candidate, b"new").unwrap();
        fs::write(&target, b"someone else's file").unwrap();

        let err = replace_original(&original, &candidate, &target).unwrap_err();
        assert!(matches!(err, ReplaceError::TargetExists(_)));
        assert_eq!(fs::read(&original).unwrap(), b"source");
        assert_eq!(fs::read(&target).unwrap(), b"someone else's file");
    }

    #[test]
    fn test_racing_sources_never_share_a_target() {
        use std::sync::{Arc, Barrier};

        for round in 0..200 {
            let temp = TempDir::new().unwrap();
            let dir = temp.path().to_path_buf();
            let target = dir.join("a.webp");
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = ["png", "jpg"]
                .into_iter()
                .enumerate()
                .map(|(i, ext)| {
                    let original = dir.join(format!("a.{}", ext));
                    let candidate = dir.join(format!("a.{}.tmp.webp", ext));
                    fs::write(&original, vec![i as u8; 50]).unwrap();
                    fs::write(&candidate, vec![10 + i as u8; 20]).unwrap();
                    let (barrier, target) = (Arc::clone(&barrier), target.clone());
                    std::thread::spawn(move || {
                        barrier.wait();
                        let result = replace_original(&original, &candidate, &target);
                        (i, original, result)
                    })
                })
                .collect();
            let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let winners: Vec<_> = outcomes.iter().filter(|(_, _, r)| r.is_ok()).collect();
            assert_eq!(winners.len(), 1, "round {}", round);
            let winner = winners[0].0;
            assert_eq!(fs::read(&target).unwrap(), vec![10 + winner as u8; 20]);

            for (i, original, result) in &outcomes {
                if *i != winner {
                    assert!(matches!(result, Err(ReplaceError::TargetExists(_))));
                    assert_eq!(fs::read(original).unwrap(), vec![*i as u8; 50]);
                }
            }
        }
    }

    #[test]
    fn test_empty_candidate_is_rejected() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.png");
        let candidate = temp.path().join("a.png.tmp.webp");
        fs::write(&original, b"source").unwrap();
        fs::write(&candidate, b"").unwrap();

        let err = replace_original(&original, &candidate, &temp.path().join("a.webp"));
        assert!(matches!(err, Err(ReplaceError::Unreadable { .. })));
        assert!(original.exists());
    }

    #[test]
    fn test_remove_if_exists_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.tmp");
        remove_if_exists(&path);
        fs::write(&path, b"x").unwrap();
        remove_if_exists(&path);
        assert!(!path.exists());
    }
}
