//! Run notifications.
//!
//! Alerts are routed through [`Notifier`]; the built-in implementation writes
//! them to the log. Desktop delivery can be plugged in behind the same trait.

use shared_utils::{format_bytes, HangAlert};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Hang {
        idle_secs: u64,
        detail: String,
    },
    ImageError {
        file: String,
        folder: String,
        error: String,
    },
    Completed {
        processed: usize,
        errors: usize,
        saved_bytes: u64,
        saved_pct: f64,
    },
}

impl Notification {
    pub fn hang(alert: &HangAlert) -> Self {
        Notification::Hang {
            idle_secs: alert.idle_for.as_secs(),
            detail: alert.describe(),
        }
    }

    pub fn image_error(path: &Path, error: &str) -> Self {
        Notification::ImageError {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            folder: path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            error: error.to_string(),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Notification::Hang { .. } => "Image Squisher - Hang Detected",
            Notification::ImageError { .. } => "Image Squisher - Error",
            Notification::Completed { errors: 0, .. } => "Image Squisher - Completed",
            Notification::Completed { .. } => "Image Squisher - Completed with Errors",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::Hang { detail, .. } => format!("Processing may be hung.\n{}", detail),
            Notification::ImageError { file, folder, .. } => {
                format!("Error processing:\n{}\n\nFolder: {}", file, folder)
            }
            Notification::Completed {
                processed,
                errors,
                saved_bytes,
                saved_pct,
            } => {
                let saved = format!("Saved: {} ({:.1}%)", format_bytes(*saved_bytes), saved_pct);
                if *errors > 0 {
                    format!("Processed {} images\n{} errors\n{}", processed, errors, saved)
                } else {
                    format!("Processed {} images\n{}", processed, saved)
                }
            }
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log at a level matching their severity.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        let title = notification.title();
        let message = notification.message();
        match notification {
            Notification::Hang { idle_secs, .. } => {
                error!(idle_secs = *idle_secs, title, "{}", message)
            }
            Notification::ImageError { error, folder, .. } => {
                warn!(folder = %folder, error = %error, title, "{}", message)
            }
            Notification::Completed { errors, .. } => info!(errors = *errors, title, "{}", message),
        }
    }
}

pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _notification: &Notification) {}
}

pub fn notifier_for(enabled: bool) -> Arc<dyn Notifier> {
    if enabled {
        Arc::new(LogNotifier)
    } else {
        Arc::new(SilentNotifier)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every notification for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub seen: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn titles(&self) -> Vec<&'static str> {
            self.seen.lock().unwrap().iter().map(|n| n.title()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.seen.lock().unwrap().push(notification.clone());
        }
    }
}
