//! img_squish: lossless image recompression.
//!
//! Each image is converted to lossless JPEG XL and lossless WebP in parallel;
//! the smallest of the original and the two candidates is kept, provided the
//! saving clears a minimum-improvement threshold. A persistent learner tracks
//! which format wins for which kind of image.

pub mod config;
pub mod converter;
pub mod error;
pub mod learner;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod processor;
pub mod scheduler;
pub mod selection;
pub mod vision;

pub use config::Config;
pub use converter::{
    ConversionParams, ConversionResult, FormatConverter, FormatTag, JxlConverter, WebpConverter,
};
pub use error::{Result, SquishError};
pub use learner::{FormatLearner, ImageProfile, LearnerStatistics};
pub use notify::{notifier_for, Notification, Notifier};
pub use orchestrator::DualConverter;
pub use processor::{ImageProcessor, ImageTask, TaskReport};
pub use scheduler::{BatchScheduler, BatchSummary, Phase, SchedulerOptions};
pub use selection::{select, SelectionOutcome, Winner};
pub use vision::{extractor_for, FeatureExtractor};
