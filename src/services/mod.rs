//! Build engine services.
//!
//! The decision logic (bucket completion, pairing, classification, status
//! aggregation, test stability) is pure; `build_pipeline` runs it against the
//! database inside row-locked transactions.

pub mod bucket_store;
pub mod build_pipeline;
pub mod build_status;
pub mod diff_classifier;
pub mod event_broadcaster;
pub mod pairing;
pub mod status_watcher;
pub mod test_stability;

pub use build_pipeline::BuildPipeline;
pub use build_status::{BuildSignals, aggregate};
pub use diff_classifier::{ChecksumDiffer, ClassifierPolicy, ImageDiffer};
pub use event_broadcaster::EventBroadcaster;
pub use status_watcher::{WatcherConfig, start_status_watcher};
pub use test_stability::StabilityPolicy;
