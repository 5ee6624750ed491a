//! Diff classifier.
//!
//! Pairs the screenshots of a base and a compare bucket by name, runs the diff
//! primitive on each pair and turns the outcome into a `ScreenshotDiffStatus`.
//! Pairs are classified concurrently; a failing pair becomes a `failure` diff
//! and never aborts the build.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use tracing::warn;
use uuid::Uuid;

use crate::models::{ScreenshotDiffStatus, ScreenshotRef};

/// Result of the diff primitive for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDiff {
    Empty,
    NonEmpty,
}

/// Errors raised by the diff primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("screenshot {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("screenshot {0} is unavailable")]
    Unavailable(String),
}

/// Pairwise image comparison.
#[async_trait]
pub trait ImageDiffer: Send + Sync {
    async fn diff(&self, base: &ScreenshotRef, compare: &ScreenshotRef)
    -> Result<PixelDiff, DiffError>;
}

/// Compares the SHA-256 checksums recorded at upload time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumDiffer;

impl ChecksumDiffer {
    fn validate(screenshot: &ScreenshotRef) -> Result<[u8; 32], DiffError> {
        let bytes = hex::decode(&screenshot.checksum).map_err(|e| DiffError::Corrupt {
            name: screenshot.name.clone(),
            reason: format!("invalid checksum: {}", e),
        })?;
        bytes.try_into().map_err(|_| DiffError::Corrupt {
            name: screenshot.name.clone(),
            reason: "checksum is not a SHA-256 digest".to_string(),
        })
    }
}

#[async_trait]
impl ImageDiffer for ChecksumDiffer {
    async fn diff(
        &self,
        base: &ScreenshotRef,
        compare: &ScreenshotRef,
    ) -> Result<PixelDiff, DiffError> {
        let base_digest = Self::validate(base)?;
        let compare_digest = Self::validate(compare)?;
        if base_digest == compare_digest {
            Ok(PixelDiff::Empty)
        } else {
            Ok(PixelDiff::NonEmpty)
        }
    }
}

/// Diff of the same screenshot name in the previous build of the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorDiff {
    pub status: ScreenshotDiffStatus,
    pub base_checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tunables of the classifier.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierPolicy {
    /// Maximum pairs diffed at the same time.
    pub concurrency: usize,
    /// A prior diff older than this never makes a pair flaky.
    pub flaky_window: Duration,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            concurrency: 8,
            flaky_window: Duration::from_secs(24 * 3600),
        }
    }
}

/// Classified pair, ready to be stored as a screenshot diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedDiff {
    pub name: String,
    pub status: ScreenshotDiffStatus,
    pub flaky_detected: bool,
    pub group: Option<String>,
    pub base_screenshot_id: Option<Uuid>,
    pub compare_screenshot_id: Option<Uuid>,
}

/// Classify every screenshot name present in `base` or `compare`.
///
/// An empty `base` (orphan build) yields only `added` diffs. Results are
/// sorted by name.
pub async fn classify(
    base: &[ScreenshotRef],
    compare: &[ScreenshotRef],
    differ: &dyn ImageDiffer,
    prior: &HashMap<String, PriorDiff>,
    policy: ClassifierPolicy,
    now: DateTime<Utc>,
) -> Vec<ClassifiedDiff> {
    let mut sides: BTreeMap<&str, (Option<&ScreenshotRef>, Option<&ScreenshotRef>)> =
        BTreeMap::new();
    for screenshot in base {
        sides.entry(screenshot.name.as_str()).or_default().0 = Some(screenshot);
    }
    for screenshot in compare {
        sides.entry(screenshot.name.as_str()).or_default().1 = Some(screenshot);
    }

    let pairs = sides.into_values().filter_map(|sides| match sides {
        (None, Some(compare)) => Some(Pair::Added(compare)),
        (Some(base), None) => Some(Pair::Removed(base)),
        (Some(base), Some(compare)) => Some(Pair::Both(base, compare)),
        (None, None) => None,
    });

    // Boxed so the stream holds no closure types; keeps the future provably `Send`
    let pending: Vec<Pin<Box<dyn Future<Output = ClassifiedDiff> + Send + '_>>> = pairs
        .map(|pair| -> Pin<Box<dyn Future<Output = ClassifiedDiff> + Send + '_>> {
            Box::pin(classify_pair(pair, differ, prior, policy, now))
        })
        .collect();

    let mut diffs: Vec<ClassifiedDiff> = stream::iter(pending)
        .buffer_unordered(policy.concurrency.max(1))
        .collect()
        .await;

    diffs.sort_by(|a, b| a.name.cmp(&b.name));
    diffs
}

enum Pair<'a> {
    Added(&'a ScreenshotRef),
    Removed(&'a ScreenshotRef),
    Both(&'a ScreenshotRef, &'a ScreenshotRef),
}

async fn classify_pair(
    pair: Pair<'_>,
    differ: &dyn ImageDiffer,
    prior: &HashMap<String, PriorDiff>,
    policy: ClassifierPolicy,
    now: DateTime<Utc>,
) -> ClassifiedDiff {
    let (base, compare, status) = match pair {
        Pair::Added(compare) => (None, Some(compare), ScreenshotDiffStatus::Added),
        Pair::Removed(base) => (Some(base), None, ScreenshotDiffStatus::Removed),
        Pair::Both(base, compare) => {
            let status = match differ.diff(base, compare).await {
                Ok(PixelDiff::Empty) => ScreenshotDiffStatus::Unchanged,
                Ok(PixelDiff::NonEmpty) => ScreenshotDiffStatus::Changed,
                Err(e) => {
                    warn!("Diff classification failed for '{}': {}", compare.name, e);
                    ScreenshotDiffStatus::Failure
                }
            };
            (Some(base), Some(compare), status)
        }
    };

    let (name, group) = match compare.or(base) {
        Some(screenshot) => (screenshot.name.clone(), screenshot.group.clone()),
        None => (String::new(), None),
    };
    let flaky_detected = base.is_some_and(|base| {
        prior
            .get(&name)
            .is_some_and(|prior| is_flaky_flip(prior, status, &base.checksum, policy, now))
    });

    ClassifiedDiff {
        name,
        status,
        flaky_detected,
        group,
        base_screenshot_id: base.map(|s| s.id),
        compare_screenshot_id: compare.map(|s| s.id),
    }
}

/// An outcome that flipped between `changed` and `unchanged` against the same
/// baseline image, within the flaky window, points at non-deterministic
/// rendering rather than a regression.
pub fn is_flaky_flip(
    prior: &PriorDiff,
    status: ScreenshotDiffStatus,
    base_checksum: &str,
    policy: ClassifierPolicy,
    now: DateTime<Utc>,
) -> bool {
    use ScreenshotDiffStatus::{Changed, Unchanged};

    let flipped = matches!(
        (prior.status, status),
        (Changed, Unchanged) | (Unchanged, Changed)
    );
    let same_base = prior
        .base_checksum
        .as_deref()
        .is_some_and(|checksum| checksum.eq_ignore_ascii_case(base_checksum));
    let within_window = chrono::Duration::from_std(policy.flaky_window)
        .map(|window| now - prior.created_at <= window)
        .unwrap_or(true);

    flipped && same_base && within_window
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn checksum(content: &str) -> String {
        hex::encode(Sha256::digest(content.as_bytes()))
    }

    fn shot(name: &str, content: &str) -> ScreenshotRef {
        ScreenshotRef {
            id: Uuid::now_v7(),
            name: name.to_string(),
            checksum: checksum(content),
            group: None,
        }
    }

    async fn run(base: &[ScreenshotRef], compare: &[ScreenshotRef]) -> Vec<ClassifiedDiff> {
        classify(
            base,
            compare,
            &ChecksumDiffer,
            &HashMap::new(),
            ClassifierPolicy::default(),
            Utc::now(),
        )
        .await
    }

    #[tokio::test]
    async fn test_classifies_union_of_names() {
        let base = vec![shot("home", "a"), shot("about", "b"), shot("legacy", "c")];
        let compare = vec![shot("home", "a"), shot("about", "B"), shot("new", "d")];

        let diffs = run(&base, &compare).await;
        let statuses: Vec<(&str, ScreenshotDiffStatus)> =
            diffs.iter().map(|d| (d.name.as_str(), d.status)).collect();

        assert_eq!(
            statuses,
            vec![
                ("about", ScreenshotDiffStatus::Changed),
                ("home", ScreenshotDiffStatus::Unchanged),
                ("legacy", ScreenshotDiffStatus::Removed),
                ("new", ScreenshotDiffStatus::Added),
            ]
        );
    }

    #[tokio::test]
    async fn test_orphan_build_is_all_added() {
        let compare = vec![shot("home", "a"), shot("about", "b"), shot("cart", "c")];
        let diffs = run(&[], &compare).await;

        assert_eq!(diffs.len(), 3);
        assert!(
            diffs
                .iter()
                .all(|d| d.status == ScreenshotDiffStatus::Added && d.base_screenshot_id.is_none())
        );
    }

    #[tokio::test]
    async fn test_corrupt_screenshot_is_failure_not_abort() {
        let base = vec![shot("home", "a"), shot("about", "b")];
        let mut broken = shot("home", "a");
        broken.checksum = "not-hex".to_string();
        let compare = vec![broken, shot("about", "b")];

        let diffs = run(&base, &compare).await;
        assert_eq!(diffs[0].status, ScreenshotDiffStatus::Unchanged);
        assert_eq!(diffs[1].status, ScreenshotDiffStatus::Failure);
    }

    #[tokio::test]
    async fn test_flaky_flip_is_annotated_without_changing_status() {
        let base = vec![shot("home", "a")];
        let compare = vec![shot("home", "a-rendered-differently")];
        let now = Utc::now();
        let prior = HashMap::from([(
            "home".to_string(),
            PriorDiff {
                status: ScreenshotDiffStatus::Unchanged,
                base_checksum: Some(checksum("a")),
                created_at: now - chrono::Duration::hours(1),
            },
        )]);

        let diffs = classify(
            &base,
            &compare,
            &ChecksumDiffer,
            &prior,
            ClassifierPolicy::default(),
            now,
        )
        .await;

        assert_eq!(diffs[0].status, ScreenshotDiffStatus::Changed);
        assert!(diffs[0].flaky_detected);
    }

    #[test]
    fn test_flaky_requires_same_base_and_window() {
        let now = Utc::now();
        let policy = ClassifierPolicy::default();
        let prior = PriorDiff {
            status: ScreenshotDiffStatus::Changed,
            base_checksum: Some(checksum("a")),
            created_at: now - chrono::Duration::hours(2),
        };

        assert!(is_flaky_flip(
            &prior,
            ScreenshotDiffStatus::Unchanged,
            &checksum("a"),
            policy,
            now
        ));
        // New baseline image: a real change, not flakiness
        assert!(!is_flaky_flip(
            &prior,
            ScreenshotDiffStatus::Unchanged,
            &checksum("b"),
            policy,
            now
        ));
        // Same outcome twice is not a flip
        assert!(!is_flaky_flip(
            &prior,
            ScreenshotDiffStatus::Changed,
            &checksum("a"),
            policy,
            now
        ));
        // Outside the window
        let stale = PriorDiff {
            created_at: now - chrono::Duration::days(3),
            ..prior
        };
        assert!(!is_flaky_flip(
            &stale,
            ScreenshotDiffStatus::Unchanged,
            &checksum("a"),
            policy,
            now
        ));
    }

    #[tokio::test]
    async fn test_checksum_differ_rejects_short_digest() {
        let mut short = shot("home", "a");
        short.checksum = "abcd".to_string();
        let result = ChecksumDiffer.diff(&shot("home", "a"), &short).await;
        assert!(matches!(result, Err(DiffError::Corrupt { .. })));
    }
}
