//! Pairing resolver: choose the baseline bucket a build is compared against.

use crate::models::{BuildType, ScreenshotBucket};

/// Pick the base bucket for `compare` among `candidates`.
///
/// Only complete buckets of the same project and build name on
/// `reference_branch`, created no later than `compare`, qualify. The newest
/// wins, ties broken by the highest id. Orphan builds never get a base.
///
/// The database query applies the same filter and order; this function is the
/// reference for it and is used where candidates are already loaded.
pub fn select_base<'a>(
    compare: &ScreenshotBucket,
    reference_branch: &str,
    build_type: BuildType,
    candidates: &'a [ScreenshotBucket],
) -> Option<&'a ScreenshotBucket> {
    if build_type == BuildType::Orphan {
        return None;
    }

    candidates
        .iter()
        .filter(|bucket| is_eligible_base(bucket, compare, reference_branch))
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Whether `bucket` may serve as the base of `compare`.
pub fn is_eligible_base(
    bucket: &ScreenshotBucket,
    compare: &ScreenshotBucket,
    reference_branch: &str,
) -> bool {
    bucket.complete
        && bucket.id != compare.id
        && bucket.project_id == compare.project_id
        && bucket.name == compare.name
        && bucket.branch == reference_branch
        && bucket.created_at <= compare.created_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    struct Fixture {
        project_id: Uuid,
        now: chrono::DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                project_id: Uuid::now_v7(),
                now: Utc::now(),
            }
        }

        fn bucket(&self, branch: &str, minutes_ago: i64, complete: bool) -> ScreenshotBucket {
            ScreenshotBucket {
                id: Uuid::now_v7(),
                project_id: self.project_id,
                name: "default".to_string(),
                branch: branch.to_string(),
                commit: "c".repeat(40),
                created_at: self.now - Duration::minutes(minutes_ago),
                complete,
                screenshot_count: complete.then_some(3),
            }
        }
    }

    #[test]
    fn test_selects_most_recent_complete_reference_bucket() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 0, true);
        let old = fx.bucket("main", 30, true);
        let recent = fx.bucket("main", 10, true);
        let candidates = vec![old, recent.clone(), fx.bucket("other", 5, true)];

        let base = select_base(&compare, "main", BuildType::Check, &candidates);
        assert_eq!(base, Some(&recent));
    }

    #[test]
    fn test_incomplete_bucket_is_never_selected() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 0, true);
        let partial = fx.bucket("main", 1, false);
        let complete = fx.bucket("main", 20, true);
        let candidates = vec![partial, complete.clone()];

        assert_eq!(
            select_base(&compare, "main", BuildType::Check, &candidates),
            Some(&complete)
        );
        assert_eq!(
            select_base(&compare, "main", BuildType::Check, &candidates[..1]),
            None
        );
    }

    #[test]
    fn test_buckets_newer_than_compare_are_ignored() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 10, true);
        let newer = fx.bucket("main", 5, true);
        assert_eq!(
            select_base(&compare, "main", BuildType::Check, &[newer]),
            None
        );
    }

    #[test]
    fn test_ties_break_on_highest_id() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 0, true);
        let mut first = fx.bucket("main", 10, true);
        let mut second = fx.bucket("main", 10, true);
        first.id = Uuid::from_u128(1);
        second.id = Uuid::from_u128(2);
        second.created_at = first.created_at;

        let candidates = vec![second.clone(), first];
        assert_eq!(
            select_base(&compare, "main", BuildType::Check, &candidates),
            Some(&second)
        );
    }

    #[test]
    fn test_orphan_build_has_no_base() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 0, true);
        let candidates = vec![fx.bucket("main", 10, true)];
        assert_eq!(
            select_base(&compare, "main", BuildType::Orphan, &candidates),
            None
        );
    }

    #[test]
    fn test_reference_build_does_not_pair_with_itself() {
        let fx = Fixture::new();
        let compare = fx.bucket("main", 0, true);
        let candidates = vec![compare.clone()];
        assert_eq!(
            select_base(&compare, "main", BuildType::Reference, &candidates),
            None
        );
    }

    #[test]
    fn test_other_build_names_are_ignored() {
        let fx = Fixture::new();
        let compare = fx.bucket("feature", 0, true);
        let mut other_name = fx.bucket("main", 10, true);
        other_name.name = "mobile".to_string();
        assert_eq!(
            select_base(&compare, "main", BuildType::Check, &[other_name]),
            None
        );
    }
}
