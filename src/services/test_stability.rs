//! Test stability tracker.
//!
//! A test is one screenshot name followed across the builds of a project build
//! name. Every classified diff is folded into the test state by
//! [`record_diff`]; the database layer locks the test row, loads a
//! [`TestState`], applies the transition and writes the result back.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use crate::entity::test;
use crate::models::{DailyCount, ScreenshotDiffStatus, TestResponse, TestStatus};

/// Number of days returned by the `dailyChanges` read model.
pub const DAILY_CHANGES_DAYS: i64 = 7;

/// Tunables of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    /// Counted outcomes kept for the stability score.
    pub window: usize,
    /// Consecutive `unchanged` results needed to resolve a test.
    pub resolve_streak: i32,
    /// A score below this reports the test as unstable.
    pub unstable_below: i32,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            window: 20,
            resolve_streak: 2,
            unstable_below: 60,
        }
    }
}

/// Mutable part of a test row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestState {
    pub status: TestStatus,
    pub mute: bool,
    pub mute_until: Option<DateTime<Utc>>,
    pub unstable: bool,
    pub unchanged_streak: i32,
    /// Counted outcomes, oldest first.
    pub history: Vec<ScreenshotDiffStatus>,
    pub stability_score: Option<i32>,
    /// Number of the newest build folded into this state.
    pub last_build_number: Option<i32>,
    pub last_seen: Option<DateTime<Utc>>,
    pub resolved_date: Option<DateTime<Utc>>,
}

impl Default for TestState {
    fn default() -> Self {
        Self {
            status: TestStatus::Pending,
            mute: false,
            mute_until: None,
            unstable: false,
            unchanged_streak: 0,
            history: Vec::new(),
            stability_score: None,
            last_build_number: None,
            last_seen: None,
            resolved_date: None,
        }
    }
}

impl TestState {
    pub fn from_model(model: &test::Model) -> Self {
        Self {
            status: TestStatus::parse(&model.status).unwrap_or(TestStatus::Pending),
            mute: model.mute,
            mute_until: model.mute_until,
            unstable: model.unstable,
            unchanged_streak: model.unchanged_streak,
            history: parse_history(&model.history),
            stability_score: model.stability_score,
            last_build_number: model.last_build_number,
            last_seen: model.last_seen,
            resolved_date: model.resolved_date,
        }
    }

    pub fn history_json(&self) -> JsonValue {
        JsonValue::Array(
            self.history
                .iter()
                .map(|status| JsonValue::String(status.as_str().to_string()))
                .collect(),
        )
    }

    /// A mute is effective until `mute_until`, or forever without one.
    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.mute && self.mute_until.is_none_or(|until| until > now)
    }

    /// Reported instability: flagged by a failing outcome or a low score.
    pub fn is_unstable(&self, policy: &StabilityPolicy) -> bool {
        self.unstable
            || self
                .stability_score
                .is_some_and(|score| score < policy.unstable_below)
    }
}

/// Unknown entries are dropped rather than failing the whole row.
fn parse_history(value: &JsonValue) -> Vec<ScreenshotDiffStatus> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().and_then(ScreenshotDiffStatus::parse))
                .collect()
        })
        .unwrap_or_default()
}

fn is_counted(status: ScreenshotDiffStatus) -> bool {
    matches!(
        status,
        ScreenshotDiffStatus::Changed
            | ScreenshotDiffStatus::Unchanged
            | ScreenshotDiffStatus::Failure
    )
}

/// Whether a diff increments the daily change histogram.
pub fn counts_as_change(status: ScreenshotDiffStatus) -> bool {
    matches!(
        status,
        ScreenshotDiffStatus::Changed | ScreenshotDiffStatus::Failure
    )
}

/// Percentage of `unchanged` outcomes in `history`.
pub fn stability_score(history: &[ScreenshotDiffStatus]) -> Option<i32> {
    if history.is_empty() {
        return None;
    }
    let unchanged = history
        .iter()
        .filter(|status| **status == ScreenshotDiffStatus::Unchanged)
        .count();
    Some((100 * unchanged / history.len()) as i32)
}

/// Fold one classified diff into the state of its test.
///
/// Counters always move. Status changes are skipped while the test is muted.
pub fn record_diff(
    state: &TestState,
    status: ScreenshotDiffStatus,
    flaky_detected: bool,
    policy: &StabilityPolicy,
    now: DateTime<Utc>,
) -> TestState {
    let mut next = state.clone();
    next.last_seen = Some(now);

    if !is_counted(status) {
        return next;
    }

    next.history.push(status);
    if next.history.len() > policy.window {
        let excess = next.history.len() - policy.window;
        next.history.drain(..excess);
    }
    next.stability_score = stability_score(&next.history);

    let muted = state.is_muted(now);
    let mut status_change = None;

    if flaky_detected {
        next.unchanged_streak = 0;
        next.unstable = true;
        status_change = Some(TestStatus::Flaky);
    } else {
        match status {
            ScreenshotDiffStatus::Changed | ScreenshotDiffStatus::Failure => {
                next.unchanged_streak = 0;
                next.unstable = true;
                if state.status == TestStatus::Resolved {
                    status_change = Some(TestStatus::Pending);
                }
            }
            ScreenshotDiffStatus::Unchanged => {
                next.unchanged_streak = state.unchanged_streak.saturating_add(1);
                let needs_resolution = next.unstable || state.status == TestStatus::Flaky;
                if needs_resolution && next.unchanged_streak >= policy.resolve_streak {
                    next.unstable = false;
                    status_change = Some(TestStatus::Resolved);
                }
            }
            ScreenshotDiffStatus::Added | ScreenshotDiffStatus::Removed => {}
        }
    }

    if let Some(new_status) = status_change
        && !muted
    {
        next.status = new_status;
        next.resolved_date = match new_status {
            TestStatus::Resolved => Some(now),
            _ => None,
        };
    }

    next
}

/// Fold the diff of build `build_number` into the state of its test.
///
/// Builds can conclude out of order. A build older than one already folded
/// in returns `None` and leaves the state alone, so the streak and history
/// follow build numbers rather than completion order.
pub fn record_build_diff(
    state: &TestState,
    build_number: i32,
    status: ScreenshotDiffStatus,
    flaky_detected: bool,
    policy: &StabilityPolicy,
    now: DateTime<Utc>,
) -> Option<TestState> {
    if state
        .last_build_number
        .is_some_and(|last| build_number <= last)
    {
        return None;
    }
    let mut next = record_diff(state, status, flaky_detected, policy, now);
    next.last_build_number = Some(build_number);
    Some(next)
}

/// Operator override of a test status. The next automatic transition
/// replaces it unless the test is muted.
pub fn override_status(state: &TestState, status: TestStatus, now: DateTime<Utc>) -> TestState {
    let mut next = state.clone();
    next.status = status;
    match status {
        TestStatus::Resolved => {
            next.unstable = false;
            next.resolved_date = Some(now);
        }
        TestStatus::Flaky | TestStatus::Pending => {
            next.unchanged_streak = 0;
            next.resolved_date = None;
        }
    }
    next
}

/// Zero-filled per-day counts for the `days` days ending at `today`, oldest first.
pub fn daily_changes(rows: &[(NaiveDate, i32)], today: NaiveDate, days: i64) -> Vec<DailyCount> {
    (0..days)
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset);
            let count = rows
                .iter()
                .filter(|(row_date, _)| *row_date == date)
                .map(|(_, count)| *count)
                .sum();
            DailyCount { date, count }
        })
        .collect()
}

/// Build the read model of a test.
pub fn test_response(
    model: test::Model,
    daily_changes: Vec<DailyCount>,
    policy: &StabilityPolicy,
) -> TestResponse {
    let state = TestState::from_model(&model);
    TestResponse {
        id: model.id,
        project_id: model.project_id,
        name: model.name,
        build_name: model.build_name,
        status: state.status,
        mute: model.mute,
        mute_until: model.mute_until,
        stability_score: state.stability_score,
        unstable: state.is_unstable(policy),
        last_seen: model.last_seen,
        resolved_date: model.resolved_date,
        daily_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScreenshotDiffStatus::*;

    fn replay(outcomes: &[(ScreenshotDiffStatus, bool)]) -> Vec<TestState> {
        let policy = StabilityPolicy::default();
        let mut state = TestState::default();
        let mut states = Vec::new();
        for (status, flaky) in outcomes {
            state = record_diff(&state, *status, *flaky, &policy, Utc::now());
            states.push(state.clone());
        }
        states
    }

    #[test]
    fn test_resolves_after_two_unchanged_following_change() {
        let states = replay(&[(Changed, false), (Unchanged, false), (Unchanged, false)]);
        assert_eq!(states[0].status, TestStatus::Pending);
        assert!(states[0].unstable);
        assert_eq!(states[1].status, TestStatus::Pending);
        assert_eq!(states[2].status, TestStatus::Resolved);
        assert!(!states[2].unstable);
        assert!(states[2].resolved_date.is_some());
    }

    #[test]
    fn test_change_between_unchanged_prevents_resolution() {
        let states = replay(&[(Unchanged, false), (Changed, false), (Unchanged, false)]);
        assert!(states.iter().all(|s| s.status != TestStatus::Resolved));
        assert_eq!(states[2].unchanged_streak, 1);
    }

    #[test]
    fn test_flaky_detection_marks_flaky_and_resets_streak() {
        let states = replay(&[
            (Unchanged, false),
            (Changed, true),
            (Unchanged, false),
            (Unchanged, false),
        ]);
        assert_eq!(states[1].status, TestStatus::Flaky);
        assert_eq!(states[1].unchanged_streak, 0);
        assert_eq!(states[2].status, TestStatus::Flaky);
        assert_eq!(states[3].status, TestStatus::Resolved);
    }

    #[test]
    fn test_flaky_flag_interrupts_unchanged_run() {
        let states = replay(&[
            (Changed, false),
            (Unchanged, false),
            (Unchanged, true),
            (Unchanged, false),
        ]);
        assert_eq!(states[2].status, TestStatus::Flaky);
        assert_eq!(states[3].status, TestStatus::Flaky);
        assert_eq!(states[3].unchanged_streak, 1);
    }

    #[test]
    fn test_failure_reopens_resolved_test() {
        let states = replay(&[
            (Failure, false),
            (Unchanged, false),
            (Unchanged, false),
            (Failure, false),
        ]);
        assert_eq!(states[2].status, TestStatus::Resolved);
        assert_eq!(states[3].status, TestStatus::Pending);
        assert!(states[3].unstable);
        assert!(states[3].resolved_date.is_none());
    }

    #[test]
    fn test_added_and_removed_only_touch_last_seen() {
        let states = replay(&[(Added, false), (Removed, false)]);
        assert!(states[1].history.is_empty());
        assert_eq!(states[1].stability_score, None);
        assert!(states[1].last_seen.is_some());
    }

    #[test]
    fn test_stability_score_over_window() {
        let policy = StabilityPolicy {
            window: 4,
            ..StabilityPolicy::default()
        };
        let mut state = TestState::default();
        for status in [Changed, Changed, Unchanged, Unchanged, Unchanged, Unchanged] {
            state = record_diff(&state, status, false, &policy, Utc::now());
        }
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.stability_score, Some(100));

        state = record_diff(&state, Failure, false, &policy, Utc::now());
        assert_eq!(state.stability_score, Some(75));
    }

    #[test]
    fn test_low_score_reports_unstable() {
        let policy = StabilityPolicy::default();
        let state = TestState {
            stability_score: Some(50),
            ..TestState::default()
        };
        assert!(state.is_unstable(&policy));
        let state = TestState {
            stability_score: Some(60),
            ..TestState::default()
        };
        assert!(!state.is_unstable(&policy));
    }

    #[test]
    fn test_muted_test_keeps_status_but_counts() {
        let policy = StabilityPolicy::default();
        let state = TestState {
            status: TestStatus::Resolved,
            mute: true,
            ..TestState::default()
        };
        let next = record_diff(&state, Changed, false, &policy, Utc::now());
        assert_eq!(next.status, TestStatus::Resolved);
        assert_eq!(next.history, vec![Changed]);
        assert!(next.unstable);
    }

    #[test]
    fn test_expired_mute_is_not_effective() {
        let now = Utc::now();
        let state = TestState {
            mute: true,
            mute_until: Some(now - Duration::hours(1)),
            ..TestState::default()
        };
        assert!(!state.is_muted(now));

        let state = TestState {
            mute_until: Some(now + Duration::hours(1)),
            ..state
        };
        assert!(state.is_muted(now));
    }

    #[test]
    fn test_override_is_replaced_by_next_evaluation() {
        let policy = StabilityPolicy::default();
        let now = Utc::now();
        let state = override_status(&TestState::default(), TestStatus::Resolved, now);
        assert_eq!(state.status, TestStatus::Resolved);

        let next = record_diff(&state, Changed, false, &policy, now);
        assert_eq!(next.status, TestStatus::Pending);
    }

    #[test]
    fn test_override_on_muted_test_sticks() {
        let policy = StabilityPolicy::default();
        let now = Utc::now();
        let muted = TestState {
            mute: true,
            ..TestState::default()
        };
        let state = override_status(&muted, TestStatus::Resolved, now);
        let next = record_diff(&state, Changed, false, &policy, now);
        assert_eq!(next.status, TestStatus::Resolved);
    }

    #[test]
    fn test_builds_concluding_in_reverse_order() {
        let policy = StabilityPolicy::default();
        let now = Utc::now();
        let state = record_build_diff(&TestState::default(), 3, Changed, false, &policy, now)
            .unwrap();

        // #5 concludes before #4
        let state = record_build_diff(&state, 5, Unchanged, false, &policy, now).unwrap();
        assert_eq!(state.last_build_number, Some(5));
        assert_eq!(state.unchanged_streak, 1);

        assert!(record_build_diff(&state, 4, Changed, false, &policy, now).is_none());
        assert!(record_build_diff(&state, 5, Changed, false, &policy, now).is_none());

        // The stale change did not break the run of unchanged builds
        let state = record_build_diff(&state, 6, Unchanged, false, &policy, now).unwrap();
        assert_eq!(state.status, TestStatus::Resolved);
        assert_eq!(state.history, vec![Changed, Unchanged, Unchanged]);
    }

    #[test]
    fn test_daily_changes_zero_filled() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let rows = vec![
            (NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(), 2),
            (NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(), 1),
            (NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(), 9),
        ];
        let days = daily_changes(&rows, today, DAILY_CHANGES_DAYS);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(days[3].count, 1);
        assert_eq!(days[6].count, 2);
        assert_eq!(days.iter().map(|d| d.count).sum::<i32>(), 3);
    }

    #[test]
    fn test_history_json_round_trips_through_model_shape() {
        let state = TestState {
            history: vec![Changed, Unchanged, Failure],
            ..TestState::default()
        };
        let json = state.history_json();
        assert_eq!(json, serde_json::json!(["changed", "unchanged", "failure"]));
        assert_eq!(parse_history(&json), state.history);
    }
}
