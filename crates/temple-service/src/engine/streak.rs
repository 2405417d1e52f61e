//! 连续签到计算

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// 连续签到里程碑（天）
pub const STREAK_MILESTONES: [i64; 3] = [7, 30, 100];

/// 连续签到统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakSummary {
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_checkin_date: Option<NaiveDate>,
}

/// 当前连续天数
///
/// 从今天往前数；今天尚未签到时从昨天开始，中断则为 0。
pub fn current_streak<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>, today: NaiveDate) -> i64 {
    let days: BTreeSet<NaiveDate> = dates.into_iter().copied().collect();

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

/// 历史最长连续天数
pub fn longest_streak<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>) -> i64 {
    let days: BTreeSet<NaiveDate> = dates.into_iter().copied().collect();

    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;

    for day in days {
        run = match prev {
            Some(p) if day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}

/// 汇总连续签到信息
pub fn summarize(dates: &[NaiveDate], today: NaiveDate) -> StreakSummary {
    StreakSummary {
        current_streak: current_streak(dates, today),
        longest_streak: longest_streak(dates),
        last_checkin_date: dates.iter().max().copied(),
    }
}

/// 本次签到使连续天数恰好达到的里程碑
pub fn milestone_reached(previous: i64, current: i64) -> Option<i64> {
    STREAK_MILESTONES
        .into_iter()
        .find(|m| previous < *m && current >= *m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(current_streak(&[], d(10)), 0);
        assert_eq!(longest_streak(&[]), 0);
        assert_eq!(summarize(&[], d(10)).last_checkin_date, None);
    }

    #[test]
    fn test_streak_including_today() {
        let dates = [d(8), d(9), d(10)];
        assert_eq!(current_streak(&dates, d(10)), 3);
    }

    #[test]
    fn test_streak_counts_from_yesterday_when_not_checked_in_today() {
        let dates = [d(7), d(8), d(9)];
        assert_eq!(current_streak(&dates, d(10)), 3);
    }

    #[test]
    fn test_streak_broken() {
        let dates = [d(5), d(6), d(8)];
        assert_eq!(current_streak(&dates, d(10)), 0);
        assert_eq!(current_streak(&dates, d(8)), 1);
    }

    #[test]
    fn test_duplicates_and_order_ignored() {
        let dates = [d(10), d(9), d(9), d(8), d(10)];
        assert_eq!(current_streak(&dates, d(10)), 3);
        assert_eq!(longest_streak(&dates), 3);
    }

    #[test]
    fn test_longest_streak() {
        let dates = [d(1), d(2), d(3), d(4), d(7), d(8), d(20)];
        assert_eq!(longest_streak(&dates), 4);

        let summary = summarize(&dates, d(21));
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.longest_streak, 4);
        assert_eq!(summary.last_checkin_date, Some(d(20)));
    }

    #[test]
    fn test_streak_across_month_boundary() {
        let dates = [
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        ];
        assert_eq!(current_streak(&dates, d(1)), 3);
    }

    #[test]
    fn test_milestones() {
        assert_eq!(milestone_reached(6, 7), Some(7));
        assert_eq!(milestone_reached(7, 8), None);
        assert_eq!(milestone_reached(29, 30), Some(30));
        assert_eq!(milestone_reached(0, 1), None);
    }
}
