//! 签到奖励资格判定
//!
//! 自动发放与手动领取共用同一套判定。输入是奖励规则与用户在该奖励范围内
//! （所属寺庙，或 `temple_id` 为空时的全站）的签到进度，输出是否可领取与进度。

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::RewardType;

/// 参与判定的奖励规则
#[derive(Debug, Clone)]
pub struct RewardRule {
    pub temple_id: Option<i64>,
    pub reward_type: RewardType,
    pub condition_value: i32,
    pub is_repeatable: bool,
    pub is_active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl RewardRule {
    /// 今天是否在奖励有效期内，端点包含在内
    pub fn in_window(&self, today: NaiveDate) -> bool {
        self.start_date.is_none_or(|start| today >= start)
            && self.end_date.is_none_or(|end| today <= end)
    }
}

/// 用户在奖励范围内的签到进度
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProgress {
    pub total_checkins: i64,
    pub checked_in_today: bool,
    pub current_streak: i64,
    /// 该奖励已领取次数
    pub claim_count: i64,
    pub last_claim_date: Option<NaiveDate>,
}

impl UserProgress {
    pub fn claimed_today(&self, today: NaiveDate) -> bool {
        self.last_claim_date == Some(today)
    }
}

/// 进度展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: i64,
    pub target: i64,
    /// 0 到 100
    pub percentage: i64,
}

impl Progress {
    fn new(current: i64, target: i64) -> Self {
        let target = target.max(1);
        let current = current.max(0);
        Self {
            current,
            target,
            percentage: (current * 100 / target).min(100),
        }
    }
}

/// 不可领取的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Inactive,
    OutOfWindow,
    AlreadyClaimed,
    ConditionNotMet,
}

impl From<Ineligible> for ApiError {
    fn from(reason: Ineligible) -> Self {
        match reason {
            Ineligible::Inactive => ApiError::BadRequest("此奖励已停用".to_string()),
            Ineligible::OutOfWindow => ApiError::BadRequest("不在奖励活动期间".to_string()),
            Ineligible::AlreadyClaimed => ApiError::RewardAlreadyClaimed,
            Ineligible::ConditionNotMet => ApiError::RewardNotEligible,
        }
    }
}

/// 判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Result<(), Ineligible>,
    pub progress: Progress,
}

impl Evaluation {
    pub fn is_eligible(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// 判定用户能否领取奖励
pub fn evaluate(rule: &RewardRule, user: &UserProgress, today: NaiveDate) -> Evaluation {
    let target = i64::from(rule.condition_value.max(1));

    let (progress, condition) = match rule.reward_type {
        RewardType::FirstTime => {
            let met = rule.temple_id.is_some() && user.total_checkins >= 1;
            (Progress::new(user.total_checkins.min(1), 1), check(met))
        }
        RewardType::DailyBonus => {
            let progress = Progress::new(i64::from(user.checked_in_today), 1);
            let outcome = if user.claimed_today(today) {
                Err(Ineligible::AlreadyClaimed)
            } else {
                check(user.checked_in_today)
            };
            (progress, outcome)
        }
        RewardType::ConsecutiveDays => {
            let mut met = user.current_streak >= target;
            if met && rule.is_repeatable {
                if let Some(last) = user.last_claim_date {
                    met = (today - last).num_days() >= target;
                }
            }
            (Progress::new(user.current_streak, target), check(met))
        }
        RewardType::TotalCount => {
            if rule.is_repeatable {
                // 每累计满一个 N 次可领取一次
                let next_target = target * (user.claim_count + 1);
                let met = user.claim_count < user.total_checkins / target;
                (Progress::new(user.total_checkins, next_target), check(met))
            } else {
                (
                    Progress::new(user.total_checkins, target),
                    check(user.total_checkins >= target),
                )
            }
        }
    };

    let outcome = if !rule.is_active {
        Err(Ineligible::Inactive)
    } else if !rule.in_window(today) {
        Err(Ineligible::OutOfWindow)
    } else if !rule.is_repeatable && user.claim_count > 0 {
        Err(Ineligible::AlreadyClaimed)
    } else {
        condition
    };

    Evaluation { outcome, progress }
}

fn check(met: bool) -> Result<(), Ineligible> {
    if met {
        Ok(())
    } else {
        Err(Ineligible::ConditionNotMet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn days_ago(n: i64) -> NaiveDate {
        today() - chrono::Duration::days(n)
    }

    fn rule(reward_type: RewardType, condition_value: i32, is_repeatable: bool) -> RewardRule {
        RewardRule {
            temple_id: Some(1),
            reward_type,
            condition_value,
            is_repeatable,
            is_active: true,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn test_first_time() {
        let r = rule(RewardType::FirstTime, 1, false);
        let visited = UserProgress {
            total_checkins: 1,
            checked_in_today: true,
            ..Default::default()
        };
        assert!(evaluate(&r, &visited, today()).is_eligible());

        let never = UserProgress::default();
        assert_eq!(
            evaluate(&r, &never, today()).outcome,
            Err(Ineligible::ConditionNotMet)
        );

        let claimed = UserProgress {
            claim_count: 1,
            ..visited.clone()
        };
        assert_eq!(
            evaluate(&r, &claimed, today()).outcome,
            Err(Ineligible::AlreadyClaimed)
        );
    }

    #[test]
    fn test_first_time_requires_temple() {
        let r = RewardRule {
            temple_id: None,
            ..rule(RewardType::FirstTime, 1, false)
        };
        let visited = UserProgress {
            total_checkins: 3,
            ..Default::default()
        };
        assert!(!evaluate(&r, &visited, today()).is_eligible());
    }

    #[test]
    fn test_daily_bonus_once_per_day() {
        let r = rule(RewardType::DailyBonus, 1, true);
        let checked_in = UserProgress {
            total_checkins: 5,
            checked_in_today: true,
            claim_count: 4,
            last_claim_date: Some(days_ago(1)),
            ..Default::default()
        };
        assert!(evaluate(&r, &checked_in, today()).is_eligible());

        let claimed = UserProgress {
            last_claim_date: Some(today()),
            ..checked_in.clone()
        };
        assert_eq!(
            evaluate(&r, &claimed, today()).outcome,
            Err(Ineligible::AlreadyClaimed)
        );

        let absent = UserProgress {
            checked_in_today: false,
            ..checked_in
        };
        assert_eq!(
            evaluate(&r, &absent, today()).outcome,
            Err(Ineligible::ConditionNotMet)
        );
    }

    #[test]
    fn test_consecutive_days() {
        let r = rule(RewardType::ConsecutiveDays, 7, false);
        let six = UserProgress {
            current_streak: 6,
            ..Default::default()
        };
        let eval = evaluate(&r, &six, today());
        assert!(!eval.is_eligible());
        assert_eq!(eval.progress, Progress { current: 6, target: 7, percentage: 85 });

        let seven = UserProgress {
            current_streak: 7,
            ..Default::default()
        };
        let eval = evaluate(&r, &seven, today());
        assert!(eval.is_eligible());
        assert_eq!(eval.progress.percentage, 100);
    }

    #[test]
    fn test_repeatable_consecutive_days_waits_full_period() {
        let r = rule(RewardType::ConsecutiveDays, 7, true);
        let recent = UserProgress {
            current_streak: 10,
            claim_count: 1,
            last_claim_date: Some(days_ago(3)),
            ..Default::default()
        };
        assert!(!evaluate(&r, &recent, today()).is_eligible());

        let due = UserProgress {
            current_streak: 14,
            claim_count: 1,
            last_claim_date: Some(days_ago(7)),
            ..Default::default()
        };
        assert!(evaluate(&r, &due, today()).is_eligible());
    }

    #[test]
    fn test_total_count() {
        let r = rule(RewardType::TotalCount, 10, false);
        let nine = UserProgress {
            total_checkins: 9,
            ..Default::default()
        };
        assert!(!evaluate(&r, &nine, today()).is_eligible());

        let ten = UserProgress {
            total_checkins: 10,
            ..Default::default()
        };
        assert!(evaluate(&r, &ten, today()).is_eligible());
    }

    #[test]
    fn test_repeatable_total_count_once_per_multiple() {
        let r = rule(RewardType::TotalCount, 10, true);

        let once_claimed = UserProgress {
            total_checkins: 19,
            claim_count: 1,
            ..Default::default()
        };
        let eval = evaluate(&r, &once_claimed, today());
        assert!(!eval.is_eligible());
        assert_eq!(eval.progress.target, 20);

        let second_due = UserProgress {
            total_checkins: 20,
            claim_count: 1,
            ..Default::default()
        };
        assert!(evaluate(&r, &second_due, today()).is_eligible());
    }

    #[test]
    fn test_inactive_and_window() {
        let progress = UserProgress {
            total_checkins: 50,
            ..Default::default()
        };

        let inactive = RewardRule {
            is_active: false,
            ..rule(RewardType::TotalCount, 1, false)
        };
        assert_eq!(
            evaluate(&inactive, &progress, today()).outcome,
            Err(Ineligible::Inactive)
        );

        let expired = RewardRule {
            end_date: Some(days_ago(1)),
            ..rule(RewardType::TotalCount, 1, false)
        };
        assert_eq!(
            evaluate(&expired, &progress, today()).outcome,
            Err(Ineligible::OutOfWindow)
        );

        let last_day = RewardRule {
            start_date: Some(days_ago(10)),
            end_date: Some(today()),
            ..rule(RewardType::TotalCount, 1, false)
        };
        assert!(evaluate(&last_day, &progress, today()).is_eligible());
    }

    #[test]
    fn test_ineligible_maps_to_api_error() {
        assert!(matches!(
            ApiError::from(Ineligible::AlreadyClaimed),
            ApiError::RewardAlreadyClaimed
        ));
        assert!(matches!(
            ApiError::from(Ineligible::ConditionNotMet),
            ApiError::RewardNotEligible
        ));
        assert!(matches!(
            ApiError::from(Ineligible::OutOfWindow),
            ApiError::BadRequest(_)
        ));
    }
}
