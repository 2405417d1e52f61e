//! 寺庙经营报表的纯计算
//!
//! 比率、分布区间、信众资历与经营诊断评分，均不依赖数据库。

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::ApiError;

/// 百分比，保留一位小数，分母为 0 时为 0
pub fn percentage(count: i64, base: i64) -> f64 {
    if base <= 0 {
        return 0.0;
    }
    (count as f64 / base as f64 * 1000.0).round() / 10.0
}

/// 姓名遮罩：保留首字，其余以 `*` 代替
pub fn mask_name(name: &str) -> String {
    let count = name.chars().count();
    match name.chars().next() {
        Some(first) if count >= 2 => format!("{first}{}", "*".repeat(count - 1)),
        _ => "***".to_string(),
    }
}

/// 闭区间分布
#[derive(Debug, Clone, Copy)]
pub struct Bucket {
    pub label: &'static str,
    pub min: i64,
    pub max: i64,
}

pub const CHECKIN_FREQUENCY_BUCKETS: [Bucket; 5] = [
    Bucket { label: "1次", min: 1, max: 1 },
    Bucket { label: "2-5次", min: 2, max: 5 },
    Bucket { label: "6-10次", min: 6, max: 10 },
    Bucket { label: "11-20次", min: 11, max: 20 },
    Bucket { label: "20+次", min: 21, max: i64::MAX },
];

pub const SPEND_BUCKETS: [Bucket; 5] = [
    Bucket { label: "未消费", min: 0, max: 0 },
    Bucket { label: "1-100", min: 1, max: 100 },
    Bucket { label: "101-500", min: 101, max: 500 },
    Bucket { label: "501-1000", min: 501, max: 1000 },
    Bucket { label: "1000+", min: 1001, max: i64::MAX },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub range: &'static str,
    pub count: i64,
    pub percentage: f64,
}

/// 按区间统计人数，落在所有区间之外的值不计入
pub fn distribute(values: &[i64], buckets: &[Bucket]) -> Vec<Distribution> {
    let total = values.len() as i64;
    buckets
        .iter()
        .map(|bucket| {
            let count = values
                .iter()
                .filter(|v| (bucket.min..=bucket.max).contains(*v))
                .count() as i64;
            Distribution {
                range: bucket.label,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect()
}

/// 信众资历，以首次签到距今天数划分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tenure {
    Newcomer,
    Establishing,
    Loyal,
    Veteran,
}

impl Tenure {
    pub const ALL: [Tenure; 4] = [
        Self::Newcomer,
        Self::Establishing,
        Self::Loyal,
        Self::Veteran,
    ];

    pub fn from_days(days: i64) -> Self {
        match days {
            d if d < 30 => Self::Newcomer,
            d if d < 180 => Self::Establishing,
            d if d < 365 => Self::Loyal,
            _ => Self::Veteran,
        }
    }
}

/// 报表区间：近 7/30/90/365 天
pub fn analytics_period_days(period: Option<&str>) -> i64 {
    match period.map(str::trim) {
        Some("7d") => 7,
        Some("90d") => 90,
        Some("365d") => 365,
        _ => 30,
    }
}

/// 收入趋势的分组方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Day,
    Week,
    Month,
}

impl GroupBy {
    pub fn parse(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim) {
            None | Some("") | Some("day") => Ok(Self::Day),
            Some("week") => Ok(Self::Week),
            Some("month") => Ok(Self::Month),
            Some(other) => Err(ApiError::BadRequest(format!("无效的分组方式: {other}"))),
        }
    }

    /// PostgreSQL `to_char` 格式
    pub fn pg_format(&self) -> &'static str {
        match self {
            Self::Day => "YYYY-MM-DD",
            Self::Week => "IYYY-\"W\"IW",
            Self::Month => "YYYY-MM",
        }
    }
}

/// 解析 `YYYY-MM`，返回当月一日与下月一日
pub fn parse_month(value: &str) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let invalid = || ApiError::Validation("month 格式错误，应为 YYYY-MM".to_string());
    let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    Ok((start, next_month(start)))
}

/// 下个月一日
pub fn next_month(first_day: NaiveDate) -> NaiveDate {
    let (year, month) = if first_day.month() == 12 {
        (first_day.year() + 1, 1)
    } else {
        (first_day.year(), first_day.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first_day + Duration::days(31))
}

/// 上个月一日
pub fn previous_month(first_day: NaiveDate) -> NaiveDate {
    let last_of_previous = first_day - Duration::days(1);
    last_of_previous.with_day(1).unwrap_or(last_of_previous)
}

/// 以 `start` 起连续 `days` 天的日期
pub fn date_series(start: NaiveDate, days: i64) -> impl Iterator<Item = NaiveDate> {
    (0..days.max(0)).map(move |offset| start + Duration::days(offset))
}

// ============================================
// 信众分析
// ============================================

/// 近期活跃的判定天数
pub const ACTIVE_DAYS: i64 = 30;
/// 休眠的判定天数
pub const DORMANT_DAYS: i64 = 90;

/// 单一信众在某寺庙的互动汇总
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberActivity {
    pub user_id: i64,
    pub name: String,
    pub checkins: i64,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    /// 有效订单数
    pub orders: i64,
    pub spend: i64,
    /// 前一个 30 天区间内是否签到
    pub active_previous: bool,
    /// 最近 30 天内有签到的自然周数
    pub active_weeks: i64,
}

impl MemberActivity {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.last_at >= now - Duration::days(ACTIVE_DAYS)
    }

    pub fn is_new(&self, now: DateTime<Utc>) -> bool {
        self.first_at >= now - Duration::days(ACTIVE_DAYS)
    }

    pub fn is_dormant(&self, now: DateTime<Utc>) -> bool {
        self.last_at < now - Duration::days(DORMANT_DAYS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberOverview {
    pub total_members: i64,
    pub active_members: i64,
    pub active_rate: f64,
    pub new_members: i64,
    pub dormant_members: i64,
    pub dormant_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionType {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopDevotee {
    pub public_user_id: i64,
    pub name_masked: String,
    pub checkins_count: i64,
    pub spend_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFunnel {
    pub all_members: i64,
    pub active_30d: i64,
    pub made_order: i64,
    pub repeat_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    pub mom_retention_rate: f64,
    pub weekly_return_rate: f64,
    pub churned_this_month: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenureShare {
    pub tenure: Tenure,
    pub count: i64,
    pub percentage: f64,
}

/// 会员分析中不依赖逐日趋势的部分
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBreakdown {
    pub overview: MemberOverview,
    pub interaction_types: Vec<InteractionType>,
    pub checkin_frequency: Vec<Distribution>,
    pub spend_distribution: Vec<Distribution>,
    pub top_devotees: Vec<TopDevotee>,
    pub funnel: MemberFunnel,
    pub retention: Retention,
    pub member_tenure: Vec<TenureShare>,
}

fn count_where(members: &[MemberActivity], pred: impl Fn(&MemberActivity) -> bool) -> i64 {
    members.iter().filter(|m| pred(m)).count() as i64
}

pub fn analyze_members(members: &[MemberActivity], now: DateTime<Utc>) -> MemberBreakdown {
    let total = members.len() as i64;

    let active_members = count_where(members, |m| m.is_active(now));
    let dormant_members = count_where(members, |m| m.is_dormant(now));
    let overview = MemberOverview {
        total_members: total,
        active_members,
        active_rate: percentage(active_members, total),
        new_members: count_where(members, |m| m.is_new(now)),
        dormant_members,
        dormant_rate: percentage(dormant_members, total),
    };

    let with_orders = count_where(members, |m| m.orders > 0);
    let interaction_types = vec![
        InteractionType {
            kind: "仅签到",
            count: total - with_orders,
        },
        InteractionType {
            kind: "签到并兑换",
            count: with_orders,
        },
    ];

    let checkins: Vec<i64> = members.iter().map(|m| m.checkins).collect();
    let spend: Vec<i64> = members.iter().map(|m| m.spend).collect();

    let mut ranked: Vec<&MemberActivity> = members.iter().collect();
    ranked.sort_by(|a, b| b.checkins.cmp(&a.checkins).then(b.spend.cmp(&a.spend)));
    let top_devotees = ranked
        .into_iter()
        .take(10)
        .map(|m| TopDevotee {
            public_user_id: m.user_id,
            name_masked: mask_name(&m.name),
            checkins_count: m.checkins,
            spend_total: m.spend,
        })
        .collect();

    let funnel = MemberFunnel {
        all_members: total,
        active_30d: active_members,
        made_order: count_where(members, |m| m.is_active(now) && m.orders > 0),
        repeat_order: count_where(members, |m| m.is_active(now) && m.orders > 1),
    };

    let previous = count_where(members, |m| m.active_previous);
    let retained = count_where(members, |m| m.active_previous && m.is_active(now));
    let multi_week = count_where(members, |m| m.is_active(now) && m.active_weeks >= 2);
    let retention = Retention {
        mom_retention_rate: percentage(retained, previous),
        weekly_return_rate: percentage(multi_week, active_members),
        churned_this_month: previous - retained,
    };

    let member_tenure = Tenure::ALL
        .into_iter()
        .map(|tenure| {
            let n = count_where(members, |m| {
                Tenure::from_days((now - m.first_at).num_days()) == tenure
            });
            TenureShare {
                tenure,
                count: n,
                percentage: percentage(n, total),
            }
        })
        .collect();

    MemberBreakdown {
        overview,
        interaction_types,
        checkin_frequency: distribute(&checkins, &CHECKIN_FREQUENCY_BUCKETS),
        spend_distribution: distribute(&spend, &SPEND_BUCKETS),
        top_devotees,
        funnel,
        retention,
        member_tenure,
    }
}

// ============================================
// 经营诊断
// ============================================

/// 经营诊断的输入指标
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessMetrics {
    pub new_members: i64,
    pub active_rate: f64,
    pub retention_rate: f64,
    pub revenue: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    pub overall: i64,
    pub acquisition: i64,
    pub activation: i64,
    pub retention: i64,
    pub revenue: i64,
}

impl HealthScore {
    pub fn compute(m: &BusinessMetrics) -> Self {
        let acquisition = m.new_members.clamp(0, 100);
        let activation = ((m.active_rate * 2.0) as i64).clamp(0, 100);
        let retention = ((m.retention_rate * 2.0) as i64).clamp(0, 100);
        let revenue = (m.revenue / 1000).clamp(0, 100);
        Self {
            overall: (acquisition + activation + retention + revenue) / 4,
            acquisition,
            activation,
            retention,
            revenue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub severity: Severity,
    pub title: &'static str,
    pub description: String,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub priority: Priority,
    pub title: &'static str,
    pub description: &'static str,
    pub expected_impact: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingPoints {
    pub wins: Vec<String>,
    pub concerns: Vec<String>,
    pub next_month_goals: Vec<String>,
}

const RETENTION_ALERT: f64 = 50.0;
const ACTIVE_ALERT: f64 = 40.0;
const NEW_MEMBER_TARGET: i64 = 50;

pub fn alerts(m: &BusinessMetrics) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if m.retention_rate < RETENTION_ALERT {
        alerts.push(Alert {
            severity: Severity::Critical,
            title: "留存率低于警戒线",
            description: format!("本月留存率仅 {}%，低于建议的 50%", m.retention_rate),
            action: "查看流失名单",
        });
    }
    if m.active_rate < ACTIVE_ALERT {
        alerts.push(Alert {
            severity: Severity::Warning,
            title: "活跃度偏低",
            description: format!("活跃信众比例仅 {}%，建议规划活动提升互动", m.active_rate),
            action: "规划活动",
        });
    }
    alerts
}

pub fn recommendations(m: &BusinessMetrics) -> Vec<Recommendation> {
    let mut items = Vec::new();
    if m.retention_rate < RETENTION_ALERT {
        items.push(Recommendation {
            priority: Priority::High,
            title: "启动沉睡信众唤醒计划",
            description: "针对 60-90 天未回访的信众发送关怀讯息",
            expected_impact: "预估可唤醒 30% 沉睡信众",
        });
    }
    if m.new_members < NEW_MEMBER_TARGET {
        items.push(Recommendation {
            priority: Priority::Medium,
            title: "加强新信众招募",
            description: "新信众数低于预期，建议规划引流活动",
            expected_impact: "预估可提升每月新信众 50%",
        });
    }
    items
}

pub fn meeting_points(m: &BusinessMetrics) -> MeetingPoints {
    let mut points = MeetingPoints::default();
    if m.new_members > 100 {
        points
            .wins
            .push(format!("新信众达 {} 人，表现优异", m.new_members));
    }
    if m.retention_rate > 60.0 {
        points
            .wins
            .push(format!("留存率 {}%，维持良好", m.retention_rate));
    }
    if m.retention_rate < RETENTION_ALERT {
        points
            .concerns
            .push(format!("留存率 {}% 偏低，需立即处理", m.retention_rate));
    }
    if m.active_rate < ACTIVE_ALERT {
        points
            .concerns
            .push(format!("活跃度 {}% 偏低，需加强互动", m.active_rate));
    }
    points.next_month_goals = vec![
        "提升留存率至 50% 以上".to_string(),
        "规划 1-2 场信众互动活动".to_string(),
    ];
    points
}
