//! 寺庙后台：收入报表、信众名单与经营分析
//!
//! 收入以功德值计算，只统计处理中、已出货与已完成的订单。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::temple::fetch_temple;
use crate::auth::{AuthUser, TempleScope};
use crate::dto::{
    ApiResponse, LimitParams, PageResponse, PaginationParams, end_of_day_exclusive,
    parse_optional_date,
};
use crate::engine::geo::round2;
use crate::engine::insight::{
    self, Alert, BusinessMetrics, GroupBy, HealthScore, MeetingPoints, MemberActivity,
    MemberBreakdown, Recommendation,
};
use crate::error::{ApiError, Result};
use crate::models::{RedemptionStatus, TemplePermission};
use crate::state::AppState;

/// 计入收入的订单状态
pub(crate) const REVENUE_STATUSES: &str = "('processing', 'shipped', 'completed')";

const REVENUE_DEFAULT_DAYS: i64 = 30;
const TIMELINE_LIMIT: i64 = 50;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TempleRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub group_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub group_by: GroupBy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub total_revenue: i64,
    pub total_orders: i64,
    pub average_order_value: f64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
    pub period: String,
    pub revenue: i64,
    pub order_count: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: i64,
    pub product_name: String,
    pub image_url: Option<String>,
    pub unit_price: i64,
    pub total_quantity: i64,
    pub total_revenue: i64,
    #[sqlx(skip)]
    pub revenue_percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub temple: TempleRef,
    pub period: RevenuePeriod,
    pub summary: RevenueSummary,
    pub trend: Vec<RevenuePoint>,
    pub product_sales: Vec<ProductSales>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueFigure {
    pub revenue: i64,
    pub orders: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueOverview {
    pub temple: TempleRef,
    pub today: RevenueFigure,
    pub this_week: RevenueFigure,
    pub this_month: RevenueFigure,
    pub total: RevenueFigure,
}

#[derive(Debug, FromRow)]
struct RevenueOverviewRow {
    today_revenue: i64,
    today_orders: i64,
    week_revenue: i64,
    week_orders: i64,
    month_revenue: i64,
    month_orders: i64,
    total_revenue: i64,
    total_orders: i64,
}

/// 信众名单排序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevoteeSort {
    #[default]
    LastSeen,
    Checkins,
    Spend,
}

impl DevoteeSort {
    fn column(self) -> &'static str {
        match self {
            Self::LastSeen => "v.last_seen_at",
            Self::Checkins => "v.checkins_count",
            Self::Spend => "spend_total",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevoteeQuery {
    pub keyword: Option<String>,
    #[serde(default)]
    pub sort: DevoteeSort,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DevoteeItem {
    pub public_user_id: i64,
    pub name: String,
    pub email: String,
    pub last_seen_at: DateTime<Utc>,
    pub checkins_count: i64,
    pub orders_count: i64,
    pub spend_total: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DevoteeProfile {
    pub public_user_id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DevoteeSummary {
    pub checkins_count: i64,
    pub orders_count: i64,
    pub spend_total: i64,
}

/// 信众互动时间线
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEntry {
    #[serde(rename_all = "camelCase")]
    Checkin { at: DateTime<Utc>, merit_points: i64 },
    #[serde(rename_all = "camelCase")]
    Order {
        at: DateTime<Utc>,
        order_id: i64,
        amount: i64,
        status: RedemptionStatus,
        product_name: String,
    },
}

impl TimelineEntry {
    fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Checkin { at, .. } | Self::Order { at, .. } => *at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CheckinEvent {
    at: DateTime<Utc>,
    merit_points: i64,
}

#[derive(Debug, FromRow)]
struct OrderEvent {
    at: DateTime<Utc>,
    order_id: i64,
    amount: i64,
    status: RedemptionStatus,
    product_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevoteeDetail {
    pub profile: DevoteeProfile,
    pub summary: DevoteeSummary,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPoint {
    pub date: NaiveDate,
    pub checkins: i64,
    pub orders: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAnalytics {
    pub period_days: i64,
    pub activity_trend: Vec<ActivityPoint>,
    #[serde(flatten)]
    pub breakdown: MemberBreakdown,
}

#[derive(Debug, Default, Deserialize)]
pub struct MonthQuery {
    pub month: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_members: i64,
    pub new_members: i64,
    pub active_members: i64,
    pub active_rate: f64,
    pub retention_rate: f64,
    pub revenue: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStage {
    pub count: i64,
    pub rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardFunnel {
    pub visitors: FunnelStage,
    pub active: FunnelStage,
    pub converted: FunnelStage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDashboard {
    pub temple: TempleRef,
    pub month: String,
    pub metrics: DashboardMetrics,
    pub health_score: HealthScore,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
    pub funnel: DashboardFunnel,
    pub meeting_points: MeetingPoints,
}

#[derive(Debug, FromRow)]
struct MemberCounts {
    total_members: i64,
    new_members: i64,
    active_members: i64,
    converted: i64,
}

#[derive(Debug, FromRow)]
struct RetentionCounts {
    previous: i64,
    retained: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VisitorPoint {
    pub date: NaiveDate,
    pub checkin_count: i64,
    pub visitor_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorSummary {
    pub total_checkins: i64,
    pub unique_visitors: i64,
    pub daily_average: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorReport {
    pub period: String,
    pub daily: Vec<VisitorPoint>,
    pub summary: VisitorSummary,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopQuery {
    pub limit: Option<i64>,
    pub period: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopVisitor {
    pub rank: i64,
    pub user_id: i64,
    pub user_name: String,
    pub checkin_count: i64,
    pub last_checkin: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub rank: i64,
    pub product_id: i64,
    pub product_name: String,
    pub image_url: Option<String>,
    pub merit_points: i64,
    pub stock_quantity: i32,
    pub total_sold: i64,
    pub order_count: i64,
}

/// 报表日期区间：结束日缺省为今天，开始日缺省为结束日前 `default_days` 天
pub(crate) fn report_range(
    start: Option<&str>,
    end: Option<&str>,
    default_days: i64,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate)> {
    let end = parse_optional_date("endDate", end)?.unwrap_or(today);
    let start =
        parse_optional_date("startDate", start)?.unwrap_or(end - Duration::days(default_days));
    if start > end {
        return Err(ApiError::Validation("startDate 不能晚于 endDate".to_string()));
    }
    Ok((start, end))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

async fn temple_ref(pool: &PgPool, temple_id: i64) -> Result<TempleRef> {
    let temple = fetch_temple(pool, temple_id).await?;
    Ok(TempleRef {
        id: temple.id,
        name: temple.name,
    })
}

// ============================================
// 收入
// ============================================

/// 收入报表
///
/// GET /api/temple-admin/temples/{id}/revenue
pub async fn revenue(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<ApiResponse<RevenueReport>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    let group_by = GroupBy::parse(query.group_by.as_deref())?;
    let (start, end) = report_range(
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        REVENUE_DEFAULT_DAYS,
        Utc::now().date_naive(),
    )?;
    let temple = temple_ref(&state.pool, temple_id).await?;
    let start_at = start_of_day(start);
    let end_before = end_of_day_exclusive(end);

    let filter = format!(
        "temple_id = $1 AND redeemed_at >= $2 AND redeemed_at < $3 AND status IN {REVENUE_STATUSES}"
    );

    let (total_revenue, total_orders): (i64, i64) = sqlx::query_as(&format!(
        "SELECT COALESCE(SUM(merit_points_used), 0)::BIGINT, COUNT(*) FROM redemptions WHERE {filter}"
    ))
    .bind(temple_id)
    .bind(start_at)
    .bind(end_before)
    .fetch_one(&state.pool)
    .await?;

    let trend: Vec<RevenuePoint> = sqlx::query_as(&format!(
        r#"
        SELECT to_char(redeemed_at AT TIME ZONE 'UTC', $4) AS period,
               COALESCE(SUM(merit_points_used), 0)::BIGINT AS revenue,
               COUNT(*) AS order_count
        FROM redemptions
        WHERE {filter}
        GROUP BY 1
        ORDER BY 1
        "#
    ))
    .bind(temple_id)
    .bind(start_at)
    .bind(end_before)
    .bind(group_by.pg_format())
    .fetch_all(&state.pool)
    .await?;

    let mut product_sales: Vec<ProductSales> = sqlx::query_as(&format!(
        r#"
        SELECT p.id AS product_id, p.name AS product_name, p.image_url,
               p.merit_points AS unit_price,
               COALESCE(SUM(r.quantity), 0)::BIGINT AS total_quantity,
               COALESCE(SUM(r.merit_points_used), 0)::BIGINT AS total_revenue
        FROM redemptions r
        JOIN products p ON p.id = r.product_id
        WHERE r.temple_id = $1 AND r.redeemed_at >= $2 AND r.redeemed_at < $3
          AND r.status IN {REVENUE_STATUSES}
        GROUP BY p.id, p.name, p.image_url, p.merit_points
        ORDER BY total_revenue DESC, p.id
        LIMIT 10
        "#
    ))
    .bind(temple_id)
    .bind(start_at)
    .bind(end_before)
    .fetch_all(&state.pool)
    .await?;

    for item in &mut product_sales {
        item.revenue_percentage = if total_revenue > 0 {
            round2(item.total_revenue as f64 / total_revenue as f64 * 100.0)
        } else {
            0.0
        };
    }

    let average_order_value = if total_orders > 0 {
        round2(total_revenue as f64 / total_orders as f64)
    } else {
        0.0
    };

    Ok(Json(ApiResponse::success(RevenueReport {
        temple,
        period: RevenuePeriod {
            start_date: start,
            end_date: end,
            group_by,
        },
        summary: RevenueSummary {
            total_revenue,
            total_orders,
            average_order_value,
        },
        trend,
        product_sales,
    })))
}

/// 收入概况：今日、近 7 天、本月与累计
///
/// GET /api/temple-admin/temples/{id}/revenue/summary
pub async fn revenue_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<RevenueOverview>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    let temple = temple_ref(&state.pool, temple_id).await?;

    let today = Utc::now().date_naive();
    let month_start = today.with_day(1).unwrap_or(today);

    let row: RevenueOverviewRow = sqlx::query_as(&format!(
        r#"
        SELECT COALESCE(SUM(merit_points_used) FILTER (WHERE redeemed_at >= $2), 0)::BIGINT AS today_revenue,
               COUNT(*) FILTER (WHERE redeemed_at >= $2) AS today_orders,
               COALESCE(SUM(merit_points_used) FILTER (WHERE redeemed_at >= $3), 0)::BIGINT AS week_revenue,
               COUNT(*) FILTER (WHERE redeemed_at >= $3) AS week_orders,
               COALESCE(SUM(merit_points_used) FILTER (WHERE redeemed_at >= $4), 0)::BIGINT AS month_revenue,
               COUNT(*) FILTER (WHERE redeemed_at >= $4) AS month_orders,
               COALESCE(SUM(merit_points_used), 0)::BIGINT AS total_revenue,
               COUNT(*) AS total_orders
        FROM redemptions
        WHERE temple_id = $1 AND status IN {REVENUE_STATUSES}
        "#
    ))
    .bind(temple_id)
    .bind(start_of_day(today))
    .bind(start_of_day(today - Duration::days(6)))
    .bind(start_of_day(month_start))
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(RevenueOverview {
        temple,
        today: RevenueFigure {
            revenue: row.today_revenue,
            orders: row.today_orders,
        },
        this_week: RevenueFigure {
            revenue: row.week_revenue,
            orders: row.week_orders,
        },
        this_month: RevenueFigure {
            revenue: row.month_revenue,
            orders: row.month_orders,
        },
        total: RevenueFigure {
            revenue: row.total_revenue,
            orders: row.total_orders,
        },
    })))
}

// ============================================
// 信众
// ============================================

/// 在本寺庙签到过的信众与其兑换汇总
fn devotee_source() -> String {
    format!(
        r#"
        WITH visits AS (
            SELECT user_id, COUNT(*) AS checkins_count, MAX(created_at) AS last_seen_at
            FROM checkins
            WHERE temple_id = $1
            GROUP BY user_id
        ), spend AS (
            SELECT user_id, COUNT(*) AS orders_count,
                   COALESCE(SUM(merit_points_used), 0)::BIGINT AS spend_total
            FROM redemptions
            WHERE temple_id = $1 AND status IN {REVENUE_STATUSES}
            GROUP BY user_id
        )
        "#
    )
}

/// 信众名单
///
/// GET /api/temple-admin/temples/{id}/devotees
pub async fn list_devotees(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<DevoteeQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<DevoteeItem>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let pattern = query
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let source = devotee_source();
    let from = r#"
        FROM visits v
        JOIN public_users u ON u.id = v.user_id
        LEFT JOIN spend s ON s.user_id = v.user_id
        WHERE ($2::TEXT IS NULL OR u.name ILIKE $2 OR u.email ILIKE $2)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("{source} SELECT COUNT(*) {from}"))
        .bind(temple_id)
        .bind(&pattern)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        r#"
        {source}
        SELECT u.id AS public_user_id, u.name, u.email, v.last_seen_at, v.checkins_count,
               COALESCE(s.orders_count, 0) AS orders_count,
               COALESCE(s.spend_total, 0)::BIGINT AS spend_total
        {from}
        ORDER BY {} DESC, u.id DESC
        LIMIT $3 OFFSET $4
        "#,
        query.sort.column()
    );
    let items: Vec<DevoteeItem> = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(&pattern)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(PageResponse::new(
        items,
        total,
        pagination.page(),
        pagination.limit(),
    ))))
}

/// 单一信众与本寺庙的互动纪录
///
/// GET /api/temple-admin/temples/{id}/devotees/{user_id}
pub async fn devotee_detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, public_user_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<DevoteeDetail>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let profile: DevoteeProfile = sqlx::query_as(
        r#"
        SELECT u.id AS public_user_id, u.name, u.email, u.created_at, u.last_login_at,
               (SELECT MAX(c.created_at) FROM checkins c
                WHERE c.user_id = u.id AND c.temple_id = $1) AS last_seen_at
        FROM public_users u
        WHERE u.id = $2
        "#,
    )
    .bind(temple_id)
    .bind(public_user_id)
    .fetch_optional(&state.pool)
    .await?
    .filter(|p: &DevoteeProfile| p.last_seen_at.is_some())
    .ok_or_else(|| ApiError::NotFound("此信众与该寺庙无互动纪录".to_string()))?;

    let summary: DevoteeSummary = sqlx::query_as(&format!(
        r#"
        SELECT (SELECT COUNT(*) FROM checkins WHERE temple_id = $1 AND user_id = $2) AS checkins_count,
               COUNT(*) AS orders_count,
               COALESCE(SUM(merit_points_used), 0)::BIGINT AS spend_total
        FROM redemptions
        WHERE temple_id = $1 AND user_id = $2 AND status IN {REVENUE_STATUSES}
        "#
    ))
    .bind(temple_id)
    .bind(public_user_id)
    .fetch_one(&state.pool)
    .await?;

    let checkins: Vec<CheckinEvent> = sqlx::query_as(
        r#"
        SELECT created_at AS at, blessing_points AS merit_points
        FROM checkins
        WHERE temple_id = $1 AND user_id = $2
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(temple_id)
    .bind(public_user_id)
    .bind(TIMELINE_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    let orders: Vec<OrderEvent> = sqlx::query_as(
        r#"
        SELECT r.redeemed_at AS at, r.id AS order_id, r.merit_points_used AS amount,
               r.status, p.name AS product_name
        FROM redemptions r
        JOIN products p ON p.id = r.product_id
        WHERE r.temple_id = $1 AND r.user_id = $2
        ORDER BY r.redeemed_at DESC
        LIMIT $3
        "#,
    )
    .bind(temple_id)
    .bind(public_user_id)
    .bind(TIMELINE_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    let mut timeline: Vec<TimelineEntry> = checkins
        .into_iter()
        .map(|c| TimelineEntry::Checkin {
            at: c.at,
            merit_points: c.merit_points,
        })
        .chain(orders.into_iter().map(|o| TimelineEntry::Order {
            at: o.at,
            order_id: o.order_id,
            amount: o.amount,
            status: o.status,
            product_name: o.product_name,
        }))
        .collect();
    timeline.sort_by_key(|entry| std::cmp::Reverse(entry.at()));
    timeline.truncate(TIMELINE_LIMIT as usize);

    Ok(Json(ApiResponse::success(DevoteeDetail {
        profile,
        summary,
        timeline,
    })))
}

// ============================================
// 经营分析
// ============================================

/// 每位信众的互动汇总
async fn member_activity(
    pool: &PgPool,
    temple_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MemberActivity>> {
    let active_since = now - Duration::days(insight::ACTIVE_DAYS);
    let previous_since = active_since - Duration::days(insight::ACTIVE_DAYS);

    let members = sqlx::query_as(&format!(
        r#"
        WITH members AS (
            SELECT user_id, COUNT(*) AS checkins,
                   MIN(created_at) AS first_at, MAX(created_at) AS last_at,
                   BOOL_OR(created_at >= $2 AND created_at < $3) AS active_previous,
                   COUNT(DISTINCT date_trunc('week', created_at))
                       FILTER (WHERE created_at >= $3) AS active_weeks
            FROM checkins
            WHERE temple_id = $1
            GROUP BY user_id
        ), orders AS (
            SELECT user_id, COUNT(*) AS orders,
                   COALESCE(SUM(merit_points_used), 0)::BIGINT AS spend
            FROM redemptions
            WHERE temple_id = $1 AND status IN {REVENUE_STATUSES}
            GROUP BY user_id
        )
        SELECT m.user_id, u.name, m.checkins, m.first_at, m.last_at,
               COALESCE(o.orders, 0) AS orders, COALESCE(o.spend, 0)::BIGINT AS spend,
               m.active_previous, m.active_weeks
        FROM members m
        JOIN public_users u ON u.id = m.user_id
        LEFT JOIN orders o ON o.user_id = m.user_id
        "#
    ))
    .bind(temple_id)
    .bind(previous_since)
    .bind(active_since)
    .fetch_all(pool)
    .await?;
    Ok(members)
}

/// 会员分析
///
/// GET /api/temple-admin/temples/{id}/analytics/members
pub async fn member_analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ApiResponse<MemberAnalytics>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let now = Utc::now();
    let period_days = insight::analytics_period_days(query.period.as_deref());
    let today = now.date_naive();
    let since = today - Duration::days(period_days - 1);

    let daily: Vec<ActivityPoint> = sqlx::query_as(
        r#"
        SELECT date, SUM(checkins)::BIGINT AS checkins, SUM(orders)::BIGINT AS orders
        FROM (
            SELECT checkin_date AS date, COUNT(*) AS checkins, 0::BIGINT AS orders
            FROM checkins
            WHERE temple_id = $1 AND checkin_date >= $2
            GROUP BY checkin_date
            UNION ALL
            SELECT (redeemed_at AT TIME ZONE 'UTC')::DATE, 0::BIGINT, COUNT(*)
            FROM redemptions
            WHERE temple_id = $1 AND redeemed_at >= $3
            GROUP BY 1
        ) activity
        GROUP BY date
        "#,
    )
    .bind(temple_id)
    .bind(since)
    .bind(start_of_day(since))
    .fetch_all(&state.pool)
    .await?;

    let activity_trend = insight::date_series(since, period_days)
        .map(|date| {
            daily
                .iter()
                .find(|point| point.date == date)
                .copied()
                .unwrap_or(ActivityPoint {
                    date,
                    checkins: 0,
                    orders: 0,
                })
        })
        .collect();

    let members = member_activity(&state.pool, temple_id, now).await?;

    Ok(Json(ApiResponse::success(MemberAnalytics {
        period_days,
        activity_trend,
        breakdown: insight::analyze_members(&members, now),
    })))
}

/// 经营诊断
///
/// GET /api/temple-admin/temples/{id}/business/dashboard
pub async fn business_dashboard(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<BusinessDashboard>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;

    let now = Utc::now();
    let (month_start, month_end) = match query.month.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(month) => insight::parse_month(month)?,
        None => {
            let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
            (first, insight::next_month(first))
        }
    };
    let previous_start = insight::previous_month(month_start);
    let temple = temple_ref(&state.pool, temple_id).await?;

    let counts: MemberCounts = sqlx::query_as(&format!(
        r#"
        WITH members AS (
            SELECT user_id, MIN(created_at) AS first_at, MAX(created_at) AS last_at
            FROM checkins
            WHERE temple_id = $1
            GROUP BY user_id
        )
        SELECT COUNT(*) AS total_members,
               COUNT(*) FILTER (WHERE first_at >= $2 AND first_at < $3) AS new_members,
               COUNT(*) FILTER (WHERE last_at >= $4) AS active_members,
               COUNT(*) FILTER (
                   WHERE last_at >= $4 AND EXISTS (
                       SELECT 1 FROM redemptions r
                       WHERE r.temple_id = $1 AND r.user_id = members.user_id
                         AND r.status IN {REVENUE_STATUSES}
                   )
               ) AS converted
        FROM members
        "#
    ))
    .bind(temple_id)
    .bind(start_of_day(month_start))
    .bind(start_of_day(month_end))
    .bind(now - Duration::days(insight::ACTIVE_DAYS))
    .fetch_one(&state.pool)
    .await?;

    let retention: RetentionCounts = sqlx::query_as(
        r#"
        SELECT COUNT(*) AS previous,
               COUNT(*) FILTER (WHERE EXISTS (
                   SELECT 1 FROM checkins c
                   WHERE c.temple_id = $1 AND c.user_id = p.user_id
                     AND c.checkin_date >= $3 AND c.checkin_date < $4
               )) AS retained
        FROM (
            SELECT DISTINCT user_id FROM checkins
            WHERE temple_id = $1 AND checkin_date >= $2 AND checkin_date < $3
        ) p
        "#,
    )
    .bind(temple_id)
    .bind(previous_start)
    .bind(month_start)
    .bind(month_end)
    .fetch_one(&state.pool)
    .await?;

    let revenue: i64 = sqlx::query_scalar(&format!(
        r#"
        SELECT COALESCE(SUM(merit_points_used), 0)::BIGINT
        FROM redemptions
        WHERE temple_id = $1 AND redeemed_at >= $2 AND redeemed_at < $3
          AND status IN {REVENUE_STATUSES}
        "#
    ))
    .bind(temple_id)
    .bind(start_of_day(month_start))
    .bind(start_of_day(month_end))
    .fetch_one(&state.pool)
    .await?;

    let active_rate = insight::percentage(counts.active_members, counts.total_members);
    let metrics = BusinessMetrics {
        new_members: counts.new_members,
        active_rate,
        retention_rate: insight::percentage(retention.retained, retention.previous),
        revenue,
    };

    Ok(Json(ApiResponse::success(BusinessDashboard {
        temple,
        month: month_start.format("%Y-%m").to_string(),
        metrics: DashboardMetrics {
            total_members: counts.total_members,
            new_members: counts.new_members,
            active_members: counts.active_members,
            active_rate,
            retention_rate: metrics.retention_rate,
            revenue,
        },
        health_score: HealthScore::compute(&metrics),
        alerts: insight::alerts(&metrics),
        recommendations: insight::recommendations(&metrics),
        funnel: DashboardFunnel {
            visitors: FunnelStage {
                count: counts.total_members,
                rate: None,
            },
            active: FunnelStage {
                count: counts.active_members,
                rate: Some(active_rate),
            },
            converted: FunnelStage {
                count: counts.converted,
                rate: Some(insight::percentage(counts.converted, counts.active_members)),
            },
        },
        meeting_points: insight::meeting_points(&metrics),
    })))
}

// ============================================
// 访客与排行
// ============================================

fn visitor_period_days(period: Option<&str>) -> (&'static str, i64) {
    match period.map(str::trim) {
        Some("week") => ("week", 7),
        Some("year") => ("year", 365),
        _ => ("month", 30),
    }
}

/// 每日签到人次与访客数
///
/// GET /api/temple-admin/temples/{id}/visitors
pub async fn visitors(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<ApiResponse<VisitorReport>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let (period, days) = visitor_period_days(query.period.as_deref());
    let today = Utc::now().date_naive();
    let since = today - Duration::days(days - 1);

    let daily: Vec<VisitorPoint> = sqlx::query_as(
        r#"
        SELECT d::DATE AS date, COUNT(c.id) AS checkin_count,
               COUNT(DISTINCT c.user_id) AS visitor_count
        FROM generate_series($2::DATE, $3::DATE, INTERVAL '1 day') AS d
        LEFT JOIN checkins c ON c.temple_id = $1 AND c.checkin_date = d::DATE
        GROUP BY d
        ORDER BY d
        "#,
    )
    .bind(temple_id)
    .bind(since)
    .bind(today)
    .fetch_all(&state.pool)
    .await?;

    let unique_visitors: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT user_id) FROM checkins WHERE temple_id = $1 AND checkin_date >= $2",
    )
    .bind(temple_id)
    .bind(since)
    .fetch_one(&state.pool)
    .await?;

    let total_checkins: i64 = daily.iter().map(|d| d.checkin_count).sum();
    Ok(Json(ApiResponse::success(VisitorReport {
        period: period.to_string(),
        summary: VisitorSummary {
            total_checkins,
            unique_visitors,
            daily_average: round2(total_checkins as f64 / days as f64),
        },
        daily,
    })))
}

/// 本寺庙签到最多的信众
///
/// GET /api/temple-admin/temples/{id}/top-users
pub async fn top_users(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<TopQuery>,
) -> Result<Json<ApiResponse<Vec<TopVisitor>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    let today = Utc::now().date_naive();
    let since = match query.period.as_deref().map(str::trim) {
        Some("month") => Some(today - Duration::days(30)),
        Some("year") => Some(today - Duration::days(365)),
        _ => None,
    };

    let items: Vec<TopVisitor> = sqlx::query_as(
        r#"
        SELECT ROW_NUMBER() OVER (ORDER BY COUNT(*) DESC, MAX(c.created_at) DESC) AS rank,
               u.id AS user_id, u.name AS user_name,
               COUNT(*) AS checkin_count, MAX(c.created_at) AS last_checkin
        FROM checkins c
        JOIN public_users u ON u.id = c.user_id
        WHERE c.temple_id = $1 AND ($2::DATE IS NULL OR c.checkin_date >= $2)
        GROUP BY u.id, u.name
        ORDER BY rank
        LIMIT $3
        "#,
    )
    .bind(temple_id)
    .bind(since)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 本寺庙兑换数量最多的商品
///
/// GET /api/temple-admin/temples/{id}/top-products
pub async fn top_products(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(query): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<TopProduct>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, temple_id).await?;

    let limit = query.limit.unwrap_or(3).clamp(1, 10);
    let items: Vec<TopProduct> = sqlx::query_as(
        r#"
        SELECT ROW_NUMBER() OVER (ORDER BY COALESCE(SUM(r.quantity), 0) DESC, p.id) AS rank,
               p.id AS product_id, p.name AS product_name, p.image_url, p.merit_points,
               p.stock_quantity,
               COALESCE(SUM(r.quantity), 0)::BIGINT AS total_sold,
               COUNT(r.id) AS order_count
        FROM products p
        LEFT JOIN redemptions r ON r.product_id = p.id AND r.status <> 'cancelled'
        WHERE p.temple_id = $1 AND p.is_active
        GROUP BY p.id
        ORDER BY rank
        LIMIT $2
        "#,
    )
    .bind(temple_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}
