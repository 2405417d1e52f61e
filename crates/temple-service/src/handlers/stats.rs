//! 全站兑换与功德值统计，以及用户个人摘要
//!
//! `days = 0` 表示不限时间（仅排行类接口接受）。

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::checkin::checkin_dates;
use crate::auth::AuthUser;
use crate::dto::ApiResponse;
use crate::engine::streak;
use crate::error::{ApiError, Result};
use crate::models::RedemptionStatus;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

impl StatsQuery {
    /// 1..=365，缺省为 `default`
    fn days(&self, default: i64) -> i64 {
        self.days.unwrap_or(default).clamp(1, 365)
    }

    /// 0 表示不限时间，其余同 [`Self::days`]
    fn days_or_all(&self, default: i64) -> Option<i64> {
        match self.days.unwrap_or(default) {
            0 => None,
            days => Some(days.clamp(1, 365)),
        }
    }

    fn limit(&self) -> i64 {
        self.limit.unwrap_or(10).clamp(1, 100)
    }
}

fn since(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// 含今天在内最近 `days` 天的起点
fn since_day(days: i64) -> DateTime<Utc> {
    (Utc::now().date_naive() - Duration::days(days - 1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopSellingProduct {
    pub product_id: i64,
    pub product_name: String,
    pub redemption_count: i64,
    pub total_quantity: i64,
    pub total_points: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsers {
    pub active_users: i64,
    pub days: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopSpender {
    pub user_id: i64,
    pub user_name: String,
    pub email: String,
    pub redemption_count: i64,
    pub total_points: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionTrendPoint {
    pub date: NaiveDate,
    pub count: i64,
    pub points: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusShare {
    pub status: RedemptionStatus,
    pub count: i64,
    pub total_points: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsFlowDay {
    pub date: NaiveDate,
    pub earned: i64,
    pub spent: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsFlow {
    pub earned: i64,
    pub spent: i64,
    pub net: i64,
    pub daily: Vec<PointsFlowDay>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub blessing_points: i64,
    pub total_redemptions: i64,
    pub total_points_used: i64,
    pub total_checkins: i64,
    #[sqlx(skip)]
    pub consecutive_checkin_days: i64,
}

/// 兑换最多的商品
///
/// GET /api/admin/stats/top-selling
pub async fn top_selling(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<Vec<TopSellingProduct>>>> {
    let from = query.days_or_all(30).map(since);

    let items: Vec<TopSellingProduct> = sqlx::query_as(
        r#"
        SELECT p.id AS product_id, p.name AS product_name,
               COUNT(*) AS redemption_count,
               COALESCE(SUM(r.quantity), 0)::BIGINT AS total_quantity,
               COALESCE(SUM(r.merit_points_used), 0)::BIGINT AS total_points
        FROM redemptions r
        JOIN products p ON p.id = r.product_id
        WHERE r.status <> 'cancelled'
          AND ($1::TIMESTAMPTZ IS NULL OR r.redeemed_at >= $1)
        GROUP BY p.id, p.name
        ORDER BY redemption_count DESC, total_quantity DESC, p.id
        LIMIT $2
        "#,
    )
    .bind(from)
    .bind(query.limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 期间内有签到或兑换的用户数
///
/// GET /api/admin/stats/active-users
pub async fn active_users(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<ActiveUsers>>> {
    let days = query.days(7);

    let active_users: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT user_id FROM checkins WHERE created_at >= $1
            UNION
            SELECT user_id FROM redemptions WHERE redeemed_at >= $1
        ) active
        "#,
    )
    .bind(since(days))
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ActiveUsers { active_users, days })))
}

/// 兑换功德值最多的用户
///
/// GET /api/admin/stats/top-spenders
pub async fn top_spenders(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<Vec<TopSpender>>>> {
    let from = query.days_or_all(0).map(since);

    let items: Vec<TopSpender> = sqlx::query_as(
        r#"
        SELECT u.id AS user_id, u.name AS user_name, u.email,
               COUNT(*) AS redemption_count,
               COALESCE(SUM(r.merit_points_used), 0)::BIGINT AS total_points
        FROM redemptions r
        JOIN public_users u ON u.id = r.user_id
        WHERE r.status <> 'cancelled'
          AND ($1::TIMESTAMPTZ IS NULL OR r.redeemed_at >= $1)
        GROUP BY u.id, u.name, u.email
        ORDER BY total_points DESC, u.id
        LIMIT $2
        "#,
    )
    .bind(from)
    .bind(query.limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 每日兑换趋势
///
/// GET /api/admin/stats/redemption-trend
pub async fn redemption_trend(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<Vec<RedemptionTrendPoint>>>> {
    let days = query.days(30);

    let trend: Vec<RedemptionTrendPoint> = sqlx::query_as(
        r#"
        SELECT (redeemed_at AT TIME ZONE 'UTC')::DATE AS date,
               COUNT(*) AS count,
               COALESCE(SUM(merit_points_used), 0)::BIGINT AS points
        FROM redemptions
        WHERE redeemed_at >= $1 AND status <> 'cancelled'
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(since_day(days))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(trend)))
}

/// 订单状态分布
///
/// GET /api/admin/stats/status-distribution
pub async fn status_distribution(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<StatusShare>>>> {
    let items: Vec<StatusShare> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*) AS count,
               COALESCE(SUM(merit_points_used), 0)::BIGINT AS total_points
        FROM redemptions
        GROUP BY status
        ORDER BY count DESC, status
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(items)))
}

/// 功德值流入与流出
///
/// GET /api/admin/stats/points-flow
pub async fn points_flow(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<PointsFlow>>> {
    let days = query.days(30);

    let daily: Vec<PointsFlowDay> = sqlx::query_as(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::DATE AS date,
               COALESCE(SUM(delta) FILTER (WHERE delta > 0), 0)::BIGINT AS earned,
               COALESCE(-SUM(delta) FILTER (WHERE delta < 0), 0)::BIGINT AS spent
        FROM point_ledger
        WHERE created_at >= $1
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(since_day(days))
    .fetch_all(&state.pool)
    .await?;

    let earned: i64 = daily.iter().map(|d| d.earned).sum();
    let spent: i64 = daily.iter().map(|d| d.spent).sum();
    Ok(Json(ApiResponse::success(PointsFlow {
        earned,
        spent,
        net: earned - spent,
        daily,
    })))
}

/// 当前用户的功德值、兑换与签到摘要
///
/// GET /api/users/summary
pub async fn my_summary(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<UserSummary>>> {
    let user_id = user.public_user_id()?;

    let mut summary: UserSummary = sqlx::query_as(
        r#"
        SELECT u.blessing_points,
               (SELECT COUNT(*) FROM redemptions
                 WHERE user_id = u.id AND status <> 'cancelled') AS total_redemptions,
               (SELECT COALESCE(SUM(merit_points_used), 0)::BIGINT FROM redemptions
                 WHERE user_id = u.id AND status <> 'cancelled') AS total_points_used,
               (SELECT COUNT(*) FROM checkins WHERE user_id = u.id) AS total_checkins
        FROM public_users u
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::UserNotFound(user_id))?;

    let dates = checkin_dates(&state, user_id).await?;
    summary.consecutive_checkin_days =
        streak::summarize(&dates, Utc::now().date_naive()).current_streak;

    Ok(Json(ApiResponse::success(summary)))
}
