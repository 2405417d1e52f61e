//! 排行榜处理器

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::AuthUser;
use crate::dto::{ApiResponse, LimitParams};
use crate::error::{ApiError, Result};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 20;

/// 统计区间，week 为最近 7 天，month 为最近 30 天
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    All,
    Week,
    Month,
}

impl Period {
    fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::All => None,
            Period::Week => Some(now - Duration::days(7)),
            Period::Month => Some(now - Duration::days(30)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub period: Period,
    pub limit: Option<i64>,
}

impl LeaderboardQuery {
    fn limit(&self) -> i64 {
        LimitParams { limit: self.limit }.resolve(DEFAULT_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct Leaderboard<T> {
    pub period: Period,
    pub leaderboard: Vec<T>,
    pub count: usize,
}

impl<T> Leaderboard<T> {
    fn new(period: Period, leaderboard: Vec<T>) -> Self {
        Self {
            period,
            count: leaderboard.len(),
            leaderboard,
        }
    }
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointsEntry {
    pub rank: i64,
    pub user_id: i64,
    pub user_name: String,
    pub blessing_points: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckinEntry {
    pub rank: i64,
    pub user_id: i64,
    pub user_name: String,
    pub checkin_count: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TempleEntry {
    pub rank: i64,
    pub temple_id: i64,
    pub temple_name: String,
    pub main_deity: Option<String>,
    pub visit_count: i64,
    pub unique_visitors: i64,
}

#[derive(Debug, Deserialize)]
pub struct MyRankQuery {
    #[serde(rename = "type")]
    pub rank_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankType {
    BlessingPoints,
    Checkins,
}

impl RankType {
    fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("blessing_points") => Ok(RankType::BlessingPoints),
            Some("checkins") => Ok(RankType::Checkins),
            Some(other) => Err(ApiError::BadRequest(format!("无效的排行榜类型: {other}"))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyRank {
    #[serde(rename = "type")]
    pub rank_type: RankType,
    pub my_rank: i64,
    pub my_value: i64,
}

/// 功德值排行，period 为 all 时按当前余额，否则按区间内签到所得
///
/// GET /api/leaderboard/blessing-points
pub async fn blessing_points(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Leaderboard<PointsEntry>>>> {
    let since = query.period.since(Utc::now());

    let entries: Vec<PointsEntry> = match since {
        None => {
            sqlx::query_as(
                r#"
                SELECT ROW_NUMBER() OVER (ORDER BY blessing_points DESC, id) AS rank,
                       id AS user_id, name AS user_name, blessing_points
                FROM public_users
                WHERE is_active = TRUE
                ORDER BY blessing_points DESC, id
                LIMIT $1
                "#,
            )
            .bind(query.limit())
            .fetch_all(&state.pool)
            .await?
        }
        Some(since) => {
            sqlx::query_as(
                r#"
                SELECT ROW_NUMBER() OVER (ORDER BY SUM(c.blessing_points) DESC, u.id) AS rank,
                       u.id AS user_id, u.name AS user_name,
                       SUM(c.blessing_points)::BIGINT AS blessing_points
                FROM checkins c
                JOIN public_users u ON u.id = c.user_id
                WHERE u.is_active = TRUE AND c.created_at >= $1
                GROUP BY u.id, u.name
                ORDER BY blessing_points DESC, u.id
                LIMIT $2
                "#,
            )
            .bind(since)
            .bind(query.limit())
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(ApiResponse::success(Leaderboard::new(
        query.period,
        entries,
    ))))
}

/// 签到次数排行
///
/// GET /api/leaderboard/checkins
pub async fn checkins(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Leaderboard<CheckinEntry>>>> {
    let since = query.period.since(Utc::now());

    let entries: Vec<CheckinEntry> = sqlx::query_as(
        r#"
        SELECT ROW_NUMBER() OVER (ORDER BY COUNT(c.id) DESC, u.id) AS rank,
               u.id AS user_id, u.name AS user_name, COUNT(c.id) AS checkin_count
        FROM checkins c
        JOIN public_users u ON u.id = c.user_id
        WHERE u.is_active = TRUE
          AND ($1::TIMESTAMPTZ IS NULL OR c.created_at >= $1)
        GROUP BY u.id, u.name
        ORDER BY checkin_count DESC, u.id
        LIMIT $2
        "#,
    )
    .bind(since)
    .bind(query.limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(Leaderboard::new(
        query.period,
        entries,
    ))))
}

/// 寺庙人气排行
///
/// GET /api/leaderboard/temples
pub async fn temples(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Leaderboard<TempleEntry>>>> {
    let since = query.period.since(Utc::now());

    let entries: Vec<TempleEntry> = sqlx::query_as(
        r#"
        SELECT ROW_NUMBER() OVER (ORDER BY COUNT(c.id) DESC, t.id) AS rank,
               t.id AS temple_id, t.name AS temple_name, t.main_deity,
               COUNT(c.id) AS visit_count,
               COUNT(DISTINCT c.user_id) AS unique_visitors
        FROM checkins c
        JOIN temples t ON t.id = c.temple_id
        WHERE t.is_active = TRUE
          AND ($1::TIMESTAMPTZ IS NULL OR c.created_at >= $1)
        GROUP BY t.id, t.name, t.main_deity
        ORDER BY visit_count DESC, t.id
        LIMIT $2
        "#,
    )
    .bind(since)
    .bind(query.limit())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(Leaderboard::new(
        query.period,
        entries,
    ))))
}

/// 当前用户排名，同分并列
///
/// GET /api/leaderboard/my-rank
pub async fn my_rank(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MyRankQuery>,
) -> Result<Json<ApiResponse<MyRank>>> {
    let rank_type = RankType::parse(query.rank_type.as_deref())?;
    let user_id = user.public_user_id()?;

    let (my_value, ahead): (i64, i64) = match rank_type {
        RankType::BlessingPoints => {
            sqlx::query_as(
                r#"
                SELECT me.blessing_points,
                       (SELECT COUNT(*) FROM public_users
                         WHERE is_active = TRUE AND blessing_points > me.blessing_points)
                FROM public_users me
                WHERE me.id = $1
                "#,
            )
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(ApiError::UserNotFound(user_id))?
        }
        RankType::Checkins => {
            sqlx::query_as(
                r#"
                WITH counts AS (
                    SELECT c.user_id, COUNT(*) AS total
                    FROM checkins c
                    JOIN public_users u ON u.id = c.user_id AND u.is_active = TRUE
                    GROUP BY c.user_id
                ), me AS (
                    SELECT COUNT(*) AS total FROM checkins WHERE user_id = $1
                )
                SELECT me.total, (SELECT COUNT(*) FROM counts WHERE counts.total > me.total)
                FROM me
                "#,
            )
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?
        }
    };

    Ok(Json(ApiResponse::success(MyRank {
        rank_type,
        my_rank: ahead + 1,
        my_value,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_type_parse() {
        assert_eq!(RankType::parse(None).unwrap(), RankType::BlessingPoints);
        assert_eq!(RankType::parse(Some("checkins")).unwrap(), RankType::Checkins);
        let err = RankType::parse(Some("energy")).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_period_since() {
        let now = Utc::now();
        assert!(Period::All.since(now).is_none());
        assert_eq!(Period::Week.since(now), Some(now - Duration::days(7)));
        assert_eq!(Period::Month.since(now), Some(now - Duration::days(30)));
    }

    #[test]
    fn test_query_defaults() {
        let query: LeaderboardQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.period, Period::All);
        assert_eq!(query.limit(), DEFAULT_LIMIT);

        let query: LeaderboardQuery =
            serde_json::from_str(r#"{"period":"week","limit":500}"#).unwrap();
        assert_eq!(query.period, Period::Week);
        assert_eq!(query.limit(), 100);
    }
}
