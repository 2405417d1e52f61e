//! 签到 API 处理器
//!
//! 签到本身的校验与写入在 `service::checkin` 中完成，这里负责请求解析与查询统计

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::auth::AuthUser;
use crate::dto::{ApiResponse, PageResponse, PaginationParams, parse_optional_date};
use crate::engine::{GeoPoint, StreakSummary, streak};
use crate::error::{ApiError, Result};
use crate::models::{CHECKIN_COLUMNS, CheckinMethod, CheckinRecord};
use crate::service::checkin::{self, CheckinCommand, CheckinContext, CheckinOutcome};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

/// 签到请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckinRequest {
    pub amulet_id: i64,
    pub temple_id: Option<i64>,
    pub method: Option<CheckinMethod>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[validate(length(max = 64))]
    pub nfc_uid: Option<String>,
    #[validate(length(max = 128))]
    pub qr_token: Option<String>,
    #[validate(length(max = 500, message = "备注不能超过 500 字"))]
    pub notes: Option<String>,
}

/// NFC 签到请求，按标签找到寺庙
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NfcCheckinRequest {
    #[validate(length(min = 1, max = 64, message = "请提供 NFC 标签"))]
    pub nfc_uid: String,
    pub amulet_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[validate(length(max = 500, message = "备注不能超过 500 字"))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub temple_id: Option<i64>,
    pub amulet_id: Option<i64>,
}

/// 含寺庙名称的签到记录
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckinListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub checkin: CheckinRecord,
    pub temple_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayQuery {
    pub amulet_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStatus {
    pub checked_in: bool,
    pub checkin: Option<CheckinRecord>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TempleVisits {
    pub temple_id: i64,
    pub temple_name: String,
    pub visits: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinStats {
    pub total_checkins: i64,
    pub temples_visited: i64,
    pub total_points: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub this_month: i64,
    pub top_temples: Vec<TempleVisits>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResponse {
    #[serde(flatten)]
    pub summary: StreakSummary,
    /// 最近 30 天有签到的日期
    pub recent_dates: Vec<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyCheckins {
    pub date: NaiveDate,
    pub count: i64,
    pub points: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    pub year: i32,
    pub month: u32,
    pub total_checkins: i64,
    pub total_points: i64,
    pub days: Vec<DailyCheckins>,
}

// ============================================
// API 处理器
// ============================================

/// 签到
///
/// POST /api/checkins
pub async fn create_checkin(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateCheckinRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckinOutcome>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let cmd = CheckinCommand {
        amulet_id: req.amulet_id,
        temple_id: req.temple_id,
        method: req.method.unwrap_or_default(),
        location: GeoPoint::from_optional(req.latitude, req.longitude)?,
        nfc_uid: req.nfc_uid,
        qr_token: req.qr_token,
        notes: req.notes,
    };

    let outcome = run_checkin(&state, user_id, &cmd).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(outcome, "签到成功")),
    ))
}

/// NFC 签到
///
/// POST /api/checkins/nfc
pub async fn nfc_checkin(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<NfcCheckinRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckinOutcome>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let nfc_uid = req.nfc_uid.trim().to_string();
    let temple_id: i64 = sqlx::query_scalar("SELECT id FROM temples WHERE UPPER(nfc_uid) = UPPER($1)")
        .bind(&nfc_uid)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("找不到此 NFC 标签对应的寺庙".to_string()))?;

    let cmd = CheckinCommand {
        amulet_id: req.amulet_id,
        temple_id: Some(temple_id),
        method: CheckinMethod::Nfc,
        location: GeoPoint::from_optional(req.latitude, req.longitude)?,
        nfc_uid: Some(nfc_uid),
        qr_token: None,
        notes: req.notes,
    };

    let outcome = run_checkin(&state, user_id, &cmd).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(outcome, "签到成功")),
    ))
}

async fn run_checkin(state: &AppState, user_id: i64, cmd: &CheckinCommand) -> Result<CheckinOutcome> {
    let ctx = CheckinContext {
        config: &state.checkin,
        qr_secret: state.qr_secret(),
        today: Utc::now().date_naive(),
    };

    let mut tx = state.pool.begin().await?;
    let outcome = checkin::perform_checkin(&mut *tx, user_id, cmd, ctx).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// 签到记录
///
/// GET /api/checkins
pub async fn list_checkins(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<CheckinFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<CheckinListItem>>>> {
    let user_id = user.public_user_id()?;
    let start = parse_optional_date("startDate", filter.start_date.as_deref())?;
    let end = parse_optional_date("endDate", filter.end_date.as_deref())?;

    let where_clause = r#"
        WHERE c.user_id = $1
          AND ($2::DATE IS NULL OR c.checkin_date >= $2)
          AND ($3::DATE IS NULL OR c.checkin_date <= $3)
          AND ($4::BIGINT IS NULL OR c.temple_id = $4)
          AND ($5::BIGINT IS NULL OR c.amulet_id = $5)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM checkins c {where_clause}"))
            .bind(user_id)
            .bind(start)
            .bind(end)
            .bind(filter.temple_id)
            .bind(filter.amulet_id)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        r#"
        SELECT c.*, t.name AS temple_name
        FROM checkins c
        LEFT JOIN temples t ON t.id = c.temple_id
        {where_clause}
        ORDER BY c.created_at DESC, c.id DESC
        LIMIT $6 OFFSET $7
        "#
    );
    let items: Vec<CheckinListItem> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(start)
        .bind(end)
        .bind(filter.temple_id)
        .bind(filter.amulet_id)
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

/// 今日是否已签到
///
/// GET /api/checkins/today
pub async fn today_status(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<TodayQuery>,
) -> Result<Json<ApiResponse<TodayStatus>>> {
    let user_id = user.public_user_id()?;

    let sql = format!(
        r#"
        SELECT {CHECKIN_COLUMNS} FROM checkins
        WHERE user_id = $1 AND checkin_date = $2 AND ($3::BIGINT IS NULL OR amulet_id = $3)
        ORDER BY created_at DESC
        LIMIT 1
        "#
    );
    let checkin: Option<CheckinRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(Utc::now().date_naive())
        .bind(query.amulet_id)
        .fetch_optional(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(TodayStatus {
        checked_in: checkin.is_some(),
        checkin,
    })))
}

/// 签到统计
///
/// GET /api/checkins/stats
pub async fn checkin_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CheckinStats>>> {
    let user_id = user.public_user_id()?;
    let today = Utc::now().date_naive();
    let (month_start, month_end) = month_range(today.year(), today.month())?;

    let (total_checkins, temples_visited, total_points, this_month): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(DISTINCT temple_id),
                   COALESCE(SUM(blessing_points), 0)::BIGINT,
                   COUNT(*) FILTER (WHERE checkin_date >= $2 AND checkin_date < $3)
            FROM checkins
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(month_start)
        .bind(month_end)
        .fetch_one(&state.pool)
        .await?;

    let dates = checkin_dates(&state, user_id).await?;
    let summary = streak::summarize(&dates, today);

    let top_temples: Vec<TempleVisits> = sqlx::query_as(
        r#"
        SELECT t.id AS temple_id, t.name AS temple_name, COUNT(*) AS visits
        FROM checkins c
        JOIN temples t ON t.id = c.temple_id
        WHERE c.user_id = $1
        GROUP BY t.id, t.name
        ORDER BY visits DESC, t.id
        LIMIT 5
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(CheckinStats {
        total_checkins,
        temples_visited,
        total_points,
        current_streak: summary.current_streak,
        longest_streak: summary.longest_streak,
        this_month,
        top_temples,
    })))
}

/// 连续签到
///
/// GET /api/checkins/streak
pub async fn checkin_streak(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<StreakResponse>>> {
    let user_id = user.public_user_id()?;
    let today = Utc::now().date_naive();

    let dates = checkin_dates(&state, user_id).await?;
    let summary = streak::summarize(&dates, today);
    let since = today - Duration::days(29);
    let mut recent_dates: Vec<NaiveDate> = dates.into_iter().filter(|d| *d >= since).collect();
    recent_dates.sort();

    Ok(Json(ApiResponse::success(StreakResponse {
        summary,
        recent_dates,
    })))
}

/// 月度签到统计
///
/// GET /api/checkins/monthly-stats
pub async fn monthly_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<MonthlyStats>>> {
    let user_id = user.public_user_id()?;
    let today = Utc::now().date_naive();
    let year = query.year.unwrap_or(today.year());
    let month = query.month.unwrap_or(today.month());
    let (start, end) = month_range(year, month)?;

    let days: Vec<DailyCheckins> = sqlx::query_as(
        r#"
        SELECT checkin_date AS date, COUNT(*) AS count,
               COALESCE(SUM(blessing_points), 0)::BIGINT AS points
        FROM checkins
        WHERE user_id = $1 AND checkin_date >= $2 AND checkin_date < $3
        GROUP BY checkin_date
        ORDER BY checkin_date
        "#,
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(MonthlyStats {
        year,
        month,
        total_checkins: days.iter().map(|d| d.count).sum(),
        total_points: days.iter().map(|d| d.points).sum(),
        days,
    })))
}

pub(crate) async fn checkin_dates(state: &AppState, user_id: i64) -> Result<Vec<NaiveDate>> {
    let dates = sqlx::query_scalar(
        "SELECT DISTINCT checkin_date FROM checkins WHERE user_id = $1 ORDER BY checkin_date",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(dates)
}

/// 月份的起止日期，结束为下月一日（开区间）
pub(crate) fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(ApiError::Validation("月份必须介于 1 与 12 之间".to_string()));
    }
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ApiError::Validation("年份不正确".to_string()))?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| ApiError::Validation("年份不正确".to_string()))?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_range() {
        let (start, end) = month_range(2024, 2).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let (_, end) = month_range(2024, 12).unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_month_range_rejects_invalid_month() {
        assert!(matches!(month_range(2024, 0), Err(ApiError::Validation(_))));
        assert!(matches!(month_range(2024, 13), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_checkin_request_defaults_to_manual() {
        let req: CreateCheckinRequest = serde_json::from_str(r#"{"amuletId": 3}"#).unwrap();
        assert_eq!(req.method.unwrap_or_default(), CheckinMethod::Manual);
        assert!(req.temple_id.is_none());

        let req: CreateCheckinRequest =
            serde_json::from_str(r#"{"amuletId": 3, "templeId": 1, "method": "qr_code"}"#).unwrap();
        assert_eq!(req.method, Some(CheckinMethod::QrCode));
    }
}
