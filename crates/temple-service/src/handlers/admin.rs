//! 总后台处理器
//!
//! 用户与功德值管理、寺庙管理员与超级管理员账号、全站数据分析、
//! 操作日志、系统设置与系统公告。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use validator::Validate;

use super::staff::{
    CreateStaffRequest, UpdateStaffRequest, fetch_staff, insert_temple_admin, query_staff,
    update_temple_admin,
};
use super::temple::fetch_temple;
use crate::auth::{AuthUser, hash_password};
use crate::dto::{
    ApiResponse, CountResponse, DailyCount, PageResponse, PaginationParams, end_of_day_exclusive,
    parse_optional_date,
};
use crate::error::{ApiError, Result};
use crate::models::{
    AccountType, NotificationType, PUBLIC_USER_COLUMNS, PointKind, PublicUserRecord,
    SUPER_ADMIN_COLUMNS, SuperAdminRecord, TempleAdminRole, TempleAdminView,
};
use crate::service::account::map_email_conflict;
use crate::service::ledger::{self, PointChange};
use crate::service::notification::{self, NewNotification};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: PublicUserRecord,
    #[serde(flatten)]
    pub counters: UserCounters,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserCounters {
    pub amulet_count: i64,
    pub checkin_count: i64,
    pub reward_claim_count: i64,
    pub redemption_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsRequest {
    pub adjustment: i64,
    #[validate(length(min = 1, max = 200, message = "请填写调整原因"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustPointsResponse {
    pub user_id: i64,
    pub requested: i64,
    pub applied: i64,
    pub blessing_points: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserStatusRequest {
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleAdminFilter {
    pub temple_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSuperAdminRequest {
    #[validate(length(min = 2, max = 100, message = "姓名长度必须在 2-100 之间"))]
    pub name: String,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 8, max = 100, message = "密码至少需要 8 个字符"))]
    pub password: String,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub total_users: i64,
    pub new_users_today: i64,
    pub total_temples: i64,
    pub active_temples: i64,
    pub total_checkins: i64,
    pub today_checkins: i64,
    pub total_redemptions: i64,
    pub today_redemptions: i64,
    pub points_redeemed: i64,
    pub points_issued: i64,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub actor_type: Option<String>,
    pub module: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogRecord {
    pub id: i64,
    pub actor_type: String,
    pub actor_id: i64,
    pub actor_name: Option<String>,
    pub module: String,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub request_method: String,
    pub request_path: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SettingRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub description: Option<String>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: serde_json::Value,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SystemAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "标题长度必须在 1-200 之间"))]
    pub title: String,
    #[validate(length(min = 1, message = "公告内容不能为空"))]
    pub content: String,
}

// ============================================
// 用户管理
// ============================================

/// 用户列表
///
/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<PublicUserRecord>>>> {
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let where_clause = r#"
        WHERE ($1::VARCHAR IS NULL OR name ILIKE $1 OR email ILIKE $1)
          AND ($2::BOOLEAN IS NULL OR is_active = $2)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM public_users {where_clause}"))
            .bind(&search)
            .bind(filter.is_active)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        "SELECT {PUBLIC_USER_COLUMNS} FROM public_users {where_clause} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
    );
    let items: Vec<PublicUserRecord> = sqlx::query_as(&sql)
        .bind(&search)
        .bind(filter.is_active)
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

/// 用户详情
///
/// GET /api/admin/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<UserDetail>>> {
    let sql = format!("SELECT {PUBLIC_USER_COLUMNS} FROM public_users WHERE id = $1");
    let user: PublicUserRecord = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))?;

    let counters: UserCounters = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM amulets WHERE user_id = $1) AS amulet_count,
            (SELECT COUNT(*) FROM checkins WHERE user_id = $1) AS checkin_count,
            (SELECT COUNT(*) FROM reward_claims WHERE user_id = $1) AS reward_claim_count,
            (SELECT COUNT(*) FROM redemptions WHERE user_id = $1) AS redemption_count
        "#,
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(UserDetail { user, counters })))
}

/// 调整功德值，扣除时最多扣到 0
///
/// 停用的用户同样可以调整；实际变动为 0 时拒绝，不写流水。
///
/// PUT /api/admin/users/{id}/points
pub async fn adjust_points(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AdjustPointsRequest>,
) -> Result<Json<ApiResponse<AdjustPointsResponse>>> {
    req.validate()?;
    if req.adjustment == 0 {
        return Err(ApiError::Validation("调整值不能为 0".to_string()));
    }

    let mut tx = state.pool.begin().await?;
    let user = ledger::lock_balance(&mut *tx, id).await?;
    let applied = ledger::floor_adjustment(user.blessing_points, req.adjustment);
    if applied == 0 {
        return Err(ApiError::BadRequest("用户功德值已为 0，无法再扣除".to_string()));
    }

    let note = req.reason.trim();
    let change = PointChange::new(id, applied, PointKind::AdminAdjust)
        .reference("super_admin", admin.id()?)
        .note(note);
    let balance = ledger::apply(&mut *tx, &change).await?;
    tx.commit().await?;

    if applied != req.adjustment {
        warn!(
            user_id = id,
            requested = req.adjustment,
            applied = applied,
            "Points adjustment floored at zero"
        );
    }
    info!(user_id = id, delta = applied, balance = balance, "Points adjusted by admin");

    Ok(Json(ApiResponse::success(AdjustPointsResponse {
        user_id: id,
        requested: req.adjustment,
        applied,
        blessing_points: balance,
    })))
}

/// 启用或停用用户
///
/// PUT /api/admin/users/{id}/status
pub async fn update_user_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserStatusRequest>,
) -> Result<Json<ApiResponse<PublicUserRecord>>> {
    let sql = format!(
        "UPDATE public_users SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {PUBLIC_USER_COLUMNS}"
    );
    let user: PublicUserRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.is_active)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))?;

    info!(user_id = id, is_active = req.is_active, "User status changed");
    Ok(Json(ApiResponse::success(user)))
}

// ============================================
// 管理员账号
// ============================================

/// 寺庙管理员列表
///
/// GET /api/admin/temple-admins
pub async fn list_temple_admins(
    State(state): State<AppState>,
    Query(filter): Query<TempleAdminFilter>,
) -> Result<Json<ApiResponse<Vec<TempleAdminView>>>> {
    let accounts = query_staff(&state.pool, filter.temple_id).await?;
    Ok(Json(ApiResponse::success(accounts)))
}

/// 新增寺庙管理员
///
/// POST /api/admin/temple-admins
pub async fn create_temple_admin(
    State(state): State<AppState>,
    admin: AuthUser,
    Json(req): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TempleAdminView>>)> {
    req.validate()?;
    let temple_id = req
        .temple_id
        .ok_or_else(|| ApiError::Validation("请指定寺庙".to_string()))?;
    fetch_temple(&state.pool, temple_id).await?;

    if req.role == TempleAdminRole::Owner {
        ensure_no_owner(&state.pool, temple_id).await?;
    }

    let account = insert_temple_admin(&state.pool, temple_id, &req, admin.id()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(TempleAdminView::from(account))),
    ))
}

/// 更新寺庙管理员
///
/// PUT /api/admin/temple-admins/{id}
pub async fn update_temple_admin_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStaffRequest>,
) -> Result<Json<ApiResponse<TempleAdminView>>> {
    req.validate()?;
    let existing = fetch_staff(&state.pool, id).await?;
    if req.role == Some(TempleAdminRole::Owner) && existing.role != TempleAdminRole::Owner {
        ensure_no_owner(&state.pool, existing.temple_id).await?;
    }
    let account = update_temple_admin(&state.pool, id, &req).await?;
    Ok(Json(ApiResponse::success(TempleAdminView::from(account))))
}

/// 超级管理员列表
///
/// GET /api/admin/admins
pub async fn list_super_admins(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SuperAdminRecord>>>> {
    let sql = format!("SELECT {SUPER_ADMIN_COLUMNS} FROM super_admin_users ORDER BY id");
    let admins: Vec<SuperAdminRecord> = sqlx::query_as(&sql).fetch_all(&state.pool).await?;
    Ok(Json(ApiResponse::success(admins)))
}

/// 新增超级管理员
///
/// POST /api/admin/admins
pub async fn create_super_admin(
    State(state): State<AppState>,
    Json(req): Json<CreateSuperAdminRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SuperAdminRecord>>)> {
    req.validate()?;

    let sql = format!(
        r#"
        INSERT INTO super_admin_users (name, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING {SUPER_ADMIN_COLUMNS}
        "#
    );
    let account: SuperAdminRecord = sqlx::query_as(&sql)
        .bind(req.name.trim())
        .bind(req.email.trim().to_lowercase())
        .bind(hash_password(&req.password)?)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| map_email_conflict(e, AccountType::SuperAdmin))?;

    info!(account_id = account.id, "Super admin created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(account))))
}

// ============================================
// 数据分析
// ============================================

/// 全站概览
///
/// GET /api/admin/analytics/overview
pub async fn analytics_overview(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AnalyticsOverview>>> {
    let today = Utc::now().date_naive();

    let overview: AnalyticsOverview = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM public_users) AS total_users,
            (SELECT COUNT(*) FROM public_users WHERE created_at::DATE = $1) AS new_users_today,
            (SELECT COUNT(*) FROM temples) AS total_temples,
            (SELECT COUNT(*) FROM temples WHERE is_active = TRUE) AS active_temples,
            (SELECT COUNT(*) FROM checkins) AS total_checkins,
            (SELECT COUNT(*) FROM checkins WHERE checkin_date = $1) AS today_checkins,
            (SELECT COUNT(*) FROM redemptions) AS total_redemptions,
            (SELECT COUNT(*) FROM redemptions WHERE redeemed_at::DATE = $1) AS today_redemptions,
            (SELECT COALESCE(SUM(merit_points_used), 0)::BIGINT FROM redemptions
              WHERE status <> 'cancelled') AS points_redeemed,
            (SELECT COALESCE(SUM(delta), 0)::BIGINT FROM point_ledger
              WHERE kind IN ('checkin', 'reward')) AS points_issued
        "#,
    )
    .bind(today)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(overview)))
}

/// 每日签到趋势
///
/// GET /api/admin/analytics/checkins
pub async fn checkin_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> Result<Json<ApiResponse<Vec<DailyCount>>>> {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let since = Utc::now().date_naive() - Duration::days(days - 1);

    let trend: Vec<DailyCount> = sqlx::query_as(
        r#"
        SELECT checkin_date AS date, COUNT(*) AS count
        FROM checkins
        WHERE checkin_date >= $1
        GROUP BY checkin_date
        ORDER BY checkin_date
        "#,
    )
    .bind(since)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(trend)))
}

// ============================================
// 操作日志与系统设置
// ============================================

/// 操作日志
///
/// GET /api/admin/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Query(filter): Query<LogFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<SystemLogRecord>>>> {
    let start = parse_optional_date("startTime", filter.start_time.as_deref())?
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc());
    let end = parse_optional_date("endTime", filter.end_time.as_deref())?.map(end_of_day_exclusive);

    let where_clause = r#"
        WHERE ($1::VARCHAR IS NULL OR actor_type = $1)
          AND ($2::VARCHAR IS NULL OR module = $2)
          AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
          AND ($4::TIMESTAMPTZ IS NULL OR created_at < $4)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM system_logs {where_clause}"))
            .bind(&filter.actor_type)
            .bind(&filter.module)
            .bind(start)
            .bind(end)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        r#"
        SELECT id, actor_type, actor_id, actor_name, module, action, target_type, target_id,
               request_method, request_path, ip_address, user_agent, created_at
        FROM system_logs
        {where_clause}
        ORDER BY created_at DESC, id DESC
        LIMIT $5 OFFSET $6
        "#
    );
    let items: Vec<SystemLogRecord> = sqlx::query_as(&sql)
        .bind(&filter.actor_type)
        .bind(&filter.module)
        .bind(start)
        .bind(end)
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

/// 系统设置
///
/// GET /api/admin/settings
pub async fn list_settings(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SettingRecord>>>> {
    let settings: Vec<SettingRecord> = sqlx::query_as(
        "SELECT key, value, description, updated_by, updated_at FROM system_settings ORDER BY key",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(settings)))
}

/// 新增或更新设置
///
/// PUT /api/admin/settings/{key}
pub async fn upsert_setting(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingRequest>,
) -> Result<Json<ApiResponse<SettingRecord>>> {
    let key = key.trim();
    if key.is_empty() || key.len() > 100 {
        return Err(ApiError::Validation("设置键长度必须在 1-100 之间".to_string()));
    }

    let setting: SettingRecord = sqlx::query_as(
        r#"
        INSERT INTO system_settings (key, value, description, updated_by, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (key) DO UPDATE SET
            value = EXCLUDED.value,
            description = COALESCE(EXCLUDED.description, system_settings.description),
            updated_by = EXCLUDED.updated_by,
            updated_at = NOW()
        RETURNING key, value, description, updated_by, updated_at
        "#,
    )
    .bind(key)
    .bind(&req.value)
    .bind(&req.description)
    .bind(admin.id()?)
    .fetch_one(&state.pool)
    .await?;

    info!(key = key, "System setting updated");
    Ok(Json(ApiResponse::success(setting)))
}

/// 发送系统公告给所有有效用户
///
/// POST /api/admin/system-announcement
pub async fn system_announcement(
    State(state): State<AppState>,
    Json(req): Json<SystemAnnouncementRequest>,
) -> Result<Json<ApiResponse<CountResponse>>> {
    req.validate()?;

    let notice = NewNotification::new(
        NotificationType::SystemAnnouncement,
        req.title.trim(),
        req.content,
    );
    let sent = notification::notify_all_users(&state.pool, &notice).await?;

    info!(recipients = sent, "System announcement sent");
    Ok(Json(ApiResponse::success_with_message(
        CountResponse { count: sent as i64 },
        "系统公告已发送",
    )))
}

/// 每间寺庙只能有一位主持管理员
async fn ensure_no_owner(pool: &PgPool, temple_id: i64) -> Result<()> {
    let has_owner: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM temple_admin_users WHERE temple_id = $1 AND role = 'owner')",
    )
    .bind(temple_id)
    .fetch_one(pool)
    .await?;

    if has_owner {
        return Err(ApiError::BadRequest("此寺庙已有主持管理员".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_points_requires_reason() {
        let req = AdjustPointsRequest {
            adjustment: 100,
            reason: String::new(),
        };
        assert!(req.validate().is_err());

        let req = AdjustPointsRequest {
            adjustment: -50,
            reason: "活动补偿撤回".to_string(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_super_admin_password_length() {
        let req = CreateSuperAdminRequest {
            name: "管理员".to_string(),
            email: "root@temple.tw".to_string(),
            password: "short".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_log_filter_deserialize() {
        let filter: LogFilter = serde_json::from_str(
            r#"{"actorType":"temple_admin","module":"products","startTime":"2025-01-01"}"#,
        )
        .unwrap();
        assert_eq!(filter.actor_type.as_deref(), Some("temple_admin"));
        assert_eq!(filter.module.as_deref(), Some("products"));
        assert!(filter.end_time.is_none());
    }
}
