//! 寺庙后台：所属寺庙、人员管理与营运数据

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use validator::Validate;

use super::temple::{TempleAdminDetail, fetch_temple};
use crate::auth::{AuthUser, TempleScope, hash_password};
use crate::dto::{
    ApiResponse, PageResponse, PaginationParams, end_of_day_exclusive, parse_optional_date,
};
use crate::error::{ApiError, Result};
use crate::models::{
    AccountType, CHECKIN_COLUMNS, CheckinRecord, RedemptionStatus, TEMPLE_ADMIN_COLUMNS,
    TempleAdminRecord, TempleAdminRole, TempleAdminView, TemplePermission,
};
use crate::service::account::map_email_conflict;
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyTempleResponse {
    pub temple: TempleAdminDetail,
    pub account: TempleAdminView,
}

/// 新增寺庙管理员
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateStaffRequest {
    /// 仅总后台使用
    pub temple_id: Option<i64>,
    #[validate(length(min = 2, max = 100, message = "姓名长度必须在 2-100 之间"))]
    pub name: String,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 6, max = 100, message = "密码至少需要 6 个字符"))]
    pub password: String,
    pub role: TempleAdminRole,
    /// 按权限名覆盖角色默认值
    pub permissions: Option<HashMap<String, bool>>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStaffRequest {
    #[validate(length(min = 2, max = 100, message = "姓名长度必须在 2-100 之间"))]
    pub name: Option<String>,
    pub role: Option<TempleAdminRole>,
    pub permissions: Option<HashMap<String, bool>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TempleCheckinItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub checkin: CheckinRecord,
    pub user_name: String,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusCount {
    pub status: RedemptionStatus,
    pub count: i64,
}

#[derive(Debug, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckinTotals {
    pub total_checkins: i64,
    pub today_checkins: i64,
    pub month_checkins: i64,
    pub unique_visitors: i64,
    pub checkin_points: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleStats {
    #[serde(flatten)]
    pub checkins: CheckinTotals,
    pub reward_points: i64,
    pub points_issued: i64,
    pub orders_by_status: Vec<OrderStatusCount>,
    pub points_redeemed: i64,
}

/// 权限覆盖转为存储用的 JSON 对象，未知权限名拒绝
pub(crate) fn permission_overrides(
    permissions: Option<&HashMap<String, bool>>,
) -> Result<Option<serde_json::Value>> {
    let Some(permissions) = permissions else {
        return Ok(None);
    };

    let mut map = serde_json::Map::new();
    for (name, granted) in permissions {
        if TemplePermission::parse(name).is_none() {
            return Err(ApiError::Validation(format!("未知的权限: {name}")));
        }
        map.insert(name.clone(), serde_json::Value::Bool(*granted));
    }
    Ok(Some(serde_json::Value::Object(map)))
}

/// 人员变更规则
///
/// 寺庙管理员不能任命主持，也不能修改主持账号；任何人都不能降级或停用自己。
fn check_staff_change(
    actor: &AuthUser,
    target: &TempleAdminRecord,
    role: Option<TempleAdminRole>,
    is_active: Option<bool>,
) -> Result<()> {
    let is_self = actor.claims().is(AccountType::TempleAdmin) && actor.id()? == target.id;
    if is_self {
        if role.is_some_and(|r| r != target.role) {
            return Err(ApiError::BadRequest("不能变更自己的角色".to_string()));
        }
        if is_active == Some(false) {
            return Err(ApiError::BadRequest("不能停用自己的账号".to_string()));
        }
        return Ok(());
    }

    if actor.claims().is(AccountType::SuperAdmin) {
        return Ok(());
    }
    if target.role == TempleAdminRole::Owner {
        return Err(ApiError::Forbidden("无法修改主持管理员".to_string()));
    }
    if role == Some(TempleAdminRole::Owner) {
        return Err(ApiError::Forbidden("只有超级管理员可以指派主持".to_string()));
    }
    Ok(())
}

// ============================================
// API 处理器
// ============================================

/// 所属寺庙与自身权限
///
/// GET /api/temple-admin/my-temple
pub async fn my_temple(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<MyTempleResponse>>> {
    if !user.claims().is(AccountType::TempleAdmin) {
        return Err(ApiError::Forbidden("仅限寺庙管理员使用".to_string()));
    }

    let account = fetch_staff(&state.pool, user.id()?).await?;
    let temple = fetch_temple(&state.pool, account.temple_id).await?;

    Ok(Json(ApiResponse::success(MyTempleResponse {
        temple: TempleAdminDetail::from(temple),
        account: TempleAdminView::from(account),
    })))
}

/// 寺庙人员列表
///
/// GET /api/temple-admin/temples/{id}/staff
pub async fn list_staff(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<TempleAdminView>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAdmins)?;

    let staff = query_staff(&state.pool, Some(temple_id)).await?;
    Ok(Json(ApiResponse::success(staff)))
}

/// 新增寺庙人员
///
/// POST /api/temple-admin/temples/{id}/staff
pub async fn create_staff(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TempleAdminView>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAdmins)?;
    req.validate()?;

    if req.role == TempleAdminRole::Owner && !user.claims().is(AccountType::SuperAdmin) {
        return Err(ApiError::Forbidden("只有超级管理员可以指派主持".to_string()));
    }

    let account = insert_temple_admin(&state.pool, temple_id, &req, user.id()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(TempleAdminView::from(account))),
    ))
}

/// 更新寺庙人员
///
/// PUT /api/temple-admin/temples/{id}/staff/{staff_id}
pub async fn update_staff(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, staff_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateStaffRequest>,
) -> Result<Json<ApiResponse<TempleAdminView>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAdmins)?;
    req.validate()?;

    let target = fetch_staff(&state.pool, staff_id).await?;
    if target.temple_id != temple_id {
        return Err(ApiError::Forbidden("此人员不属于您的寺庙".to_string()));
    }
    check_staff_change(&user, &target, req.role, req.is_active)?;

    let account = update_temple_admin(&state.pool, staff_id, &req).await?;
    Ok(Json(ApiResponse::success(TempleAdminView::from(account))))
}

/// 停用寺庙人员
///
/// DELETE /api/temple-admin/temples/{id}/staff/{staff_id}
pub async fn deactivate_staff(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, staff_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<()>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAdmins)?;

    let target = fetch_staff(&state.pool, staff_id).await?;
    if target.temple_id != temple_id {
        return Err(ApiError::Forbidden("此人员不属于您的寺庙".to_string()));
    }
    check_staff_change(&user, &target, None, Some(false))?;

    sqlx::query("UPDATE temple_admin_users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(staff_id)
        .execute(&state.pool)
        .await?;

    info!(staff_id = staff_id, temple_id = temple_id, "Temple staff deactivated");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 寺庙营运数据
///
/// GET /api/temple-admin/temples/{id}/stats
pub async fn temple_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<TempleStats>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;

    let today = Utc::now().date_naive();
    let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);

    let checkins: CheckinTotals = sqlx::query_as(
        r#"
        SELECT COUNT(*) AS total_checkins,
               COUNT(*) FILTER (WHERE checkin_date = $2) AS today_checkins,
               COUNT(*) FILTER (WHERE checkin_date >= $3) AS month_checkins,
               COUNT(DISTINCT user_id) AS unique_visitors,
               COALESCE(SUM(blessing_points), 0)::BIGINT AS checkin_points
        FROM checkins
        WHERE temple_id = $1
        "#,
    )
    .bind(temple_id)
    .bind(today)
    .bind(month_start)
    .fetch_one(&state.pool)
    .await?;

    let reward_points: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(c.points_received), 0)::BIGINT
        FROM reward_claims c
        JOIN checkin_rewards r ON r.id = c.reward_id
        WHERE r.temple_id = $1
        "#,
    )
    .bind(temple_id)
    .fetch_one(&state.pool)
    .await?;

    let orders_by_status: Vec<OrderStatusCount> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count FROM redemptions WHERE temple_id = $1 GROUP BY status ORDER BY status",
    )
    .bind(temple_id)
    .fetch_all(&state.pool)
    .await?;

    let points_redeemed: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(merit_points_used), 0)::BIGINT
        FROM redemptions
        WHERE temple_id = $1 AND status <> 'cancelled'
        "#,
    )
    .bind(temple_id)
    .fetch_one(&state.pool)
    .await?;

    let points_issued = checkins.checkin_points + reward_points;
    Ok(Json(ApiResponse::success(TempleStats {
        checkins,
        reward_points,
        points_issued,
        orders_by_status,
        points_redeemed,
    })))
}

/// 寺庙签到记录
///
/// GET /api/temple-admin/temples/{id}/checkins
pub async fn temple_checkins(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(range): Query<DateRangeQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<TempleCheckinItem>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;

    let start = parse_optional_date("startDate", range.start_date.as_deref())?;
    let end = parse_optional_date("endDate", range.end_date.as_deref())?;
    let start_at = start.map(|d| d.and_time(NaiveTime::MIN).and_utc());
    let end_before = end.map(end_of_day_exclusive);

    let where_clause = r#"
        WHERE c.temple_id = $1
          AND ($2::TIMESTAMPTZ IS NULL OR c.created_at >= $2)
          AND ($3::TIMESTAMPTZ IS NULL OR c.created_at < $3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM checkins c {where_clause}"))
        .bind(temple_id)
        .bind(start_at)
        .bind(end_before)
        .fetch_one(&state.pool)
        .await?;

    let columns = CHECKIN_COLUMNS
        .split(", ")
        .map(|c| format!("c.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r#"
        SELECT {columns}, u.name AS user_name
        FROM checkins c
        JOIN public_users u ON u.id = c.user_id
        {where_clause}
        ORDER BY c.created_at DESC, c.id DESC
        LIMIT $4 OFFSET $5
        "#
    );
    let items: Vec<TempleCheckinItem> = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(start_at)
        .bind(end_before)
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

// ============================================
// 供总后台共用
// ============================================

pub(crate) async fn fetch_staff(pool: &PgPool, id: i64) -> Result<TempleAdminRecord> {
    let sql = format!("SELECT {TEMPLE_ADMIN_COLUMNS} FROM temple_admin_users WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))
}

pub(crate) async fn query_staff(
    pool: &PgPool,
    temple_id: Option<i64>,
) -> Result<Vec<TempleAdminView>> {
    let sql = format!(
        r#"
        SELECT {TEMPLE_ADMIN_COLUMNS} FROM temple_admin_users
        WHERE ($1::BIGINT IS NULL OR temple_id = $1)
        ORDER BY temple_id, CASE role WHEN 'owner' THEN 0 WHEN 'manager' THEN 1 ELSE 2 END, id
        "#
    );
    let accounts: Vec<TempleAdminRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
        .fetch_all(pool)
        .await?;

    Ok(accounts.into_iter().map(TempleAdminView::from).collect())
}

pub(crate) async fn insert_temple_admin(
    pool: &PgPool,
    temple_id: i64,
    req: &CreateStaffRequest,
    created_by: i64,
) -> Result<TempleAdminRecord> {
    let permissions = permission_overrides(req.permissions.as_ref())?;
    let email = req.email.trim().to_lowercase();

    let sql = format!(
        r#"
        INSERT INTO temple_admin_users
            (temple_id, name, email, password_hash, role, permissions, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {TEMPLE_ADMIN_COLUMNS}
        "#
    );
    let account: TempleAdminRecord = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(req.name.trim())
        .bind(&email)
        .bind(hash_password(&req.password)?)
        .bind(req.role)
        .bind(permissions)
        .bind(created_by)
        .fetch_one(pool)
        .await
        .map_err(|e| map_email_conflict(e, AccountType::TempleAdmin))?;

    info!(
        account_id = account.id,
        temple_id = temple_id,
        role = ?account.role,
        "Temple admin created"
    );
    Ok(account)
}

pub(crate) async fn update_temple_admin(
    pool: &PgPool,
    id: i64,
    req: &UpdateStaffRequest,
) -> Result<TempleAdminRecord> {
    let permissions = permission_overrides(req.permissions.as_ref())?;

    let sql = format!(
        r#"
        UPDATE temple_admin_users SET
            name = COALESCE($2, name),
            role = COALESCE($3, role),
            permissions = COALESCE($4, permissions),
            is_active = COALESCE($5, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {TEMPLE_ADMIN_COLUMNS}
        "#
    );
    let account: TempleAdminRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.role)
        .bind(permissions)
        .bind(req.is_active)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))?;

    info!(account_id = id, "Temple admin updated");
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;

    fn actor(account_type: AccountType, id: i64) -> AuthUser {
        AuthUser(Claims {
            sub: id.to_string(),
            name: "actor".to_string(),
            email: "actor@temple.tw".to_string(),
            account_type,
            temple_id: Some(1),
            permissions: vec!["manage_admins".to_string()],
            iat: 0,
            exp: i64::MAX,
            iss: "temple-service".to_string(),
        })
    }

    fn target(id: i64, role: TempleAdminRole) -> TempleAdminRecord {
        let now = Utc::now();
        TempleAdminRecord {
            id,
            temple_id: 1,
            name: "staff".to_string(),
            email: "staff@temple.tw".to_string(),
            role,
            permissions: None,
            is_active: true,
            last_login_at: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_owner_cannot_demote_or_deactivate_self() {
        let owner = actor(AccountType::TempleAdmin, 7);
        let me = target(7, TempleAdminRole::Owner);

        let err = check_staff_change(&owner, &me, Some(TempleAdminRole::Staff), None).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = check_staff_change(&owner, &me, None, Some(false)).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        assert!(check_staff_change(&owner, &me, Some(TempleAdminRole::Owner), Some(true)).is_ok());
    }

    #[test]
    fn test_manager_cannot_touch_owner() {
        let manager = actor(AccountType::TempleAdmin, 8);
        let owner = target(7, TempleAdminRole::Owner);
        assert!(matches!(
            check_staff_change(&manager, &owner, None, Some(false)),
            Err(ApiError::Forbidden(_))
        ));

        let staff = target(9, TempleAdminRole::Staff);
        assert!(matches!(
            check_staff_change(&manager, &staff, Some(TempleAdminRole::Owner), None),
            Err(ApiError::Forbidden(_))
        ));
        assert!(check_staff_change(&manager, &staff, Some(TempleAdminRole::Manager), None).is_ok());
    }

    #[test]
    fn test_super_admin_unrestricted() {
        let admin = actor(AccountType::SuperAdmin, 7);
        let owner = target(7, TempleAdminRole::Owner);
        assert!(check_staff_change(&admin, &owner, Some(TempleAdminRole::Manager), Some(false)).is_ok());
    }

    #[test]
    fn test_permission_overrides() {
        assert_eq!(permission_overrides(None).unwrap(), None);

        let mut perms = HashMap::new();
        perms.insert("manage_products".to_string(), true);
        let value = permission_overrides(Some(&perms)).unwrap().unwrap();
        assert_eq!(value["manage_products"], serde_json::Value::Bool(true));

        perms.insert("launch_rockets".to_string(), true);
        assert!(permission_overrides(Some(&perms)).is_err());
    }
}
