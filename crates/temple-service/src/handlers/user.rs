//! 一般用户个人资料处理器

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, hash_password, verify_password};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::{PUBLIC_USER_COLUMNS, PointKind, PublicUserRecord};
use crate::state::AppState;

/// 个人资料与统计
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: PublicUserRecord,
    pub amulet_count: i64,
    pub checkin_count: i64,
    pub redemption_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 100, message = "姓名长度必须在 2-100 之间"))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "请输入目前的密码"))]
    pub old_password: String,
    #[validate(length(min = 6, max = 100, message = "新密码至少需要 6 个字符"))]
    pub new_password: String,
}

/// 功德值流水
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointLedgerEntry {
    pub id: i64,
    pub delta: i64,
    pub balance_after: i64,
    pub kind: PointKind,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ProfileCounts {
    amulet_count: i64,
    checkin_count: i64,
    redemption_count: i64,
}

/// 获取个人资料
///
/// GET /api/users/profile
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let user_id = user.public_user_id()?;

    let sql = format!("SELECT {PUBLIC_USER_COLUMNS} FROM public_users WHERE id = $1");
    let record: PublicUserRecord = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(user_id))?;

    let counts: ProfileCounts = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM amulets WHERE user_id = $1) AS amulet_count,
            (SELECT COUNT(*) FROM checkins WHERE user_id = $1) AS checkin_count,
            (SELECT COUNT(*) FROM redemptions WHERE user_id = $1) AS redemption_count
        "#,
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(ProfileResponse {
        user: record,
        amulet_count: counts.amulet_count,
        checkin_count: counts.checkin_count,
        redemption_count: counts.redemption_count,
    })))
}

/// 更新个人资料
///
/// PUT /api/users/profile
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<PublicUserRecord>>> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let sql = format!(
        "UPDATE public_users SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING {PUBLIC_USER_COLUMNS}"
    );
    let record: PublicUserRecord = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(req.name.trim())
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(user_id))?;

    Ok(Json(ApiResponse::success(record)))
}

/// 修改密码
///
/// PUT /api/users/password
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    if req.old_password == req.new_password {
        return Err(ApiError::BadRequest("新密码不能与目前的密码相同".to_string()));
    }

    let hash: String = sqlx::query_scalar("SELECT password_hash FROM public_users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(user_id))?;

    if !verify_password(&req.old_password, &hash)? {
        return Err(ApiError::Unauthorized("目前的密码不正确".to_string()));
    }

    sqlx::query("UPDATE public_users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(hash_password(&req.new_password)?)
        .execute(&state.pool)
        .await?;

    info!(user_id = user_id, "Password changed");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 功德值流水
///
/// GET /api/users/points-history
pub async fn points_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<PointLedgerEntry>>>> {
    let user_id = user.public_user_id()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM point_ledger WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;

    if total == 0 {
        return Ok(Json(ApiResponse::success(PageResponse::empty(
            pagination.page(),
            pagination.limit(),
        ))));
    }

    let items: Vec<PointLedgerEntry> = sqlx::query_as(
        r#"
        SELECT id, delta, balance_after, kind, reference_type, reference_id, note, created_at
        FROM point_ledger
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
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
