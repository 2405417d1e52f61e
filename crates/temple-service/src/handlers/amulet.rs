//! 护身符与能量处理器
//!
//! 所有操作限定为本人的护身符，他人的护身符一律视为不存在

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use validator::Validate;

use crate::auth::AuthUser;
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::{AMULET_COLUMNS, AmuletRecord, AmuletStatus, EnergyReason};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAmuletRequest {
    #[validate(length(min = 1, max = 100, message = "护身符名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    #[validate(range(min = 0, message = "初始能量不能为负数"))]
    pub energy: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAmuletRequest {
    #[validate(length(min = 1, max = 100, message = "护身符名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    pub status: Option<AmuletStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeEnergyRequest {
    #[validate(range(min = 1, message = "消耗能量必须大于 0"))]
    pub amount: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddEnergyRequest {
    #[validate(range(min = 1, max = 10000, message = "充能数值必须在 1-10000 之间"))]
    pub amount: i32,
}

/// 能量变动记录
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnergyLogEntry {
    pub id: i64,
    pub amulet_id: i64,
    pub delta: i32,
    pub reason: EnergyReason,
    pub created_at: DateTime<Utc>,
}

/// 创建护身符
///
/// POST /api/amulets
pub async fn create_amulet(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateAmuletRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AmuletRecord>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("平安护身符");
    let energy = req.energy.unwrap_or(0);

    let mut tx = state.pool.begin().await?;

    let sql = format!(
        "INSERT INTO amulets (user_id, name, energy) VALUES ($1, $2, $3) RETURNING {AMULET_COLUMNS}"
    );
    let amulet: AmuletRecord = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(name)
        .bind(energy)
        .fetch_one(&mut *tx)
        .await?;

    if energy > 0 {
        sqlx::query(
            "INSERT INTO energy_logs (user_id, amulet_id, delta, reason) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(amulet.id)
        .bind(energy)
        .bind(EnergyReason::Manual)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(amulet_id = amulet.id, user_id = user_id, "Amulet created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(amulet))))
}

/// 我的护身符
///
/// GET /api/amulets
pub async fn list_amulets(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<AmuletRecord>>>> {
    let user_id = user.public_user_id()?;

    let sql = format!("SELECT {AMULET_COLUMNS} FROM amulets WHERE user_id = $1 ORDER BY created_at DESC");
    let amulets: Vec<AmuletRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(amulets)))
}

/// 护身符详情
///
/// GET /api/amulets/{id}
pub async fn get_amulet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AmuletRecord>>> {
    let user_id = user.public_user_id()?;
    let amulet = fetch_owned(&state.pool, user_id, id).await?;
    Ok(Json(ApiResponse::success(amulet)))
}

/// 更新护身符名称或状态
///
/// PATCH /api/amulets/{id}
pub async fn update_amulet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAmuletRequest>,
) -> Result<Json<ApiResponse<AmuletRecord>>> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let sql = format!(
        r#"
        UPDATE amulets SET
            name = COALESCE($3, name),
            status = COALESCE($4, status),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING {AMULET_COLUMNS}
        "#
    );
    let amulet: AmuletRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.status)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::AmuletNotFound(id))?;

    Ok(Json(ApiResponse::success(amulet)))
}

/// 删除护身符，已有的签到记录保留
///
/// DELETE /api/amulets/{id}
pub async fn delete_amulet(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let user_id = user.public_user_id()?;

    let result = sqlx::query("DELETE FROM amulets WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::AmuletNotFound(id));
    }

    info!(amulet_id = id, user_id = user_id, "Amulet deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 能量变动记录
///
/// GET /api/amulets/{id}/energy-logs
pub async fn energy_logs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<EnergyLogEntry>>>> {
    let user_id = user.public_user_id()?;
    fetch_owned(&state.pool, user_id, id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM energy_logs WHERE amulet_id = $1")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;

    let items: Vec<EnergyLogEntry> = sqlx::query_as(
        r#"
        SELECT id, amulet_id, delta, reason, created_at
        FROM energy_logs
        WHERE amulet_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(id)
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

/// 消耗能量
///
/// POST /api/amulets/{id}/energy/consume
pub async fn consume_energy(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ConsumeEnergyRequest>,
) -> Result<Json<ApiResponse<AmuletRecord>>> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;

    let sql = format!("SELECT {AMULET_COLUMNS} FROM amulets WHERE id = $1 AND user_id = $2 FOR UPDATE");
    let amulet: AmuletRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::AmuletNotFound(id))?;

    if amulet.energy < req.amount {
        return Err(ApiError::InsufficientEnergy {
            current: amulet.energy,
        });
    }

    let sql = format!(
        "UPDATE amulets SET energy = energy - $2, updated_at = NOW() WHERE id = $1 RETURNING {AMULET_COLUMNS}"
    );
    let amulet: AmuletRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.amount)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO energy_logs (user_id, amulet_id, delta, reason) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(id)
    .bind(-req.amount)
    .bind(EnergyReason::Consume)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(amulet_id = id, amount = req.amount, energy = amulet.energy, "Energy consumed");
    Ok(Json(ApiResponse::success(amulet)))
}

/// 手动充能
///
/// POST /api/amulets/{id}/energy/add
pub async fn add_energy(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddEnergyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AmuletRecord>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;

    let sql = format!(
        "UPDATE amulets SET energy = energy + $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING {AMULET_COLUMNS}"
    );
    let amulet: AmuletRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id)
        .bind(req.amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::AmuletNotFound(id))?;

    sqlx::query(
        "INSERT INTO energy_logs (user_id, amulet_id, delta, reason) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(id)
    .bind(req.amount)
    .bind(EnergyReason::Manual)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(amulet_id = id, amount = req.amount, energy = amulet.energy, "Energy added");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(amulet, "充能成功")),
    ))
}

async fn fetch_owned(pool: &PgPool, user_id: i64, id: i64) -> Result<AmuletRecord> {
    let sql = format!("SELECT {AMULET_COLUMNS} FROM amulets WHERE id = $1 AND user_id = $2");
    sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::AmuletNotFound(id))
}
