//! 寺庙 API 处理器
//!
//! 公开目录、附近寺庙、个人在寺庙的签到记录，以及总后台与寺庙后台的资料维护

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, MaybeAuthUser, TempleScope};
use crate::dto::{ApiResponse, LimitParams, PageResponse, PaginationParams};
use crate::engine::{self, GeoPoint, geo::round2, qr};
use crate::error::{ApiError, Result, is_unique_violation};
use crate::models::{CHECKIN_COLUMNS, CheckinRecord, TEMPLE_COLUMNS, TempleRecord, TemplePermission};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

/// 寺庙列表过滤
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

/// 寺庙详情
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleDetail {
    #[serde(flatten)]
    pub temple: TempleRecord,
    pub checkin_count: i64,
}

/// 后台可见的寺庙资料（含 NFC UID）
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempleAdminDetail {
    #[serde(flatten)]
    pub temple: TempleRecord,
    pub nfc_uid: Option<String>,
}

impl From<TempleRecord> for TempleAdminDetail {
    fn from(temple: TempleRecord) -> Self {
        let nfc_uid = temple.nfc_uid.clone();
        Self { temple, nfc_uid }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 公里
    pub radius: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyTemple {
    #[serde(flatten)]
    pub temple: TempleRecord,
    pub distance_km: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_today: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyTempleCheckins {
    pub temple_id: i64,
    pub total_checkins: i64,
    pub total_points: i64,
    pub last_checkin_date: Option<NaiveDate>,
    pub checkins: Vec<CheckinRecord>,
}

/// 创建寺庙请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTempleRequest {
    #[validate(length(min = 1, max = 100, message = "寺庙名称长度必须在 1-100 之间"))]
    pub name: String,
    #[validate(length(max = 255))]
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[validate(length(max = 100))]
    pub main_deity: Option<String>,
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(email(message = "Email 格式不正确"))]
    pub email: Option<String>,
    #[validate(url(message = "网址格式不正确"))]
    pub website: Option<String>,
    pub opening_hours: Option<serde_json::Value>,
    #[validate(range(min = 1, max = 100000, message = "签到半径必须在 1-100000 公尺之间"))]
    pub checkin_radius: Option<i32>,
    #[validate(range(min = 0, message = "签到功德值不能为负数"))]
    pub checkin_merit_points: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub nfc_uid: Option<String>,
}

/// 更新寺庙请求，未提供的字段保持不变
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTempleRequest {
    #[validate(length(min = 1, max = 100, message = "寺庙名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[validate(length(max = 100))]
    pub main_deity: Option<String>,
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(email(message = "Email 格式不正确"))]
    pub email: Option<String>,
    #[validate(url(message = "网址格式不正确"))]
    pub website: Option<String>,
    pub opening_hours: Option<serde_json::Value>,
    #[validate(range(min = 1, max = 100000, message = "签到半径必须在 1-100000 公尺之间"))]
    pub checkin_radius: Option<i32>,
    #[validate(range(min = 0, message = "签到功德值不能为负数"))]
    pub checkin_merit_points: Option<i64>,
    /// 仅超级管理员可修改
    #[validate(length(min = 1, max = 64))]
    pub nfc_uid: Option<String>,
    /// 仅超级管理员可修改
    pub is_active: Option<bool>,
}

/// 当日 QR 签到码
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrTokenResponse {
    pub temple_id: i64,
    pub date: NaiveDate,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================
// 公开接口
// ============================================

/// 寺庙列表
///
/// GET /api/temples
pub async fn list_temples(
    State(state): State<AppState>,
    Query(filter): Query<TempleFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<TempleRecord>>>> {
    let is_active = filter.is_active.unwrap_or(true);
    let page = query_temples(&state.pool, filter.search.as_deref(), Some(is_active), &pagination)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 寺庙详情
///
/// GET /api/temples/{id}
pub async fn get_temple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TempleDetail>>> {
    let temple = fetch_temple(&state.pool, id).await?;
    let checkin_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkins WHERE temple_id = $1")
        .bind(id)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(TempleDetail {
        temple,
        checkin_count,
    })))
}

/// 附近寺庙，按距离排序
///
/// GET /api/temples/nearby
pub async fn nearby_temples(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<ApiResponse<Vec<NearbyTemple>>>> {
    let origin = GeoPoint::from_optional(query.latitude, query.longitude)?
        .ok_or_else(|| ApiError::Validation("请提供纬度与经度".to_string()))?;
    let radius_km = query.radius.filter(|r| *r > 0.0).unwrap_or(10.0);
    let limit = LimitParams { limit: query.limit }.resolve(20) as usize;

    let sql = format!(
        "SELECT {TEMPLE_COLUMNS} FROM temples WHERE is_active = TRUE AND latitude IS NOT NULL AND longitude IS NOT NULL"
    );
    let temples: Vec<TempleRecord> = sqlx::query_as(&sql).fetch_all(&state.pool).await?;

    let mut nearby = rank_by_distance(origin, temples, radius_km, limit);

    if let Some(user_id) = viewer.public_user_id() {
        let ids: Vec<i64> = nearby.iter().map(|t| t.temple.id).collect();
        let visited: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT temple_id FROM checkins
            WHERE user_id = $1 AND checkin_date = $2 AND temple_id = ANY($3)
            "#,
        )
        .bind(user_id)
        .bind(Utc::now().date_naive())
        .bind(&ids)
        .fetch_all(&state.pool)
        .await?;

        for item in &mut nearby {
            item.checked_in_today = Some(visited.contains(&item.temple.id));
        }
    }

    Ok(Json(ApiResponse::success(nearby)))
}

/// 在半径内筛选并按距离排序
fn rank_by_distance(
    origin: GeoPoint,
    temples: Vec<TempleRecord>,
    radius_km: f64,
    limit: usize,
) -> Vec<NearbyTemple> {
    let mut ranked: Vec<NearbyTemple> = temples
        .into_iter()
        .filter_map(|temple| {
            let target = GeoPoint {
                latitude: temple.latitude?,
                longitude: temple.longitude?,
            };
            let distance_km = engine::distance_km(origin, target);
            (distance_km <= radius_km).then_some(NearbyTemple {
                temple,
                distance_km: round2(distance_km),
                checked_in_today: None,
            })
        })
        .collect();

    ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    ranked.truncate(limit);
    ranked
}

/// 本人在该寺庙的签到记录
///
/// GET /api/temples/{id}/my-checkins
pub async fn my_temple_checkins(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(limit): Query<LimitParams>,
) -> Result<Json<ApiResponse<MyTempleCheckins>>> {
    let user_id = user.public_user_id()?;
    fetch_temple(&state.pool, temple_id).await?;

    let (total_checkins, total_points, last_checkin_date): (i64, i64, Option<NaiveDate>) =
        sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(blessing_points), 0)::BIGINT, MAX(checkin_date)
            FROM checkins
            WHERE user_id = $1 AND temple_id = $2
            "#,
        )
        .bind(user_id)
        .bind(temple_id)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        r#"
        SELECT {CHECKIN_COLUMNS} FROM checkins
        WHERE user_id = $1 AND temple_id = $2
        ORDER BY created_at DESC
        LIMIT $3
        "#
    );
    let checkins: Vec<CheckinRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(temple_id)
        .bind(limit.resolve(20))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(MyTempleCheckins {
        temple_id,
        total_checkins,
        total_points,
        last_checkin_date,
        checkins,
    })))
}

// ============================================
// 总后台
// ============================================

/// 全部寺庙（含停用）
///
/// GET /api/admin/temples
pub async fn admin_list_temples(
    State(state): State<AppState>,
    Query(filter): Query<TempleFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<TempleAdminDetail>>>> {
    let page =
        query_temples(&state.pool, filter.search.as_deref(), filter.is_active, &pagination).await?;
    Ok(Json(ApiResponse::success(page.map(TempleAdminDetail::from))))
}

/// 创建寺庙
///
/// POST /api/admin/temples
pub async fn create_temple(
    State(state): State<AppState>,
    Json(req): Json<CreateTempleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TempleAdminDetail>>)> {
    req.validate()?;
    let location = GeoPoint::from_optional(req.latitude, req.longitude)?;

    let sql = format!(
        r#"
        INSERT INTO temples
            (name, address, latitude, longitude, main_deity, description, images, phone, email,
             website, opening_hours, checkin_radius, checkin_merit_points, nfc_uid)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {TEMPLE_COLUMNS}
        "#
    );
    let temple: TempleRecord = sqlx::query_as(&sql)
        .bind(req.name.trim())
        .bind(&req.address)
        .bind(location.map(|p| p.latitude))
        .bind(location.map(|p| p.longitude))
        .bind(&req.main_deity)
        .bind(&req.description)
        .bind(json!(req.images.unwrap_or_default()))
        .bind(&req.phone)
        .bind(&req.email)
        .bind(&req.website)
        .bind(&req.opening_hours)
        .bind(req.checkin_radius.unwrap_or(state.checkin.default_radius_meters))
        .bind(req.checkin_merit_points.unwrap_or(state.checkin.default_points))
        .bind(&req.nfc_uid)
        .fetch_one(&state.pool)
        .await
        .map_err(map_nfc_conflict)?;

    info!(temple_id = temple.id, name = %temple.name, "Temple created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(TempleAdminDetail::from(temple))),
    ))
}

/// 更新寺庙（超级管理员）
///
/// PUT /api/admin/temples/{id}
pub async fn admin_update_temple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTempleRequest>,
) -> Result<Json<ApiResponse<TempleAdminDetail>>> {
    req.validate()?;
    let temple = update_temple_row(&state.pool, id, &req).await?;
    Ok(Json(ApiResponse::success(TempleAdminDetail::from(temple))))
}

/// 停用寺庙
///
/// DELETE /api/admin/temples/{id}
pub async fn delete_temple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let result =
        sqlx::query("UPDATE temples SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&state.pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::TempleNotFound(id));
    }

    info!(temple_id = id, "Temple deactivated");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙资料
///
/// GET /api/temple-admin/temples/{id}
pub async fn staff_get_temple(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TempleAdminDetail>>> {
    TempleScope::ensure(user.claims(), id, TemplePermission::ManageInfo)?;
    let temple = fetch_temple(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(TempleAdminDetail::from(temple))))
}

/// 更新寺庙资料，寺庙管理员不能修改 NFC UID 与启用状态
///
/// PUT /api/temple-admin/temples/{id}
pub async fn staff_update_temple(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(mut req): Json<UpdateTempleRequest>,
) -> Result<Json<ApiResponse<TempleAdminDetail>>> {
    TempleScope::ensure(user.claims(), id, TemplePermission::ManageInfo)?;
    req.validate()?;

    req.nfc_uid = None;
    req.is_active = None;

    let temple = update_temple_row(&state.pool, id, &req).await?;
    Ok(Json(ApiResponse::success(TempleAdminDetail::from(temple))))
}

/// 当日 QR 签到码，UTC 零点轮换
///
/// GET /api/temple-admin/temples/{id}/qr-token
pub async fn qr_token(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<QrTokenResponse>>> {
    TempleScope::ensure(user.claims(), id, TemplePermission::ViewStats)?;
    fetch_temple(&state.pool, id).await?;

    let today = Utc::now().date_naive();
    let expires_at = crate::dto::end_of_day_exclusive(today);

    Ok(Json(ApiResponse::success(QrTokenResponse {
        temple_id: id,
        date: today,
        token: qr::checkin_token(state.qr_secret(), id, today),
        expires_at,
    })))
}

// ============================================
// 内部函数
// ============================================

pub(crate) async fn fetch_temple(pool: &PgPool, id: i64) -> Result<TempleRecord> {
    let sql = format!("SELECT {TEMPLE_COLUMNS} FROM temples WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::TempleNotFound(id))
}

async fn query_temples(
    pool: &PgPool,
    search: Option<&str>,
    is_active: Option<bool>,
    pagination: &PaginationParams,
) -> Result<PageResponse<TempleRecord>> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let filter = r#"
        WHERE ($1::TEXT IS NULL OR name ILIKE $1 OR main_deity ILIKE $1 OR address ILIKE $1)
          AND ($2::BOOLEAN IS NULL OR is_active = $2)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM temples {filter}"))
        .bind(&pattern)
        .bind(is_active)
        .fetch_one(pool)
        .await?;

    if total == 0 {
        return Ok(PageResponse::empty(pagination.page(), pagination.limit()));
    }

    let sql = format!(
        "SELECT {TEMPLE_COLUMNS} FROM temples {filter} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
    );
    let items: Vec<TempleRecord> = sqlx::query_as(&sql)
        .bind(&pattern)
        .bind(is_active)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    Ok(PageResponse::new(
        items,
        total,
        pagination.page(),
        pagination.limit(),
    ))
}

async fn update_temple_row(
    pool: &PgPool,
    id: i64,
    req: &UpdateTempleRequest,
) -> Result<TempleRecord> {
    let location = GeoPoint::from_optional(req.latitude, req.longitude)?;

    let sql = format!(
        r#"
        UPDATE temples SET
            name = COALESCE($2, name),
            address = COALESCE($3, address),
            latitude = COALESCE($4, latitude),
            longitude = COALESCE($5, longitude),
            main_deity = COALESCE($6, main_deity),
            description = COALESCE($7, description),
            images = COALESCE($8, images),
            phone = COALESCE($9, phone),
            email = COALESCE($10, email),
            website = COALESCE($11, website),
            opening_hours = COALESCE($12, opening_hours),
            checkin_radius = COALESCE($13, checkin_radius),
            checkin_merit_points = COALESCE($14, checkin_merit_points),
            nfc_uid = COALESCE($15, nfc_uid),
            is_active = COALESCE($16, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {TEMPLE_COLUMNS}
        "#
    );
    let temple: TempleRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.address)
        .bind(location.map(|p| p.latitude))
        .bind(location.map(|p| p.longitude))
        .bind(&req.main_deity)
        .bind(&req.description)
        .bind(req.images.as_ref().map(|images| json!(images)))
        .bind(&req.phone)
        .bind(&req.email)
        .bind(&req.website)
        .bind(&req.opening_hours)
        .bind(req.checkin_radius)
        .bind(req.checkin_merit_points)
        .bind(&req.nfc_uid)
        .bind(req.is_active)
        .fetch_optional(pool)
        .await
        .map_err(map_nfc_conflict)?
        .ok_or(ApiError::TempleNotFound(id))?;

    info!(temple_id = id, "Temple updated");
    Ok(temple)
}

fn map_nfc_conflict(err: sqlx::Error) -> ApiError {
    if is_unique_violation(&err, "temples_nfc_uid_key") {
        ApiError::BadRequest("此 NFC UID 已被使用".to_string())
    } else {
        ApiError::Database(err)
    }
}
