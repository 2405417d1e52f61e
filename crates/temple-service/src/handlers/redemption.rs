//! 兑换订单处理器
//!
//! 下单、取消与状态流转的事务逻辑在 [`crate::service::redemption`]。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use validator::Validate;

use crate::auth::{AuthUser, TempleScope};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::{RedemptionStatus, TemplePermission};
use crate::service::redemption::{
    self, REDEMPTION_SELECT, RedeemCommand, RedemptionRecord, StatusUpdate,
};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRedemptionRequest {
    pub product_id: i64,
    #[validate(range(min = 1, max = 99, message = "兑换数量必须在 1-99 之间"))]
    pub quantity: Option<i32>,
    pub address_id: i64,
    #[validate(length(max = 500, message = "备注最多 500 个字符"))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResponse {
    pub redemption: RedemptionRecord,
    pub remaining_points: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionFilter {
    pub status: Option<RedemptionStatus>,
    pub user_id: Option<i64>,
    pub temple_id: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: RedemptionStatus,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionStats {
    pub total_redemptions: i64,
    pub total_points_used: i64,
    pub by_status: Vec<StatusCount>,
    pub recent: Vec<RedemptionRecord>,
}

/// 后台更新订单请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: Option<RedemptionStatus>,
    #[validate(length(max = 100, message = "物流单号最多 100 个字符"))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 50, message = "配送方式最多 50 个字符"))]
    pub shipping_method: Option<String>,
    pub admin_notes: Option<String>,
}

impl From<UpdateStatusRequest> for StatusUpdate {
    fn from(req: UpdateStatusRequest) -> Self {
        Self {
            status: req.status,
            tracking_number: req.tracking_number,
            shipping_method: req.shipping_method,
            admin_notes: req.admin_notes,
        }
    }
}

// ============================================
// 用户接口
// ============================================

/// 兑换商品
///
/// POST /api/redemptions
pub async fn create_redemption(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateRedemptionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RedemptionResponse>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let cmd = RedeemCommand {
        product_id: req.product_id,
        quantity: req.quantity.unwrap_or(1),
        address_id: req.address_id,
        notes: req.notes,
    };

    let mut tx = state.pool.begin().await?;
    let (record, remaining) = redemption::create_redemption(&mut *tx, user_id, &cmd).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            RedemptionResponse {
                redemption: record,
                remaining_points: remaining,
            },
            "兑换成功",
        )),
    ))
}

/// 我的订单
///
/// GET /api/redemptions
pub async fn list_redemptions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<RedemptionFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<RedemptionRecord>>>> {
    let user_id = user.public_user_id()?;
    let filter = RedemptionFilter {
        user_id: Some(user_id),
        temple_id: None,
        ..filter
    };
    let page = query_redemptions(&state.pool, &filter, &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 订单详情
///
/// GET /api/redemptions/{id}
pub async fn get_redemption(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    let user_id = user.public_user_id()?;

    let mut conn = state.pool.acquire().await?;
    let record = redemption::fetch_redemption(&mut *conn, id).await?;
    if record.user_id != user_id {
        return Err(ApiError::Forbidden("无权查看此订单".to_string()));
    }

    Ok(Json(ApiResponse::success(record)))
}

/// 取消订单
///
/// POST /api/redemptions/{id}/cancel
pub async fn cancel_redemption(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RedemptionResponse>>> {
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    let (record, balance) = redemption::cancel_by_user(&mut *tx, user_id, id).await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success_with_message(
        RedemptionResponse {
            redemption: record,
            remaining_points: balance,
        },
        "订单已取消，功德值已退还",
    )))
}

/// 我的兑换统计
///
/// GET /api/redemptions/stats
pub async fn redemption_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<RedemptionStats>>> {
    let user_id = user.public_user_id()?;

    let (total_redemptions, total_points_used): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(merit_points_used) FILTER (WHERE status <> 'cancelled'), 0)::BIGINT
        FROM redemptions
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    let by_status: Vec<StatusCount> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count FROM redemptions WHERE user_id = $1 GROUP BY status ORDER BY status",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    let sql = format!("{REDEMPTION_SELECT} WHERE r.user_id = $1 ORDER BY r.redeemed_at DESC LIMIT 5");
    let recent: Vec<RedemptionRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(RedemptionStats {
        total_redemptions,
        total_points_used,
        by_status,
        recent,
    })))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙订单
///
/// GET /api/temple-admin/temples/{id}/orders
pub async fn staff_list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(filter): Query<RedemptionFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<RedemptionRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageOrders)?;

    let filter = RedemptionFilter {
        temple_id: Some(temple_id),
        ..filter
    };
    let page = query_redemptions(&state.pool, &filter, &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 寺庙订单详情
///
/// GET /api/temple-admin/temples/{id}/orders/{order_id}
pub async fn staff_get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, order_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageOrders)?;

    let mut conn = state.pool.acquire().await?;
    let record = redemption::fetch_redemption(&mut *conn, order_id).await?;
    if record.temple_id != Some(temple_id) {
        return Err(ApiError::Forbidden("此订单不属于您的寺庙".to_string()));
    }

    Ok(Json(ApiResponse::success(record)))
}

/// 更新寺庙订单状态
///
/// PUT /api/temple-admin/temples/{id}/orders/{order_id}/status
pub async fn staff_update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, order_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageOrders)?;
    req.validate()?;

    let update = StatusUpdate::from(req);
    let mut tx = state.pool.begin().await?;
    let record = redemption::update_by_admin(&mut *tx, order_id, &update, Some(temple_id)).await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(record)))
}

// ============================================
// 总后台
// ============================================

/// 全部订单
///
/// GET /api/admin/redemptions
pub async fn admin_list_redemptions(
    State(state): State<AppState>,
    Query(filter): Query<RedemptionFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<RedemptionRecord>>>> {
    let page = query_redemptions(&state.pool, &filter, &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 更新订单状态
///
/// PUT /api/admin/redemptions/{id}/status
pub async fn admin_update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<RedemptionRecord>>> {
    req.validate()?;

    let update = StatusUpdate::from(req);
    let mut tx = state.pool.begin().await?;
    let record = redemption::update_by_admin(&mut *tx, id, &update, None).await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(record)))
}

async fn query_redemptions(
    pool: &PgPool,
    filter: &RedemptionFilter,
    pagination: &PaginationParams,
) -> Result<PageResponse<RedemptionRecord>> {
    let where_clause = r#"
        WHERE ($1::VARCHAR IS NULL OR r.status = $1)
          AND ($2::BIGINT IS NULL OR r.user_id = $2)
          AND ($3::BIGINT IS NULL OR r.temple_id = $3)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM redemptions r {where_clause}"))
            .bind(filter.status)
            .bind(filter.user_id)
            .bind(filter.temple_id)
            .fetch_one(pool)
            .await?;

    if total == 0 {
        return Ok(PageResponse::empty(pagination.page(), pagination.limit()));
    }

    let sql = format!(
        "{REDEMPTION_SELECT} {where_clause} ORDER BY r.redeemed_at DESC, r.id DESC LIMIT $4 OFFSET $5"
    );
    let items: Vec<RedemptionRecord> = sqlx::query_as(&sql)
        .bind(filter.status)
        .bind(filter.user_id)
        .bind(filter.temple_id)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_bounds() {
        let req: CreateRedemptionRequest =
            serde_json::from_str(r#"{"productId":1,"addressId":2,"quantity":100}"#).unwrap();
        assert!(req.validate().is_err());

        let req: CreateRedemptionRequest =
            serde_json::from_str(r#"{"productId":1,"addressId":2}"#).unwrap();
        assert!(req.validate().is_ok());
        assert!(req.quantity.is_none());
    }

    #[test]
    fn test_status_update_conversion() {
        let req: UpdateStatusRequest = serde_json::from_str(
            r#"{"status":"shipped","trackingNumber":"SF123","shippingMethod":"宅配"}"#,
        )
        .unwrap();
        let update = StatusUpdate::from(req);
        assert_eq!(update.status, Some(RedemptionStatus::Shipped));
        assert_eq!(update.tracking_number.as_deref(), Some("SF123"));
        assert!(update.admin_notes.is_none());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result: std::result::Result<UpdateStatusRequest, _> =
            serde_json::from_str(r#"{"status":"lost"}"#);
        assert!(result.is_err());
    }
}
