//! 功德商品处理器

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, types::Json as DbJson};
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, TempleScope};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::TemplePermission;
use crate::state::AppState;

/// 商品记录
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: i64,
    pub temple_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub merit_points: i64,
    pub stock_quantity: i32,
    pub low_stock_threshold: i32,
    pub image_url: Option<String>,
    pub images: DbJson<Vec<String>>,
    pub is_active: bool,
    pub is_featured: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PRODUCT_COLUMNS: &str = "id, temple_id, name, description, category, merit_points, \
     stock_quantity, low_stock_threshold, image_url, images, is_active, is_featured, sort_order, \
     created_at, updated_at";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category: Option<String>,
    pub temple_id: Option<i64>,
    pub featured: Option<bool>,
    pub search: Option<String>,
    pub min_points: Option<i64>,
    pub max_points: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub product_count: i64,
}

/// 创建商品请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    /// 仅总后台使用，空值为全站商品
    pub temple_id: Option<i64>,
    #[validate(length(min = 1, max = 100, message = "商品名称长度必须在 1-100 之间"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50, message = "分类长度必须在 1-50 之间"))]
    pub category: Option<String>,
    #[validate(range(min = 1, message = "所需功德值必须大于 0"))]
    pub merit_points: i64,
    #[validate(range(min = 0, message = "库存不能为负数"))]
    pub stock_quantity: Option<i32>,
    #[validate(range(min = 0, message = "低库存阈值不能为负数"))]
    pub low_stock_threshold: Option<i32>,
    #[validate(url(message = "图片地址格式不正确"))]
    pub image_url: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub sort_order: Option<i32>,
}

/// 更新商品请求，未提供的字段保持不变
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 100, message = "商品名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50, message = "分类长度必须在 1-50 之间"))]
    pub category: Option<String>,
    #[validate(range(min = 1, message = "所需功德值必须大于 0"))]
    pub merit_points: Option<i64>,
    #[validate(range(min = 0, message = "库存不能为负数"))]
    pub stock_quantity: Option<i32>,
    #[validate(range(min = 0, message = "低库存阈值不能为负数"))]
    pub low_stock_threshold: Option<i32>,
    #[validate(url(message = "图片地址格式不正确"))]
    pub image_url: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub sort_order: Option<i32>,
}

// ============================================
// 公开接口
// ============================================

/// 商品列表
///
/// GET /api/products
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<ProductRecord>>>> {
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let where_clause = r#"
        WHERE is_active = TRUE
          AND ($1::VARCHAR IS NULL OR category = $1)
          AND ($2::BIGINT IS NULL OR temple_id = $2)
          AND ($3::BOOLEAN IS NULL OR is_featured = $3)
          AND ($4::VARCHAR IS NULL OR name ILIKE $4 OR description ILIKE $4)
          AND ($5::BIGINT IS NULL OR merit_points >= $5)
          AND ($6::BIGINT IS NULL OR merit_points <= $6)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products {where_clause}"))
        .bind(&filter.category)
        .bind(filter.temple_id)
        .bind(filter.featured)
        .bind(&search)
        .bind(filter.min_points)
        .bind(filter.max_points)
        .fetch_one(&state.pool)
        .await?;

    let sql = format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        {where_clause}
        ORDER BY is_featured DESC, sort_order ASC, created_at DESC
        LIMIT $7 OFFSET $8
        "#
    );
    let items: Vec<ProductRecord> = sqlx::query_as(&sql)
        .bind(&filter.category)
        .bind(filter.temple_id)
        .bind(filter.featured)
        .bind(&search)
        .bind(filter.min_points)
        .bind(filter.max_points)
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

/// 商品详情，停用商品视为不存在
///
/// GET /api/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ProductRecord>>> {
    let product = fetch_product(&state.pool, id).await?;
    if !product.is_active {
        return Err(ApiError::ProductNotFound(id));
    }
    Ok(Json(ApiResponse::success(product)))
}

/// 商品分类
///
/// GET /api/products/categories
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<CategoryCount>>>> {
    let categories: Vec<CategoryCount> = sqlx::query_as(
        r#"
        SELECT category, COUNT(*) AS product_count
        FROM products
        WHERE is_active = TRUE
        GROUP BY category
        ORDER BY product_count DESC, category
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(categories)))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙商品（含停用）
///
/// GET /api/temple-admin/temples/{id}/products
pub async fn staff_list_products(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<ProductRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageProducts)?;
    let page = query_products(&state.pool, Some(temple_id), &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 新增寺庙商品
///
/// POST /api/temple-admin/temples/{id}/products
pub async fn staff_create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductRecord>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageProducts)?;
    req.validate()?;

    let product = insert_product(&state.pool, Some(temple_id), &req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(product))))
}

/// 更新寺庙商品
///
/// PUT /api/temple-admin/temples/{id}/products/{product_id}
pub async fn staff_update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, product_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageProducts)?;
    req.validate()?;

    fetch_scoped(&state.pool, product_id, temple_id).await?;
    let product = update_product(&state.pool, product_id, &req).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// 删除寺庙商品
///
/// DELETE /api/temple-admin/temples/{id}/products/{product_id}
pub async fn staff_delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, product_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<()>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageProducts)?;
    fetch_scoped(&state.pool, product_id, temple_id).await?;
    remove_product(&state.pool, product_id).await
}

/// 低库存商品
///
/// GET /api/temple-admin/temples/{id}/products/low-stock
pub async fn low_stock_products(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ProductRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;

    let sql = format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE temple_id = $1 AND is_active = TRUE AND stock_quantity <= low_stock_threshold
        ORDER BY stock_quantity ASC, id
        "#
    );
    let products: Vec<ProductRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(products)))
}

// ============================================
// 总后台
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminProductFilter {
    pub temple_id: Option<i64>,
}

/// 全部商品
///
/// GET /api/admin/products
pub async fn admin_list_products(
    State(state): State<AppState>,
    Query(filter): Query<AdminProductFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<ProductRecord>>>> {
    let page = query_products(&state.pool, filter.temple_id, &pagination).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// 新增商品
///
/// POST /api/admin/products
pub async fn admin_create_product(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductRecord>>)> {
    req.validate()?;
    if let Some(temple_id) = req.temple_id {
        super::temple::fetch_temple(&state.pool, temple_id).await?;
    }

    let product = insert_product(&state.pool, req.temple_id, &req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(product))))
}

/// 更新商品
///
/// PUT /api/admin/products/{id}
pub async fn admin_update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductRecord>>> {
    req.validate()?;
    let product = update_product(&state.pool, id, &req).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// 删除商品
///
/// DELETE /api/admin/products/{id}
pub async fn admin_delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    fetch_product(&state.pool, id).await?;
    remove_product(&state.pool, id).await
}

// ============================================
// 内部函数
// ============================================

async fn fetch_product(pool: &PgPool, id: i64) -> Result<ProductRecord> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::ProductNotFound(id))
}

async fn fetch_scoped(pool: &PgPool, id: i64, temple_id: i64) -> Result<ProductRecord> {
    let product = fetch_product(pool, id).await?;
    if product.temple_id != Some(temple_id) {
        return Err(ApiError::Forbidden("此商品不属于您的寺庙".to_string()));
    }
    Ok(product)
}

async fn query_products(
    pool: &PgPool,
    temple_id: Option<i64>,
    pagination: &PaginationParams,
) -> Result<PageResponse<ProductRecord>> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM products WHERE ($1::BIGINT IS NULL OR temple_id = $1)",
    )
    .bind(temple_id)
    .fetch_one(pool)
    .await?;

    let sql = format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE ($1::BIGINT IS NULL OR temple_id = $1)
        ORDER BY sort_order ASC, created_at DESC
        LIMIT $2 OFFSET $3
        "#
    );
    let items: Vec<ProductRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
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

async fn insert_product(
    pool: &PgPool,
    temple_id: Option<i64>,
    req: &CreateProductRequest,
) -> Result<ProductRecord> {
    let sql = format!(
        r#"
        INSERT INTO products
            (temple_id, name, description, category, merit_points, stock_quantity,
             low_stock_threshold, image_url, images, is_active, is_featured, sort_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let product: ProductRecord = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(req.category.as_deref().unwrap_or("other"))
        .bind(req.merit_points)
        .bind(req.stock_quantity.unwrap_or(0))
        .bind(req.low_stock_threshold.unwrap_or(5))
        .bind(&req.image_url)
        .bind(DbJson(req.images.clone().unwrap_or_default()))
        .bind(req.is_active.unwrap_or(true))
        .bind(req.is_featured.unwrap_or(false))
        .bind(req.sort_order.unwrap_or(0))
        .fetch_one(pool)
        .await?;

    info!(product_id = product.id, temple_id = ?temple_id, "Product created");
    Ok(product)
}

async fn update_product(pool: &PgPool, id: i64, req: &UpdateProductRequest) -> Result<ProductRecord> {
    let sql = format!(
        r#"
        UPDATE products SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            category = COALESCE($4, category),
            merit_points = COALESCE($5, merit_points),
            stock_quantity = COALESCE($6, stock_quantity),
            low_stock_threshold = COALESCE($7, low_stock_threshold),
            image_url = COALESCE($8, image_url),
            images = COALESCE($9, images),
            is_active = COALESCE($10, is_active),
            is_featured = COALESCE($11, is_featured),
            sort_order = COALESCE($12, sort_order),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let product: ProductRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(&req.category)
        .bind(req.merit_points)
        .bind(req.stock_quantity)
        .bind(req.low_stock_threshold)
        .bind(&req.image_url)
        .bind(req.images.clone().map(DbJson))
        .bind(req.is_active)
        .bind(req.is_featured)
        .bind(req.sort_order)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::ProductNotFound(id))?;

    info!(product_id = id, "Product updated");
    Ok(product)
}

/// 已有订单引用时停用，否则直接删除
async fn remove_product(pool: &PgPool, id: i64) -> Result<Json<ApiResponse<()>>> {
    let referenced: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM redemptions WHERE product_id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;

    if referenced {
        sqlx::query("UPDATE products SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        info!(product_id = id, "Product deactivated");
        return Ok(Json(ApiResponse::success_with_message((), "商品已有兑换记录，已改为下架")));
    }

    sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    info!(product_id = id, "Product deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let req: CreateProductRequest = serde_json::from_str(
            r#"{"name":"平安符","meritPoints":0,"stockQuantity":10}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateProductRequest = serde_json::from_str(
            r#"{"name":"平安符","meritPoints":100,"stockQuantity":-1}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateProductRequest = serde_json::from_str(
            r#"{"name":"平安符","meritPoints":100,"imageUrl":"https://cdn.example.com/a.png"}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_update_request_partial() {
        let req: UpdateProductRequest = serde_json::from_str(r#"{"stockQuantity":3}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.stock_quantity, Some(3));
        assert!(req.name.is_none());
    }

    #[test]
    fn test_filter_deserialize() {
        let filter: ProductFilter =
            serde_json::from_str(r#"{"minPoints":10,"maxPoints":500,"featured":true}"#).unwrap();
        assert_eq!(filter.min_points, Some(10));
        assert_eq!(filter.max_points, Some(500));
        assert_eq!(filter.featured, Some(true));
    }
}
