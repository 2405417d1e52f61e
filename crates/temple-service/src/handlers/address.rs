//! 收件地址处理器
//!
//! 每个用户至多一个默认地址。第一个地址自动设为默认；删除默认地址时
//! 由最近新增的地址接替。

use std::sync::LazyLock;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use tracing::info;
use validator::Validate;

use crate::auth::AuthUser;
use crate::dto::ApiResponse;
use crate::error::{ApiError, Result};
use crate::state::AppState;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\- ]{8,20}$").expect("phone pattern compiles"));

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub id: i64,
    pub user_id: i64,
    pub recipient_name: String,
    pub phone: String,
    pub postal_code: Option<String>,
    pub city: String,
    pub district: String,
    pub address: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ADDRESS_COLUMNS: &str = "id, user_id, recipient_name, phone, postal_code, city, district, \
     address, is_default, created_at, updated_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAddressRequest {
    #[validate(length(min = 1, max = 50, message = "收件人姓名长度必须在 1-50 之间"))]
    pub recipient_name: String,
    #[validate(regex(path = *PHONE_PATTERN, message = "电话格式不正确"))]
    pub phone: String,
    #[validate(length(max = 10, message = "邮政编码过长"))]
    pub postal_code: Option<String>,
    #[validate(length(min = 1, max = 50, message = "请填写城市"))]
    pub city: String,
    #[validate(length(min = 1, max = 50, message = "请填写区域"))]
    pub district: String,
    #[validate(length(min = 1, max = 255, message = "请填写详细地址"))]
    pub address: String,
    pub is_default: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAddressRequest {
    #[validate(length(min = 1, max = 50, message = "收件人姓名长度必须在 1-50 之间"))]
    pub recipient_name: Option<String>,
    #[validate(regex(path = *PHONE_PATTERN, message = "电话格式不正确"))]
    pub phone: Option<String>,
    #[validate(length(max = 10, message = "邮政编码过长"))]
    pub postal_code: Option<String>,
    #[validate(length(min = 1, max = 50, message = "请填写城市"))]
    pub city: Option<String>,
    #[validate(length(min = 1, max = 50, message = "请填写区域"))]
    pub district: Option<String>,
    #[validate(length(min = 1, max = 255, message = "请填写详细地址"))]
    pub address: Option<String>,
    pub is_default: Option<bool>,
}

/// 我的地址，默认地址在前
///
/// GET /api/addresses
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Vec<AddressRecord>>>> {
    let user_id = user.public_user_id()?;

    let sql = format!(
        "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 ORDER BY is_default DESC, created_at DESC"
    );
    let addresses: Vec<AddressRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(addresses)))
}

/// 地址详情
///
/// GET /api/addresses/{id}
pub async fn get_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AddressRecord>>> {
    let user_id = user.public_user_id()?;
    let mut conn = state.pool.acquire().await?;
    let address = fetch_owned(&mut *conn, user_id, id).await?;
    Ok(Json(ApiResponse::success(address)))
}

/// 新增地址
///
/// POST /api/addresses
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateAddressRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AddressRecord>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM addresses WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    let is_default = existing == 0 || req.is_default.unwrap_or(false);

    if is_default {
        clear_default(&mut *tx, user_id).await?;
    }

    let sql = format!(
        r#"
        INSERT INTO addresses
            (user_id, recipient_name, phone, postal_code, city, district, address, is_default)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {ADDRESS_COLUMNS}
        "#
    );
    let address: AddressRecord = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(req.recipient_name.trim())
        .bind(req.phone.trim())
        .bind(&req.postal_code)
        .bind(req.city.trim())
        .bind(req.district.trim())
        .bind(req.address.trim())
        .bind(is_default)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(address_id = address.id, user_id = user_id, "Address created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

/// 更新地址
///
/// PUT /api/addresses/{id}
pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAddressRequest>,
) -> Result<Json<ApiResponse<AddressRecord>>> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    fetch_owned(&mut *tx, user_id, id).await?;

    if req.is_default == Some(true) {
        clear_default(&mut *tx, user_id).await?;
    }

    let sql = format!(
        r#"
        UPDATE addresses SET
            recipient_name = COALESCE($2, recipient_name),
            phone = COALESCE($3, phone),
            postal_code = COALESCE($4, postal_code),
            city = COALESCE($5, city),
            district = COALESCE($6, district),
            address = COALESCE($7, address),
            is_default = COALESCE($8, is_default),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ADDRESS_COLUMNS}
        "#
    );
    let address: AddressRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(req.recipient_name.as_deref().map(str::trim))
        .bind(req.phone.as_deref().map(str::trim))
        .bind(&req.postal_code)
        .bind(req.city.as_deref().map(str::trim))
        .bind(req.district.as_deref().map(str::trim))
        .bind(req.address.as_deref().map(str::trim))
        .bind(req.is_default)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Json(ApiResponse::success(address)))
}

/// 删除地址
///
/// DELETE /api/addresses/{id}
pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    let address = fetch_owned(&mut *tx, user_id, id).await?;

    sqlx::query("DELETE FROM addresses WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if address.is_default {
        sqlx::query(
            r#"
            UPDATE addresses SET is_default = TRUE, updated_at = NOW()
            WHERE id = (
                SELECT id FROM addresses WHERE user_id = $1
                ORDER BY created_at DESC, id DESC LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(address_id = id, user_id = user_id, "Address deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 设为默认地址
///
/// PUT /api/addresses/{id}/set-default
pub async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AddressRecord>>> {
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    fetch_owned(&mut *tx, user_id, id).await?;
    clear_default(&mut *tx, user_id).await?;

    let sql = format!(
        "UPDATE addresses SET is_default = TRUE, updated_at = NOW() WHERE id = $1 RETURNING {ADDRESS_COLUMNS}"
    );
    let address: AddressRecord = sqlx::query_as(&sql)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Json(ApiResponse::success(address)))
}

/// 读取地址并校验归属，他人的地址返回 403
async fn fetch_owned(conn: &mut PgConnection, user_id: i64, id: i64) -> Result<AddressRecord> {
    let sql = format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE id = $1");
    let address: AddressRecord = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ApiError::AddressNotFound(id))?;

    if address.user_id != user_id {
        return Err(ApiError::Forbidden("无权访问此地址".to_string()));
    }
    Ok(address)
}

async fn clear_default(conn: &mut PgConnection, user_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE addresses SET is_default = FALSE, updated_at = NOW() WHERE user_id = $1 AND is_default = TRUE",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(phone: &str) -> CreateAddressRequest {
        CreateAddressRequest {
            recipient_name: "王小明".to_string(),
            phone: phone.to_string(),
            postal_code: Some("100".to_string()),
            city: "台北市".to_string(),
            district: "中正区".to_string(),
            address: "重庆南路一段 122 号".to_string(),
            is_default: None,
        }
    }

    #[test]
    fn test_phone_pattern() {
        assert!(request("0912-345-678").validate().is_ok());
        assert!(request("+886 912 345 678").validate().is_ok());
        assert!(request("12345").validate().is_err());
        assert!(request("0912abc678").validate().is_err());
    }

    #[test]
    fn test_update_phone_optional() {
        let req = UpdateAddressRequest::default();
        assert!(req.validate().is_ok());

        let req = UpdateAddressRequest {
            phone: Some("bad".to_string()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
