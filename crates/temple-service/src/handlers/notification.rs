//! 站内通知处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;

use crate::auth::AuthUser;
use crate::dto::{ApiResponse, CountResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::NotificationType;
use crate::state::AppState;

/// 批量删除上限
const MAX_BATCH_DELETE: usize = 100;

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    pub related_type: Option<String>,
    pub related_id: Option<i64>,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    pub is_read: Option<bool>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

/// 通知列表
///
/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<NotificationFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<NotificationRecord>>>> {
    let user_id = user.public_user_id()?;
    let where_clause = r#"
        WHERE user_id = $1
          AND ($2::BOOLEAN IS NULL OR is_read = $2)
          AND ($3::VARCHAR IS NULL OR type = $3)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notifications {where_clause}"))
            .bind(user_id)
            .bind(filter.is_read)
            .bind(filter.notification_type)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        r#"
        SELECT id, type, title, content, related_type, related_id, data, is_read, read_at, created_at
        FROM notifications
        {where_clause}
        ORDER BY created_at DESC, id DESC
        LIMIT $4 OFFSET $5
        "#
    );
    let items: Vec<NotificationRecord> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(filter.is_read)
        .bind(filter.notification_type)
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

/// 未读数
///
/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CountResponse>>> {
    let user_id = user.public_user_id()?;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(CountResponse { count })))
}

/// 标记已读
///
/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let user_id = user.public_user_id()?;

    let result = sqlx::query(
        r#"
        UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("通知不存在: {id}")));
    }

    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 全部标记已读
///
/// PUT /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CountResponse>>> {
    let user_id = user.public_user_id()?;

    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?;

    Ok(Json(ApiResponse::success(CountResponse {
        count: result.rows_affected() as i64,
    })))
}

/// 删除通知
///
/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let user_id = user.public_user_id()?;

    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("通知不存在: {id}")));
    }

    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 批量删除
///
/// POST /api/notifications/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<ApiResponse<CountResponse>>> {
    let user_id = user.public_user_id()?;
    check_batch(&req.ids)?;

    let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND id = ANY($2)")
        .bind(user_id)
        .bind(&req.ids)
        .execute(&state.pool)
        .await?;

    info!(user_id = user_id, deleted = result.rows_affected(), "Notifications batch deleted");
    Ok(Json(ApiResponse::success(CountResponse {
        count: result.rows_affected() as i64,
    })))
}

/// 清除已读通知
///
/// DELETE /api/notifications/clear-read
pub async fn clear_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CountResponse>>> {
    let user_id = user.public_user_id()?;

    let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND is_read = TRUE")
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(CountResponse {
        count: result.rows_affected() as i64,
    })))
}

fn check_batch(ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Err(ApiError::Validation("请选择要删除的通知".to_string()));
    }
    if ids.len() > MAX_BATCH_DELETE {
        return Err(ApiError::Validation(format!(
            "一次最多删除 {MAX_BATCH_DELETE} 条通知"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&[]).is_err());
        assert!(check_batch(&[1, 2, 3]).is_ok());
        let too_many: Vec<i64> = (0..=MAX_BATCH_DELETE as i64).collect();
        assert!(check_batch(&too_many).is_err());
    }

    #[test]
    fn test_filter_type_rename() {
        let filter: NotificationFilter =
            serde_json::from_str(r#"{"type":"reward_received","isRead":false}"#).unwrap();
        assert_eq!(filter.notification_type, Some(NotificationType::RewardReceived));
        assert_eq!(filter.is_read, Some(false));
    }
}
