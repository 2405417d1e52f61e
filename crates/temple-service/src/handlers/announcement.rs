//! 寺庙公告处理器
//!
//! 公告发布时（新增即发布，或更新时由未发布改为发布）通知曾在该寺庙签到的用户。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, TempleScope};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::{AnnouncementPriority, AnnouncementType, NotificationType, TemplePermission};
use crate::service::notification::{self, NewNotification};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementRecord {
    pub id: i64,
    pub temple_id: i64,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub announcement_type: AnnouncementType,
    pub priority: AnnouncementPriority,
    pub image_url: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_published: bool,
    pub view_count: i32,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ANNOUNCEMENT_COLUMNS: &str = "id, temple_id, title, content, type, priority, image_url, \
     start_date, end_date, is_published, view_count, created_by, created_at, updated_at";

/// 优先级排序，urgent 在前
const PRIORITY_ORDER: &str = "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 \
     WHEN 'normal' THEN 2 ELSE 3 END";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct AnnouncementFilter {
    #[serde(rename = "type")]
    pub announcement_type: Option<AnnouncementType>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "标题长度必须在 1-200 之间"))]
    pub title: String,
    #[validate(length(min = 1, message = "公告内容不能为空"))]
    pub content: String,
    #[serde(rename = "type")]
    pub announcement_type: Option<AnnouncementType>,
    pub priority: Option<AnnouncementPriority>,
    #[validate(url(message = "图片地址格式不正确"))]
    pub image_url: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnnouncementRequest {
    #[validate(length(min = 1, max = 200, message = "标题长度必须在 1-200 之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "公告内容不能为空"))]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub announcement_type: Option<AnnouncementType>,
    pub priority: Option<AnnouncementPriority>,
    #[validate(url(message = "图片地址格式不正确"))]
    pub image_url: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_published: Option<bool>,
}

fn check_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(ApiError::Validation(
            "结束时间不能早于开始时间".to_string(),
        )),
        _ => Ok(()),
    }
}

// ============================================
// 公开接口
// ============================================

/// 寺庙公告
///
/// GET /api/temples/{id}/announcements
pub async fn list_temple_announcements(
    State(state): State<AppState>,
    Path(temple_id): Path<i64>,
    Query(filter): Query<AnnouncementFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<AnnouncementRecord>>>> {
    let where_clause = r#"
        WHERE temple_id = $1
          AND is_published = TRUE
          AND (start_date IS NULL OR start_date <= NOW())
          AND (end_date IS NULL OR end_date >= NOW())
          AND ($2::VARCHAR IS NULL OR type = $2)
    "#;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM temple_announcements {where_clause}"
    ))
    .bind(temple_id)
    .bind(filter.announcement_type)
    .fetch_one(&state.pool)
    .await?;

    let sql = format!(
        r#"
        SELECT {ANNOUNCEMENT_COLUMNS} FROM temple_announcements
        {where_clause}
        ORDER BY {PRIORITY_ORDER}, created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let items: Vec<AnnouncementRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(filter.announcement_type)
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

/// 公告详情，同时累计浏览数
///
/// GET /api/announcements/{id}
pub async fn get_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AnnouncementRecord>>> {
    let sql = format!(
        r#"
        UPDATE temple_announcements SET view_count = view_count + 1
        WHERE id = $1 AND is_published = TRUE
        RETURNING {ANNOUNCEMENT_COLUMNS}
        "#
    );
    let announcement: AnnouncementRecord = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("公告不存在: {id}")))?;

    Ok(Json(ApiResponse::success(announcement)))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙公告（含未发布）
///
/// GET /api/temple-admin/temples/{id}/announcements
pub async fn staff_list_announcements(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<AnnouncementRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAnnouncements)?;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM temple_announcements WHERE temple_id = $1")
            .bind(temple_id)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        r#"
        SELECT {ANNOUNCEMENT_COLUMNS} FROM temple_announcements
        WHERE temple_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#
    );
    let items: Vec<AnnouncementRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
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

/// 新增公告
///
/// POST /api/temple-admin/temples/{id}/announcements
pub async fn staff_create_announcement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateAnnouncementRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AnnouncementRecord>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAnnouncements)?;
    req.validate()?;
    check_window(req.start_date, req.end_date)?;

    let mut tx = state.pool.begin().await?;

    let sql = format!(
        r#"
        INSERT INTO temple_announcements
            (temple_id, title, content, type, priority, image_url, start_date, end_date,
             is_published, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {ANNOUNCEMENT_COLUMNS}
        "#
    );
    let announcement: AnnouncementRecord = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(req.title.trim())
        .bind(&req.content)
        .bind(req.announcement_type.unwrap_or_default())
        .bind(req.priority.unwrap_or_default())
        .bind(&req.image_url)
        .bind(req.start_date)
        .bind(req.end_date)
        .bind(req.is_published.unwrap_or(false))
        .bind(user.id()?)
        .fetch_one(&mut *tx)
        .await?;

    if announcement.is_published {
        notify_published(&mut *tx, &announcement).await?;
    }

    tx.commit().await?;

    info!(
        announcement_id = announcement.id,
        temple_id = temple_id,
        published = announcement.is_published,
        "Announcement created"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(announcement))))
}

/// 更新公告
///
/// PUT /api/temple-admin/temples/{id}/announcements/{announcement_id}
pub async fn staff_update_announcement(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, announcement_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateAnnouncementRequest>,
) -> Result<Json<ApiResponse<AnnouncementRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAnnouncements)?;
    req.validate()?;

    let existing = fetch_scoped(&state.pool, announcement_id, temple_id).await?;
    check_window(
        req.start_date.or(existing.start_date),
        req.end_date.or(existing.end_date),
    )?;

    let mut tx = state.pool.begin().await?;

    let sql = format!(
        r#"
        UPDATE temple_announcements SET
            title = COALESCE($2, title),
            content = COALESCE($3, content),
            type = COALESCE($4, type),
            priority = COALESCE($5, priority),
            image_url = COALESCE($6, image_url),
            start_date = COALESCE($7, start_date),
            end_date = COALESCE($8, end_date),
            is_published = COALESCE($9, is_published),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {ANNOUNCEMENT_COLUMNS}
        "#
    );
    let announcement: AnnouncementRecord = sqlx::query_as(&sql)
        .bind(announcement_id)
        .bind(req.title.as_deref().map(str::trim))
        .bind(&req.content)
        .bind(req.announcement_type)
        .bind(req.priority)
        .bind(&req.image_url)
        .bind(req.start_date)
        .bind(req.end_date)
        .bind(req.is_published)
        .fetch_one(&mut *tx)
        .await?;

    if !existing.is_published && announcement.is_published {
        notify_published(&mut *tx, &announcement).await?;
    }

    tx.commit().await?;
    Ok(Json(ApiResponse::success(announcement)))
}

/// 删除公告
///
/// DELETE /api/temple-admin/temples/{id}/announcements/{announcement_id}
pub async fn staff_delete_announcement(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, announcement_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<()>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageAnnouncements)?;
    fetch_scoped(&state.pool, announcement_id, temple_id).await?;

    sqlx::query("DELETE FROM temple_announcements WHERE id = $1")
        .bind(announcement_id)
        .execute(&state.pool)
        .await?;

    info!(announcement_id = announcement_id, "Announcement deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

async fn fetch_scoped(pool: &PgPool, id: i64, temple_id: i64) -> Result<AnnouncementRecord> {
    let sql = format!("SELECT {ANNOUNCEMENT_COLUMNS} FROM temple_announcements WHERE id = $1");
    let announcement: AnnouncementRecord = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("公告不存在: {id}")))?;

    if announcement.temple_id != temple_id {
        return Err(ApiError::Forbidden("此公告不属于您的寺庙".to_string()));
    }
    Ok(announcement)
}

async fn notify_published(conn: &mut PgConnection, announcement: &AnnouncementRecord) -> Result<()> {
    let temple_name: String = sqlx::query_scalar("SELECT name FROM temples WHERE id = $1")
        .bind(announcement.temple_id)
        .fetch_one(&mut *conn)
        .await?;

    let notice = NewNotification::new(
        NotificationType::TempleAnnouncement,
        format!("{temple_name}：{}", announcement.title),
        announcement.content.chars().take(200).collect::<String>(),
    )
    .related("announcement", announcement.id)
    .data(json!({
        "templeId": announcement.temple_id,
        "priority": announcement.priority,
    }));

    let sent =
        notification::notify_temple_visitors(&mut *conn, announcement.temple_id, &notice).await?;
    info!(
        announcement_id = announcement.id,
        recipients = sent,
        "Announcement notifications sent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_check_window() {
        let now = Utc::now();
        assert!(check_window(Some(now), Some(now + Duration::days(1))).is_ok());
        assert!(check_window(Some(now), Some(now - Duration::hours(1))).is_err());
        assert!(check_window(None, Some(now)).is_ok());
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateAnnouncementRequest =
            serde_json::from_str(r#"{"title":"中元普渡","content":"农历七月十五举行"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.announcement_type.unwrap_or_default(), AnnouncementType::News);
        assert_eq!(req.priority.unwrap_or_default(), AnnouncementPriority::Normal);
    }

    #[test]
    fn test_title_too_long() {
        let req = CreateAnnouncementRequest {
            title: "公".repeat(201),
            content: "内容".to_string(),
            announcement_type: None,
            priority: None,
            image_url: None,
            start_date: None,
            end_date: None,
            is_published: None,
        };
        assert!(req.validate().is_err());
    }
}
