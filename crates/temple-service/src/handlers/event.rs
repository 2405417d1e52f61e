//! 寺庙活动与报名处理器
//!
//! 活动状态：draft → published → closed，published 与 closed 可取消。
//! 报名额满后进入候补；取消正式报名时递补最早的候补。报名与取消都先锁活动行，
//! 保证名额计算不会并发超卖。

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
use crate::error::{ApiError, Result, is_unique_violation};
use crate::models::{EventStatus, NotificationType, RegistrationStatus, TemplePermission};
use crate::service::notification::{self, NewNotification};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub temple_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub signup_end_at: DateTime<Utc>,
    pub capacity: i32,
    pub fee: i32,
    pub cover_image_url: Option<String>,
    pub status: EventStatus,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const EVENT_COLUMNS: &str = "id, temple_id, title, description, location, start_at, end_at, \
     signup_end_at, capacity, fee, cover_image_url, status, created_by, created_at, updated_at";

/// 活动与报名人数
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub event: EventRecord,
    pub registered_count: i64,
    pub waitlist_count: i64,
}

const EVENT_DETAIL_SELECT: &str = r#"
    SELECT e.id, e.temple_id, e.title, e.description, e.location, e.start_at, e.end_at,
           e.signup_end_at, e.capacity, e.fee, e.cover_image_url, e.status, e.created_by,
           e.created_at, e.updated_at,
           (SELECT COUNT(*) FROM event_registrations r
             WHERE r.event_id = e.id AND r.status = 'registered') AS registered_count,
           (SELECT COUNT(*) FROM event_registrations r
             WHERE r.event_id = e.id AND r.status = 'waitlist') AS waitlist_count
    FROM temple_events e
"#;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub id: i64,
    pub event_id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub notes: Option<String>,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

const REGISTRATION_COLUMNS: &str =
    "id, event_id, user_id, name, phone, email, notes, status, registered_at, canceled_at";

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 200, message = "活动标题长度必须在 1-200 之间"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(max = 255, message = "地点最多 255 个字符"))]
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub signup_end_at: DateTime<Utc>,
    #[validate(range(min = 1, message = "名额至少为 1"))]
    pub capacity: i32,
    #[validate(range(min = 0, message = "费用不能为负数"))]
    pub fee: Option<i32>,
    #[validate(url(message = "封面图片地址格式不正确"))]
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    #[validate(length(min = 1, max = 200, message = "活动标题长度必须在 1-200 之间"))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 255, message = "地点最多 255 个字符"))]
    pub location: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub signup_end_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "名额至少为 1"))]
    pub capacity: Option<i32>,
    #[validate(range(min = 0, message = "费用不能为负数"))]
    pub fee: Option<i32>,
    #[validate(url(message = "封面图片地址格式不正确"))]
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "姓名长度必须在 1-100 之间"))]
    pub name: String,
    #[validate(length(min = 8, max = 20, message = "电话长度必须在 8-20 之间"))]
    pub phone: String,
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    pub notes: Option<String>,
}

/// 活动时间校验
fn check_schedule(
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    signup_end_at: DateTime<Utc>,
) -> Result<()> {
    if end_at <= start_at {
        return Err(ApiError::Validation("结束时间必须晚于开始时间".to_string()));
    }
    if signup_end_at > start_at {
        return Err(ApiError::Validation("报名截止时间不能晚于活动开始时间".to_string()));
    }
    Ok(())
}

/// 新报名的状态，额满则候补
fn registration_status(registered: i64, capacity: i32) -> RegistrationStatus {
    if registered < i64::from(capacity) {
        RegistrationStatus::Registered
    } else {
        RegistrationStatus::Waitlist
    }
}

// ============================================
// 公开与用户接口
// ============================================

/// 寺庙即将举行的活动
///
/// GET /api/temples/{id}/events
pub async fn list_temple_events(
    State(state): State<AppState>,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<EventDetail>>>> {
    let sql = format!(
        r#"
        {EVENT_DETAIL_SELECT}
        WHERE e.temple_id = $1 AND e.status = 'published' AND e.start_at >= NOW()
        ORDER BY e.start_at ASC
        "#
    );
    let events: Vec<EventDetail> = sqlx::query_as(&sql)
        .bind(temple_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(events)))
}

/// 活动详情，草稿不公开
///
/// GET /api/events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<EventDetail>>> {
    let detail = fetch_detail(&state.pool, id).await?;
    if detail.event.status == EventStatus::Draft {
        return Err(event_not_found(id));
    }
    Ok(Json(ApiResponse::success(detail)))
}

/// 报名活动
///
/// POST /api/events/{id}/register
pub async fn register_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegistrationRecord>>)> {
    req.validate()?;
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    let event = lock_event(&mut *tx, id).await?;

    if event.status != EventStatus::Published {
        return Err(ApiError::BadRequest("活动未开放报名".to_string()));
    }
    if Utc::now() > event.signup_end_at {
        return Err(ApiError::BadRequest("报名已截止".to_string()));
    }

    let already: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM event_registrations
            WHERE event_id = $1 AND user_id = $2 AND status <> 'canceled'
        )
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if already {
        return Err(ApiError::BadRequest("您已报名此活动".to_string()));
    }

    let registered = registered_count(&mut *tx, id).await?;
    let status = registration_status(registered, event.capacity);

    let sql = format!(
        r#"
        INSERT INTO event_registrations (event_id, user_id, name, phone, email, notes, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {REGISTRATION_COLUMNS}
        "#
    );
    let registration: RegistrationRecord = sqlx::query_as(&sql)
        .bind(id)
        .bind(user_id)
        .bind(req.name.trim())
        .bind(req.phone.trim())
        .bind(req.email.trim())
        .bind(&req.notes)
        .bind(status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "uq_event_registrations_active") {
                ApiError::BadRequest("您已报名此活动".to_string())
            } else {
                ApiError::from(e)
            }
        })?;

    let content = match status {
        RegistrationStatus::Waitlist => format!("「{}」名额已满，您已进入候补名单", event.title),
        _ => format!("您已成功报名「{}」", event.title),
    };
    let notice = NewNotification::new(NotificationType::EventRegistration, "活动报名", content)
        .related("event", event.id)
        .data(json!({ "registrationId": registration.id, "status": status }));
    notification::notify(&mut *tx, user_id, &notice).await?;

    tx.commit().await?;

    info!(
        event_id = id,
        user_id = user_id,
        status = ?status,
        "Event registration created"
    );
    let message = match status {
        RegistrationStatus::Waitlist => "名额已满，已加入候补",
        _ => "报名成功",
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(registration, message)),
    ))
}

/// 取消报名，正式名额释放后递补最早的候补
///
/// DELETE /api/events/{id}/registration
pub async fn cancel_registration(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let user_id = user.public_user_id()?;

    let mut tx = state.pool.begin().await?;
    let event = lock_event(&mut *tx, id).await?;

    let active: Option<(i64, RegistrationStatus)> = sqlx::query_as(
        r#"
        SELECT id, status FROM event_registrations
        WHERE event_id = $1 AND user_id = $2 AND status <> 'canceled'
        FOR UPDATE
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let (registration_id, previous) =
        active.ok_or_else(|| ApiError::NotFound("未找到您的报名记录".to_string()))?;

    sqlx::query(
        "UPDATE event_registrations SET status = 'canceled', canceled_at = NOW() WHERE id = $1",
    )
    .bind(registration_id)
    .execute(&mut *tx)
    .await?;

    if previous == RegistrationStatus::Registered {
        promote_waitlist(&mut *tx, &event).await?;
    }

    tx.commit().await?;

    info!(event_id = id, user_id = user_id, "Event registration canceled");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙活动列表
///
/// GET /api/temple-admin/temples/{id}/events
pub async fn staff_list_events(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(filter): Query<EventFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<EventDetail>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM temple_events WHERE temple_id = $1 AND ($2::VARCHAR IS NULL OR status = $2)",
    )
    .bind(temple_id)
    .bind(filter.status)
    .fetch_one(&state.pool)
    .await?;

    let sql = format!(
        r#"
        {EVENT_DETAIL_SELECT}
        WHERE e.temple_id = $1 AND ($2::VARCHAR IS NULL OR e.status = $2)
        ORDER BY e.start_at DESC
        LIMIT $3 OFFSET $4
        "#
    );
    let items: Vec<EventDetail> = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(filter.status)
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

/// 活动详情（后台）
///
/// GET /api/temple-admin/temples/{id}/events/{event_id}
pub async fn staff_get_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<EventDetail>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;

    let detail = fetch_detail(&state.pool, event_id).await?;
    ensure_temple(&detail.event, temple_id)?;
    Ok(Json(ApiResponse::success(detail)))
}

/// 新增活动，初始为草稿
///
/// POST /api/temple-admin/temples/{id}/events
pub async fn staff_create_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EventRecord>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;
    req.validate()?;
    check_schedule(req.start_at, req.end_at, req.signup_end_at)?;

    let sql = format!(
        r#"
        INSERT INTO temple_events
            (temple_id, title, description, location, start_at, end_at, signup_end_at,
             capacity, fee, cover_image_url, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'draft', $11)
        RETURNING {EVENT_COLUMNS}
        "#
    );
    let event: EventRecord = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(req.title.trim())
        .bind(&req.description)
        .bind(&req.location)
        .bind(req.start_at)
        .bind(req.end_at)
        .bind(req.signup_end_at)
        .bind(req.capacity)
        .bind(req.fee.unwrap_or(0))
        .bind(&req.cover_image_url)
        .bind(user.id()?)
        .fetch_one(&state.pool)
        .await?;

    info!(event_id = event.id, temple_id = temple_id, "Event created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(event))))
}

/// 更新活动，已结束报名或已取消的活动不可修改
///
/// PUT /api/temple-admin/temples/{id}/events/{event_id}
pub async fn staff_update_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<ApiResponse<EventRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;
    req.validate()?;

    let existing = fetch_detail(&state.pool, event_id).await?.event;
    ensure_temple(&existing, temple_id)?;
    if matches!(existing.status, EventStatus::Closed | EventStatus::Canceled) {
        return Err(ApiError::BadRequest("活动已结束报名或已取消，无法修改".to_string()));
    }
    check_schedule(
        req.start_at.unwrap_or(existing.start_at),
        req.end_at.unwrap_or(existing.end_at),
        req.signup_end_at.unwrap_or(existing.signup_end_at),
    )?;

    let sql = format!(
        r#"
        UPDATE temple_events SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            location = COALESCE($4, location),
            start_at = COALESCE($5, start_at),
            end_at = COALESCE($6, end_at),
            signup_end_at = COALESCE($7, signup_end_at),
            capacity = COALESCE($8, capacity),
            fee = COALESCE($9, fee),
            cover_image_url = COALESCE($10, cover_image_url),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {EVENT_COLUMNS}
        "#
    );
    let event: EventRecord = sqlx::query_as(&sql)
        .bind(event_id)
        .bind(req.title.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(&req.location)
        .bind(req.start_at)
        .bind(req.end_at)
        .bind(req.signup_end_at)
        .bind(req.capacity)
        .bind(req.fee)
        .bind(&req.cover_image_url)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(event)))
}

/// 发布活动
///
/// POST /api/temple-admin/temples/{id}/events/{event_id}/publish
pub async fn staff_publish_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<EventRecord>>> {
    transition(&state, &user, temple_id, event_id, EventStatus::Published).await
}

/// 截止报名
///
/// POST /api/temple-admin/temples/{id}/events/{event_id}/close
pub async fn staff_close_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<EventRecord>>> {
    transition(&state, &user, temple_id, event_id, EventStatus::Closed).await
}

/// 取消活动
///
/// POST /api/temple-admin/temples/{id}/events/{event_id}/cancel
pub async fn staff_cancel_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<EventRecord>>> {
    transition(&state, &user, temple_id, event_id, EventStatus::Canceled).await
}

/// 活动报名名单
///
/// GET /api/temple-admin/temples/{id}/events/{event_id}/registrations
pub async fn staff_list_registrations(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, event_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<Vec<RegistrationRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;
    let detail = fetch_detail(&state.pool, event_id).await?;
    ensure_temple(&detail.event, temple_id)?;

    let sql = format!(
        "SELECT {REGISTRATION_COLUMNS} FROM event_registrations WHERE event_id = $1 ORDER BY registered_at ASC, id ASC"
    );
    let registrations: Vec<RegistrationRecord> = sqlx::query_as(&sql)
        .bind(event_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(registrations)))
}

// ============================================
// 内部函数
// ============================================

fn event_not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("活动不存在: {id}"))
}

fn ensure_temple(event: &EventRecord, temple_id: i64) -> Result<()> {
    if event.temple_id != temple_id {
        return Err(ApiError::Forbidden("此活动不属于您的寺庙".to_string()));
    }
    Ok(())
}

async fn fetch_detail(pool: &PgPool, id: i64) -> Result<EventDetail> {
    let sql = format!("{EVENT_DETAIL_SELECT} WHERE e.id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| event_not_found(id))
}

async fn lock_event(conn: &mut PgConnection, id: i64) -> Result<EventRecord> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM temple_events WHERE id = $1 FOR UPDATE");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| event_not_found(id))
}

async fn registered_count(conn: &mut PgConnection, event_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_registrations WHERE event_id = $1 AND status = 'registered'",
    )
    .bind(event_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// 有空位时递补最早的候补并通知
async fn promote_waitlist(conn: &mut PgConnection, event: &EventRecord) -> Result<()> {
    let registered = registered_count(conn, event.id).await?;
    if registered >= i64::from(event.capacity) {
        return Ok(());
    }

    let promoted: Option<(i64, Option<i64>)> = sqlx::query_as(
        r#"
        UPDATE event_registrations SET status = 'registered'
        WHERE id = (
            SELECT id FROM event_registrations
            WHERE event_id = $1 AND status = 'waitlist'
            ORDER BY registered_at ASC, id ASC
            LIMIT 1
        )
        RETURNING id, user_id
        "#,
    )
    .bind(event.id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((registration_id, user_id)) = promoted {
        if let Some(user_id) = user_id {
            let notice = NewNotification::new(
                NotificationType::EventRegistration,
                "候补递补成功",
                format!("您已由候补转为正式报名「{}」", event.title),
            )
            .related("event", event.id)
            .data(json!({ "registrationId": registration_id, "status": "registered" }));
            notification::notify(&mut *conn, user_id, &notice).await?;
        }
        info!(event_id = event.id, registration_id = registration_id, "Waitlist promoted");
    }

    Ok(())
}

async fn transition(
    state: &AppState,
    user: &AuthUser,
    temple_id: i64,
    event_id: i64,
    next: EventStatus,
) -> Result<Json<ApiResponse<EventRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageEvents)?;

    let mut tx = state.pool.begin().await?;
    let event = lock_event(&mut *tx, event_id).await?;
    ensure_temple(&event, temple_id)?;

    if !event.status.can_transition_to(next) {
        return Err(ApiError::InvalidStatusTransition {
            from: event.status.as_str().to_string(),
            to: next.as_str().to_string(),
        });
    }

    let sql = format!(
        "UPDATE temple_events SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {EVENT_COLUMNS}"
    );
    let updated: EventRecord = sqlx::query_as(&sql)
        .bind(event_id)
        .bind(next)
        .fetch_one(&mut *tx)
        .await?;

    if next == EventStatus::Canceled {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, type, title, content, related_type, related_id)
            SELECT DISTINCT r.user_id, $2, '活动取消', $3, 'event', $1
            FROM event_registrations r
            WHERE r.event_id = $1 AND r.user_id IS NOT NULL AND r.status <> 'canceled'
            "#,
        )
        .bind(event_id)
        .bind(NotificationType::EventRegistration)
        .bind(format!("很抱歉，「{}」已取消", event.title))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        event_id = event_id,
        from = event.status.as_str(),
        to = next.as_str(),
        "Event status changed"
    );
    Ok(Json(ApiResponse::success(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_check_schedule() {
        let start = Utc::now() + Duration::days(10);
        let end = start + Duration::hours(3);
        assert!(check_schedule(start, end, start - Duration::days(1)).is_ok());
        assert!(check_schedule(start, end, start).is_ok());
        assert!(check_schedule(start, start, start - Duration::days(1)).is_err());
        assert!(check_schedule(start, end, start + Duration::minutes(1)).is_err());
    }

    #[test]
    fn test_registration_status_respects_capacity() {
        assert_eq!(registration_status(0, 1), RegistrationStatus::Registered);
        assert_eq!(registration_status(29, 30), RegistrationStatus::Registered);
        assert_eq!(registration_status(30, 30), RegistrationStatus::Waitlist);
        assert_eq!(registration_status(31, 30), RegistrationStatus::Waitlist);
    }

    #[test]
    fn test_create_request_validation() {
        let now = Utc::now();
        let req = CreateEventRequest {
            title: "法会".to_string(),
            description: None,
            location: None,
            start_at: now,
            end_at: now,
            signup_end_at: now,
            capacity: 0,
            fee: Some(-1),
            cover_image_url: None,
        };
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("capacity"));
        assert!(fields.contains_key("fee"));
    }

    #[test]
    fn test_register_request_email() {
        let req = RegisterRequest {
            name: "林信众".to_string(),
            phone: "0912345678".to_string(),
            email: "not-an-email".to_string(),
            notes: None,
        };
        assert!(req.validate().is_err());
    }
}
