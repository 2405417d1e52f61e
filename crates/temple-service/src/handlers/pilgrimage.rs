//! 进香团体登记

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

use crate::auth::{AuthUser, TempleScope};
use crate::dto::{ApiResponse, PageResponse, PaginationParams};
use crate::error::{ApiError, Result};
use crate::models::{PilgrimageStatus, TemplePermission};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PilgrimageVisit {
    pub id: i64,
    pub temple_id: i64,
    pub public_user_id: Option<i64>,
    pub group_name: Option<String>,
    pub contact_name: String,
    pub contact_phone: String,
    pub people_count: i32,
    pub visit_start_at: DateTime<Utc>,
    pub purpose: Option<String>,
    pub needs: Option<String>,
    pub status: PilgrimageStatus,
    pub assigned_staff: Option<String>,
    pub admin_note: Option<String>,
    pub reply_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const VISIT_COLUMNS: &str = "id, temple_id, public_user_id, group_name, contact_name, \
     contact_phone, people_count, visit_start_at, purpose, needs, status, assigned_staff, \
     admin_note, reply_message, created_at, updated_at";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitSort {
    VisitTime,
    #[default]
    CreatedAt,
}

impl VisitSort {
    fn column(self) -> &'static str {
        match self {
            Self::VisitTime => "visit_start_at",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VisitFilter {
    pub status: Option<String>,
    #[serde(default)]
    pub sort: VisitSort,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVisitRequest {
    #[validate(length(min = 1, max = 100, message = "联系人姓名长度必须在 1-100 之间"))]
    pub contact_name: String,
    #[validate(length(min = 1, max = 20, message = "联系电话长度必须在 1-20 之间"))]
    pub contact_phone: String,
    pub visit_start_at: DateTime<Utc>,
    #[validate(range(min = 1, message = "人数至少为 1"))]
    pub people_count: i32,
    #[validate(length(max = 200, message = "团体名称不能超过 200 字"))]
    pub group_name: Option<String>,
    pub purpose: Option<String>,
    pub needs: Option<String>,
    pub public_user_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVisitRequest {
    #[validate(length(min = 1, max = 100, message = "联系人姓名长度必须在 1-100 之间"))]
    pub contact_name: Option<String>,
    #[validate(length(min = 1, max = 20, message = "联系电话长度必须在 1-20 之间"))]
    pub contact_phone: Option<String>,
    pub visit_start_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "人数至少为 1"))]
    pub people_count: Option<i32>,
    #[validate(length(max = 200, message = "团体名称不能超过 200 字"))]
    pub group_name: Option<String>,
    pub purpose: Option<String>,
    pub needs: Option<String>,
    pub status: Option<String>,
    #[validate(length(max = 100, message = "负责人员不能超过 100 字"))]
    pub assigned_staff: Option<String>,
    pub admin_note: Option<String>,
    pub reply_message: Option<String>,
}

fn parse_status(value: Option<&str>) -> Result<Option<PilgrimageStatus>> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => PilgrimageStatus::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("无效的登记状态: {raw}"))),
    }
}

async fn fetch_scoped(pool: &PgPool, visit_id: i64, temple_id: i64) -> Result<PilgrimageVisit> {
    sqlx::query_as(&format!(
        "SELECT {VISIT_COLUMNS} FROM pilgrimage_visits WHERE id = $1 AND temple_id = $2"
    ))
    .bind(visit_id)
    .bind(temple_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("找不到此进香登记".to_string()))
}

/// 进香登记列表
///
/// GET /api/temple-admin/temples/{id}/pilgrimage-visits
pub async fn list_visits(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Query(filter): Query<VisitFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<PilgrimageVisit>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageInfo)?;
    let status = parse_status(filter.status.as_deref())?;

    let where_clause = "WHERE temple_id = $1 AND ($2::VARCHAR IS NULL OR status = $2)";

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pilgrimage_visits {where_clause}"
    ))
    .bind(temple_id)
    .bind(status)
    .fetch_one(&state.pool)
    .await?;

    let sql = format!(
        r#"
        SELECT {VISIT_COLUMNS} FROM pilgrimage_visits
        {where_clause}
        ORDER BY {} DESC, id DESC
        LIMIT $3 OFFSET $4
        "#,
        filter.sort.column()
    );
    let items: Vec<PilgrimageVisit> = sqlx::query_as(&sql)
        .bind(temple_id)
        .bind(status)
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

/// 新增进香登记
///
/// POST /api/temple-admin/temples/{id}/pilgrimage-visits
pub async fn create_visit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateVisitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PilgrimageVisit>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageInfo)?;
    req.validate()?;

    let visit: PilgrimageVisit = sqlx::query_as(&format!(
        r#"
        INSERT INTO pilgrimage_visits
            (temple_id, public_user_id, group_name, contact_name, contact_phone, people_count,
             visit_start_at, purpose, needs)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {VISIT_COLUMNS}
        "#
    ))
    .bind(temple_id)
    .bind(req.public_user_id)
    .bind(req.group_name.as_deref().map(str::trim))
    .bind(req.contact_name.trim())
    .bind(req.contact_phone.trim())
    .bind(req.people_count)
    .bind(req.visit_start_at)
    .bind(&req.purpose)
    .bind(&req.needs)
    .fetch_one(&state.pool)
    .await?;

    info!(
        visit_id = visit.id,
        temple_id = temple_id,
        people = visit.people_count,
        "Pilgrimage visit registered"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::success(visit))))
}

/// 进香登记详情
///
/// GET /api/temple-admin/temples/{id}/pilgrimage-visits/{visit_id}
pub async fn get_visit(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, visit_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<PilgrimageVisit>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageInfo)?;
    let visit = fetch_scoped(&state.pool, visit_id, temple_id).await?;
    Ok(Json(ApiResponse::success(visit)))
}

/// 更新进香登记，未提供的栏位保持不变
///
/// PUT /api/temple-admin/temples/{id}/pilgrimage-visits/{visit_id}
pub async fn update_visit(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, visit_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateVisitRequest>,
) -> Result<Json<ApiResponse<PilgrimageVisit>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageInfo)?;
    req.validate()?;
    let status = parse_status(req.status.as_deref())?;

    let visit: PilgrimageVisit = sqlx::query_as(&format!(
        r#"
        UPDATE pilgrimage_visits SET
            contact_name = COALESCE($3, contact_name),
            contact_phone = COALESCE($4, contact_phone),
            visit_start_at = COALESCE($5, visit_start_at),
            people_count = COALESCE($6, people_count),
            group_name = COALESCE($7, group_name),
            purpose = COALESCE($8, purpose),
            needs = COALESCE($9, needs),
            status = COALESCE($10, status),
            assigned_staff = COALESCE($11, assigned_staff),
            admin_note = COALESCE($12, admin_note),
            reply_message = COALESCE($13, reply_message),
            updated_at = NOW()
        WHERE id = $1 AND temple_id = $2
        RETURNING {VISIT_COLUMNS}
        "#
    ))
    .bind(visit_id)
    .bind(temple_id)
    .bind(req.contact_name.as_deref().map(str::trim))
    .bind(req.contact_phone.as_deref().map(str::trim))
    .bind(req.visit_start_at)
    .bind(req.people_count)
    .bind(req.group_name.as_deref().map(str::trim))
    .bind(&req.purpose)
    .bind(&req.needs)
    .bind(status)
    .bind(&req.assigned_staff)
    .bind(&req.admin_note)
    .bind(&req.reply_message)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("找不到此进香登记".to_string()))?;

    info!(
        visit_id = visit.id,
        temple_id = temple_id,
        status = ?visit.status,
        "Pilgrimage visit updated"
    );
    Ok(Json(ApiResponse::success(visit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(parse_status(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_status(Some("confirmed")).unwrap(),
            Some(PilgrimageStatus::Confirmed)
        );
        assert!(matches!(
            parse_status(Some("approved")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_create_request_validation() {
        let req: CreateVisitRequest = serde_json::from_str(
            r#"{"contactName":"陈先生","contactPhone":"0912345678",
                "visitStartAt":"2025-04-01T08:00:00Z","peopleCount":0}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateVisitRequest = serde_json::from_str(
            r#"{"contactName":"陈先生","contactPhone":"0912345678",
                "visitStartAt":"2025-04-01T08:00:00Z","peopleCount":45,"groupName":"大甲进香团"}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_sort_column() {
        let filter: VisitFilter = serde_json::from_str(r#"{"sort":"visit_time"}"#).unwrap();
        assert_eq!(filter.sort.column(), "visit_start_at");
        let filter: VisitFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter.sort, VisitSort::CreatedAt);
    }
}
