//! 签到奖励 API 处理器
//!
//! 公开奖励目录、用户进度与手动领取，以及寺庙后台和总后台的奖励维护与统计

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, TempleScope};
use crate::dto::{ApiResponse, DailyCount, PageResponse, PaginationParams};
use crate::engine::{self, Progress};
use crate::error::{ApiError, Result};
use crate::models::{ClaimType, RewardType, TemplePermission};
use crate::service::ledger;
use crate::service::reward::{
    self, ClaimOutcome, PgRewardStore, REWARD_COLUMNS, RewardRecord, RewardStore,
};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardFilter {
    pub temple_id: Option<i64>,
    pub reward_type: Option<RewardType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableQuery {
    pub temple_id: Option<i64>,
}

/// 用户视角的奖励与进度
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableReward {
    #[serde(flatten)]
    pub reward: RewardRecord,
    pub eligible: bool,
    /// 不可领取的原因
    pub reason: Option<String>,
    pub progress: Progress,
    pub claim_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub claim: reward::GrantedReward,
    pub points_received: i64,
    pub blessing_points: i64,
}

impl From<ClaimOutcome> for ClaimResponse {
    fn from(outcome: ClaimOutcome) -> Self {
        Self {
            points_received: outcome.reward.points_received,
            claim: outcome.reward,
            blessing_points: outcome.blessing_points,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyClaimsQuery {
    pub reward_type: Option<RewardType>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClaimItem {
    pub id: i64,
    pub reward_id: i64,
    pub reward_name: String,
    pub reward_type: RewardType,
    pub temple_id: Option<i64>,
    pub points_received: i64,
    pub claim_type: ClaimType,
    pub related_checkin_id: Option<i64>,
    pub claim_date: NaiveDate,
    pub claimed_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyClaimsResponse {
    #[serde(flatten)]
    pub page: PageResponse<ClaimItem>,
    pub summary: ClaimSummary,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSummary {
    pub total_claims: i64,
    pub total_points: i64,
}

/// 创建奖励请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRewardRequest {
    /// 仅总后台使用，空值为全站奖励
    pub temple_id: Option<i64>,
    #[validate(length(min = 1, max = 100, message = "奖励名称长度必须在 1-100 之间"))]
    pub name: String,
    pub description: Option<String>,
    pub reward_type: RewardType,
    #[validate(range(min = 1, message = "条件值至少为 1"))]
    pub condition_value: Option<i32>,
    #[validate(range(min = 1, message = "奖励功德值至少为 1"))]
    pub reward_points: i64,
    pub is_repeatable: Option<bool>,
    pub is_active: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// 更新奖励请求，未提供的字段保持不变
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRewardRequest {
    #[validate(length(min = 1, max = 100, message = "奖励名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub reward_type: Option<RewardType>,
    #[validate(range(min = 1, message = "条件值至少为 1"))]
    pub condition_value: Option<i32>,
    #[validate(range(min = 1, message = "奖励功德值至少为 1"))]
    pub reward_points: Option<i64>,
    pub is_repeatable: Option<bool>,
    pub is_active: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// 合并后待写入的奖励
#[derive(Debug, Clone, PartialEq)]
struct RewardDraft {
    temple_id: Option<i64>,
    name: String,
    description: Option<String>,
    reward_type: RewardType,
    condition_value: i32,
    reward_points: i64,
    is_repeatable: bool,
    is_active: bool,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl RewardDraft {
    fn from_create(req: CreateRewardRequest, temple_id: Option<i64>) -> Self {
        Self {
            temple_id,
            name: req.name.trim().to_string(),
            description: req.description,
            reward_type: req.reward_type,
            condition_value: req.condition_value.unwrap_or(1),
            reward_points: req.reward_points,
            is_repeatable: req.is_repeatable.unwrap_or(false),
            is_active: req.is_active.unwrap_or(true),
            start_date: req.start_date,
            end_date: req.end_date,
        }
    }

    fn merged(existing: &RewardRecord, req: UpdateRewardRequest) -> Self {
        Self {
            temple_id: existing.temple_id,
            name: req
                .name
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| existing.name.clone()),
            description: req.description.or_else(|| existing.description.clone()),
            reward_type: req.reward_type.unwrap_or(existing.reward_type),
            condition_value: req.condition_value.unwrap_or(existing.condition_value),
            reward_points: req.reward_points.unwrap_or(existing.reward_points),
            is_repeatable: req.is_repeatable.unwrap_or(existing.is_repeatable),
            is_active: req.is_active.unwrap_or(existing.is_active),
            start_date: req.start_date.or(existing.start_date),
            end_date: req.end_date.or(existing.end_date),
        }
    }

    /// 跨字段校验
    fn check(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ApiError::Validation("结束日期不能早于开始日期".to_string()));
            }
        }
        if self.reward_type == RewardType::FirstTime && self.temple_id.is_none() {
            return Err(ApiError::Validation("首次签到奖励必须指定寺庙".to_string()));
        }
        if self.reward_type == RewardType::FirstTime && self.is_repeatable {
            return Err(ApiError::Validation("首次签到奖励不可重复领取".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardStatistics {
    pub reward_id: i64,
    pub total_claims: i64,
    pub total_points: i64,
    pub unique_users: i64,
    pub period_days: i64,
    pub claims_in_period: i64,
    pub daily_trend: Vec<DailyCount>,
}

// ============================================
// 公开与用户接口
// ============================================

/// 奖励列表
///
/// GET /api/rewards
pub async fn list_rewards(
    State(state): State<AppState>,
    Query(filter): Query<RewardFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<RewardRecord>>>> {
    let today = Utc::now().date_naive();
    let where_clause = r#"
        WHERE is_active = TRUE
          AND (start_date IS NULL OR start_date <= $1)
          AND (end_date IS NULL OR end_date >= $1)
          AND ($2::BIGINT IS NULL OR temple_id IS NULL OR temple_id = $2)
          AND ($3::VARCHAR IS NULL OR reward_type = $3)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM checkin_rewards {where_clause}"))
            .bind(today)
            .bind(filter.temple_id)
            .bind(filter.reward_type)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        r#"
        SELECT {REWARD_COLUMNS} FROM checkin_rewards
        {where_clause}
        ORDER BY reward_points DESC, created_at DESC
        LIMIT $4 OFFSET $5
        "#
    );
    let items: Vec<RewardRecord> = sqlx::query_as(&sql)
        .bind(today)
        .bind(filter.temple_id)
        .bind(filter.reward_type)
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

/// 奖励详情
///
/// GET /api/rewards/{id}
pub async fn get_reward(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<RewardRecord>>> {
    let reward = fetch_reward(&state.pool, id).await?;
    Ok(Json(ApiResponse::success(reward)))
}

/// 可领取奖励与进度
///
/// GET /api/rewards/available
pub async fn available_rewards(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<ApiResponse<Vec<AvailableReward>>>> {
    let user_id = user.public_user_id()?;
    let today = Utc::now().date_naive();

    let sql = format!(
        r#"
        SELECT {REWARD_COLUMNS} FROM checkin_rewards
        WHERE is_active = TRUE
          AND (start_date IS NULL OR start_date <= $1)
          AND (end_date IS NULL OR end_date >= $1)
          AND ($2::BIGINT IS NULL OR temple_id IS NULL OR temple_id = $2)
        ORDER BY reward_points DESC, id
        "#
    );

    let mut conn = state.pool.acquire().await?;
    let rewards: Vec<RewardRecord> = sqlx::query_as(&sql)
        .bind(today)
        .bind(query.temple_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut store = PgRewardStore::new(&mut *conn);
    let mut items = Vec::with_capacity(rewards.len());
    for reward in rewards {
        let progress = store.progress(user_id, &reward, today).await?;
        let evaluation = engine::evaluate(&reward.rule(), &progress, today);
        items.push(AvailableReward {
            eligible: evaluation.is_eligible(),
            reason: evaluation
                .outcome
                .err()
                .map(|reason| ApiError::from(reason).to_string()),
            progress: evaluation.progress,
            claim_count: progress.claim_count,
            reward,
        });
    }

    Ok(Json(ApiResponse::success(items)))
}

/// 手动领取奖励
///
/// POST /api/rewards/{id}/claim
pub async fn claim_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<ClaimResponse>>)> {
    let user_id = user.public_user_id()?;
    let today = Utc::now().date_naive();

    let mut tx = state.pool.begin().await?;
    ledger::lock_user(&mut *tx, user_id).await?;
    let outcome = {
        let mut store = PgRewardStore::new(&mut *tx);
        reward::claim_reward(&mut store, user_id, id, today).await?
    };
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            ClaimResponse::from(outcome),
            "领取成功",
        )),
    ))
}

/// 我的领取记录
///
/// GET /api/rewards/my-claims
pub async fn my_claims(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MyClaimsQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<MyClaimsResponse>>> {
    let user_id = user.public_user_id()?;
    let where_clause = "WHERE c.user_id = $1 AND ($2::VARCHAR IS NULL OR r.reward_type = $2)";

    let summary: ClaimSummary = sqlx::query_as(&format!(
        r#"
        SELECT COUNT(*) AS total_claims, COALESCE(SUM(c.points_received), 0)::BIGINT AS total_points
        FROM reward_claims c
        JOIN checkin_rewards r ON r.id = c.reward_id
        {where_clause}
        "#
    ))
    .bind(user_id)
    .bind(query.reward_type)
    .fetch_one(&state.pool)
    .await?;

    let items: Vec<ClaimItem> = sqlx::query_as(&format!(
        r#"
        SELECT c.id, c.reward_id, r.name AS reward_name, r.reward_type, r.temple_id,
               c.points_received, c.claim_type, c.related_checkin_id, c.claim_date, c.claimed_at
        FROM reward_claims c
        JOIN checkin_rewards r ON r.id = c.reward_id
        {where_clause}
        ORDER BY c.claimed_at DESC, c.id DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(user_id)
    .bind(query.reward_type)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    let page = PageResponse::new(
        items,
        summary.total_claims,
        pagination.page(),
        pagination.limit(),
    );
    Ok(Json(ApiResponse::success(MyClaimsResponse { page, summary })))
}

// ============================================
// 寺庙后台
// ============================================

/// 寺庙奖励列表（含停用）
///
/// GET /api/temple-admin/temples/{id}/rewards
pub async fn staff_list_rewards(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<RewardRecord>>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageRewards)?;

    let sql = format!(
        "SELECT {REWARD_COLUMNS} FROM checkin_rewards WHERE temple_id = $1 ORDER BY created_at DESC"
    );
    let rewards: Vec<RewardRecord> = sqlx::query_as(&sql)
        .bind(temple_id)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(ApiResponse::success(rewards)))
}

/// 新增寺庙奖励
///
/// POST /api/temple-admin/temples/{id}/rewards
pub async fn staff_create_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Path(temple_id): Path<i64>,
    Json(req): Json<CreateRewardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RewardRecord>>)> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageRewards)?;
    req.validate()?;

    let draft = RewardDraft::from_create(req, Some(temple_id));
    let reward = insert_reward(&state.pool, &user, &draft).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(reward))))
}

/// 更新寺庙奖励
///
/// PUT /api/temple-admin/temples/{id}/rewards/{reward_id}
pub async fn staff_update_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, reward_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateRewardRequest>,
) -> Result<Json<ApiResponse<RewardRecord>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageRewards)?;
    req.validate()?;

    let existing = fetch_scoped(&state.pool, reward_id, Some(temple_id)).await?;
    let reward = update_reward(&state.pool, &existing, req).await?;
    Ok(Json(ApiResponse::success(reward)))
}

/// 删除寺庙奖励
///
/// DELETE /api/temple-admin/temples/{id}/rewards/{reward_id}
pub async fn staff_delete_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, reward_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<()>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ManageRewards)?;
    fetch_scoped(&state.pool, reward_id, Some(temple_id)).await?;
    remove_reward(&state.pool, reward_id).await
}

/// 寺庙奖励统计
///
/// GET /api/temple-admin/temples/{id}/rewards/{reward_id}/statistics
pub async fn staff_reward_statistics(
    State(state): State<AppState>,
    user: AuthUser,
    Path((temple_id, reward_id)): Path<(i64, i64)>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<RewardStatistics>>> {
    TempleScope::ensure(user.claims(), temple_id, TemplePermission::ViewStats)?;
    fetch_scoped(&state.pool, reward_id, Some(temple_id)).await?;
    let stats = reward_statistics(&state.pool, reward_id, query.days).await?;
    Ok(Json(ApiResponse::success(stats)))
}

// ============================================
// 总后台
// ============================================

/// 全部奖励
///
/// GET /api/admin/rewards
pub async fn admin_list_rewards(
    State(state): State<AppState>,
    Query(filter): Query<RewardFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<RewardRecord>>>> {
    let where_clause = r#"
        WHERE ($1::BIGINT IS NULL OR temple_id = $1)
          AND ($2::VARCHAR IS NULL OR reward_type = $2)
    "#;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM checkin_rewards {where_clause}"))
            .bind(filter.temple_id)
            .bind(filter.reward_type)
            .fetch_one(&state.pool)
            .await?;

    let sql = format!(
        "SELECT {REWARD_COLUMNS} FROM checkin_rewards {where_clause} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
    );
    let items: Vec<RewardRecord> = sqlx::query_as(&sql)
        .bind(filter.temple_id)
        .bind(filter.reward_type)
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

/// 新增奖励，`templeId` 为空时为全站奖励
///
/// POST /api/admin/rewards
pub async fn admin_create_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateRewardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RewardRecord>>)> {
    req.validate()?;

    let temple_id = req.temple_id;
    if let Some(temple_id) = temple_id {
        super::temple::fetch_temple(&state.pool, temple_id).await?;
    }

    let draft = RewardDraft::from_create(req, temple_id);
    let reward = insert_reward(&state.pool, &user, &draft).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(reward))))
}

/// 更新奖励
///
/// PUT /api/admin/rewards/{id}
pub async fn admin_update_reward(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRewardRequest>,
) -> Result<Json<ApiResponse<RewardRecord>>> {
    req.validate()?;
    let existing = fetch_reward(&state.pool, id).await?;
    let reward = update_reward(&state.pool, &existing, req).await?;
    Ok(Json(ApiResponse::success(reward)))
}

/// 删除奖励
///
/// DELETE /api/admin/rewards/{id}
pub async fn admin_delete_reward(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    fetch_reward(&state.pool, id).await?;
    remove_reward(&state.pool, id).await
}

/// 奖励统计
///
/// GET /api/admin/rewards/{id}/statistics
pub async fn admin_reward_statistics(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<RewardStatistics>>> {
    fetch_reward(&state.pool, id).await?;
    let stats = reward_statistics(&state.pool, id, query.days).await?;
    Ok(Json(ApiResponse::success(stats)))
}

// ============================================
// 内部函数
// ============================================

async fn fetch_reward(pool: &PgPool, id: i64) -> Result<RewardRecord> {
    let sql = format!("SELECT {REWARD_COLUMNS} FROM checkin_rewards WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::RewardNotFound(id))
}

async fn fetch_scoped(pool: &PgPool, id: i64, temple_id: Option<i64>) -> Result<RewardRecord> {
    let reward = fetch_reward(pool, id).await?;
    if temple_id.is_some() && reward.temple_id != temple_id {
        return Err(ApiError::Forbidden("此奖励不属于您的寺庙".to_string()));
    }
    Ok(reward)
}

async fn insert_reward(pool: &PgPool, user: &AuthUser, draft: &RewardDraft) -> Result<RewardRecord> {
    draft.check()?;

    let sql = format!(
        r#"
        INSERT INTO checkin_rewards
            (temple_id, name, description, reward_type, condition_value, reward_points,
             is_repeatable, is_active, start_date, end_date, created_by_type, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {REWARD_COLUMNS}
        "#
    );
    let reward: RewardRecord = sqlx::query_as(&sql)
        .bind(draft.temple_id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.reward_type)
        .bind(draft.condition_value)
        .bind(draft.reward_points)
        .bind(draft.is_repeatable)
        .bind(draft.is_active)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(user.claims().account_type.as_str())
        .bind(user.id()?)
        .fetch_one(pool)
        .await?;

    info!(
        reward_id = reward.id,
        temple_id = ?reward.temple_id,
        reward_type = reward.reward_type.as_str(),
        "Reward created"
    );
    Ok(reward)
}

async fn update_reward(
    pool: &PgPool,
    existing: &RewardRecord,
    req: UpdateRewardRequest,
) -> Result<RewardRecord> {
    let draft = RewardDraft::merged(existing, req);
    draft.check()?;

    let sql = format!(
        r#"
        UPDATE checkin_rewards SET
            name = $2, description = $3, reward_type = $4, condition_value = $5,
            reward_points = $6, is_repeatable = $7, is_active = $8, start_date = $9,
            end_date = $10, updated_at = NOW()
        WHERE id = $1
        RETURNING {REWARD_COLUMNS}
        "#
    );
    let reward: RewardRecord = sqlx::query_as(&sql)
        .bind(existing.id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.reward_type)
        .bind(draft.condition_value)
        .bind(draft.reward_points)
        .bind(draft.is_repeatable)
        .bind(draft.is_active)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .fetch_one(pool)
        .await?;

    info!(reward_id = reward.id, "Reward updated");
    Ok(reward)
}

/// 已有领取记录时停用，否则直接删除
async fn remove_reward(pool: &PgPool, id: i64) -> Result<Json<ApiResponse<()>>> {
    let claimed: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reward_claims WHERE reward_id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await?;

    if claimed {
        sqlx::query("UPDATE checkin_rewards SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        info!(reward_id = id, "Reward deactivated");
        return Ok(Json(ApiResponse::success_with_message((), "奖励已有领取记录，已改为停用")));
    }

    sqlx::query("DELETE FROM checkin_rewards WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    info!(reward_id = id, "Reward deleted");
    Ok(Json(ApiResponse::<()>::success_empty()))
}

async fn reward_statistics(pool: &PgPool, id: i64, days: Option<i64>) -> Result<RewardStatistics> {
    let days = days.unwrap_or(30).clamp(1, 365);
    let since = Utc::now().date_naive() - Duration::days(days - 1);

    let (total_claims, total_points, unique_users, claims_in_period): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(points_received), 0)::BIGINT,
                   COUNT(DISTINCT user_id),
                   COUNT(*) FILTER (WHERE claim_date >= $2)
            FROM reward_claims
            WHERE reward_id = $1
            "#,
        )
        .bind(id)
        .bind(since)
        .fetch_one(pool)
        .await?;

    let daily_trend: Vec<DailyCount> = sqlx::query_as(
        r#"
        SELECT claim_date AS date, COUNT(*) AS count
        FROM reward_claims
        WHERE reward_id = $1 AND claim_date >= $2
        GROUP BY claim_date
        ORDER BY claim_date
        "#,
    )
    .bind(id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(RewardStatistics {
        reward_id: id,
        total_claims,
        total_points,
        unique_users,
        period_days: days,
        claims_in_period,
        daily_trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(value: serde_json::Value) -> CreateRewardRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_request_field_validation() {
        let req = create(json!({
            "name": "连续七天",
            "rewardType": "consecutive_days",
            "conditionValue": 0,
            "rewardPoints": 50
        }));
        assert!(req.validate().is_err());

        let req = create(json!({
            "name": "连续七天",
            "rewardType": "consecutive_days",
            "conditionValue": 7,
            "rewardPoints": 0
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_draft_rejects_inverted_window() {
        let req = create(json!({
            "name": "春节加成",
            "rewardType": "daily_bonus",
            "rewardPoints": 5,
            "startDate": "2025-02-10",
            "endDate": "2025-02-01"
        }));
        let draft = RewardDraft::from_create(req, Some(1));
        assert!(matches!(draft.check(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_first_time_requires_temple() {
        let req = create(json!({
            "name": "初次参拜",
            "rewardType": "first_time",
            "rewardPoints": 30
        }));
        let site_wide = RewardDraft::from_create(req, None);
        assert!(site_wide.check().is_err());

        let temple = RewardDraft {
            temple_id: Some(3),
            ..site_wide
        };
        assert!(temple.check().is_ok());
    }

    #[test]
    fn test_merged_keeps_unspecified_fields() {
        let now = Utc::now();
        let existing = RewardRecord {
            id: 5,
            temple_id: Some(2),
            name: "累计十次".to_string(),
            description: Some("十次参拜".to_string()),
            reward_type: RewardType::TotalCount,
            condition_value: 10,
            reward_points: 100,
            is_repeatable: true,
            is_active: true,
            start_date: None,
            end_date: None,
            created_by_type: "temple_admin".to_string(),
            created_by: 1,
            created_at: now,
            updated_at: now,
        };

        let draft = RewardDraft::merged(
            &existing,
            UpdateRewardRequest {
                reward_points: Some(150),
                ..Default::default()
            },
        );
        assert_eq!(draft.reward_points, 150);
        assert_eq!(draft.condition_value, 10);
        assert_eq!(draft.name, "累计十次");
        assert_eq!(draft.temple_id, Some(2));
        assert!(draft.is_repeatable);
    }
}
