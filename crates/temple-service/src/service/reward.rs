//! 签到奖励发放
//!
//! 资格判定在 [`crate::engine::eligibility`]，这里负责读取进度、写入领取记录、
//! 入账与通知。数据访问抽象为 [`RewardStore`]，生产实现绑定在调用方的事务连接上。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgConnection};
use temple_shared::observability::metrics;
use tracing::info;

use crate::engine::{self, RewardRule, UserProgress};
use crate::error::{ApiError, Result};
use crate::models::{ClaimType, NotificationType, PointKind, RewardType};
use crate::service::ledger::{self, PointChange};
use crate::service::notification::{self, NewNotification};

/// 奖励规则记录
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRecord {
    pub id: i64,
    pub temple_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub reward_type: RewardType,
    pub condition_value: i32,
    pub reward_points: i64,
    pub is_repeatable: bool,
    pub is_active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_by_type: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RewardRecord {
    pub fn rule(&self) -> RewardRule {
        RewardRule {
            temple_id: self.temple_id,
            reward_type: self.reward_type,
            condition_value: self.condition_value,
            is_repeatable: self.is_repeatable,
            is_active: self.is_active,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

pub const REWARD_COLUMNS: &str = "id, temple_id, name, description, reward_type, condition_value, \
     reward_points, is_repeatable, is_active, start_date, end_date, created_by_type, created_by, \
     created_at, updated_at";

/// 待写入的领取记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub user_id: i64,
    pub reward_id: i64,
    pub points: i64,
    pub claim_type: ClaimType,
    pub related_checkin_id: Option<i64>,
    pub claim_date: NaiveDate,
}

/// 已发放的奖励
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedReward {
    pub claim_id: i64,
    pub reward_id: i64,
    pub reward_name: String,
    pub reward_type: RewardType,
    pub points_received: i64,
}

/// 手动领取结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub reward: GrantedReward,
    pub blessing_points: i64,
}

/// 奖励数据访问
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardStore: Send {
    /// 指定寺庙与全站范围内启用且在有效期内的奖励
    async fn active_rewards(
        &mut self,
        temple_id: Option<i64>,
        today: NaiveDate,
    ) -> Result<Vec<RewardRecord>>;

    async fn reward_by_id(&mut self, reward_id: i64) -> Result<Option<RewardRecord>>;

    /// 用户在奖励范围内的进度
    async fn progress(
        &mut self,
        user_id: i64,
        reward: &RewardRecord,
        today: NaiveDate,
    ) -> Result<UserProgress>;

    async fn record_claim(&mut self, claim: &NewClaim) -> Result<i64>;

    /// 入账并返回余额
    async fn credit_points(
        &mut self,
        user_id: i64,
        points: i64,
        claim_id: i64,
        note: &str,
    ) -> Result<i64>;

    async fn notify_reward(
        &mut self,
        user_id: i64,
        reward: &RewardRecord,
        claim_id: i64,
    ) -> Result<()>;
}

/// 签到后自动发放所有符合条件的奖励
pub async fn grant_eligible_rewards<S: RewardStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    temple_id: Option<i64>,
    checkin_id: i64,
    today: NaiveDate,
) -> Result<Vec<GrantedReward>> {
    let rewards = store.active_rewards(temple_id, today).await?;
    let mut granted = Vec::new();

    for reward in rewards {
        let progress = store.progress(user_id, &reward, today).await?;
        if !engine::evaluate(&reward.rule(), &progress, today).is_eligible() {
            continue;
        }

        let (reward_granted, _) =
            grant(store, user_id, &reward, ClaimType::Auto, Some(checkin_id), today).await?;
        granted.push(reward_granted);
    }

    Ok(granted)
}

/// 手动领取奖励
pub async fn claim_reward<S: RewardStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    reward_id: i64,
    today: NaiveDate,
) -> Result<ClaimOutcome> {
    let reward = store
        .reward_by_id(reward_id)
        .await?
        .ok_or(ApiError::RewardNotFound(reward_id))?;

    let progress = store.progress(user_id, &reward, today).await?;
    engine::evaluate(&reward.rule(), &progress, today).outcome?;

    let (granted, balance) = grant(store, user_id, &reward, ClaimType::Manual, None, today).await?;
    Ok(ClaimOutcome {
        reward: granted,
        blessing_points: balance,
    })
}

async fn grant<S: RewardStore + ?Sized>(
    store: &mut S,
    user_id: i64,
    reward: &RewardRecord,
    claim_type: ClaimType,
    related_checkin_id: Option<i64>,
    today: NaiveDate,
) -> Result<(GrantedReward, i64)> {
    let claim_id = store
        .record_claim(&NewClaim {
            user_id,
            reward_id: reward.id,
            points: reward.reward_points,
            claim_type,
            related_checkin_id,
            claim_date: today,
        })
        .await?;

    let balance = store
        .credit_points(user_id, reward.reward_points, claim_id, &reward.name)
        .await?;
    store.notify_reward(user_id, reward, claim_id).await?;

    metrics::record_reward_claim(reward.reward_type.as_str(), claim_type.as_str());
    info!(
        user_id = user_id,
        reward_id = reward.id,
        claim_id = claim_id,
        claim_type = claim_type.as_str(),
        points = reward.reward_points,
        "Reward granted"
    );

    Ok((
        GrantedReward {
            claim_id,
            reward_id: reward.id,
            reward_name: reward.name.clone(),
            reward_type: reward.reward_type,
            points_received: reward.reward_points,
        },
        balance,
    ))
}

/// 基于事务连接的 [`RewardStore`]
pub struct PgRewardStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgRewardStore<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    total_checkins: i64,
    checked_in_today: bool,
    claim_count: i64,
    last_claim_date: Option<NaiveDate>,
}

#[async_trait]
impl RewardStore for PgRewardStore<'_> {
    async fn active_rewards(
        &mut self,
        temple_id: Option<i64>,
        today: NaiveDate,
    ) -> Result<Vec<RewardRecord>> {
        let sql = format!(
            r#"
            SELECT {REWARD_COLUMNS}
            FROM checkin_rewards
            WHERE is_active = TRUE
              AND (temple_id IS NULL OR temple_id = $1)
              AND (start_date IS NULL OR start_date <= $2)
              AND (end_date IS NULL OR end_date >= $2)
            ORDER BY id
            "#
        );
        let rewards = sqlx::query_as::<_, RewardRecord>(&sql)
            .bind(temple_id)
            .bind(today)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rewards)
    }

    async fn reward_by_id(&mut self, reward_id: i64) -> Result<Option<RewardRecord>> {
        let sql = format!("SELECT {REWARD_COLUMNS} FROM checkin_rewards WHERE id = $1");
        let reward = sqlx::query_as::<_, RewardRecord>(&sql)
            .bind(reward_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(reward)
    }

    async fn progress(
        &mut self,
        user_id: i64,
        reward: &RewardRecord,
        today: NaiveDate,
    ) -> Result<UserProgress> {
        let row: ProgressRow = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM checkins
                 WHERE user_id = $1 AND ($2::BIGINT IS NULL OR temple_id = $2)) AS total_checkins,
                EXISTS (SELECT 1 FROM checkins
                 WHERE user_id = $1 AND ($2::BIGINT IS NULL OR temple_id = $2)
                   AND checkin_date = $4) AS checked_in_today,
                (SELECT COUNT(*) FROM reward_claims
                 WHERE user_id = $1 AND reward_id = $3) AS claim_count,
                (SELECT MAX(claim_date) FROM reward_claims
                 WHERE user_id = $1 AND reward_id = $3) AS last_claim_date
            "#,
        )
        .bind(user_id)
        .bind(reward.temple_id)
        .bind(reward.id)
        .bind(today)
        .fetch_one(&mut *self.conn)
        .await?;

        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT checkin_date FROM checkins
            WHERE user_id = $1 AND ($2::BIGINT IS NULL OR temple_id = $2)
            ORDER BY checkin_date DESC
            "#,
        )
        .bind(user_id)
        .bind(reward.temple_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(UserProgress {
            total_checkins: row.total_checkins,
            checked_in_today: row.checked_in_today,
            current_streak: engine::current_streak(&dates, today),
            claim_count: row.claim_count,
            last_claim_date: row.last_claim_date,
        })
    }

    async fn record_claim(&mut self, claim: &NewClaim) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reward_claims
                (user_id, reward_id, points_received, claim_type, related_checkin_id, claim_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(claim.user_id)
        .bind(claim.reward_id)
        .bind(claim.points)
        .bind(claim.claim_type)
        .bind(claim.related_checkin_id)
        .bind(claim.claim_date)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    async fn credit_points(
        &mut self,
        user_id: i64,
        points: i64,
        claim_id: i64,
        note: &str,
    ) -> Result<i64> {
        let change = PointChange::new(user_id, points, PointKind::Reward)
            .reference("reward_claim", claim_id)
            .note(note);
        ledger::apply(&mut *self.conn, &change).await
    }

    async fn notify_reward(
        &mut self,
        user_id: i64,
        reward: &RewardRecord,
        claim_id: i64,
    ) -> Result<()> {
        let notification = NewNotification::new(
            NotificationType::RewardReceived,
            "获得签到奖励",
            format!("恭喜获得「{}」，功德值 +{}", reward.name, reward.reward_points),
        )
        .related("reward_claim", claim_id)
        .data(json!({
            "rewardId": reward.id,
            "rewardType": reward.reward_type,
            "points": reward.reward_points,
        }));
        notification::notify(&mut *self.conn, user_id, &notification).await?;
        Ok(())
    }
}
