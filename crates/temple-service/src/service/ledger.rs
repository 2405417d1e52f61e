//! 功德值账本
//!
//! 所有余额变动都经由 [`apply`]，同一事务内更新余额并写入一条流水。
//! 调用方应先以 [`lock_user`] 锁定用户行。

use sqlx::{FromRow, PgConnection};
use temple_shared::observability::metrics;
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::models::PointKind;

/// 被锁定的用户行
#[derive(Debug, Clone, FromRow)]
pub struct LockedUser {
    pub id: i64,
    pub name: String,
    pub blessing_points: i64,
    pub is_active: bool,
}

/// 以 `FOR UPDATE` 锁定一般用户行，直到事务结束，已停用的用户被拒绝
pub async fn lock_user(conn: &mut PgConnection, user_id: i64) -> Result<LockedUser> {
    let user = lock_balance(conn, user_id).await?;
    if !user.is_active {
        return Err(ApiError::AccountDisabled);
    }
    Ok(user)
}

/// 锁定用户行但不检查启用状态，供管理员操作使用
pub async fn lock_balance(conn: &mut PgConnection, user_id: i64) -> Result<LockedUser> {
    sqlx::query_as(
        r#"
        SELECT id, name, blessing_points, is_active
        FROM public_users
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ApiError::UserNotFound(user_id))
}

/// 一次余额变动
#[derive(Debug, Clone)]
pub struct PointChange<'a> {
    pub user_id: i64,
    /// 正数为增加，负数为扣除
    pub delta: i64,
    pub kind: PointKind,
    pub reference_type: Option<&'a str>,
    pub reference_id: Option<i64>,
    pub note: Option<&'a str>,
}

impl<'a> PointChange<'a> {
    pub fn new(user_id: i64, delta: i64, kind: PointKind) -> Self {
        Self {
            user_id,
            delta,
            kind,
            reference_type: None,
            reference_id: None,
            note: None,
        }
    }

    pub fn reference(mut self, reference_type: &'a str, reference_id: i64) -> Self {
        self.reference_type = Some(reference_type);
        self.reference_id = Some(reference_id);
        self
    }

    pub fn note(mut self, note: &'a str) -> Self {
        self.note = Some(note);
        self
    }
}

/// 变动余额并写入流水，返回变动后的余额
///
/// 余额不足时返回 `InsufficientPoints`，不会产生任何写入。
pub async fn apply(conn: &mut PgConnection, change: &PointChange<'_>) -> Result<i64> {
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE public_users
        SET blessing_points = blessing_points + $2, updated_at = NOW()
        WHERE id = $1 AND blessing_points + $2 >= 0
        RETURNING blessing_points
        "#,
    )
    .bind(change.user_id)
    .bind(change.delta)
    .fetch_optional(&mut *conn)
    .await?;

    let balance = match balance {
        Some(b) => b,
        None => {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT blessing_points FROM public_users WHERE id = $1")
                    .bind(change.user_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            return match current {
                Some(current) => Err(ApiError::InsufficientPoints {
                    required: -change.delta,
                    current,
                }),
                None => Err(ApiError::UserNotFound(change.user_id)),
            };
        }
    };

    sqlx::query(
        r#"
        INSERT INTO point_ledger
            (user_id, delta, balance_after, kind, reference_type, reference_id, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(change.user_id)
    .bind(change.delta)
    .bind(balance)
    .bind(change.kind)
    .bind(change.reference_type)
    .bind(change.reference_id)
    .bind(change.note)
    .execute(&mut *conn)
    .await?;

    metrics::record_points_change(change.kind.as_str(), change.delta);
    debug!(
        user_id = change.user_id,
        delta = change.delta,
        balance = balance,
        kind = change.kind.as_str(),
        "Points applied"
    );

    Ok(balance)
}

/// 管理员调整：扣除时最多扣到 0
pub fn floor_adjustment(current: i64, adjustment: i64) -> i64 {
    adjustment.max(-current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_change_builder() {
        let change = PointChange::new(1, -300, PointKind::Redemption)
            .reference("redemption", 42)
            .note("平安御守");
        assert_eq!(change.delta, -300);
        assert_eq!(change.reference_type, Some("redemption"));
        assert_eq!(change.reference_id, Some(42));
        assert_eq!(change.note, Some("平安御守"));
    }

    #[test]
    fn test_floor_adjustment() {
        assert_eq!(floor_adjustment(50, -80), -50);
        assert_eq!(floor_adjustment(50, -20), -20);
        assert_eq!(floor_adjustment(0, -10), 0);
        assert_eq!(floor_adjustment(10, 25), 25);
    }
}
