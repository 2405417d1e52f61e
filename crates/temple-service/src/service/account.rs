//! 账号登录与初始化
//!
//! 三类账号共用同一套登录规则：密码错误累计次数，达到上限后锁定一段时间。

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use temple_shared::config::AuthConfig;
use tracing::{info, warn};

use crate::auth::{Claims, TokenSubject, hash_password, verify_password};
use crate::error::{ApiError, Result, is_unique_violation};
use crate::models::{AccountType, TempleAdminRole, effective_permissions, permission_names};

/// 登录时读取的账号公共字段
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// 登录失败后的锁定截止时间，未达上限时为 None
pub fn lock_deadline(
    attempts: i32,
    max_attempts: i32,
    lock_minutes: i64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    (attempts >= max_attempts).then(|| now + Duration::minutes(lock_minutes))
}

/// 校验 Email 与密码，成功时重置失败次数并记录登录时间
pub async fn authenticate(
    pool: &PgPool,
    config: &AuthConfig,
    account_type: AccountType,
    email: &str,
    password: &str,
) -> Result<AccountRow> {
    let table = account_type.table();
    let email = email.trim().to_lowercase();

    let sql = format!(
        r#"
        SELECT id, name, email, password_hash, is_active, failed_login_attempts, locked_until
        FROM {table}
        WHERE email = $1
        "#
    );
    let account: AccountRow = sqlx::query_as(&sql)
        .bind(&email)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !account.is_active {
        return Err(ApiError::AccountDisabled);
    }

    let now = Utc::now();
    if account.locked_until.is_some_and(|until| until > now) {
        return Err(ApiError::AccountLocked);
    }

    if !verify_password(password, &account.password_hash)? {
        let attempts = account.failed_login_attempts + 1;
        let locked_until = lock_deadline(
            attempts,
            config.max_failed_logins,
            config.lock_minutes,
            now,
        );

        let sql = format!(
            "UPDATE {table} SET failed_login_attempts = $1, locked_until = $2, updated_at = NOW() WHERE id = $3"
        );
        sqlx::query(&sql)
            .bind(if locked_until.is_some() { 0 } else { attempts })
            .bind(locked_until)
            .bind(account.id)
            .execute(pool)
            .await?;

        if locked_until.is_some() {
            warn!(
                account_type = account_type.as_str(),
                account_id = account.id,
                "Account locked after repeated login failures"
            );
        }
        return Err(ApiError::InvalidCredentials);
    }

    let sql = format!(
        r#"
        UPDATE {table}
        SET failed_login_attempts = 0, locked_until = NULL, last_login_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#
    );
    sqlx::query(&sql).bind(account.id).execute(pool).await?;

    info!(
        account_type = account_type.as_str(),
        account_id = account.id,
        "Login succeeded"
    );
    Ok(account)
}

/// 按 Token 重新读取的账号状态
#[derive(Debug, Clone, FromRow)]
struct SessionRow {
    id: i64,
    name: String,
    email: String,
    is_active: bool,
    locked_until: Option<DateTime<Utc>>,
    temple_id: Option<i64>,
    role: Option<TempleAdminRole>,
    permissions: Option<serde_json::Value>,
}

/// 当前仍然有效的登录账号
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub subject: TokenSubject,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LiveSession {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// 用数据库中的最新资料覆盖 Token 载荷，签发与过期时间不变
    pub fn apply_to(&self, claims: &mut Claims) {
        claims.name = self.subject.name.clone();
        claims.email = self.subject.email.clone();
        claims.temple_id = self.subject.temple_id;
        claims.permissions = self.subject.permissions.clone();
    }
}

/// 按 Token 中的账号重新读取账号状态
///
/// 账号不存在时视为未认证，已停用时拒绝。寺庙管理员的寺庙与权限以数据库为准。
pub async fn load_session(pool: &PgPool, claims: &Claims) -> Result<LiveSession> {
    let id = claims.user_id()?;
    let account_type = claims.account_type;

    let sql = match account_type {
        AccountType::TempleAdmin => r#"
            SELECT id, name, email, is_active, locked_until, temple_id, role, permissions
            FROM temple_admin_users
            WHERE id = $1
            "#
        .to_string(),
        _ => format!(
            r#"
            SELECT id, name, email, is_active, locked_until,
                   NULL::BIGINT AS temple_id, NULL::VARCHAR AS role, NULL::JSONB AS permissions
            FROM {}
            WHERE id = $1
            "#,
            account_type.table()
        ),
    };

    let row: SessionRow = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("账号不存在".to_string()))?;

    if !row.is_active {
        warn!(
            account_type = account_type.as_str(),
            account_id = row.id,
            "Token presented by deactivated account"
        );
        return Err(ApiError::AccountDisabled);
    }

    let permissions = match row.role {
        Some(role) => permission_names(&effective_permissions(role, row.permissions.as_ref())),
        None => vec![],
    };

    Ok(LiveSession {
        subject: TokenSubject {
            id: row.id,
            name: row.name,
            email: row.email,
            account_type,
            temple_id: row.temple_id,
            permissions,
        },
        locked_until: row.locked_until,
    })
}

/// 配置了初始超级管理员且该 Email 尚不存在时创建账号
pub async fn bootstrap_super_admin(pool: &PgPool, config: &AuthConfig) -> Result<bool> {
    let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) else {
        return Ok(false);
    };

    let password_hash = hash_password(password)?;
    let result = sqlx::query(
        r#"
        INSERT INTO super_admin_users (name, email, password_hash)
        VALUES ('系统管理员', $1, $2)
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(email.trim().to_lowercase())
    .bind(password_hash)
    .execute(pool)
    .await?;

    let created = result.rows_affected() > 0;
    if created {
        info!(email = email, "Bootstrap super admin created");
    }
    Ok(created)
}

/// 插入账号时把 Email 唯一约束冲突转换为业务错误
pub fn map_email_conflict(err: sqlx::Error, account_type: AccountType) -> ApiError {
    let constraint = format!("{}_email_key", account_type.table());
    if is_unique_violation(&err, &constraint) {
        ApiError::EmailTaken
    } else {
        ApiError::Database(err)
    }
}
