//! 认证相关的 HTTP 处理器
//!
//! 一般用户注册、三类账号登录、获取当前账号和刷新 Token

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::auth::{AuthUser, TokenSubject, hash_password};
use crate::dto::ApiResponse;
use crate::error::{ApiError, Result};
use crate::models::{
    AccountType, PUBLIC_USER_COLUMNS, PublicUserRecord, SUPER_ADMIN_COLUMNS, SuperAdminRecord,
    TEMPLE_ADMIN_COLUMNS, TempleAdminRecord, TempleAdminView, permission_names,
};
use crate::service::account::{self, map_email_conflict};
use crate::state::AppState;

// ============================================
// 请求/响应 DTO
// ============================================

/// 注册请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100, message = "姓名长度必须在 2-100 之间"))]
    pub name: String,
    #[validate(email(message = "Email 格式不正确"))]
    pub email: String,
    #[validate(length(min = 6, max = 100, message = "密码至少需要 6 个字符"))]
    pub password: String,
}

/// 登录请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Email 格式不正确"))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "请输入密码"))]
    pub password: String,
}

/// 登录/注册响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse<T> {
    pub user: T,
    pub token: String,
    pub expires_at: i64,
}

/// 当前账号
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CurrentAccount {
    Public(PublicUserRecord),
    TempleAdmin(TempleAdminView),
    SuperAdmin(SuperAdminRecord),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAccountResponse {
    pub account_type: AccountType,
    pub account: CurrentAccount,
}

/// Token 刷新响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub token: String,
    pub expires_at: i64,
}

// ============================================
// API 处理器
// ============================================

/// 一般用户注册
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse<PublicUserRecord>>>)> {
    req.validate()?;

    let password_hash = hash_password(&req.password)?;
    let sql = format!(
        "INSERT INTO public_users (name, email, password_hash) VALUES ($1, $2, $3) RETURNING {PUBLIC_USER_COLUMNS}"
    );
    let user: PublicUserRecord = sqlx::query_as(&sql)
        .bind(req.name.trim())
        .bind(req.email.trim().to_lowercase())
        .bind(password_hash)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| map_email_conflict(e, AccountType::Public))?;

    let (token, expires_at) = state.jwt_manager.generate_token(&TokenSubject {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        account_type: AccountType::Public,
        temple_id: None,
        permissions: vec![],
    })?;

    info!(user_id = user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            AuthResponse {
                user,
                token,
                expires_at,
            },
            "注册成功",
        )),
    ))
}

/// 一般用户登录
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse<PublicUserRecord>>>> {
    req.validate()?;

    let account =
        account::authenticate(&state.pool, &state.auth, AccountType::Public, &req.email, &req.password)
            .await?;
    let user = fetch_public_user(&state, account.id).await?;

    let (token, expires_at) = state.jwt_manager.generate_token(&TokenSubject {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        account_type: AccountType::Public,
        temple_id: None,
        permissions: vec![],
    })?;

    Ok(Json(ApiResponse::success(AuthResponse {
        user,
        token,
        expires_at,
    })))
}

/// 寺庙管理员登录，Token 携带寺庙 ID 与有效权限
///
/// POST /api/temple-admin/auth/login
pub async fn temple_admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse<TempleAdminView>>>> {
    req.validate()?;

    let account = account::authenticate(
        &state.pool,
        &state.auth,
        AccountType::TempleAdmin,
        &req.email,
        &req.password,
    )
    .await?;
    let admin = fetch_temple_admin(&state, account.id).await?;

    let (token, expires_at) = state.jwt_manager.generate_token(&TokenSubject {
        id: admin.id,
        name: admin.name.clone(),
        email: admin.email.clone(),
        account_type: AccountType::TempleAdmin,
        temple_id: Some(admin.temple_id),
        permissions: permission_names(&admin.effective_permissions()),
    })?;

    Ok(Json(ApiResponse::success(AuthResponse {
        user: TempleAdminView::from(admin),
        token,
        expires_at,
    })))
}

/// 超级管理员登录
///
/// POST /api/admin/auth/login
pub async fn super_admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse<SuperAdminRecord>>>> {
    req.validate()?;

    let account = account::authenticate(
        &state.pool,
        &state.auth,
        AccountType::SuperAdmin,
        &req.email,
        &req.password,
    )
    .await?;
    let admin = fetch_super_admin(&state, account.id).await?;

    let (token, expires_at) = state.jwt_manager.generate_token(&TokenSubject {
        id: admin.id,
        name: admin.name.clone(),
        email: admin.email.clone(),
        account_type: AccountType::SuperAdmin,
        temple_id: None,
        permissions: vec![],
    })?;

    Ok(Json(ApiResponse::success(AuthResponse {
        user: admin,
        token,
        expires_at,
    })))
}

/// 获取当前账号
///
/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CurrentAccountResponse>>> {
    let id = user.id()?;
    let account_type = user.claims().account_type;

    let account = match account_type {
        AccountType::Public => CurrentAccount::Public(fetch_public_user(&state, id).await?),
        AccountType::TempleAdmin => {
            CurrentAccount::TempleAdmin(TempleAdminView::from(fetch_temple_admin(&state, id).await?))
        }
        AccountType::SuperAdmin => CurrentAccount::SuperAdmin(fetch_super_admin(&state, id).await?),
    };

    Ok(Json(ApiResponse::success(CurrentAccountResponse {
        account_type,
        account,
    })))
}

/// 刷新 Token
///
/// 按数据库重新读取账号，停用或锁定中的账号不能续期，寺庙与权限取最新值。
///
/// POST /api/auth/refresh
pub async fn refresh_token(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<RefreshResponse>>> {
    let session = account::load_session(&state.pool, user.claims()).await?;
    if session.is_locked(Utc::now()) {
        return Err(ApiError::AccountLocked);
    }

    let (token, expires_at) = state.jwt_manager.generate_token(&session.subject)?;
    info!(
        account_type = session.subject.account_type.as_str(),
        account_id = session.subject.id,
        "Token refreshed"
    );
    Ok(Json(ApiResponse::success(RefreshResponse { token, expires_at })))
}

async fn fetch_public_user(state: &AppState, id: i64) -> Result<PublicUserRecord> {
    let sql = format!("SELECT {PUBLIC_USER_COLUMNS} FROM public_users WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))
}

async fn fetch_temple_admin(state: &AppState, id: i64) -> Result<TempleAdminRecord> {
    let sql = format!("SELECT {TEMPLE_ADMIN_COLUMNS} FROM temple_admin_users WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))
}

async fn fetch_super_admin(state: &AppState, id: i64) -> Result<SuperAdminRecord> {
    let sql = format!("SELECT {SUPER_ADMIN_COLUMNS} FROM super_admin_users WHERE id = $1");
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::UserNotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_validation() {
        let ok = RegisterRequest {
            name: "林信众".to_string(),
            email: "lin@example.com".to_string(),
            password: "secret1".to_string(),
        };
        assert!(ok.validate().is_ok());

        let short_password = RegisterRequest {
            password: "12345".to_string(),
            ..ok_request()
        };
        assert!(short_password.validate().is_err());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            ..ok_request()
        };
        assert!(bad_email.validate().is_err());

        let short_name = RegisterRequest {
            name: "林".to_string(),
            ..ok_request()
        };
        assert!(short_name.validate().is_err());
    }

    fn ok_request() -> RegisterRequest {
        RegisterRequest {
            name: "林信众".to_string(),
            email: "lin@example.com".to_string(),
            password: "secret1".to_string(),
        }
    }

    #[test]
    fn test_login_request_deserialize() {
        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.tw","password":"pw"}"#).unwrap();
        assert!(req.validate().is_ok());
    }
}
