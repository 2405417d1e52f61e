//! 请求身份提取器
//!
//! 读取 `auth_middleware` 注入请求扩展的 Claims

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::Claims;
use crate::error::ApiError;
use crate::models::AccountType;

/// 已认证的账号，缺少 Claims 时返回 401
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn id(&self) -> Result<i64, ApiError> {
        self.0.user_id()
    }

    pub fn claims(&self) -> &Claims {
        &self.0
    }

    /// 要求当前账号为一般用户，返回用户 ID
    pub fn public_user_id(&self) -> Result<i64, ApiError> {
        if !self.0.is(AccountType::Public) {
            return Err(ApiError::Forbidden("仅限一般用户使用".to_string()));
        }
        self.id()
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("未认证".to_string()))
    }
}

/// 可选身份，用于公开目录接口按登录状态补充信息
#[derive(Debug, Clone, Default)]
pub struct MaybeAuthUser(pub Option<Claims>);

impl MaybeAuthUser {
    /// 已登录的一般用户 ID
    pub fn public_user_id(&self) -> Option<i64> {
        self.0
            .as_ref()
            .filter(|c| c.is(AccountType::Public))
            .and_then(|c| c.user_id().ok())
    }
}

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<Claims>().cloned()))
    }
}
