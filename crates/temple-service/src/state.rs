//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态

use sqlx::PgPool;
use std::sync::Arc;
use temple_shared::config::{AuthConfig, CheckinConfig};

use crate::auth::{JwtConfig, JwtManager};

/// Axum 应用共享状态
///
/// 连接池本身可廉价克隆，其余配置通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池
    pub pool: PgPool,
    /// JWT 管理器
    pub jwt_manager: Arc<JwtManager>,
    /// 登录锁定等认证策略
    pub auth: Arc<AuthConfig>,
    /// 签到功德值与能量配置
    pub checkin: Arc<CheckinConfig>,
}

impl AppState {
    /// 根据配置创建应用状态
    pub fn new(pool: PgPool, auth: AuthConfig, checkin: CheckinConfig) -> Self {
        let jwt_manager = JwtManager::new(JwtConfig::from(&auth));
        Self {
            pool,
            jwt_manager: Arc::new(jwt_manager),
            auth: Arc::new(auth),
            checkin: Arc::new(checkin),
        }
    }

    /// 签发 QR 签到码使用的密钥，与 JWT 密钥一致
    pub fn qr_secret(&self) -> &str {
        &self.auth.jwt_secret
    }
}
