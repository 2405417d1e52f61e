//! 认证模块
//!
//! 提供 JWT Token 生成与验证、密码处理、请求身份提取和寺庙范围校验

mod extract;
mod jwt;
mod password;
mod scope;

pub use extract::{AuthUser, MaybeAuthUser};
pub use jwt::{Claims, JwtConfig, JwtManager, TokenSubject};
pub use password::{hash_password, verify_password};
pub use scope::TempleScope;
