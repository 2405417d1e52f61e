//! 中间件模块
//!
//! 提供认证、账号检查和审计日志中间件

mod account;
pub mod audit;
mod auth;

pub use account::{require_account_type, require_live_account};
pub use audit::audit_middleware;
pub use auth::auth_middleware;
