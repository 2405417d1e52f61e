//! 共享库
//!
//! 寺庙功德平台各组件共用的基础设施：分层配置、数据库连接池、错误类型与可观测性。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
