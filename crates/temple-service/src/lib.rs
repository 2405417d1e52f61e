//! 寺庙功德平台服务
//!
//! 信众签到累积功德值、兑换结缘品，寺庙管理员与超级管理员通过后台维护资料的 REST API。
//!
//! ## 核心功能
//!
//! - **签到**：GPS 地理围栏、NFC 标签与每日轮换 QR 码签到，连续签到统计
//! - **奖励引擎**：首次、每日、连续天数、累计次数四类奖励的资格判断与自动发放
//! - **功德值**：签到、奖励、兑换、退款与人工调整均写入流水
//! - **兑换订单**：扣点减库存、取消退款与后台状态流转
//! - **寺庙后台**：公告、活动报名、商品、订单与人员权限
//! - **总后台**：用户、寺庙、奖励、统计、审计日志与系统设置
//!
//! ## 模块结构
//!
//! - `auth`: JWT、密码与请求身份提取
//! - `engine`: 不依赖数据库的签到规则计算
//! - `service`: 需要事务保护的业务流程
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: 认证、账号类型与审计中间件
//! - `routes`: 路由配置

pub mod app;
pub mod auth;
pub mod dto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod service;
pub mod state;

pub use app::build_router;
pub use dto::{ApiResponse, PageResponse, PaginationParams};
pub use error::{ApiError, Result};
pub use state::AppState;
