//! HTTP 请求处理器模块
//!
//! 按资源划分；同一资源的公开、寺庙后台与总后台接口放在同一文件中

pub mod address;
pub mod admin;
pub mod amulet;
pub mod announcement;
pub mod auth;
pub mod checkin;
pub mod event;
pub mod export;
pub mod insight;
pub mod leaderboard;
pub mod notification;
pub mod pilgrimage;
pub mod product;
pub mod redemption;
pub mod reward;
pub mod staff;
pub mod stats;
pub mod temple;
pub mod user;
