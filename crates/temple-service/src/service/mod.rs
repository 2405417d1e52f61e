//! 业务服务层
//!
//! 多行写入的业务流程，除登录外均在调用方传入的事务连接上执行

pub mod account;
pub mod checkin;
pub mod ledger;
pub mod notification;
pub mod redemption;
pub mod reward;
