//! 通用数据传输对象
//!
//! 统一响应信封、分页与日期参数；各资源的请求/响应体定义在对应的 handler 中

pub mod request;
pub mod response;

pub use request::{
    LimitParams, PaginationParams, end_of_day_exclusive, parse_date, parse_optional_date,
};
pub use response::{ApiResponse, CountResponse, DailyCount, PageResponse};
