//! 签到规则引擎
//!
//! 不依赖数据库的纯计算：地理围栏、连续签到、奖励资格、QR 签到码与经营报表指标。

pub mod eligibility;
pub mod geo;
pub mod insight;
pub mod qr;
pub mod streak;

pub use eligibility::{Evaluation, Ineligible, Progress, RewardRule, UserProgress, evaluate};
pub use geo::{GeoPoint, distance_km, distance_meters, within_radius};
pub use streak::{StreakSummary, current_streak, longest_streak, milestone_reached};
