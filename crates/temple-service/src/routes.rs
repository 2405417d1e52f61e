//! 路由配置模块
//!
//! 按账号类型分组：公开目录、一般用户、任意已登录账号、寺庙后台与总后台。
//! 路径均不含 `/api` 前缀，由 [`api_routes`] 统一挂载。
//!
//! 需要登录的路由组先检查账号类型，再按数据库确认账号仍启用并刷新权限。

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
};

use crate::middleware::{require_account_type, require_live_account};
use crate::models::AccountType;
use crate::{handlers, state::AppState};

const PUBLIC_ONLY: &[AccountType] = &[AccountType::Public];
const TEMPLE_STAFF: &[AccountType] = &[AccountType::TempleAdmin, AccountType::SuperAdmin];
const SUPER_ADMIN_ONLY: &[AccountType] = &[AccountType::SuperAdmin];

/// 登录与注册（无需认证）
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/temple-admin/auth/login",
            post(handlers::auth::temple_admin_login),
        )
        .route("/admin/auth/login", post(handlers::auth::super_admin_login))
}

/// 任意已登录账号
fn session_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/refresh", post(handlers::auth::refresh_token))
        .route_layer(from_fn_with_state(state.clone(), require_live_account))
}

/// 公开目录：寺庙、奖励、商品、公告、活动与排行榜
fn catalogue_routes() -> Router<AppState> {
    Router::new()
        // 寺庙
        .route("/temples", get(handlers::temple::list_temples))
        .route("/temples/nearby", get(handlers::temple::nearby_temples))
        .route("/temples/{id}", get(handlers::temple::get_temple))
        .route(
            "/temples/{id}/announcements",
            get(handlers::announcement::list_temple_announcements),
        )
        .route(
            "/temples/{id}/events",
            get(handlers::event::list_temple_events),
        )
        .route(
            "/announcements/{id}",
            get(handlers::announcement::get_announcement),
        )
        .route("/events/{id}", get(handlers::event::get_event))
        // 奖励
        .route("/rewards", get(handlers::reward::list_rewards))
        .route("/rewards/{id}", get(handlers::reward::get_reward))
        // 商品
        .route("/products", get(handlers::product::list_products))
        .route(
            "/products/categories",
            get(handlers::product::list_categories),
        )
        .route("/products/{id}", get(handlers::product::get_product))
        // 排行榜
        .route(
            "/leaderboard/blessing-points",
            get(handlers::leaderboard::blessing_points),
        )
        .route(
            "/leaderboard/checkins",
            get(handlers::leaderboard::checkins),
        )
        .route("/leaderboard/temples", get(handlers::leaderboard::temples))
}

/// 一般用户：个人资料、护身符、签到、奖励领取、兑换、地址与通知
fn member_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // 个人资料
        .route(
            "/users/profile",
            get(handlers::user::get_profile).put(handlers::user::update_profile),
        )
        .route("/users/password", put(handlers::user::change_password))
        .route(
            "/users/points-history",
            get(handlers::user::points_history),
        )
        .route("/users/summary", get(handlers::stats::my_summary))
        // 护身符
        .route(
            "/amulets",
            post(handlers::amulet::create_amulet).get(handlers::amulet::list_amulets),
        )
        .route(
            "/amulets/{id}",
            get(handlers::amulet::get_amulet)
                .patch(handlers::amulet::update_amulet)
                .delete(handlers::amulet::delete_amulet),
        )
        .route(
            "/amulets/{id}/energy-logs",
            get(handlers::amulet::energy_logs),
        )
        .route(
            "/amulets/{id}/energy/add",
            post(handlers::amulet::add_energy),
        )
        .route(
            "/amulets/{id}/energy/consume",
            post(handlers::amulet::consume_energy),
        )
        // 签到
        .route(
            "/checkins",
            post(handlers::checkin::create_checkin).get(handlers::checkin::list_checkins),
        )
        .route("/checkins/nfc", post(handlers::checkin::nfc_checkin))
        .route("/checkins/today", get(handlers::checkin::today_status))
        .route("/checkins/stats", get(handlers::checkin::checkin_stats))
        .route("/checkins/streak", get(handlers::checkin::checkin_streak))
        .route(
            "/checkins/monthly-stats",
            get(handlers::checkin::monthly_stats),
        )
        .route(
            "/temples/{id}/my-checkins",
            get(handlers::temple::my_temple_checkins),
        )
        // 奖励
        .route(
            "/rewards/available",
            get(handlers::reward::available_rewards),
        )
        .route("/rewards/my-claims", get(handlers::reward::my_claims))
        .route("/rewards/{id}/claim", post(handlers::reward::claim_reward))
        // 活动报名
        .route(
            "/events/{id}/register",
            post(handlers::event::register_event),
        )
        .route(
            "/events/{id}/registration",
            delete(handlers::event::cancel_registration),
        )
        // 收货地址
        .route(
            "/addresses",
            get(handlers::address::list_addresses).post(handlers::address::create_address),
        )
        .route(
            "/addresses/{id}",
            get(handlers::address::get_address)
                .put(handlers::address::update_address)
                .delete(handlers::address::delete_address),
        )
        .route(
            "/addresses/{id}/set-default",
            put(handlers::address::set_default_address),
        )
        // 兑换
        .route(
            "/redemptions",
            post(handlers::redemption::create_redemption)
                .get(handlers::redemption::list_redemptions),
        )
        .route(
            "/redemptions/stats",
            get(handlers::redemption::redemption_stats),
        )
        .route(
            "/redemptions/{id}",
            get(handlers::redemption::get_redemption),
        )
        .route(
            "/redemptions/{id}/cancel",
            post(handlers::redemption::cancel_redemption),
        )
        // 通知
        .route(
            "/notifications",
            get(handlers::notification::list_notifications),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::notification::unread_count),
        )
        .route(
            "/notifications/read-all",
            put(handlers::notification::mark_all_read),
        )
        .route(
            "/notifications/batch-delete",
            post(handlers::notification::batch_delete),
        )
        .route(
            "/notifications/clear-read",
            delete(handlers::notification::clear_read),
        )
        .route(
            "/notifications/{id}",
            delete(handlers::notification::delete_notification),
        )
        .route(
            "/notifications/{id}/read",
            put(handlers::notification::mark_read),
        )
        // 排名
        .route("/leaderboard/my-rank", get(handlers::leaderboard::my_rank))
        .route_layer(from_fn_with_state(state.clone(), require_live_account))
        .route_layer(from_fn(require_account_type(PUBLIC_ONLY)))
}

/// 寺庙后台：寺庙资料、公告、活动、商品、订单、奖励、报表、进香登记与人员
///
/// 路由层只限制账号类型，具体寺庙与权限由各 handler 校验
fn temple_admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/temple-admin/my-temple",
            get(handlers::staff::my_temple),
        )
        // 寺庙资料
        .route(
            "/temple-admin/temples/{id}",
            get(handlers::temple::staff_get_temple).put(handlers::temple::staff_update_temple),
        )
        .route(
            "/temple-admin/temples/{id}/qr-token",
            get(handlers::temple::qr_token),
        )
        .route(
            "/temple-admin/temples/{id}/stats",
            get(handlers::staff::temple_stats),
        )
        .route(
            "/temple-admin/temples/{id}/checkins",
            get(handlers::staff::temple_checkins),
        )
        // 公告
        .route(
            "/temple-admin/temples/{id}/announcements",
            get(handlers::announcement::staff_list_announcements)
                .post(handlers::announcement::staff_create_announcement),
        )
        .route(
            "/temple-admin/temples/{id}/announcements/{announcement_id}",
            put(handlers::announcement::staff_update_announcement)
                .delete(handlers::announcement::staff_delete_announcement),
        )
        // 活动
        .route(
            "/temple-admin/temples/{id}/events",
            get(handlers::event::staff_list_events).post(handlers::event::staff_create_event),
        )
        .route(
            "/temple-admin/temples/{id}/events/{event_id}",
            get(handlers::event::staff_get_event).put(handlers::event::staff_update_event),
        )
        .route(
            "/temple-admin/temples/{id}/events/{event_id}/publish",
            post(handlers::event::staff_publish_event),
        )
        .route(
            "/temple-admin/temples/{id}/events/{event_id}/close",
            post(handlers::event::staff_close_event),
        )
        .route(
            "/temple-admin/temples/{id}/events/{event_id}/cancel",
            post(handlers::event::staff_cancel_event),
        )
        .route(
            "/temple-admin/temples/{id}/events/{event_id}/registrations",
            get(handlers::event::staff_list_registrations),
        )
        // 商品
        .route(
            "/temple-admin/temples/{id}/products",
            get(handlers::product::staff_list_products)
                .post(handlers::product::staff_create_product),
        )
        .route(
            "/temple-admin/temples/{id}/products/low-stock",
            get(handlers::product::low_stock_products),
        )
        .route(
            "/temple-admin/temples/{id}/products/{product_id}",
            put(handlers::product::staff_update_product)
                .delete(handlers::product::staff_delete_product),
        )
        // 订单
        .route(
            "/temple-admin/temples/{id}/orders",
            get(handlers::redemption::staff_list_orders),
        )
        .route(
            "/temple-admin/temples/{id}/orders/{order_id}",
            get(handlers::redemption::staff_get_order),
        )
        .route(
            "/temple-admin/temples/{id}/orders/{order_id}/status",
            put(handlers::redemption::staff_update_order_status),
        )
        // 奖励
        .route(
            "/temple-admin/temples/{id}/rewards",
            get(handlers::reward::staff_list_rewards).post(handlers::reward::staff_create_reward),
        )
        .route(
            "/temple-admin/temples/{id}/rewards/{reward_id}",
            put(handlers::reward::staff_update_reward)
                .delete(handlers::reward::staff_delete_reward),
        )
        .route(
            "/temple-admin/temples/{id}/rewards/{reward_id}/statistics",
            get(handlers::reward::staff_reward_statistics),
        )
        // 收入与信众
        .route(
            "/temple-admin/temples/{id}/revenue",
            get(handlers::insight::revenue),
        )
        .route(
            "/temple-admin/temples/{id}/revenue/summary",
            get(handlers::insight::revenue_summary),
        )
        .route(
            "/temple-admin/temples/{id}/devotees",
            get(handlers::insight::list_devotees),
        )
        .route(
            "/temple-admin/temples/{id}/devotees/{user_id}",
            get(handlers::insight::devotee_detail),
        )
        .route(
            "/temple-admin/temples/{id}/analytics/members",
            get(handlers::insight::member_analytics),
        )
        .route(
            "/temple-admin/temples/{id}/business/dashboard",
            get(handlers::insight::business_dashboard),
        )
        .route(
            "/temple-admin/temples/{id}/visitors",
            get(handlers::insight::visitors),
        )
        .route(
            "/temple-admin/temples/{id}/top-users",
            get(handlers::insight::top_users),
        )
        .route(
            "/temple-admin/temples/{id}/top-products",
            get(handlers::insight::top_products),
        )
        // 导出
        .route(
            "/temple-admin/temples/{id}/export/checkins",
            get(handlers::export::export_checkins),
        )
        .route(
            "/temple-admin/temples/{id}/export/orders",
            get(handlers::export::export_orders),
        )
        .route(
            "/temple-admin/temples/{id}/export/revenue",
            get(handlers::export::export_revenue),
        )
        // 进香登记
        .route(
            "/temple-admin/temples/{id}/pilgrimage-visits",
            get(handlers::pilgrimage::list_visits).post(handlers::pilgrimage::create_visit),
        )
        .route(
            "/temple-admin/temples/{id}/pilgrimage-visits/{visit_id}",
            get(handlers::pilgrimage::get_visit).put(handlers::pilgrimage::update_visit),
        )
        // 人员
        .route(
            "/temple-admin/temples/{id}/staff",
            get(handlers::staff::list_staff).post(handlers::staff::create_staff),
        )
        .route(
            "/temple-admin/temples/{id}/staff/{staff_id}",
            put(handlers::staff::update_staff).delete(handlers::staff::deactivate_staff),
        )
        .route_layer(from_fn_with_state(state.clone(), require_live_account))
        .route_layer(from_fn(require_account_type(TEMPLE_STAFF)))
}

/// 总后台
fn super_admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // 用户
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/users/{id}", get(handlers::admin::get_user))
        .route(
            "/admin/users/{id}/points",
            put(handlers::admin::adjust_points),
        )
        .route(
            "/admin/users/{id}/status",
            put(handlers::admin::update_user_status),
        )
        // 寺庙
        .route(
            "/admin/temples",
            get(handlers::temple::admin_list_temples).post(handlers::temple::create_temple),
        )
        .route(
            "/admin/temples/{id}",
            put(handlers::temple::admin_update_temple).delete(handlers::temple::delete_temple),
        )
        // 管理员账号
        .route(
            "/admin/temple-admins",
            get(handlers::admin::list_temple_admins).post(handlers::admin::create_temple_admin),
        )
        .route(
            "/admin/temple-admins/{id}",
            put(handlers::admin::update_temple_admin_account),
        )
        .route(
            "/admin/admins",
            get(handlers::admin::list_super_admins).post(handlers::admin::create_super_admin),
        )
        // 奖励
        .route(
            "/admin/rewards",
            get(handlers::reward::admin_list_rewards).post(handlers::reward::admin_create_reward),
        )
        .route(
            "/admin/rewards/{id}",
            put(handlers::reward::admin_update_reward)
                .delete(handlers::reward::admin_delete_reward),
        )
        .route(
            "/admin/rewards/{id}/statistics",
            get(handlers::reward::admin_reward_statistics),
        )
        // 商品
        .route(
            "/admin/products",
            get(handlers::product::admin_list_products)
                .post(handlers::product::admin_create_product),
        )
        .route(
            "/admin/products/{id}",
            put(handlers::product::admin_update_product)
                .delete(handlers::product::admin_delete_product),
        )
        // 兑换订单
        .route(
            "/admin/redemptions",
            get(handlers::redemption::admin_list_redemptions),
        )
        .route(
            "/admin/redemptions/{id}/status",
            put(handlers::redemption::admin_update_status),
        )
        // 数据分析
        .route(
            "/admin/analytics/overview",
            get(handlers::admin::analytics_overview),
        )
        .route(
            "/admin/analytics/checkins",
            get(handlers::admin::checkin_trend),
        )
        .route(
            "/admin/stats/top-selling",
            get(handlers::stats::top_selling),
        )
        .route(
            "/admin/stats/active-users",
            get(handlers::stats::active_users),
        )
        .route(
            "/admin/stats/top-spenders",
            get(handlers::stats::top_spenders),
        )
        .route(
            "/admin/stats/redemption-trend",
            get(handlers::stats::redemption_trend),
        )
        .route(
            "/admin/stats/status-distribution",
            get(handlers::stats::status_distribution),
        )
        .route(
            "/admin/stats/points-flow",
            get(handlers::stats::points_flow),
        )
        // 日志、设置与系统公告
        .route("/admin/logs", get(handlers::admin::list_logs))
        .route("/admin/settings", get(handlers::admin::list_settings))
        .route(
            "/admin/settings/{key}",
            put(handlers::admin::upsert_setting),
        )
        .route(
            "/admin/system-announcement",
            post(handlers::admin::system_announcement),
        )
        .route_layer(from_fn_with_state(state.clone(), require_live_account))
        .route_layer(from_fn(require_account_type(SUPER_ADMIN_ONLY)))
}

/// 构建完整的 API 路由
///
/// 返回所有业务路由（不含 `/api` 前缀，由 [`crate::app::build_router`] 挂载）
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .merge(session_routes(state))
        .merge(catalogue_routes())
        .merge(member_routes(state))
        .merge(temple_admin_routes(state))
        .merge(super_admin_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use temple_shared::config::AppConfig;

    #[tokio::test]
    async fn test_routes_construction() {
        let config = AppConfig::default();
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .connect_lazy(&config.database.url)
            .unwrap();
        let state = AppState::new(pool, config.auth.clone(), config.checkin.clone());

        let _auth = auth_routes();
        let _catalogue = catalogue_routes();
        let _api = api_routes(&state);
    }
}
