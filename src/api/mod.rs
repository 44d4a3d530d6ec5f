//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`availability`] - 余位查询 (单日 / 区间)
//! - [`checkout`] - 预订发起 (幂等, 创建 Stripe Checkout Session)
//! - [`reservations`] - 确认页轮询接口
//! - [`waitlist`] - 候补登记
//! - [`payment_webhook`] - Stripe 事件对账 (raw body 验签)

pub mod availability;
pub mod checkout;
pub mod health;
pub mod payment_webhook;
pub mod reservations;
pub mod waitlist;

use axum::routing::{get, post};
use axum::{Router, middleware};
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::rate_limit;
use crate::state::AppState;

/// Custom request ID generator
#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).unwrap()))
    }
}

/// Build the fully configured application router.
pub fn create_router(state: AppState) -> Router {
    // Stripe webhook needs the raw body for signature verification, so it is
    // mounted before anything that would consume it as JSON.
    let webhook = Router::new().route(
        "/api/v1/webhooks/stripe",
        post(payment_webhook::handle_webhook),
    );

    let checkout = Router::new()
        .route("/api/v1/checkout-sessions", post(checkout::create))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::checkout_rate_limit,
        ));

    let waitlist = Router::new()
        .route("/api/v1/waitlist", post(waitlist::join))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::waitlist_rate_limit,
        ));

    Router::new()
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/availability", get(availability::day))
        .route("/api/v1/availability/range", get(availability::range))
        .route(
            "/api/v1/reservations/by-checkout-session/{checkout_session_id}",
            get(reservations::by_checkout_session),
        )
        .merge(webhook)
        .merge(checkout)
        .merge(waitlist)
        // General rate limit wraps every route, webhook included
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::general_rate_limit,
        ))
        .with_state(state)
        // ========== Tower HTTP Middleware ==========
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            XRequestId,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
}
