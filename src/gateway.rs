//! Process-wide shared state (spec.md §9's "globals": the state-store
//! instance, the tier table, and the rate-limit tables are singletons).
//!
//! [`GatewayState`] is the single `axum` `State` type every HTTP and
//! WebSocket handler shares; it bundles the four core subsystems (C1, C5,
//! C6, C7) plus the ambient traffic log and config.

use std::sync::Arc;

use crate::auth::Auth;
use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::router::Router;
use crate::state::Store;
use crate::traffic::TrafficLog;

pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub auth: Arc<Auth>,
    pub router: Arc<Router>,
    pub rate_limiter: RateLimiter,
    pub traffic: Arc<TrafficLog>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        auth: Arc<Auth>,
        router: Arc<Router>,
        traffic: Arc<TrafficLog>,
    ) -> Self {
        Self { config, store, auth, router, rate_limiter: RateLimiter::new(), traffic }
    }
}
