//! HTTP surface: the gateway's notification endpoint and a health probe

pub mod health;
pub mod notifications;

use crate::notifications::NotificationHandler;
use axum::{
    routing::{get, post},
    Router,
};
use http::HeaderName;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const REQUEST_ID: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<NotificationHandler>,
    pub environment: String,
    #[cfg(feature = "database")]
    pub pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(handler: Arc<NotificationHandler>, environment: impl Into<String>) -> Self {
        Self {
            handler,
            environment: environment.into(),
            #[cfg(feature = "database")]
            pool: None,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_pool(mut self, pool: sqlx::PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID);

    Router::new()
        .route("/notifications", post(notifications::receive))
        .route("/health", get(health::health_check))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
