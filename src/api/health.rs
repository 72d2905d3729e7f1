use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    /// `up`, `down` or `disabled`
    pub database: String,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_status(&state).await;
    let healthy = database != "down";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.clone(),
        database: database.to_string(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(feature = "database")]
async fn database_status(state: &AppState) -> &'static str {
    match &state.pool {
        Some(pool) => match crate::database::health_check(pool).await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "disabled",
    }
}

#[cfg(not(feature = "database"))]
async fn database_status(_state: &AppState) -> &'static str {
    "disabled"
}
