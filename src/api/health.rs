use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::database;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: String,
    pub pool_size: u32,
    pub pool_idle: u32,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database_status = match database::health_check(&state.pool).await {
        Ok(()) => "connected".to_string(),
        Err(_) => "unavailable".to_string(),
    };
    let stats = database::get_pool_stats(&state.pool);

    let response = HealthResponse {
        status: if database_status == "connected" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version,
        environment: state.config.server.environment.clone(),
        database: database_status,
        pool_size: stats.size,
        pool_idle: stats.num_idle,
    };

    Ok(Json(response))
}
