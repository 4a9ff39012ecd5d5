use api_contract::HealthDto;
use axum::{Json, response::IntoResponse};

pub async fn health() -> impl IntoResponse {
    Json(HealthDto { ok: true })
}
