//! Health endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::shutdown::HealthState;

/// `GET /healthcheck`. Always 200 with an empty object while the process serves.
pub async fn healthcheck_handler() -> Json<serde_json::Value> {
    Json(json!({}))
}

/// `GET /health/ready`. 200 once modules are loaded, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = state.shutdown.health_state();
    let status = if health == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "state": health.as_str(),
            "in_flight": state.shutdown.in_flight_count(),
            "rpcs": state.host.rpc_table().len(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_state;

    #[tokio::test]
    async fn healthcheck_is_empty_object() {
        let Json(body) = healthcheck_handler().await;
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn readiness_follows_lifecycle() {
        let state = test_state();
        let (status, Json(body)) = readiness_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["state"], "starting");

        state.shutdown.set_ready();
        let (status, Json(body)) = readiness_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rpcs"], 2);

        state.shutdown.begin_drain();
        let _guard = state.shutdown.in_flight_guard();
        let (status, Json(body)) = readiness_handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["in_flight"], 1);
    }
}
