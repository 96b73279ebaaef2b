use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::AccountConfig;
use crate::services::sensors::{sensor_records, SensorRecord};
use crate::services::AccountRegistry;

pub struct AppState {
    pub registry: Arc<AccountRegistry>,
}

pub fn account_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", get(list_accounts).post(register_account))
        .route("/accounts/:username", axum::routing::delete(remove_account))
        .route("/accounts/:username/sensors", get(account_sensors))
        .route("/accounts/:username/intervals", post(set_intervals))
        .route(
            "/accounts/:username/refresh-now-playing",
            post(refresh_now_playing),
        )
}

#[derive(Debug, Serialize)]
struct AccountsResponse {
    accounts: Vec<String>,
}

async fn list_accounts(State(state): State<Arc<AppState>>) -> Result<Json<AccountsResponse>> {
    let accounts = state.registry.usernames().await;
    Ok(Json(AccountsResponse { accounts }))
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    username: String,
}

async fn register_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountConfig>,
) -> Result<Json<RegisterResponse>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let username = req.username.clone();
    state.registry.register(req).await?;

    Ok(Json(RegisterResponse { username }))
}

async fn remove_account(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<()>> {
    state.registry.remove(&username).await?;
    Ok(Json(()))
}

#[derive(Debug, Serialize)]
struct SensorsResponse {
    username: String,
    available: bool,
    last_error: Option<String>,
    sensors: Vec<SensorRecord>,
}

async fn account_sensors(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<SensorsResponse>> {
    let poller = state.registry.get(&username).await?;
    let snapshot = poller.snapshot().await;

    Ok(Json(SensorsResponse {
        username: poller.username().to_string(),
        available: snapshot.available,
        last_error: snapshot.last_error.clone(),
        sensors: sensor_records(poller.username(), &snapshot),
    }))
}

#[derive(Debug, Deserialize)]
struct IntervalRequest {
    now_playing_interval: Option<u64>,
    recently_played_interval: Option<u64>,
}

/// The values actually applied, after clamping to the per-cycle floors.
#[derive(Debug, Serialize)]
struct IntervalResponse {
    now_playing_interval: u64,
    recently_played_interval: u64,
}

async fn set_intervals(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<IntervalRequest>,
) -> Result<Json<IntervalResponse>> {
    if req.now_playing_interval.is_none() && req.recently_played_interval.is_none() {
        return Err(AppError::Validation(
            "At least one interval must be provided".to_string(),
        ));
    }

    let poller = state.registry.get(&username).await?;
    let (now_playing, recently_played) =
        poller.set_intervals(req.now_playing_interval, req.recently_played_interval);

    Ok(Json(IntervalResponse {
        now_playing_interval: now_playing,
        recently_played_interval: recently_played,
    }))
}

async fn refresh_now_playing(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<()>> {
    let poller = state.registry.get(&username).await?;
    poller.refresh_now_playing().await?;
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::services::gateway::mock::MockGateway;
    use crate::services::StreamingGateway;

    fn test_app() -> Router {
        let registry = Arc::new(AccountRegistry::with_gateway_factory(Box::new(|_| {
            Arc::new(MockGateway::new()) as Arc<dyn StreamingGateway>
        })));
        account_routes().with_state(Arc::new(AppState { registry }))
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn register_body(username: &str) -> Value {
        json!({ "username": username, "refresh_token": "token" })
    }

    #[tokio::test]
    async fn register_then_list_accounts() {
        let app = test_app();

        let (status, body) = send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "ian");

        let (status, body) = send(app, Method::GET, "/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accounts"], json!(["ian"]));
    }

    #[tokio::test]
    async fn register_rejects_empty_username() {
        let app = test_app();

        let (status, body) = send(
            app,
            Method::POST,
            "/accounts",
            Some(register_body("")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn sensors_for_unknown_account_is_not_found() {
        let app = test_app();

        let (status, _) = send(app, Method::GET, "/accounts/nobody/sensors", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sensors_endpoint_lists_all_twelve() {
        let app = test_app();
        send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;

        let (status, body) = send(app, Method::GET, "/accounts/ian/sensors", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "ian");
        assert_eq!(body["available"], true);
        assert_eq!(body["sensors"].as_array().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn interval_update_reports_clamped_values() {
        let app = test_app();
        send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;

        let (status, body) = send(
            app,
            Method::POST,
            "/accounts/ian/intervals",
            Some(json!({ "now_playing_interval": 5, "recently_played_interval": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["now_playing_interval"], 30);
        assert_eq!(body["recently_played_interval"], 300);
    }

    #[tokio::test]
    async fn interval_update_requires_at_least_one_value() {
        let app = test_app();
        send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;

        let (status, _) = send(
            app,
            Method::POST,
            "/accounts/ian/intervals",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn remove_account_then_sensors_is_not_found() {
        let app = test_app();
        send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;

        let (status, _) = send(app.clone(), Method::DELETE, "/accounts/ian", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app, Method::GET, "/accounts/ian/sensors", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forced_refresh_succeeds_for_registered_account() {
        let app = test_app();
        send(
            app.clone(),
            Method::POST,
            "/accounts",
            Some(register_body("ian")),
        )
        .await;

        let (status, _) = send(
            app,
            Method::POST,
            "/accounts/ian/refresh-now-playing",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
