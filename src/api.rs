use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::model::{Frequency, ReminderPrefs, SubscriptionKeys};
use crate::schedule::TickMode;
use crate::scheduler::Scheduler;
use crate::store::FileStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileStore>,
    pub scheduler: Arc<Scheduler>,
    pub name: String,
    pub api_key: Option<String>,
    pub push_public_key: String,
    pub test_accounts: Arc<Vec<Uuid>>,
}

// --- Error envelope ---

pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Internal(anyhow::Error),
}

type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "invalid or missing API key".into())
            }
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(e) => {
                tracing::error!("API error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(scheduler_status))
        .route("/scheduler/start", post(scheduler_start))
        .route("/scheduler/start-test", post(scheduler_start_test))
        .route("/scheduler/stop", post(scheduler_stop))
        .route("/scheduler/trigger", post(scheduler_trigger))
        .route("/push/public-key", get(push_public_key))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route(
            "/users/:id/preferences",
            get(get_preferences).put(put_preferences),
        )
        .route(
            "/users/:id/subscriptions",
            get(list_subscriptions).post(subscribe).delete(unsubscribe),
        )
        .route("/users/:id/water", get(water_totals).post(log_water))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

// --- Health ---

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": state.name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// --- Scheduler controls ---

async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn scheduler_start(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.start();
    Json(state.scheduler.status())
}

async fn scheduler_start_test(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state
        .scheduler
        .start_test()
        .map_err(|e| ApiError::Forbidden(e.to_string()))?;
    Ok(Json(state.scheduler.status()))
}

async fn scheduler_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.stop();
    Json(state.scheduler.status())
}

#[derive(Deserialize, Default)]
struct TriggerRequest {
    #[serde(default)]
    test: bool,
}

async fn scheduler_trigger(
    State(state): State<AppState>,
    body: Option<Json<TriggerRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    if state.scheduler.locked() {
        return Err(ApiError::Forbidden(
            "manual triggers are disabled on this deployment".into(),
        ));
    }
    let mode = if req.test {
        TickMode::Test
    } else {
        TickMode::Production
    };
    let summary = state.scheduler.trigger_once(mode).await?;
    Ok(Json(summary))
}

async fn push_public_key(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "publicKey": state.push_public_key }))
}

// --- Users and preferences ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    name: String,
    daily_goal_ml: Option<u32>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut user = state
        .store
        .create_user(&req.name)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if let Some(goal) = req.daily_goal_ml {
        user = state
            .store
            .set_daily_goal(user.id, goal)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .store
        .get_user(id)
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    Ok(Json(user))
}

async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .store
        .get_user(id)
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    Ok(Json(user.prefs))
}

async fn put_preferences(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(prefs): Json<ReminderPrefs>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_user(id).is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    if !frequency_allowed(&prefs, id, &state.test_accounts) {
        return Err(ApiError::Forbidden(
            "everyMinuteTest is restricted to test accounts".into(),
        ));
    }
    let user = state
        .store
        .update_prefs(id, prefs)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(user.prefs))
}

/// The accelerated frequency is a diagnostic tool, never something a
/// regular account can opt into.
fn frequency_allowed(prefs: &ReminderPrefs, user_id: Uuid, allowlist: &[Uuid]) -> bool {
    prefs.frequency != Frequency::EveryMinuteTest || allowlist.contains(&user_id)
}

// --- Subscriptions ---

#[derive(Deserialize)]
struct SubscribeRequest {
    endpoint: String,
    keys: SubscriptionKeys,
}

async fn subscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_user(id).is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    let subscription = state
        .store
        .upsert_subscription(id, &req.endpoint, req.keys)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

#[derive(Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UnsubscribeRequest>,
) -> ApiResult<impl IntoResponse> {
    let removed = state.store.remove_subscription(id, &req.endpoint)?;
    Ok(Json(json!({ "removed": removed })))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_user(id).is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    Ok(Json(state.store.subscriptions_for(id)))
}

// --- Water log ---

/// Largest chart range the totals endpoint serves.
const MAX_TOTAL_DAYS: u32 = 90;
const DEFAULT_TOTAL_DAYS: u32 = 7;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogWaterRequest {
    amount_ml: u32,
}

async fn log_water(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LogWaterRequest>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_user(id).is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    let (entry, today_total_ml) = state
        .store
        .append_water(id, req.amount_ml)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "entry": entry, "todayTotalMl": today_total_ml })),
    ))
}

#[derive(Deserialize)]
struct TotalsQuery {
    days: Option<u32>,
}

async fn water_totals(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<TotalsQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_user(id).is_none() {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    let days = query.days.unwrap_or(DEFAULT_TOTAL_DAYS).clamp(1, MAX_TOTAL_DAYS);
    let totals = state.store.daily_totals(id, days)?;
    Ok(Json(totals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_test_frequency_needs_allowlisting() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut prefs = ReminderPrefs::default();

        assert!(frequency_allowed(&prefs, user, &[]));

        prefs.frequency = Frequency::EveryMinuteTest;
        assert!(!frequency_allowed(&prefs, user, &[]));
        assert!(!frequency_allowed(&prefs, user, &[other]));
        assert!(frequency_allowed(&prefs, user, &[other, user]));
    }
}
