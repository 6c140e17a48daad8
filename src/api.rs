//! HTTP API handlers for ResQ.
//!
//! The discovery contract is deliberately simple: `GET /api/alerts` returns
//! every active alert within the requested radius, including the caller's
//! own. Clients filter out their own device id locally before display;
//! server-side self-exclusion is NOT part of the contract and consumers must
//! not rely on it.
//!
//! Alert creation publishes the created record on a broadcast channel so a
//! push-notification dispatcher can be attached later without touching the
//! lifecycle rules. Nothing subscribes by default; the event is logged.

use axum::async_trait;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::geo::Coordinates;
use crate::model::{
    Alert, CreateAlertRequest, HeartbeatRequest, HeartbeatResponse, LoginRequest, NearbyQuery,
    RegisterRequest, RespondRequest, User,
};
use crate::storage::Storage;

/// Capacity of the alert-created event channel; a slow or absent subscriber
/// drops old events rather than blocking creation.
const ALERT_EVENT_CAPACITY: usize = 64;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    alert_events: broadcast::Sender<Alert>,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        let (alert_events, _) = broadcast::channel(ALERT_EVENT_CAPACITY);
        Self {
            storage,
            alert_events,
        }
    }

    /// Subscribe to alert-created events, e.g. from a push dispatcher.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_events.subscribe()
    }
}

/// JSON body extractor that reports malformed or missing fields as a 400
/// with detail, matching the validation error of the taxonomy (axum's
/// default rejection is a 422).
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| Error::Validation(rejection.body_text()))?;

        Ok(AppJson(value))
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/heartbeat", post(post_heartbeat))
        .route("/api/alerts", post(post_alert).get(get_nearby_alerts))
        .route("/api/alerts/:id/respond", post(post_respond))
        .route("/api/alerts/:id/verify", post(post_verify))
        .route("/api/alerts/:id", delete(delete_alert))
        .route("/api/history/resquest/:device_id", get(get_resquest))
        .route("/api/history/resqued/:helper_id", get(get_resqued))
        .route("/api/auth/register", post(post_register))
        .route("/api/auth/login", post(post_login))
        .route("/health", get(health_check))
        .with_state(state)
}

/// POST /api/heartbeat - Record a device's location and liveness.
///
/// Idempotent upsert keyed by device id; anonymous devices need no prior
/// registration. Returns `{"status": "online"}`.
#[instrument(skip(state, request), fields(device_id = %request.device_id))]
pub async fn post_heartbeat(
    State(state): State<AppState>,
    AppJson(request): AppJson<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>> {
    state
        .storage
        .record_heartbeat(
            &request.device_id,
            request.latitude,
            request.longitude,
            request.name.as_deref(),
        )
        .await?;

    Ok(Json(HeartbeatResponse { status: "online" }))
}

/// POST /api/alerts - Broadcast a new SOS.
///
/// Returns `201 Created` with the alert record. The alert becomes visible to
/// nearby devices on their next discovery poll.
#[instrument(skip(state, request), fields(device_id = %request.device_id))]
pub async fn post_alert(
    State(state): State<AppState>,
    AppJson(request): AppJson<CreateAlertRequest>,
) -> Result<impl IntoResponse> {
    let alert = state
        .storage
        .create_alert(
            &request.device_id,
            request.latitude,
            request.longitude,
            request.level,
            &request.message,
        )
        .await?;

    info!(
        alert_id = alert.id,
        level = alert.level.as_repr(),
        "SOS alert created, broadcasting to nearby devices"
    );

    // Fan-out seam for a push dispatcher; send fails only when nobody is
    // subscribed, which is fine.
    let _ = state.alert_events.send(alert.clone());

    Ok((StatusCode::CREATED, Json(alert)))
}

/// GET /api/alerts?latitude=&longitude=&radius= - Discovery poll.
///
/// Returns all ACTIVE alerts within `radius` meters (default 5000) of the
/// given point, in no particular order, including the caller's own.
#[instrument(skip(state))]
pub async fn get_nearby_alerts(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Alert>>> {
    let center = Coordinates::new(query.latitude, query.longitude);
    let alerts = state.storage.nearby_active_alerts(center, query.radius).await?;

    Ok(Json(alerts))
}

/// POST /api/alerts/:id/respond - Claim an alert as its responder.
///
/// 404 if the alert does not exist; 409 if it is no longer active, so two
/// racing responders see exactly one winner.
#[instrument(skip(state, request))]
pub async fn post_respond(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
    AppJson(request): AppJson<RespondRequest>,
) -> Result<Json<Alert>> {
    let alert = state
        .storage
        .respond_to_alert(alert_id, request.helper_id)
        .await?;

    info!(alert_id, helper_id = request.helper_id, "Alert responded");

    Ok(Json(alert))
}

/// POST /api/alerts/:id/verify - Sender confirms the responder's help.
///
/// 409 if no responder has been assigned yet.
#[instrument(skip(state))]
pub async fn post_verify(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> Result<Json<Alert>> {
    let alert = state.storage.verify_alert(alert_id).await?;

    info!(alert_id, "Alert verified");

    Ok(Json(alert))
}

/// DELETE /api/alerts/:id - Cancel an alert. Idempotent; returns 204.
#[instrument(skip(state))]
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> Result<StatusCode> {
    state.storage.cancel_alert(alert_id).await?;

    info!(alert_id, "Alert cancelled");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/history/resquest/:deviceId - Alerts this device has sent.
#[instrument(skip(state))]
pub async fn get_resquest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<Alert>>> {
    let alerts = state.storage.alerts_by_sender(&device_id).await?;

    Ok(Json(alerts))
}

/// GET /api/history/resqued/:helperId - Alerts this helper responded to.
#[instrument(skip(state))]
pub async fn get_resqued(
    State(state): State<AppState>,
    Path(helper_id): Path<i64>,
) -> Result<Json<Vec<Alert>>> {
    let alerts = state.storage.alerts_by_helper(helper_id).await?;

    Ok(Json(alerts))
}

/// POST /api/auth/register - Link an email account to a device.
///
/// Credential handling is plaintext-equivalent; hardening is out of scope.
#[instrument(skip(state, request), fields(device_id = %request.device_id))]
pub async fn post_register(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse> {
    if state
        .storage
        .get_user_by_email(&request.email)
        .await?
        .is_some()
    {
        return Err(Error::Validation("email already registered".to_string()));
    }

    let user = state
        .storage
        .create_user(
            &request.device_id,
            &request.email,
            &request.password,
            request.name.as_deref(),
        )
        .await?;

    info!(user_id = user.id, "User registered");

    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/login - Check account credentials.
///
/// 401 on unknown email or wrong password, without distinguishing the two.
#[instrument(skip(state, request))]
pub async fn post_login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<axum::response::Response> {
    let user = state.storage.get_user_by_email(&request.email).await?;

    let matches = user
        .as_ref()
        .and_then(|u| u.password.as_deref())
        .is_some_and(|stored| stored == request.password);

    match (user, matches) {
        (Some(user), true) => Ok(Json::<User>(user).into_response()),
        _ => Ok((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "message": "Invalid credentials" })),
        )
            .into_response()),
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
