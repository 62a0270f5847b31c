use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::input::Input;
use crate::locator::Locator;
use crate::state::{AppState, Phase, RunReport};
use crate::window::GameWindow;
use crate::workflow::{Delivery, DeliveryRequest};

pub fn router<L, I, W>(
    state: AppState,
    locator: Arc<L>,
    input: Arc<I>,
    window: Arc<W>,
    whisper_tx: mpsc::Sender<String>,
) -> Router
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    Router::new()
        .route("/deliver", post(start_delivery))
        .route("/collect", post(start_collect))
        .route("/cancel", post(cancel_run))
        .route("/status", get(get_status))
        .route("/whispers", get(get_whispers))
        .route("/whispers/ingest", post(ingest_payload))
        .route("/window/activate", post(activate_window))
        .route("/window/preset", post(apply_window_preset))
        .with_state(ApiState {
            app: state,
            locator,
            input,
            window,
            whisper_tx,
        })
}

struct ApiState<L, I, W> {
    app: AppState,
    locator: Arc<L>,
    input: Arc<I>,
    window: Arc<W>,
    whisper_tx: mpsc::Sender<String>,
}

impl<L, I, W> Clone for ApiState<L, I, W> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            locator: self.locator.clone(),
            input: self.input.clone(),
            window: self.window.clone(),
            whisper_tx: self.whisper_tx.clone(),
        }
    }
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

#[derive(Deserialize)]
struct DeliverParams {
    delivery_type: String,
    receiver: String,
    amount: String,
    #[serde(default = "one")]
    sets: u32,
}

fn one() -> u32 {
    1
}

async fn start_delivery<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
    Json(params): Json<DeliverParams>,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    let mut state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    if state.phase != Phase::Idle {
        return Err(StatusCode::CONFLICT);
    }

    state.cancel.clear();
    state.phase = Phase::Delivering;

    let sets = params.sets.max(1);
    let request = DeliveryRequest {
        delivery_type: params.delivery_type,
        receiver: params.receiver,
        amount: params.amount,
    };
    let delivery = Delivery::new(
        api.locator.clone(),
        api.input.clone(),
        state.config.clone(),
        state.cancel.clone(),
    );
    let cancel = state.cancel.clone();
    let app = api.app.clone();

    let handle = tokio::spawn(async move {
        let result = delivery.execute_sets(&request, sets).await;
        let mut s = app.lock().await;
        s.phase = Phase::Idle;
        match result {
            Ok(sent) => {
                if sent == sets {
                    tracing::info!("delivery run complete: {sent}/{sets} set(s)");
                } else {
                    tracing::warn!(
                        "delivery run stopped at {sent}/{sets} set(s); restock or cancellation"
                    );
                }
                s.last_run = Some(RunReport {
                    task: Phase::Delivering,
                    success: sent == sets,
                    completed: sent,
                    cancelled: cancel.is_cancelled(),
                    finished_at: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!("delivery worker failed: {e:#}");
                s.last_run = Some(RunReport {
                    task: Phase::Delivering,
                    success: false,
                    completed: 0,
                    cancelled: cancel.is_cancelled(),
                    finished_at: Utc::now(),
                });
            }
        }
    });
    state.worker = Some(handle);

    Ok(Json(json!({"status": "started", "sets": sets})))
}

#[derive(Deserialize)]
struct CollectParams {
    #[serde(default = "default_claims")]
    max_claims: u32,
}

fn default_claims() -> u32 {
    100
}

async fn start_collect<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
    Json(params): Json<CollectParams>,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    let mut state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    if state.phase != Phase::Idle {
        return Err(StatusCode::CONFLICT);
    }

    state.cancel.clear();
    state.phase = Phase::Collecting;

    let delivery = Delivery::new(
        api.locator.clone(),
        api.input.clone(),
        state.config.clone(),
        state.cancel.clone(),
    );
    let cancel = state.cancel.clone();
    let app = api.app.clone();
    let max_claims = params.max_claims;

    let handle = tokio::spawn(async move {
        let result = delivery.collect_payments(max_claims).await;
        let mut s = app.lock().await;
        s.phase = Phase::Idle;
        match result {
            Ok(claimed) => {
                tracing::info!("claim run finished: {claimed} payment(s)");
                s.last_run = Some(RunReport {
                    task: Phase::Collecting,
                    success: true,
                    completed: claimed,
                    cancelled: cancel.is_cancelled(),
                    finished_at: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!("claim worker failed: {e:#}");
                s.last_run = Some(RunReport {
                    task: Phase::Collecting,
                    success: false,
                    completed: 0,
                    cancelled: cancel.is_cancelled(),
                    finished_at: Utc::now(),
                });
            }
        }
    });
    state.worker = Some(handle);

    Ok(Json(json!({"status": "started", "max_claims": max_claims})))
}

async fn cancel_run<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    let state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    // The workers poll the token at every step boundary; no abort needed.
    state.cancel.cancel();
    tracing::info!("cancellation requested");

    Ok(Json(json!({"status": "cancelling", "phase": state.phase})))
}

#[derive(Serialize)]
struct StatusResponse {
    phase: Phase,
    running: bool,
    /// Present once a worker has been spawned; true when it has returned.
    worker_finished: Option<bool>,
    last_run: Option<RunReport>,
    whisper_count: usize,
}

async fn get_status<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    let state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    Ok(Json(StatusResponse {
        phase: state.phase,
        running: state.phase != Phase::Idle,
        worker_finished: state.worker.as_ref().map(|h| h.is_finished()),
        last_run: state.last_run.clone(),
        whisper_count: state.recent_whispers(usize::MAX).len(),
    }))
}

#[derive(Deserialize)]
struct WhisperQuery {
    #[serde(default = "default_whisper_count")]
    count: usize,
}

fn default_whisper_count() -> usize {
    10
}

async fn get_whispers<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
    Query(query): Query<WhisperQuery>,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    let state = api.app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    Ok(Json(json!({
        "names": state.latest_unique_names(query.count),
        "recent": state.recent_whispers(query.count),
    })))
}

#[derive(Deserialize)]
struct IngestParams {
    payload: String,
}

async fn ingest_payload<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
    Json(params): Json<IngestParams>,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    {
        let state = api.app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
    }

    api.whisper_tx
        .send(params.payload)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(json!({"status": "accepted"})))
}

async fn activate_window<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    {
        let state = api.app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
    }

    let activated = api.window.activate();
    Ok(Json(json!({"activated": activated})))
}

#[derive(Deserialize)]
struct PresetParams {
    width: i32,
    height: i32,
    x: Option<i32>,
    y: Option<i32>,
    #[serde(default)]
    remove_border: bool,
}

async fn apply_window_preset<L, I, W>(
    State(api): State<ApiState<L, I, W>>,
    headers: HeaderMap,
    Json(params): Json<PresetParams>,
) -> Result<impl IntoResponse, StatusCode>
where
    L: Locator + Send + Sync + 'static,
    I: Input + Send + Sync + 'static,
    W: GameWindow + Send + Sync + 'static,
{
    {
        let state = api.app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
    }

    if !api.window.activate() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    if params.remove_border {
        api.window.remove_border();
    }
    if let (Some(x), Some(y)) = (params.x, params.y) {
        api.window.move_to(x, y);
    }
    let resized = api.window.resize(params.width, params.height);

    Ok(Json(json!({"resized": resized})))
}
