//! HTTP surface of the monitor: job submission, history, list, stats and
//! the server-sent-events live feed. The WebSocket feed lives in
//! [`super::ws`].

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::get,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::event::{Event, new_job_id};
use super::hub::{Hub, Subscription};
use super::store::{JobStats, JobSummary, is_valid_job_id};
use super::ws;
use crate::errors::StoreError;
use crate::runner::{CodeRunner, RunRequest, run_job};

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Shared state of every handler.
///
/// Submitted jobs run on `runner`, whose sink is `hub`, so their events
/// reach the same live subscriptions this server hands out.
pub struct AppState {
    pub hub: Hub,
    pub runner: Arc<CodeRunner>,
    /// Working directory of submitted jobs that name none.
    pub work_dir: PathBuf,
}

impl AppState {
    pub fn new(hub: Hub, runner: CodeRunner, work_dir: PathBuf) -> Self {
        Self {
            hub,
            runner: Arc::new(runner),
            work_dir,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::InvalidJobId { .. } => ApiError::BadRequest(err.to_string()),
            StoreError::Unreadable { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/{id}", get(job_history))
        .route("/api/stats", get(stats))
        .route("/events", get(sse_handler))
        .route("/ws", get(ws::ws_handler))
}

/// Optional job filter of a live subscription.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    #[serde(default)]
    pub job: Option<String>,
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub task: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub plan: bool,
    #[serde(default, rename = "continue")]
    pub continue_session: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

/// Store reads touch the filesystem; keep them off the async workers.
async fn blocking_read<T, F>(state: &SharedState, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&super::store::JobLogStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.hub.store().clone();
    tokio::task::spawn_blocking(move || read(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("Read task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn list_jobs(State(state): State<SharedState>) -> Result<Json<Vec<JobSummary>>, ApiError> {
    blocking_read(&state, |store| store.list_jobs()).await.map(Json)
}

async fn job_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    blocking_read(&state, move |store| store.read_history(&id))
        .await
        .map(Json)
}

/// Start a job in the background and answer with its id right away.
/// Progress is observed through `/events`, `/ws` or the history endpoint.
async fn submit_job(
    State(state): State<SharedState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let task = body.task.trim();
    if task.is_empty() {
        return Err(ApiError::BadRequest("task must not be empty".to_string()));
    }
    let job_id = match body.job_id.filter(|id| !id.is_empty()) {
        Some(id) if !is_valid_job_id(&id) => {
            return Err(ApiError::BadRequest(format!("invalid job id: {}", id)));
        }
        Some(id) => id,
        None => new_job_id(),
    };
    let working_dir = body.dir.unwrap_or_else(|| state.work_dir.clone());
    if !working_dir.is_dir() {
        return Err(ApiError::BadRequest(format!(
            "working directory does not exist: {}",
            working_dir.display()
        )));
    }

    let request = RunRequest {
        job_id: job_id.clone(),
        task: task.to_string(),
        working_dir,
        planning: body.plan,
        continue_session: body.continue_session,
    };
    info!(job_id = %job_id, planning = request.planning, "Job submitted");

    let runner = Arc::clone(&state.runner);
    let hub = state.hub.clone();
    tokio::spawn(async move {
        if let Err(e) = run_job(&runner, &hub, &request).await {
            warn!(job_id = %request.job_id, error = %e, "Submitted job failed to run");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

async fn stats(State(state): State<SharedState>) -> Result<Json<JobStats>, ApiError> {
    blocking_read(&state, |store| store.stats()).await.map(Json)
}

/// Live feed as server-sent events, one `data:` frame per event.
///
/// No history is replayed; clients read `/api/jobs/{id}` first.
async fn sse_handler(
    State(state): State<SharedState>,
    Query(query): Query<SubscribeQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.hub.subscribe(query.job.as_deref());
    debug!(subscriber = subscription.id(), job = ?query.job, "SSE client connected");
    Sse::new(event_stream(subscription)).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE)
            .text("keep-alive"),
    )
}

/// Stream of SSE frames that ends when the subscription is closed.
/// Dropping the stream releases the subscription.
fn event_stream(subscription: Subscription) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        loop {
            let event = subscription.recv().await?;
            match serde_json::to_string(event.as_ref()) {
                Ok(json) => {
                    let frame = SseEvent::default().id(event.id.clone()).data(json);
                    return Some((Ok(frame), subscription));
                }
                Err(e) => debug!(error = %e, "Skipping unserializable event"),
            }
        }
    })
}
