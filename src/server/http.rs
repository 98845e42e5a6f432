//! HTTP server for Design IDE
//!
//! Project sessions are loaded from the store on first access and cached per
//! project id. A chat turn holds its project's session for the whole turn, so
//! turns for one project are serialized while different projects run freely.

use anyhow::Result;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event, Sse},
    },
    routing::{delete, get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::agent::{
    ConversationDriver, LLMProvider, Message, Role, TurnCollector, TurnEvent, TurnRequest,
    extract_tool_detail, system_prompt_for,
};
use crate::config::Config;
use crate::preview::build_bundle;
use crate::session::{FeedbackItem, Phase, ProjectSession};
use crate::store::{NewProject, ProjectUpdate, Store, StoreError};

/// Maximum number of cached project sessions
const MAX_SESSIONS: usize = 100;

const DEFAULT_PROJECT_NAME: &str = "Untitled Project";

pub struct Server {
    config: Config,
    store: Store,
}

type SessionHandle = Arc<Mutex<ProjectSession>>;

struct SessionEntry {
    session: SessionHandle,
    last_accessed: Instant,
}

pub struct AppState {
    config: Config,
    store: Store,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    /// Fixed provider; when unset one is built from config for every chat request
    provider: Option<Arc<dyn LLMProvider>>,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        Self {
            config,
            store,
            sessions: Mutex::new(HashMap::new()),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn driver(&self) -> Result<ConversationDriver> {
        match &self.provider {
            Some(provider) => Ok(ConversationDriver::new(provider.clone())
                .with_max_steps(self.config.agent.max_steps)),
            None => ConversationDriver::from_config(&self.config),
        }
    }
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let store = Store::open(&config.database_path())?;
        Ok(Self {
            config: config.clone(),
            store,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let state = Arc::new(AppState::new(self.config.clone(), self.store.clone()));

        // Spawn session cleanup task
        let timeout = Duration::from_secs(self.config.server.session_timeout_mins * 60);
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                cleanup_expired_sessions(&cleanup_state, timeout).await;
            }
        });

        let app = router(state);

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/session", get(get_session))
        .route("/api/projects/{id}/variants", get(list_variants))
        .route(
            "/api/projects/{id}/variants/{variant_id}/select",
            post(select_variant),
        )
        .route(
            "/api/projects/{id}/variants/{variant_id}/approve",
            post(approve_variant),
        )
        .route(
            "/api/projects/{id}/variants/{variant_id}/iterate",
            post(iterate_variant),
        )
        .route(
            "/api/projects/{id}/variants/{variant_id}/preview",
            get(preview_variant),
        )
        .route(
            "/api/projects/{id}/feedback",
            get(list_feedback).post(create_feedback),
        )
        .route("/api/projects/{id}/feedback/submit", post(submit_feedback))
        .route(
            "/api/projects/{id}/feedback/{feedback_id}",
            delete(delete_feedback),
        )
        .route("/api/projects/{id}/messages", get(list_messages))
        .route("/api/projects/{id}/files", get(list_files))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// Error response type
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl ToString) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            AppError::new(StatusCode::NOT_FOUND, e.to_string())
        } else {
            error!("Store error: {}", e);
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "Database error").with_details(e)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({"error": self.error, "details": details}),
            None => json!({"error": self.error}),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// Session cleanup task
async fn cleanup_expired_sessions(state: &Arc<AppState>, timeout: Duration) {
    let mut sessions = state.sessions.lock().await;
    let before_count = sessions.len();

    sessions.retain(|id, entry| {
        let expired = entry.last_accessed.elapsed() > timeout;
        if expired {
            debug!("Expiring session for project {}", id);
        }
        !expired
    });

    let removed = before_count - sessions.len();
    if removed > 0 {
        info!("Cleaned up {} expired project sessions", removed);
    }
}

/// Cached session for a project, hydrated from the store on first use.
///
/// With `create`, an unknown project id is created instead of being a 404.
async fn project_session(
    state: &Arc<AppState>,
    project_id: &str,
    create: bool,
) -> ApiResult<SessionHandle> {
    let mut sessions = state.sessions.lock().await;

    if let Some(entry) = sessions.get_mut(project_id) {
        entry.last_accessed = Instant::now();
        return Ok(entry.session.clone());
    }

    if create {
        state
            .store
            .get_or_create_project(project_id, DEFAULT_PROJECT_NAME)?;
    }
    let session = Arc::new(Mutex::new(state.store.load_session(project_id)?));

    if sessions.len() >= MAX_SESSIONS
        && let Some(oldest) = sessions
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(id, _)| id.clone())
    {
        debug!("Evicting least recently used session {}", oldest);
        sessions.remove(&oldest);
    }

    sessions.insert(
        project_id.to_string(),
        SessionEntry {
            session: session.clone(),
            last_accessed: Instant::now(),
        },
    );
    debug!("Loaded session for project {}", project_id);

    Ok(session)
}

async fn evict_session(state: &Arc<AppState>, project_id: &str) {
    state.sessions.lock().await.remove(project_id);
}

async fn health_check() -> &'static str {
    "OK"
}

// Chat

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    messages: Vec<Message>,
    project_id: String,
}

fn event(data: Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(data.to_string()))
}

fn chat_failure(details: impl ToString) -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to process chat request",
    )
    .with_details(details)
}

async fn chat(State(state): State<Arc<AppState>>, Json(request): Json<ChatRequest>) -> Response {
    let ChatRequest {
        messages,
        project_id,
    } = request;

    let user_message = match messages.last() {
        Some(m) if m.role == Role::User && !m.content.trim().is_empty() => m.clone(),
        _ => {
            return AppError::new(
                StatusCode::BAD_REQUEST,
                "Last message must be a non-empty user message",
            )
            .into_response();
        }
    };

    debug!(
        "Chat request for project {} ({} messages)",
        project_id,
        messages.len()
    );

    let driver = match state.driver() {
        Ok(driver) => driver,
        Err(e) => {
            error!("Chat API error: {}", e);
            return chat_failure(e).into_response();
        }
    };

    let handle = match project_session(&state, &project_id, true).await {
        Ok(handle) => handle,
        Err(e) => return chat_failure(e.error).into_response(),
    };

    let stream = async_stream::stream! {
        // Held until the turn ends; a second turn for this project waits here
        let mut session = handle.lock_owned().await;

        let system_prompt = system_prompt_for(driver.tools(), session.phase(), Some(session.name()));
        // The client's transcript is adopted only once the turn completes
        let mut client_transcript = messages.clone();

        let mut turn_stream = driver.run_turn(TurnRequest {
            project_id: project_id.clone(),
            system_prompt,
            messages,
        });
        let mut collector = TurnCollector::new();

        while let Some(item) = turn_stream.next().await {
            let turn_event = match item {
                Ok(turn_event) => turn_event,
                Err(e) => {
                    error!("[Project {}] Turn failed: {}", project_id, e);
                    yield event(json!({"type": "error", "error": e.to_string()}));
                    return;
                }
            };

            let completed = collector.push(&turn_event);

            match turn_event {
                TurnEvent::Text(text) => {
                    yield event(json!({"type": "text", "text": text}));
                }
                TurnEvent::ToolCall(call) => {
                    let detail = extract_tool_detail(&call.name, &call.arguments);
                    yield event(json!({"type": "tool_call", "id": call.id, "name": call.name, "detail": detail}));
                }
                TurnEvent::ToolResult { call_id, name, output } => {
                    yield event(json!({"type": "tool_result", "id": call_id, "name": name, "result": output}));
                }
                TurnEvent::ToolRejected { call_id, name, error } => {
                    yield event(json!({"type": "tool_error", "id": call_id, "name": name, "error": error.to_string()}));
                }
                TurnEvent::StepFinished(step) => {
                    let names: Vec<&str> = step.tool_calls.iter().map(|c| c.name.as_str()).collect();
                    yield event(json!({"type": "step", "step": step.step, "toolCalls": names}));
                }
                TurnEvent::Finished { .. } => {}
            }

            if let Some(turn) = completed {
                session.replace_transcript(std::mem::take(&mut client_transcript));
                let outcome = session.apply_turn(&turn);

                let mut unsaved = Vec::with_capacity(turn.messages.len() + 1);
                unsaved.push(user_message.clone());
                unsaved.extend(turn.messages.iter().cloned());

                if let Err(e) = state.store.save_turn(&session, &outcome, &unsaved) {
                    error!("[Project {}] Failed to save turn: {}", project_id, e);
                    yield event(json!({"type": "error", "error": e.to_string()}));
                    return;
                }

                if let Some(phase) = outcome.phase {
                    yield event(json!({
                        "type": "phase",
                        "phase": phase,
                        "label": phase.label(),
                        "description": phase.description()
                    }));
                }
                yield event(json!({
                    "type": "done",
                    "finishReason": turn.reason,
                    "usage": turn.usage,
                    "outcome": outcome
                }));
                return;
            }
        }
    };

    Sse::new(stream).into_response()
}

// Projects

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListProjectsQuery {
    user_id: Option<String>,
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProjectsQuery>,
) -> Response {
    match state.store.list_projects(query.user_id.as_deref()) {
        Ok(projects) => Json(projects).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewProject>,
) -> ApiResult<Response> {
    if new.name.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "Project name is required"));
    }
    let project = state.store.create_project(&new)?;
    info!("Created project {} ({})", project.id, project.name);
    Ok((StatusCode::CREATED, Json(project)).into_response())
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.store.get_project(&id)?).into_response())
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<ProjectUpdate>,
) -> ApiResult<Response> {
    let project = state.store.update_project(&id, &update)?;
    // Reload on next access so the cached session sees the new name and phase
    evict_session(&state, &id).await;
    Ok(Json(project).into_response())
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete_project(&id)?;
    evict_session(&state, &id).await;
    info!("Deleted project {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let session = handle.lock().await;
    Ok(Json(session.snapshot()).into_response())
}

// Variants

async fn list_variants(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.store.get_project(&id)?;
    Ok(Json(state.store.get_variants(&id)?).into_response())
}

async fn select_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;
    session.variants_mut().select(&variant_id);
    Ok(Json(session.snapshot()).into_response())
}

async fn approve_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;

    state.store.approve_variant(&id, &variant_id)?;
    session.variants_mut().approve(&variant_id);
    info!("[Project {}] Approved variant {}", id, variant_id);

    Ok(Json(session.snapshot()).into_response())
}

async fn iterate_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;

    state.store.update_project_phase(&id, Phase::Iterate)?;
    session.begin_iteration(&variant_id);

    Ok(Json(session.snapshot()).into_response())
}

async fn preview_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let session = handle.lock().await;

    let variant = session.variants().get(&variant_id).ok_or_else(|| {
        AppError::new(
            StatusCode::NOT_FOUND,
            format!("Variant not found: {}", variant_id),
        )
    })?;

    Ok(Json(build_bundle(&variant.code, &state.config.preview)).into_response())
}

// Feedback

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewFeedback {
    variant_id: String,
    comment: String,
    #[serde(default)]
    element_selector: Option<String>,
}

#[derive(Serialize)]
struct SubmitFeedbackResponse {
    message: Option<String>,
}

async fn list_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let session = handle.lock().await;
    Ok(Json(session.variants().feedback()).into_response())
}

async fn create_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(new): Json<NewFeedback>,
) -> ApiResult<Response> {
    if new.comment.trim().is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "Comment is required"));
    }

    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;

    let item = FeedbackItem::new(
        &new.variant_id,
        &new.comment,
        new.element_selector.as_deref(),
    );
    state.store.create_feedback(&id, &item)?;
    session.variants_mut().push_feedback(item.clone());

    Ok((StatusCode::CREATED, Json(item)).into_response())
}

async fn delete_feedback(
    State(state): State<Arc<AppState>>,
    Path((id, feedback_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;

    state.store.delete_feedback(&feedback_id)?;
    session.variants_mut().remove_feedback(&feedback_id);

    Ok(StatusCode::NO_CONTENT)
}

/// Drain feedback into the text of the next user message.
async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let handle = project_session(&state, &id, false).await?;
    let mut session = handle.lock().await;

    state.store.clear_feedback(&id)?;
    let message = session.submit_feedback();

    Ok(Json(SubmitFeedbackResponse { message }).into_response())
}

// Transcript and generated output

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.store.get_project(&id)?;
    Ok(Json(state.store.get_messages(&id)?).into_response())
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.store.get_project(&id)?;
    Ok(Json(state.store.get_generated_files(&id)?).into_response())
}
