//! HTTP surface for palaver.
//!
//! - `GET  /health` liveness
//! - `GET  /chat/[{conversation}]` the conversation as newline-joined Wire Messages
//! - `POST /chat/[{conversation}]` run a turn; the response body streams frames
//!
//! Built on Axum. Omitting the conversation addresses the `default` one.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Form, Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use palaver_agent::{AgentBackend, OrchestratorConfig, SessionContext, StreamOrchestrator};
use palaver_config::AppConfig;
use palaver_core::backend::Backend;
use palaver_core::error::{Error, PersistenceError};
use palaver_core::message::{ConversationId, DEFAULT_CONVERSATION};
use palaver_core::store::HistoryRepository;
use palaver_core::wire::{Projection, to_ndjson};
use palaver_history::SessionLeases;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub repository: Arc<dyn HistoryRepository>,
    pub backend: Arc<dyn Backend>,
    pub orchestrator: StreamOrchestrator,
    /// One in-flight turn per conversation.
    pub leases: SessionLeases,
}

impl GatewayState {
    pub fn new(
        repository: Arc<dyn HistoryRepository>,
        backend: Arc<dyn Backend>,
        orchestrator: StreamOrchestrator,
    ) -> Self {
        Self {
            repository,
            backend,
            orchestrator,
            leases: SessionLeases::new(),
        }
    }
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/", get(list_default_handler).post(chat_default_handler))
        .route("/chat/{conversation}", get(list_handler).post(chat_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire up provider, tools, backend and history from config.
pub async fn build_state(config: &AppConfig) -> Result<GatewayState, Box<dyn std::error::Error + Send + Sync>> {
    let provider = palaver_providers::ProviderRouter::build_from_config(config)?.default_provider()?;
    let tools = Arc::new(palaver_tools::default_registry(&config.tools));
    info!(tools = ?tools.names(), "Tools registered");
    let backend = Arc::new(AgentBackend::from_config(config, provider, tools));
    let repository = palaver_history::open_repository(&config.history).await?;
    let orchestrator = StreamOrchestrator::new(OrchestratorConfig::from(&config.streaming));
    Ok(GatewayState::new(repository, backend, orchestrator))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(build_state(&config).await?);
    let app = build_router(state);

    info!(addr = %addr, model = %config.default_model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Errors ---

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A request that failed before any frame was streamed.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidPrompt(_) | Error::InvalidConversationId(_) => StatusCode::BAD_REQUEST,
            Error::Persistence(PersistenceError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Unrepresentable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_default_handler(State(state): State<SharedState>) -> Result<Response, ApiError> {
    list(&state, DEFAULT_CONVERSATION).await
}

async fn list_handler(
    State(state): State<SharedState>,
    Path(conversation): Path<String>,
) -> Result<Response, ApiError> {
    list(&state, &conversation).await
}

async fn list(state: &GatewayState, conversation: &str) -> Result<Response, ApiError> {
    let id = ConversationId::parse(conversation)?;
    let store = state.repository.open(&id).await?;
    let messages = state
        .orchestrator
        .list(store.as_ref(), Projection::Lenient)
        .await?;
    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))], to_ndjson(&messages)).into_response())
}

#[derive(Deserialize)]
struct ChatForm {
    #[serde(default)]
    prompt: String,
}

async fn chat_default_handler(
    State(state): State<SharedState>,
    Form(form): Form<ChatForm>,
) -> Result<Response, ApiError> {
    chat(&state, DEFAULT_CONVERSATION, form.prompt).await
}

async fn chat_handler(
    State(state): State<SharedState>,
    Path(conversation): Path<String>,
    Form(form): Form<ChatForm>,
) -> Result<Response, ApiError> {
    chat(&state, &conversation, form.prompt).await
}

async fn chat(state: &GatewayState, conversation: &str, prompt: String) -> Result<Response, ApiError> {
    let id = ConversationId::parse(conversation)?;
    if prompt.trim().is_empty() {
        return Err(Error::InvalidPrompt("prompt is empty".into()).into());
    }

    let lease = state.leases.try_acquire(&id).ok_or_else(|| {
        ApiError::new(
            StatusCode::CONFLICT,
            format!("a turn is already in progress for conversation '{id}'"),
        )
    })?;

    info!(conversation_id = %id, prompt_len = prompt.len(), "Chat request");

    let store = state.repository.open(&id).await?;
    let ctx = SessionContext::new(store, state.backend.clone()).with_lease(lease);
    let (frames, _turn) = state.orchestrator.submit(ctx, &prompt)?.into_parts();

    // Dropping the body (client gone) closes the frame channel.
    let body = Body::from_stream(ReceiverStream::new(frames).map(|frame| Ok::<_, Infallible>(frame.to_line())));
    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))], body).into_response())
}
