//! HTTP server streaming one conversational turn per request.
//!
//! ## Endpoints
//!
//! - `POST /api/chat/stream`: `text/event-stream` of [`StreamEvent`]s
//! - `GET /health`: liveness probe

pub mod rate_limit;
pub mod turn;

use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::llm::{ChatMessage, TokenSource};
use crate::pipeline::processor::ProcessorOptions;
use crate::transport::event::StreamEvent;
use crate::tts::TtsProvider;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub use rate_limit::ConversationRateLimiter;
pub use turn::{TurnContext, TurnEnd, run_turn};

/// Capacity of the per-request event channel.
const EVENT_BUFFER: usize = 64;

/// Body of `POST /api/chat/stream`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    /// The user's message for this turn.
    pub message: String,
    /// Existing conversation id; a new one is generated when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Earlier messages, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Voice override for this turn.
    #[serde(default)]
    pub voice: Option<String>,
}

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    turn: TurnContext,
    limiter: Arc<ConversationRateLimiter>,
}

/// Streaming chat server running on a background task.
pub struct ChatServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ChatServer {
    /// Bind to `{server.host}:{server.port}` (port `0` auto-assigns) and
    /// start serving.
    ///
    /// `tts` is `None` when speech is disabled; turns then stream text only.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(
        config: &SpeechConfig,
        tokens: Arc<dyn TokenSource>,
        tts: Option<Arc<dyn TtsProvider>>,
    ) -> Result<Self> {
        let state = AppState {
            turn: TurnContext {
                tokens,
                tts,
                streaming: config.tts.streaming,
                options: ProcessorOptions::from(&config.tts),
                chunk_buffer: config.tts.chunk_buffer,
            },
            limiter: Arc::new(ConversationRateLimiter::new(
                config.rate_limit.max_turns_per_minute,
            )),
        };

        let app = Router::new()
            .route("/api/chat/stream", post(handle_chat_stream))
            .route("/health", get(handle_health))
            .with_state(state);

        let bind_addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SpeechError::Transport(format!("server bind failed on {bind_addr}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SpeechError::Transport(format!("failed to get local addr: {e}")))?;

        info!("chat server listening on http://{addr}");

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!("chat server error: {e}");
            }
        });

        Ok(Self {
            addr,
            cancel,
            handle,
        })
    }

    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and let open streams finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Shut down gracefully and wait for open streams to finish.
    pub async fn shutdown_and_wait(&mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.handle).await
            && !e.is_cancelled()
        {
            tracing::error!("chat server task failed: {e}");
        }
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message must not be empty" })),
        )
            .into_response();
    }

    let conversation_id = request
        .conversation_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(SpeechError::RateLimited { retry_after_secs }) =
        state.limiter.increment(&conversation_id)
    {
        warn!(conversation_id = %conversation_id, retry_after_secs, "turn rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(serde_json::json!({
                "error": "Too many requests for this conversation",
                "conversationId": conversation_id,
                "retryAfterSecs": retry_after_secs,
            })),
        )
            .into_response();
    }

    let mut messages = request.history;
    messages.push(ChatMessage::user(request.message));

    let mut turn = state.turn.clone();
    if request.voice.is_some() {
        turn.options.voice = request.voice;
    }

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    tokio::spawn(run_turn(turn, conversation_id, messages, tx));

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => yield Ok::<Event, Infallible>(Event::default().data(json)),
                Err(e) => warn!("dropping unserializable event: {e}"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
