//! Interview HTTP API
//!
//! Axum-based HTTP server exposing the interview WebSocket, text-to-speech,
//! stored records and derived analysis.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET /health                      : integration status
//! - GET /health/tts                  : resolved synthesizer details
//! - GET /version                     : server version info
//! - GET /tts?text=                   : synthesized speech as `audio/wav`
//! - GET /ws?job=&exp=&name=          : interview WebSocket
//! - GET /interviews/:id              : stored record
//! - GET /interviews/:id/summary      : cached or generated summary
//! - GET /interviews/:id/score        : cached or generated score breakdown
//! - GET /interviews/:id/score_simple : overall score only

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use interview_core::analysis::{self, AnalysisError};
use interview_core::synthesis::SynthesisError;
use interview_core::{
    create_completion_client, CompletionClient, InterviewConfig, PiperSynthesizer, SessionStore,
    SpeechSynthesizer, SynthesizedAudio,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::ws::LiveSessions;

/// How long shutdown waits for live interviews to flush.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: SessionStore,
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub config: InterviewConfig,
    pub sessions: LiveSessions,
}

impl HttpState {
    /// Construct the integrations once. A missing API key or synthesis binary
    /// leaves that integration unset; the server still starts.
    pub fn from_config(config: InterviewConfig) -> Self {
        let completion = create_completion_client(&config.completion);

        let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = if config.synthesis.enabled {
            match PiperSynthesizer::from_settings(&config.synthesis) {
                Ok(s) => Some(Arc::new(s)),
                Err(e) => {
                    tracing::warn!(error = %e, "Speech synthesis unavailable");
                    None
                }
            }
        } else {
            tracing::info!("Speech synthesis disabled by config");
            None
        };

        Self {
            store: SessionStore::new(&config.store.path),
            completion,
            synthesizer,
            config,
            sessions: LiveSessions::new(),
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/tts", get(tts_health_handler))
        .route("/version", get(version_handler))
        .route("/tts", get(tts_handler))
        .route("/ws", get(crate::ws::interview_ws_handler))
        .route("/interviews/:id", get(interview_handler))
        .route("/interviews/:id/summary", get(summary_handler))
        .route("/interviews/:id/score", get(score_handler))
        .route("/interviews/:id/score_simple", get(score_simple_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    config: InterviewConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState::from_config(config));
    let sessions = state.sessions.clone();

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Interview API listening on http://{}", addr);

    let signal = sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
            signal.signal_shutdown();
        })
        .await?;

    // Upgraded WebSocket connections outlive the serve future.
    let live = sessions.len();
    if !sessions.drain(SESSION_DRAIN_TIMEOUT).await {
        tracing::warn!(remaining = sessions.len(), "Interview sessions still running at exit");
    } else if live > 0 {
        tracing::info!(sessions = live, "Interview sessions flushed");
    }

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct TtsQuery {
    pub text: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> (StatusCode, serde_json::Value) {
    (
        status,
        serde_json::to_value(ErrorResponse::new(msg)).unwrap_or_default(),
    )
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "service": "interview-bot",
            "version": env!("CARGO_PKG_VERSION"),
            "completion_configured": state.completion.is_some(),
            "tts_configured": state.synthesizer.is_some(),
        }),
    )
}

pub fn tts_health_inner(
    synthesizer: Option<&dyn SpeechSynthesizer>,
) -> (StatusCode, serde_json::Value) {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let body = match synthesizer {
        Some(s) => {
            let info = s.info();
            let ready = std::path::Path::new(&info.binary).is_file();
            serde_json::json!({
                "ready": ready,
                "initialized": true,
                "binary": info.binary,
                "model_path": info.model_path,
                "config_path": info.config_path,
                "alias": info.alias,
                "cwd": cwd,
            })
        }
        None => serde_json::json!({
            "ready": false,
            "initialized": false,
            "binary": null,
            "model_path": null,
            "config_path": null,
            "alias": null,
            "cwd": cwd,
        }),
    };

    (StatusCode::OK, body)
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "interview/1",
    })
}

/// Ids that do not parse cannot exist in the store.
fn parse_id(raw: &str) -> Result<Uuid, (StatusCode, serde_json::Value)> {
    Uuid::parse_str(raw).map_err(|_| error_body(StatusCode::NOT_FOUND, "Interview not found"))
}

pub async fn interview_inner(store: &SessionStore, raw_id: &str) -> (StatusCode, serde_json::Value) {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match store.get_async(id).await {
        Ok(Some(record)) => match serde_json::to_value(record) {
            Ok(v) => (StatusCode::OK, v),
            Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Interview not found"),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn summary_inner(state: &HttpState, raw_id: &str) -> (StatusCode, serde_json::Value) {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let result = analysis::summarize(
        &state.store,
        state.completion.as_deref(),
        &id,
        state.config.completion.analysis_temperature,
    )
    .await;

    match result {
        Ok(summary) => to_json(&summary),
        Err(e) => analysis_error_response("Failed to generate summary", e),
    }
}

pub async fn score_inner(state: &HttpState, raw_id: &str) -> (StatusCode, serde_json::Value) {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let result = analysis::score_breakdown(
        &state.store,
        state.completion.as_deref(),
        &id,
        state.config.completion.analysis_temperature,
    )
    .await;

    match result {
        Ok(score) => to_json(&score),
        Err(e) => analysis_error_response("Failed to generate score", e),
    }
}

pub async fn score_simple_inner(state: &HttpState, raw_id: &str) -> (StatusCode, serde_json::Value) {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let result = analysis::simple_score(
        &state.store,
        state.completion.as_deref(),
        &id,
        state.config.completion.analysis_temperature,
    )
    .await;

    match result {
        Ok(score) => to_json(&score),
        Err(e) => analysis_error_response("Failed to generate score", e),
    }
}

/// Inner TTS: validates the text and runs the synthesizer.
pub async fn tts_inner(
    synthesizer: Option<&dyn SpeechSynthesizer>,
    text: Option<&str>,
) -> std::result::Result<SynthesizedAudio, (StatusCode, serde_json::Value)> {
    let text = match text.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return Err(error_body(StatusCode::BAD_REQUEST, "text is required")),
    };

    let synthesizer = synthesizer
        .ok_or_else(|| error_body(StatusCode::SERVICE_UNAVAILABLE, "TTS is not configured"))?;

    match synthesizer.synthesize(text).await {
        Ok(audio) => Ok(audio),
        Err(SynthesisError::EmptyText) => Err(error_body(StatusCode::BAD_REQUEST, "text is required")),
        Err(e) => {
            tracing::error!(error = %e, "TTS request failed");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("TTS failed: {}", e),
            ))
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn tts_health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = tts_health_inner(state.synthesizer.as_deref());
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn interview_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = interview_inner(&state.store, &id).await;
    (status, Json(body))
}

pub async fn summary_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = summary_inner(&state, &id).await;
    (status, Json(body))
}

pub async fn score_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = score_inner(&state, &id).await;
    (status, Json(body))
}

pub async fn score_simple_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = score_simple_inner(&state, &id).await;
    (status, Json(body))
}

pub async fn tts_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<TtsQuery>,
) -> Response {
    let audio = match tts_inner(state.synthesizer.as_deref(), query.text.as_deref()).await {
        Ok(audio) => audio,
        Err((status, body)) => return (status, Json(body)).into_response(),
    };

    match audio_response(audio).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open synthesized audio");
            let (status, body) = error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            (status, Json(body)).into_response()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Stream the WAV file. The stream owns `audio`, so the file is removed once
/// the body is finished or dropped by a disconnecting client.
async fn audio_response(audio: SynthesizedAudio) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(audio.path()).await?;
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _owned = &audio;
        chunk
    });

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"speech.wav\""),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn to_json<T: Serialize>(value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Map analysis failures onto HTTP status codes.
pub fn analysis_error_response(context: &str, e: AnalysisError) -> (StatusCode, serde_json::Value) {
    let status = match &e {
        AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::TranscriptUnavailable => StatusCode::BAD_REQUEST,
        AnalysisError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "{}", context);
        return error_body(status, format!("{}: {}", context, e));
    }

    error_body(status, e.to_string())
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
