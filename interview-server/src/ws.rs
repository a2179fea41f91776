//! Interview WebSocket endpoint
//!
//! `GET /ws?job=&exp=&name=` upgrades to a text WebSocket driven by one
//! [`InterviewController`] per connection.
//!
//! ## Protocol
//!
//! | Direction | Frame |
//! |---|---|
//! | Server → Client | greeting, then `[INTERVIEW_ID] <uuid>` |
//! | Client → Server | candidate answer (text) |
//! | Server → Client | assistant reply, or `[error] <detail>` |
//! | Server → Client | closing statement, `[INFO] Interview transcript saved.`, close |
//!
//! When the client goes away before the interview concludes, whatever was
//! said so far is merged into the stored record. Server shutdown does the
//! same for every live session before closing it with `1001 Going Away`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use interview_core::{InterviewController, InterviewParams, Outbound};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;

use crate::http::HttpState;

#[derive(Debug, Deserialize, Default)]
pub struct InterviewQuery {
    pub job: Option<String>,
    pub exp: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Closed,
    Disconnected,
    ShuttingDown,
}

/// Interview sessions currently running on upgraded connections.
#[derive(Clone, Debug)]
pub struct LiveSessions {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Default for LiveSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSessions {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    fn track<F: std::future::Future>(&self, session: F) -> TrackedFuture<F> {
        self.tracker.track_future(session)
    }

    /// Tell every session to flush its transcript and close.
    pub fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Signal shutdown and wait up to `timeout` for the sessions to finish.
    /// Returns false if some were still running when the timeout expired.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.signal_shutdown();
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

pub async fn interview_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<InterviewQuery>,
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track(run_interview(socket, state, query)))
}

async fn run_interview(mut socket: WebSocket, state: Arc<HttpState>, query: InterviewQuery) {
    let settings = &state.config.interview;
    let params = InterviewParams::resolve(query.job, query.exp, query.name, settings);
    let mut controller = InterviewController::new(
        params,
        state.completion.clone(),
        state.store.clone(),
        settings,
    );

    let opening = match controller.start().await {
        Ok(out) => out,
        Err(e) => {
            tracing::error!(interview_id = %controller.id(), error = %e, "Failed to create interview record");
            let _ = send_all(
                &mut socket,
                vec![
                    Outbound::Error(format!("Failed to create interview: {}", e)),
                    Outbound::Close,
                ],
            )
            .await;
            return;
        }
    };

    let shutdown = state.sessions.shutdown.clone();
    let mut flow = send_all(&mut socket, opening).await;

    while flow == Flow::Continue {
        let received = tokio::select! {
            received = socket.recv() => received,
            _ = shutdown.cancelled() => {
                flow = Flow::ShuttingDown;
                break;
            }
        };

        let text = match received {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                flow = send_all(
                    &mut socket,
                    vec![Outbound::Error("Binary frames are not supported".to_string())],
                )
                .await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::warn!(interview_id = %controller.id(), error = %e, "WebSocket receive error");
                break;
            }
            // ping/pong
            Some(Ok(_)) => continue,
        };

        let out = controller.handle_user_text(&text).await;
        flow = send_all(&mut socket, out).await;
    }

    match flow {
        Flow::Closed => {}
        Flow::ShuttingDown => tracing::info!(
            interview_id = %controller.id(),
            turns = controller.assistant_turns(),
            "Closing session for shutdown"
        ),
        Flow::Continue | Flow::Disconnected => tracing::info!(
            interview_id = %controller.id(),
            turns = controller.assistant_turns(),
            "Client disconnected"
        ),
    }

    if let Err(e) = controller.persist_on_disconnect().await {
        tracing::error!(interview_id = %controller.id(), error = %e, "Failed to save partial transcript");
    }

    if flow == Flow::ShuttingDown {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "Server shutting down".into(),
            })))
            .await;
    }
}

async fn send_all(socket: &mut WebSocket, frames: Vec<Outbound>) -> Flow {
    for frame in frames {
        let message = match frame.to_wire() {
            Some(text) => Message::Text(text),
            None => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Interview closed".into(),
                    })))
                    .await;
                return Flow::Closed;
            }
        };

        if socket.send(message).await.is_err() {
            return Flow::Disconnected;
        }
    }

    Flow::Continue
}
