//! WebSocket integration tests for the interview loop
//!
//! Each test binds the router to an ephemeral port and drives it with a
//! `tokio-tungstenite` client. The chat-completion API is a `wiremock`
//! server, so the real HTTP completion client is exercised end to end.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use interview_core::completion::CompletionConfig;
use interview_core::interview::CLOSING_STATEMENT;
use interview_core::{InterviewConfig, OpenAiCompletionClient, SessionStore, Speaker};
use interview_server::http::{build_router, HttpState};
use interview_server::ws::LiveSessions;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    addr: std::net::SocketAddr,
    store: SessionStore,
    sessions: LiveSessions,
    _dir: tempfile::TempDir,
    _llm: MockServer,
}

async fn start(max_turns: u32) -> Harness {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "Which frameworks do you use?" } }
            ]
        })))
        .mount(&llm)
        .await;

    let completion = OpenAiCompletionClient::with_base_url(
        CompletionConfig::new(
            Some("sk-test".to_string()),
            "gpt-3.5-turbo".to_string(),
            Duration::from_secs(5),
        ),
        llm.uri(),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("interview_records.json"));

    let mut config = InterviewConfig::default();
    config.interview.max_assistant_turns = max_turns;

    let sessions = LiveSessions::new();
    let state = HttpState {
        store: store.clone(),
        completion: Some(Arc::new(completion)),
        synthesizer: None,
        config,
        sessions: sessions.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(Arc::new(state)))
            .await
            .unwrap();
    });

    Harness {
        addr,
        store,
        sessions,
        _dir: dir,
        _llm: llm,
    }
}

async fn connect(h: &Harness, query: &str) -> Client {
    let url = format!("ws://{}/ws?{}", h.addr, query);
    let (ws, _) = connect_async(url).await.expect("WebSocket handshake");
    ws
}

/// Next text frame, or `None` once the server has closed the connection.
async fn next_text(ws: &mut Client) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server reply within timeout")?;
        match msg {
            Ok(Message::Text(t)) => return Some(t),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn read_opening(ws: &mut Client) -> (String, Uuid) {
    let greeting = next_text(ws).await.unwrap();
    let id_line = next_text(ws).await.unwrap();
    let id = id_line
        .strip_prefix("[INTERVIEW_ID] ")
        .expect("interview id line")
        .parse()
        .unwrap();
    (greeting, id)
}

/// Poll for a condition written by the server after the socket closes.
async fn eventually<F: Fn() -> bool>(f: F) -> bool {
    for _ in 0..50 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ===========================================================================
// TEST 1: full interview: greeting, replies, closing, server close
// ===========================================================================
#[tokio::test]
async fn test_full_interview_concludes_and_persists() {
    let h = start(3).await;
    let mut ws = connect(&h, "job=Backend%20Engineer&exp=4&name=Ada").await;

    let (greeting, id) = read_opening(&mut ws).await;
    assert_eq!(
        greeting,
        "Hi Ada, let's start the interview. Can you please introduce yourself?"
    );
    assert!(h.store.get(&id).is_some(), "record exists from session start");

    for turn in 0..3 {
        ws.send(Message::Text(format!("answer {}", turn))).await.unwrap();
        assert_eq!(next_text(&mut ws).await.unwrap(), "Which frameworks do you use?");
    }

    assert_eq!(next_text(&mut ws).await.unwrap(), CLOSING_STATEMENT);
    assert_eq!(
        next_text(&mut ws).await.unwrap(),
        "[INFO] Interview transcript saved."
    );
    assert_eq!(next_text(&mut ws).await, None, "server closes the socket");

    let record = h.store.get(&id).unwrap();
    assert_eq!(record.job_description, "Backend Engineer");
    assert_eq!(record.experience_required, "4");
    // greeting + 3 × (user, assistant) + closing
    assert_eq!(record.messages.len(), 8);
    assert_eq!(record.messages[1].speaker, Speaker::User);
    assert_eq!(record.messages[1].text, "answer 0");
    assert_eq!(record.messages[7].text, CLOSING_STATEMENT);
    assert!(record.transcript.unwrap().starts_with("assistant: Hi Ada"));
}

// ===========================================================================
// TEST 2: empty message is rejected in-band and does not count
// ===========================================================================
#[tokio::test]
async fn test_empty_message_is_rejected() {
    let h = start(1).await;
    let mut ws = connect(&h, "name=Ada").await;
    read_opening(&mut ws).await;

    ws.send(Message::Text(String::new())).await.unwrap();
    assert_eq!(next_text(&mut ws).await.unwrap(), "[error] Empty message");

    ws.send(Message::Text("I build APIs.".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await.unwrap(), "Which frameworks do you use?");
    assert_eq!(next_text(&mut ws).await.unwrap(), CLOSING_STATEMENT);
}

// ===========================================================================
// TEST 3: missing query parameters fall back to defaults
// ===========================================================================
#[tokio::test]
async fn test_defaults_apply_without_query() {
    let h = start(30).await;
    let mut ws = connect(&h, "job=&exp=").await;

    let (greeting, id) = read_opening(&mut ws).await;

    let record = h.store.get(&id).unwrap();
    assert!(greeting.starts_with(&format!("Hi {},", record.candidate_name)));
    assert!(!record.job_description.is_empty());
    assert!(!record.experience_required.is_empty());
}

// ===========================================================================
// TEST 4: client disconnect mid-interview saves the partial transcript
// ===========================================================================
#[tokio::test]
async fn test_disconnect_saves_partial_transcript() {
    let h = start(30).await;
    let mut ws = connect(&h, "job=Backend%20Engineer&exp=4&name=Ada").await;
    let (_, id) = read_opening(&mut ws).await;

    ws.send(Message::Text("I build APIs.".into())).await.unwrap();
    next_text(&mut ws).await.unwrap();
    ws.close(None).await.unwrap();
    drop(ws);

    let store = h.store.clone();
    assert!(
        eventually(|| store.get(&id).map(|r| r.messages.len() == 3).unwrap_or(false)).await,
        "partial transcript persisted after disconnect"
    );
    let record = h.store.get(&id).unwrap();
    assert_eq!(
        record.transcript.as_deref(),
        Some("assistant: Hi Ada, let's start the interview. Can you please introduce yourself?\nuser: I build APIs.\nassistant: Which frameworks do you use?")
    );
}

// ===========================================================================
// TEST 5: disconnect right after the greeting still saves configuration
// ===========================================================================
#[tokio::test]
async fn test_disconnect_without_turns_keeps_configuration() {
    let h = start(30).await;
    let mut ws = connect(&h, "job=Data%20Engineer&exp=2&name=Grace").await;
    let (_, id) = read_opening(&mut ws).await;

    drop(ws);

    let store = h.store.clone();
    assert!(eventually(|| store.get(&id).map(|r| r.transcript.is_some()).unwrap_or(false)).await);
    let record = h.store.get(&id).unwrap();
    assert_eq!(record.candidate_name, "Grace");
    assert_eq!(record.job_description, "Data Engineer");
    assert_eq!(record.messages.len(), 1);
}

// ===========================================================================
// TEST 6: shutdown flushes live sessions before closing them
// ===========================================================================
#[tokio::test]
async fn test_shutdown_flushes_live_session() {
    let h = start(30).await;
    let mut ws = connect(&h, "job=Backend%20Engineer&exp=4&name=Ada").await;
    let (_, id) = read_opening(&mut ws).await;

    ws.send(Message::Text("I build APIs.".into())).await.unwrap();
    next_text(&mut ws).await.unwrap();
    assert_eq!(h.sessions.len(), 1);

    assert!(h.sessions.drain(Duration::from_secs(5)).await);

    // Flushed before the close frame goes out.
    let record = h.store.get(&id).unwrap();
    assert_eq!(record.messages.len(), 3);
    assert!(record.updated_at.is_some());

    let close = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("close within timeout");
    match close {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 1001);
        }
        other => panic!("Expected going-away close, got {:?}", other),
    }
    assert!(h.sessions.is_empty());
}
