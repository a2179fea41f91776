//! Speech recognition: turns recorded audio into text
//!
//! Two backends:
//! - **http**: posts the WAV as multipart `file` to an OpenAI-compatible
//!   `/audio/transcriptions` endpoint and reads `{ "text": ... }`
//! - **command**: runs a local program with the audio path as its only
//!   argument and reads the transcript from stdout
//!
//! Capture is file based: the caller records audio elsewhere and hands the
//! path in. Blank transcripts are reported as `None`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::config::RecognitionSettings;

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio_path: &Path) -> Result<Option<String>, RecognitionError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recognizer command failed: {0}")]
    CommandFailed(String),

    #[error("Recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown recognition backend '{0}' (expected 'http' or 'command')")]
    UnknownBackend(String),

    #[error("Recognition backend misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionBackend {
    Http,
    Command,
}

impl FromStr for RecognitionBackend {
    type Err = RecognitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "whisper" | "openai" => Ok(Self::Http),
            "command" | "local" => Ok(Self::Command),
            other => Err(RecognitionError::UnknownBackend(other.to_string())),
        }
    }
}

/// Build a recognizer for `backend` and run it once over `audio_path`,
/// bounded by `timeout`.
pub async fn capture_and_recognize(
    backend: RecognitionBackend,
    settings: &RecognitionSettings,
    audio_path: &Path,
    timeout: Duration,
) -> Result<Option<String>, RecognitionError> {
    let recognizer = create_recognizer(backend, settings)?;
    recognize_with_timeout(recognizer.as_ref(), audio_path, timeout).await
}

pub async fn recognize_with_timeout(
    recognizer: &dyn SpeechRecognizer,
    audio_path: &Path,
    timeout: Duration,
) -> Result<Option<String>, RecognitionError> {
    match tokio::time::timeout(timeout, recognizer.recognize(audio_path)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(backend = recognizer.name(), timeout = ?timeout, "Recognition timed out");
            Err(RecognitionError::Timeout(timeout))
        }
    }
}

pub fn create_recognizer(
    backend: RecognitionBackend,
    settings: &RecognitionSettings,
) -> Result<Box<dyn SpeechRecognizer>, RecognitionError> {
    match backend {
        RecognitionBackend::Http => {
            let api_key = settings
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or_default();
            Ok(Box::new(HttpRecognizer::new(
                settings.base_url.clone(),
                settings.model.clone(),
                api_key,
            )?))
        }
        RecognitionBackend::Command => {
            let program = settings.command.clone().ok_or_else(|| {
                RecognitionError::Misconfigured("command backend needs [recognition] command".into())
            })?;
            Ok(Box::new(CommandRecognizer::new(program)))
        }
    }
}

fn normalize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpRecognizer {
    pub fn new(base_url: String, model: String, api_key: String) -> Result<Self, RecognitionError> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn recognize(&self, audio_path: &Path) -> Result<Option<String>, RecognitionError> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RecognitionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = resp.json().await?;
        let text = normalize(&body.text);
        tracing::info!(backend = "http", recognized = text.is_some(), "Recognition complete");
        Ok(text)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Command backend
// ============================================================================

#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: PathBuf,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    async fn recognize(&self, audio_path: &Path) -> Result<Option<String>, RecognitionError> {
        let output = Command::new(&self.program)
            .arg(audio_path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RecognitionError::CommandFailed(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(normalize(&stdout))
    }

    fn name(&self) -> &str {
        "command"
    }
}

// ============================================================================
// TESTS
// ============================================================================
