//! Speech synthesis: shells out to a Piper-style TTS binary
//!
//! The binary reads text on stdin and writes a WAV file given by
//! `--output_file`. Each call gets its own temporary file, owned by the
//! returned [`SynthesizedAudio`]; the file is removed when that value is
//! dropped, whether or not the audio was fully consumed.
//!
//! Resolution order for the binary: configured path / `PIPER_BIN`, then
//! `piper` on `PATH`, then a few well-known install locations.
//! Resolution order for the voice: configured model / `PIPER_MODEL_PATH`,
//! then `<voices_dir>/<voice>.onnx`, then the bare voice alias.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SynthesisSettings;

const BINARY_CANDIDATES: &[&str] = &[
    "/usr/local/bin/piper",
    "/opt/homebrew/bin/piper",
    "~/piper/piper/piper",
];

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;

    /// Resolved binary and voice, for health reporting.
    fn info(&self) -> SynthesizerInfo;
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Synthesis binary not found (set PIPER_BIN or [synthesis] binary)")]
    BinaryNotFound,

    #[error("Text is empty")]
    EmptyText,

    #[error("Failed to run synthesizer: {0}")]
    Io(#[from] std::io::Error),

    #[error("Synthesizer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Synthesizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Synthesizer produced no audio")]
    NoOutput,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SynthesizerInfo {
    pub binary: String,
    pub model_path: Option<String>,
    pub config_path: Option<String>,
    pub alias: Option<String>,
}

/// A synthesized WAV file. Deleted from disk when dropped.
#[derive(Debug)]
pub struct SynthesizedAudio {
    path: TempPath,
}

impl SynthesizedAudio {
    /// Take ownership of an already-written WAV file.
    pub fn from_temp_path(path: TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&*self.path).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Voice {
    Model {
        model: PathBuf,
        config: Option<PathBuf>,
    },
    Alias(String),
}

#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    binary: PathBuf,
    voice: Voice,
    timeout: Duration,
}

impl PiperSynthesizer {
    /// Resolve binary and voice from settings plus the legacy `PIPER_*`
    /// environment variables.
    pub fn from_settings(settings: &SynthesisSettings) -> Result<Self, SynthesisError> {
        let binary = settings
            .binary
            .clone()
            .or_else(|| std::env::var("PIPER_BIN").ok());
        let binary = find_binary(binary.as_deref()).ok_or(SynthesisError::BinaryNotFound)?;

        let model_path = settings
            .model_path
            .clone()
            .or_else(|| std::env::var("PIPER_MODEL_PATH").ok());
        let config_path = settings
            .config_path
            .clone()
            .or_else(|| std::env::var("PIPER_CONFIG_PATH").ok());
        let voices_dir = settings
            .voices_dir
            .clone()
            .or_else(|| std::env::var("PIPER_VOICES_DIR").ok())
            .map(|d| expand(&d))
            .unwrap_or_else(|| PathBuf::from("voices"));

        let voice = resolve_voice(
            model_path.as_deref(),
            config_path.as_deref(),
            &voices_dir,
            &settings.voice,
        );

        tracing::info!(binary = %binary.display(), voice = ?voice, "Speech synthesizer resolved");

        Ok(Self {
            binary,
            voice,
            timeout: Duration::from_secs(settings.timeout_seconds),
        })
    }

    pub fn with_model(binary: PathBuf, model: PathBuf, config: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary,
            voice: Voice::Model { model, config },
            timeout,
        }
    }

    pub fn with_alias(binary: PathBuf, alias: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary,
            voice: Voice::Alias(alias.into()),
            timeout,
        }
    }

    fn voice_args(&self) -> Vec<String> {
        match &self.voice {
            Voice::Model { model, config } => {
                let mut args = vec!["--model".to_string(), model.display().to_string()];
                if let Some(cfg) = config {
                    args.push("--config".to_string());
                    args.push(cfg.display().to_string());
                }
                args
            }
            Voice::Alias(alias) => vec!["--model".to_string(), alias.clone()],
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let output = tempfile::Builder::new()
            .prefix("interview-tts-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        let mut child = Command::new(&self.binary)
            .args(self.voice_args())
            .arg("--output_file")
            .arg(&*output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // The bound covers feeding stdin too: a stalled child stops reading
        // once the pipe buffer is full.
        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                // A child that exits early closes the pipe; its exit status
                // is the error worth reporting.
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            child.wait_with_output().await
        };

        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::error!(timeout = ?self.timeout, "Synthesizer timed out");
                return Err(SynthesisError::Timeout(self.timeout));
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            tracing::error!(status = %result.status, stderr = %stderr, "Synthesizer failed");
            return Err(SynthesisError::Failed {
                status: result.status.to_string(),
                stderr,
            });
        }

        let size = tokio::fs::metadata(&*output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(SynthesisError::NoOutput);
        }

        tracing::debug!(bytes = size, chars = text.len(), "Synthesized speech");

        Ok(SynthesizedAudio { path: output })
    }

    fn info(&self) -> SynthesizerInfo {
        let (model_path, config_path, alias) = match &self.voice {
            Voice::Model { model, config } => (
                Some(model.display().to_string()),
                config.as_ref().map(|c| c.display().to_string()),
                None,
            ),
            Voice::Alias(a) => (None, None, Some(a.clone())),
        };

        SynthesizerInfo {
            binary: self.binary.display().to_string(),
            model_path,
            config_path,
            alias,
        }
    }
}

// ============================================================================
// Resolution helpers
// ============================================================================

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn find_binary(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(bin) = explicit {
        let path = expand(bin);
        if path.is_file() {
            return Some(path);
        }
        if let Some(found) = find_on_path(bin) {
            return Some(found);
        }
        tracing::warn!(binary = bin, "Configured synthesis binary not found");
    }

    find_on_path("piper").or_else(|| {
        BINARY_CANDIDATES
            .iter()
            .map(|c| expand(c))
            .find(|p| p.is_file())
    })
}

fn resolve_voice(
    model_path: Option<&str>,
    config_path: Option<&str>,
    voices_dir: &Path,
    voice: &str,
) -> Voice {
    if let Some(model) = model_path.map(expand).filter(|p| p.is_file()) {
        let config = config_path
            .map(expand)
            .filter(|p| p.is_file())
            .or_else(|| guess_config(&model, voice));
        return Voice::Model { model, config };
    }

    let stem = voice.trim_end_matches(".onnx");
    let candidate = voices_dir.join(format!("{}.onnx", stem));
    if candidate.is_file() {
        let config = guess_config(&candidate, voice);
        return Voice::Model {
            model: candidate,
            config,
        };
    }

    Voice::Alias(voice.to_string())
}

/// `<model>.json` (e.g. `amy.onnx.json`), then `<stem>.json`, then any
/// sibling `.json` whose name contains the voice stem.
fn guess_config(model: &Path, voice: &str) -> Option<PathBuf> {
    let mut double = model.as_os_str().to_owned();
    double.push(".json");
    let double = PathBuf::from(double);
    if double.is_file() {
        return Some(double);
    }

    let single = model.with_extension("json");
    if single.is_file() {
        return Some(single);
    }

    let needle = voice.trim_end_matches(".onnx").to_lowercase();
    let dir = model.parent()?;
    let mut siblings: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect();
    siblings.sort();
    siblings.into_iter().next()
}

// ============================================================================
// TESTS
// ============================================================================
