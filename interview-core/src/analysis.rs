//! Derived analysis: summary and score computed from a stored transcript
//!
//! Each request loads the record, returns the cached value when present and
//! otherwise issues exactly one completion call. Results are only written
//! back after they parse and validate; a malformed or out-of-range reply
//! leaves the record untouched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionClient, CompletionError};
use crate::models::{InterviewRecord, ScoreBreakdown, ScoreBucket, SCORE_SCALE};
use crate::store::{SessionStore, StoreError};

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert technical interviewer and evaluator.";

const SCORE_SYSTEM_PROMPT: &str = "You are a fair and pragmatic technical interviewer. Be forgiving about ASR/STT mistakes and focus on the candidate's likely intent. Always return strict JSON per the user's schema.";

const SCORE_SCHEMA_HINT: &str = r#"Return ONLY valid minified JSON with this exact structure and keys, no prose, no markdown, no comments.
{
  "overall": { "value": <int 1-10>, "scale": 10 },
  "communication": { "value": <int 1-10>, "scale": 10 },
  "relevance": { "value": <int 1-10>, "scale": 10 },
  "technical": { "value": <int 1-10>, "scale": 10 },
  "confidence": { "value": <int 1-10>, "scale": 10 },
  "next_steps": [ <short actionable suggestions as strings> ]
}
"#;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Interview not found")]
    NotFound(Uuid),

    #[error("Transcript not available yet")]
    TranscriptUnavailable,

    #[error("Completion service not configured")]
    NotConfigured,

    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Model did not return JSON: {0}")]
    MalformedOutput(String),

    #[error("Invalid {field}.value: {value}")]
    InvalidScore { field: &'static str, value: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub id: Uuid,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub id: Uuid,
    #[serde(flatten)]
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleScore {
    pub id: Uuid,
    pub score: u8,
    pub scale: u8,
}

// ============================================================================
// Requests
// ============================================================================

pub async fn summarize(
    store: &SessionStore,
    completion: Option<&dyn CompletionClient>,
    id: &Uuid,
    temperature: f32,
) -> Result<SummaryResponse, AnalysisError> {
    let record = store
        .get_async(*id)
        .await?
        .ok_or(AnalysisError::NotFound(*id))?;

    if let Some(summary) = record.summary.filter(|s| !s.is_empty()) {
        return Ok(SummaryResponse { id: *id, summary });
    }

    let transcript = available_transcript(record.transcript.as_deref())?;
    let client = completion.ok_or(AnalysisError::NotConfigured)?;

    let messages = vec![
        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(summary_prompt(transcript)),
    ];
    let summary = client.complete(&messages, temperature).await?;

    let cached = summary.clone();
    store
        .update_async(*id, move |r| {
            r.summary = Some(cached);
            r.touch();
        })
        .await?
        .ok_or(AnalysisError::NotFound(*id))?;

    tracing::info!(interview_id = %id, "Summary generated");

    Ok(SummaryResponse { id: *id, summary })
}

/// Score breakdown; also caches the simple score (`overall.value`).
pub async fn score_breakdown(
    store: &SessionStore,
    completion: Option<&dyn CompletionClient>,
    id: &Uuid,
    temperature: f32,
) -> Result<ScoreResponse, AnalysisError> {
    let record = store
        .get_async(*id)
        .await?
        .ok_or(AnalysisError::NotFound(*id))?;

    if let Some(breakdown) = record.score_breakdown.clone() {
        return Ok(ScoreResponse { id: *id, breakdown });
    }

    let transcript = available_transcript(record.transcript.as_deref())?;
    let client = completion.ok_or(AnalysisError::NotConfigured)?;

    let messages = vec![
        ChatMessage::system(SCORE_SYSTEM_PROMPT),
        ChatMessage::user(score_prompt(&record, transcript)),
    ];
    let raw = client.complete(&messages, temperature).await?;

    let breakdown = match parse_breakdown(&raw) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(interview_id = %id, error = %e, "Rejected score output");
            return Err(e);
        }
    };

    let cached = breakdown.clone();
    store
        .update_async(*id, move |r| {
            r.score = Some(cached.overall.value);
            r.score_breakdown = Some(cached);
            r.touch();
        })
        .await?
        .ok_or(AnalysisError::NotFound(*id))?;

    tracing::info!(interview_id = %id, overall = breakdown.overall.value, "Score generated");

    Ok(ScoreResponse { id: *id, breakdown })
}

/// Single-number score, computing the full breakdown first when absent.
pub async fn simple_score(
    store: &SessionStore,
    completion: Option<&dyn CompletionClient>,
    id: &Uuid,
    temperature: f32,
) -> Result<SimpleScore, AnalysisError> {
    let record = store
        .get_async(*id)
        .await?
        .ok_or(AnalysisError::NotFound(*id))?;

    let score = match record.score {
        Some(score) => score,
        None => {
            score_breakdown(store, completion, id, temperature)
                .await?
                .breakdown
                .overall
                .value
        }
    };

    Ok(SimpleScore {
        id: *id,
        score,
        scale: SCORE_SCALE,
    })
}

fn available_transcript(transcript: Option<&str>) -> Result<&str, AnalysisError> {
    match transcript {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(AnalysisError::TranscriptUnavailable),
    }
}

// ============================================================================
// Prompts
// ============================================================================

pub fn summary_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following interview transcript in 5-8 concise bullet points focusing on the candidate's background, key skills, notable projects, and areas of concern.\n\n{}",
        transcript
    )
}

pub fn score_prompt(record: &InterviewRecord, transcript: &str) -> String {
    format!(
        "Score the candidate based on the transcript using a 1-10 scale for each category. Be fair and forgiving about minor transcription errors; focus on intent and content.\n\
         Role: {}\nTarget Experience: ~{} years\n\n\
         Transcript (speaker: text):\n{}\n\n{}",
        record.job_description, record.experience_required, transcript, SCORE_SCHEMA_HINT
    )
}

// ============================================================================
// Parsing & validation
// ============================================================================

/// Pull a JSON object out of model output: the whole text, then the widest
/// `{...}` span, then the first well-formed object anywhere in the text.
pub fn parse_model_json(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }

    if let Ok(re) = Regex::new(r"\{[\s\S]*\}") {
        if let Some(m) = re.find(text) {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(m.as_str()) {
                return Some(map);
            }
        }
    }

    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }

    None
}

pub fn parse_breakdown(text: &str) -> Result<ScoreBreakdown, AnalysisError> {
    let data = parse_model_json(text).ok_or_else(|| AnalysisError::MalformedOutput(preview(text)))?;

    Ok(ScoreBreakdown {
        overall: bucket(&data, "overall")?,
        communication: bucket(&data, "communication")?,
        relevance: bucket(&data, "relevance")?,
        technical: bucket(&data, "technical")?,
        confidence: bucket(&data, "confidence")?,
        next_steps: next_steps(&data),
    })
}

/// Integers (or all-digit strings) in [1, 10]; the scale is forced to 10.
fn bucket(data: &Map<String, Value>, field: &'static str) -> Result<ScoreBucket, AnalysisError> {
    let raw = data.get(field).and_then(|b| b.get("value")).unwrap_or(&Value::Null);

    let value = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s.parse().ok(),
        _ => None,
    };

    match value {
        Some(v @ 1..=10) => Ok(ScoreBucket::new(v as u8)),
        _ => Err(AnalysisError::InvalidScore {
            field,
            value: raw.to_string(),
        }),
    }
}

fn next_steps(data: &Map<String, Value>) -> Vec<String> {
    match data.get("next_steps") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

// ============================================================================
// TESTS
// ============================================================================
