use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::score::ScoreBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// One persisted interview session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewRecord {
    pub id: Uuid,
    pub job_description: String,
    pub experience_required: String,
    pub candidate_name: String,
    pub created_at: DateTime<Utc>,
    /// Absent in documents written by older versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<TranscriptEntry>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub score_breakdown: Option<ScoreBreakdown>,
}

impl InterviewRecord {
    pub fn new(
        id: Uuid,
        job_description: impl Into<String>,
        experience_required: impl Into<String>,
        candidate_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_description: job_description.into(),
            experience_required: experience_required.into(),
            candidate_name: candidate_name.into(),
            created_at: now,
            updated_at: Some(now),
            messages: Vec::new(),
            transcript: None,
            summary: None,
            score: None,
            score_breakdown: None,
        }
    }

    /// Replace the message log and recompute the cached transcript.
    pub fn set_messages(&mut self, messages: Vec<TranscriptEntry>) {
        self.transcript = Some(flatten_transcript(&messages));
        self.messages = messages;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Render a message log as `speaker: text` lines.
pub fn flatten_transcript(messages: &[TranscriptEntry]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker.as_str(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry::assistant("Hi Ada, let's start the interview."),
            TranscriptEntry::user("I build APIs."),
            TranscriptEntry::assistant("Which frameworks?"),
        ]
    }

    #[test]
    fn test_flatten_transcript_format() {
        let transcript = flatten_transcript(&sample_log());
        assert_eq!(
            transcript,
            "assistant: Hi Ada, let's start the interview.\nuser: I build APIs.\nassistant: Which frameworks?"
        );
    }

    #[test]
    fn test_flatten_transcript_is_stable() {
        let log = sample_log();
        assert_eq!(flatten_transcript(&log), flatten_transcript(&log));
        assert_eq!(flatten_transcript(&[]), "");
    }

    #[test]
    fn test_set_messages_recomputes_transcript() {
        let mut record = InterviewRecord::new(Uuid::new_v4(), "Backend Engineer", "4", "Ada");
        let before = record.updated_at;

        record.set_messages(sample_log());

        assert_eq!(record.messages.len(), 3);
        assert_eq!(
            record.transcript.as_deref(),
            Some(flatten_transcript(&sample_log()).as_str())
        );
        assert!(record.updated_at >= before);
    }

    #[test]
    fn test_speaker_serializes_lowercase() {
        let json = serde_json::to_value(TranscriptEntry::user("hello")).unwrap();
        assert_eq!(json["speaker"], "user");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_record_tolerates_missing_optional_fields() {
        let id = Uuid::new_v4();
        let json = serde_json::json!({
            "id": id,
            "job_description": "Backend Engineer",
            "experience_required": "4",
            "candidate_name": "Ada",
            "created_at": "2026-01-01T00:00:00Z",
            "messages": [],
            "transcript": null,
            "summary": null,
            "score": null
        });

        let record: InterviewRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.id, id);
        assert!(record.messages.is_empty());
        assert!(record.transcript.is_none());
        assert!(record.score_breakdown.is_none());
        assert!(record.updated_at.is_none());

        // Stays absent until the next mutation.
        let written = serde_json::to_value(&record).unwrap();
        assert!(written.get("updated_at").is_none());
    }
}
