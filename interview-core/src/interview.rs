//! Conversation controller: one interview session's turn-taking state machine
//!
//! `Greeting → Active → Concluded`
//!
//! - `start` persists the initial record and emits the greeting plus the
//!   interview id.
//! - Each user message in `Active` is forwarded, with the full history, to
//!   the completion client; the reply (or an in-band error) counts as one
//!   assistant turn.
//! - Reaching `max_assistant_turns` emits the closing statement, flushes the
//!   transcript and moves to `Concluded`, where further messages only get a
//!   fixed notice.
//! - A disconnect before `Concluded` flushes whatever was accumulated.
//!
//! The controller is transport-agnostic: every call returns the frames to
//! send, in order, as [`Outbound`] values.

use std::sync::Arc;

use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionClient, CompletionError};
use crate::config::InterviewSettings;
use crate::models::{InterviewRecord, TranscriptEntry};
use crate::store::{SessionStore, StoreError};

pub const CLOSING_STATEMENT: &str = "Thanks for participating in the interview. We will get back to you regarding the next steps. Please keep an eye on your email for further instructions.";
pub const CONCLUDED_NOTICE: &str = "Interview already concluded.";
pub const SAVED_NOTICE: &str = "Interview transcript saved.";
pub const EMPTY_MESSAGE: &str = "Empty message";

pub fn greeting(candidate_name: &str) -> String {
    format!(
        "Hi {}, let's start the interview. Can you please introduce yourself?",
        candidate_name
    )
}

pub fn build_system_prompt(job_description: &str, years_experience: &str) -> String {
    format!(
        "You are Interview Bot. Your job is to conduct a structured job interview.\n\
         Role: Interview candidates for this position: {job_description}.\n\
         Target seniority: ~{years_experience} years of relevant experience.\n\n\
         Rules:\n\
         - Stay strictly in scope of the job description; do not answer unrelated questions.\n\
         - Assess communication clarity and professionalism.\n\
         - Ask short, focused questions one at a time.\n\
         - Cover: brief background, relevant projects, core skills, problem-solving, and a quick scenario.\n\
         - After a few questions, politely end the interview and thank the candidate.\n\
         - Keep responses concise and conversational.\n"
    )
}

/// Configuration captured when a session opens; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterviewParams {
    pub job_description: String,
    pub experience_required: String,
    pub candidate_name: String,
}

impl InterviewParams {
    /// Blank or missing values fall back to the configured defaults.
    pub fn resolve(
        job: Option<String>,
        experience: Option<String>,
        name: Option<String>,
        settings: &InterviewSettings,
    ) -> Self {
        let pick = |v: Option<String>, default: String| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
        };

        Self {
            job_description: pick(job, settings.job_description()),
            experience_required: pick(experience, settings.experience_required()),
            candidate_name: pick(name, settings.candidate_name()),
        }
    }

    fn new_record(&self, id: Uuid) -> InterviewRecord {
        InterviewRecord::new(
            id,
            self.job_description.clone(),
            self.experience_required.clone(),
            self.candidate_name.clone(),
        )
    }
}

/// A frame for the client, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    InterviewId(Uuid),
    Info(String),
    Error(String),
    /// The server should close the connection.
    Close,
}

impl Outbound {
    /// Text-frame encoding; `None` for `Close`.
    pub fn to_wire(&self) -> Option<String> {
        match self {
            Outbound::Text(t) => Some(t.clone()),
            Outbound::InterviewId(id) => Some(format!("[INTERVIEW_ID] {}", id)),
            Outbound::Info(m) => Some(format!("[INFO] {}", m)),
            Outbound::Error(m) => Some(format!("[error] {}", m)),
            Outbound::Close => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewPhase {
    Greeting,
    Active,
    Concluded,
}

pub struct InterviewController {
    id: Uuid,
    params: InterviewParams,
    phase: InterviewPhase,
    history: Vec<ChatMessage>,
    log: Vec<TranscriptEntry>,
    assistant_turns: u32,
    max_assistant_turns: u32,
    temperature: f32,
    completion: Option<Arc<dyn CompletionClient>>,
    store: SessionStore,
}

impl InterviewController {
    pub fn new(
        params: InterviewParams,
        completion: Option<Arc<dyn CompletionClient>>,
        store: SessionStore,
        settings: &InterviewSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            params,
            phase: InterviewPhase::Greeting,
            history: Vec::new(),
            log: Vec::new(),
            assistant_turns: 0,
            max_assistant_turns: settings.max_assistant_turns.max(1),
            temperature: settings.temperature,
            completion,
            store,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> InterviewPhase {
        self.phase
    }

    pub fn assistant_turns(&self) -> u32 {
        self.assistant_turns
    }

    pub fn messages(&self) -> &[TranscriptEntry] {
        &self.log
    }

    /// Persist the initial record and greet the candidate.
    pub async fn start(&mut self) -> Result<Vec<Outbound>, StoreError> {
        if self.phase != InterviewPhase::Greeting {
            return Ok(Vec::new());
        }

        self.store.insert_async(self.params.new_record(self.id)).await?;

        let greeting = greeting(&self.params.candidate_name);
        self.history.push(ChatMessage::system(build_system_prompt(
            &self.params.job_description,
            &self.params.experience_required,
        )));
        self.push_assistant(&greeting);
        self.phase = InterviewPhase::Active;

        tracing::info!(
            interview_id = %self.id,
            candidate = %self.params.candidate_name,
            "Interview started"
        );

        Ok(vec![Outbound::Text(greeting), Outbound::InterviewId(self.id)])
    }

    /// Handle one inbound user message.
    pub async fn handle_user_text(&mut self, text: &str) -> Vec<Outbound> {
        match self.phase {
            InterviewPhase::Greeting => {
                return vec![Outbound::Error("Interview not started".to_string())];
            }
            InterviewPhase::Concluded => {
                return vec![Outbound::Text(CONCLUDED_NOTICE.to_string())];
            }
            InterviewPhase::Active => {}
        }

        if text.trim().is_empty() {
            return vec![Outbound::Error(EMPTY_MESSAGE.to_string())];
        }

        self.log.push(TranscriptEntry::user(text));
        self.history.push(ChatMessage::user(text));

        let answer = match self.request_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(interview_id = %self.id, turn = self.assistant_turns + 1, error = %e, "Completion failed");
                format!("[error] Completion error: {}", e)
            }
        };

        self.push_assistant(&answer);
        self.assistant_turns += 1;

        let mut out = vec![Outbound::Text(answer)];

        if self.assistant_turns >= self.max_assistant_turns {
            out.extend(self.conclude().await);
        }

        out
    }

    /// Best-effort flush on abnormal termination. Returns whether anything
    /// was written.
    pub async fn persist_on_disconnect(&mut self) -> Result<bool, StoreError> {
        match self.phase {
            InterviewPhase::Greeting | InterviewPhase::Concluded => return Ok(false),
            InterviewPhase::Active => {}
        }

        self.flush().await?;
        tracing::info!(
            interview_id = %self.id,
            messages = self.log.len(),
            "Partial transcript saved on disconnect"
        );
        Ok(true)
    }

    async fn request_reply(&self) -> Result<String, CompletionError> {
        let client = self.completion.as_ref().ok_or(CompletionError::NotConfigured)?;
        client.complete(&self.history, self.temperature).await
    }

    fn push_assistant(&mut self, text: &str) {
        self.history.push(ChatMessage::assistant(text));
        self.log.push(TranscriptEntry::assistant(text));
    }

    async fn conclude(&mut self) -> Vec<Outbound> {
        self.push_assistant(CLOSING_STATEMENT);
        self.phase = InterviewPhase::Concluded;

        let mut out = vec![Outbound::Text(CLOSING_STATEMENT.to_string())];

        match self.flush().await {
            Ok(()) => {
                tracing::info!(
                    interview_id = %self.id,
                    turns = self.assistant_turns,
                    "Interview concluded, transcript saved"
                );
                out.push(Outbound::Info(SAVED_NOTICE.to_string()));
            }
            Err(e) => {
                tracing::error!(interview_id = %self.id, error = %e, "Failed to save transcript");
                out.push(Outbound::Error(format!("Failed to save transcript: {}", e)));
            }
        }

        out.push(Outbound::Close);
        out
    }

    /// Merge the message log (and derived transcript) into the stored record,
    /// recreating it from the session parameters if it has gone missing.
    async fn flush(&self) -> Result<(), StoreError> {
        let messages = self.log.clone();
        let params = self.params.clone();
        let id = self.id;
        self.store
            .upsert_async(
                id,
                move || params.new_record(id),
                move |record| record.set_messages(messages),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::flatten_transcript;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies "Question N" and records the history length of each call.
    #[derive(Default)]
    struct ScriptedCompletion {
        calls: AtomicUsize,
        history_lens: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, CompletionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.history_lens.lock().unwrap().push(messages.len());
            Ok(format!("Question {}", n))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionClient for FailingCompletion {
        async fn complete(&self, _: &[ChatMessage], _: f32) -> Result<String, CompletionError> {
            Err(CompletionError::Api {
                code: 500,
                message: "boom".to_string(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn params() -> InterviewParams {
        InterviewParams {
            job_description: "Backend Engineer".to_string(),
            experience_required: "4".to_string(),
            candidate_name: "Ada".to_string(),
        }
    }

    fn settings(max_turns: u32) -> InterviewSettings {
        InterviewSettings {
            max_assistant_turns: max_turns,
            ..Default::default()
        }
    }

    fn setup(
        max_turns: u32,
        completion: Option<Arc<dyn CompletionClient>>,
    ) -> (tempfile::TempDir, SessionStore, InterviewController) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("records.json"));
        let controller = InterviewController::new(params(), completion, store.clone(), &settings(max_turns));
        (dir, store, controller)
    }

    #[tokio::test]
    async fn test_start_greets_and_persists_initial_record() {
        let (_dir, store, mut controller) = setup(30, None);

        let out = controller.start().await.unwrap();

        assert_eq!(
            out,
            vec![
                Outbound::Text(
                    "Hi Ada, let's start the interview. Can you please introduce yourself?".to_string()
                ),
                Outbound::InterviewId(controller.id()),
            ]
        );
        assert_eq!(controller.phase(), InterviewPhase::Active);

        let record = store.get(&controller.id()).expect("record persisted on start");
        assert_eq!(record.job_description, "Backend Engineer");
        assert_eq!(record.experience_required, "4");
        assert_eq!(record.candidate_name, "Ada");
        assert!(record.messages.is_empty());
        assert!(record.transcript.is_none());
    }

    #[tokio::test]
    async fn test_start_is_not_reentrant() {
        let (_dir, _store, mut controller) = setup(30, None);
        controller.start().await.unwrap();
        assert!(controller.start().await.unwrap().is_empty());
        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_turn_forwards_full_history() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, _store, mut controller) = setup(30, Some(fake.clone()));
        controller.start().await.unwrap();

        let out = controller.handle_user_text("I build APIs.").await;
        assert_eq!(out, vec![Outbound::Text("Question 1".to_string())]);

        controller.handle_user_text("Mostly Rust.").await;

        // system + greeting + user, then + reply + user
        assert_eq!(*fake.history_lens.lock().unwrap(), vec![3, 5]);
        assert_eq!(controller.assistant_turns(), 2);
    }

    #[tokio::test]
    async fn test_user_text_before_start_is_rejected() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, _store, mut controller) = setup(30, Some(fake.clone()));

        let out = controller.handle_user_text("hello?").await;

        assert!(matches!(out.as_slice(), [Outbound::Error(_)]));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_in_band() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, _store, mut controller) = setup(30, Some(fake.clone()));
        controller.start().await.unwrap();

        let out = controller.handle_user_text("   ").await;

        assert_eq!(out, vec![Outbound::Error(EMPTY_MESSAGE.to_string())]);
        assert_eq!(controller.assistant_turns(), 0);
        assert_eq!(controller.messages().len(), 1);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reaching_turn_limit_concludes_and_persists_in_order() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, store, mut controller) = setup(3, Some(fake.clone()));

        let mut emitted: Vec<TranscriptEntry> = Vec::new();
        for o in controller.start().await.unwrap() {
            if let Outbound::Text(t) = o {
                emitted.push(TranscriptEntry::assistant(t));
            }
        }

        let mut last = Vec::new();
        for i in 0..3 {
            let user = format!("answer {}", i);
            emitted.push(TranscriptEntry::user(user.clone()));
            last = controller.handle_user_text(&user).await;
            for o in &last {
                if let Outbound::Text(t) = o {
                    emitted.push(TranscriptEntry::assistant(t.clone()));
                }
            }
        }

        assert_eq!(
            last,
            vec![
                Outbound::Text("Question 3".to_string()),
                Outbound::Text(CLOSING_STATEMENT.to_string()),
                Outbound::Info(SAVED_NOTICE.to_string()),
                Outbound::Close,
            ]
        );
        assert_eq!(controller.phase(), InterviewPhase::Concluded);

        let record = store.get(&controller.id()).unwrap();
        assert_eq!(record.messages, emitted);
        assert_eq!(record.transcript, Some(flatten_transcript(&emitted)));
    }

    #[tokio::test]
    async fn test_concluded_session_answers_with_notice_only() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, store, mut controller) = setup(1, Some(fake.clone()));
        controller.start().await.unwrap();
        controller.handle_user_text("I build APIs.").await;
        let saved = store.get(&controller.id()).unwrap();

        let out = controller.handle_user_text("one more thing").await;

        assert_eq!(out, vec![Outbound::Text(CONCLUDED_NOTICE.to_string())]);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&controller.id()).unwrap().messages, saved.messages);
        assert!(!controller.persist_on_disconnect().await.unwrap());
    }

    #[tokio::test]
    async fn test_completion_failure_is_in_band_and_counts() {
        let (_dir, store, mut controller) = setup(1, Some(Arc::new(FailingCompletion)));
        controller.start().await.unwrap();

        let out = controller.handle_user_text("I build APIs.").await;

        match &out[0] {
            Outbound::Text(t) => {
                assert!(t.starts_with("[error] Completion error:"), "got {}", t);
                assert!(t.contains("boom"));
            }
            other => panic!("Expected in-band text, got {:?}", other),
        }
        assert_eq!(controller.phase(), InterviewPhase::Concluded);
        assert!(store.get(&controller.id()).unwrap().transcript.is_some());
    }

    #[tokio::test]
    async fn test_missing_completion_client_is_in_band_error() {
        let (_dir, _store, mut controller) = setup(30, None);
        controller.start().await.unwrap();

        let out = controller.handle_user_text("hello").await;

        assert_eq!(
            out,
            vec![Outbound::Text(
                "[error] Completion error: Completion service not configured".to_string()
            )]
        );
        assert_eq!(controller.assistant_turns(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_mid_session_merges_partial_transcript() {
        let fake = Arc::new(ScriptedCompletion::default());
        let (_dir, store, mut controller) = setup(30, Some(fake));
        controller.start().await.unwrap();
        controller.handle_user_text("I build APIs.").await;

        // Fields written by someone else in the meantime survive the merge.
        store
            .update(&controller.id(), |r| r.summary = Some("early notes".into()))
            .unwrap();

        assert!(controller.persist_on_disconnect().await.unwrap());

        let record = store.get(&controller.id()).unwrap();
        assert_eq!(record.messages, controller.messages());
        assert_eq!(record.messages.len(), 3);
        assert_eq!(record.summary.as_deref(), Some("early notes"));
        assert!(record.transcript.unwrap().contains("user: I build APIs."));
    }

    #[tokio::test]
    async fn test_disconnect_without_turns_still_saves_configuration() {
        let (_dir, store, mut controller) = setup(30, None);
        controller.start().await.unwrap();

        // The record vanished from the document (e.g. a stale concurrent save).
        store.save(&Default::default()).unwrap();

        assert!(controller.persist_on_disconnect().await.unwrap());
        let record = store.get(&controller.id()).unwrap();
        assert_eq!(record.candidate_name, "Ada");
        assert_eq!(record.job_description, "Backend Engineer");
        assert_eq!(record.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_before_start_writes_nothing() {
        let (_dir, store, mut controller) = setup(30, None);
        assert!(!controller.persist_on_disconnect().await.unwrap());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_params_resolve_blank_to_defaults() {
        let settings = InterviewSettings {
            default_job_description: Some("Data Engineer".into()),
            default_experience_required: Some("5".into()),
            default_candidate_name: Some("Candidate".into()),
            ..Default::default()
        };

        let p = InterviewParams::resolve(Some("  ".into()), None, Some(" Ada ".into()), &settings);

        assert_eq!(p.job_description, "Data Engineer");
        assert_eq!(p.experience_required, "5");
        assert_eq!(p.candidate_name, "Ada");
    }

    #[test]
    fn test_outbound_wire_encoding() {
        let id = Uuid::nil();
        assert_eq!(
            Outbound::InterviewId(id).to_wire().unwrap(),
            "[INTERVIEW_ID] 00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Outbound::Info("x".into()).to_wire().unwrap(), "[INFO] x");
        assert_eq!(Outbound::Error("y".into()).to_wire().unwrap(), "[error] y");
        assert_eq!(Outbound::Text("z".into()).to_wire().unwrap(), "z");
        assert!(Outbound::Close.to_wire().is_none());
    }

    #[test]
    fn test_system_prompt_mentions_role_and_seniority() {
        let prompt = build_system_prompt("Backend Engineer", "4");
        assert!(prompt.starts_with("You are Interview Bot."));
        assert!(prompt.contains("Role: Interview candidates for this position: Backend Engineer."));
        assert!(prompt.contains("Target seniority: ~4 years"));
    }
}
