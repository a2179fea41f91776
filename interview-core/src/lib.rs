pub mod analysis;
pub mod completion;
pub mod config;
pub mod error;
pub mod interview;
pub mod models;
pub mod recognition;
pub mod store;
pub mod synthesis;

pub use analysis::{ScoreResponse, SimpleScore, SummaryResponse};
pub use completion::{
    create_completion_client, ChatMessage, CompletionClient, CompletionError,
    OpenAiCompletionClient, Role,
};
pub use config::InterviewConfig;
pub use error::InterviewError;
pub use interview::{InterviewController, InterviewParams, InterviewPhase, Outbound};
pub use models::{InterviewRecord, ScoreBreakdown, ScoreBucket, Speaker, TranscriptEntry};
pub use recognition::{capture_and_recognize, RecognitionBackend, SpeechRecognizer};
pub use store::{SessionStore, Sessions, StoreError};
pub use synthesis::{PiperSynthesizer, SpeechSynthesizer, SynthesizedAudio, SynthesisError};
