pub mod record;
pub mod score;

pub use record::{flatten_transcript, InterviewRecord, Speaker, TranscriptEntry};
pub use score::{ScoreBreakdown, ScoreBucket, SCORE_SCALE};
