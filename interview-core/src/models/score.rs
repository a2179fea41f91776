use serde::{Deserialize, Serialize};

/// All score buckets are reported out of ten.
pub const SCORE_SCALE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub value: u8,
    pub scale: u8,
}

impl ScoreBucket {
    pub fn new(value: u8) -> Self {
        Self {
            value,
            scale: SCORE_SCALE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub overall: ScoreBucket,
    pub communication: ScoreBucket,
    pub relevance: ScoreBucket,
    pub technical: ScoreBucket,
    pub confidence: ScoreBucket,
    #[serde(default)]
    pub next_steps: Vec<String>,
}
