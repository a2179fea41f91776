use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::completion::CompletionError;
use crate::recognition::RecognitionError;
use crate::store::StoreError;
use crate::synthesis::SynthesisError;

#[derive(Error, Debug)]
pub enum InterviewError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Other error: {0}")]
    Other(String),
}
