use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_JOB_DESCRIPTION: &str = "Software Engineer focusing on backend Python services.";
pub const DEFAULT_EXPERIENCE_REQUIRED: &str = "3";
pub const DEFAULT_CANDIDATE_NAME: &str = "Candidate";
pub const DEFAULT_MAX_ASSISTANT_TURNS: u32 = 30;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InterviewConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub interview: InterviewSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub synthesis: SynthesisSettings,
    #[serde(default)]
    pub recognition: RecognitionSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "interview_records.json".to_string(),
        }
    }
}

/// Per-session interview behaviour. Unset defaults fall back to the
/// `DEFAULT_*` environment variables, then to the built-in constants.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InterviewSettings {
    pub default_job_description: Option<String>,
    pub default_experience_required: Option<String>,
    pub default_candidate_name: Option<String>,
    pub max_assistant_turns: u32,
    pub temperature: f32,
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            default_job_description: None,
            default_experience_required: None,
            default_candidate_name: None,
            max_assistant_turns: DEFAULT_MAX_ASSISTANT_TURNS,
            temperature: 0.3,
        }
    }
}

impl InterviewSettings {
    pub fn job_description(&self) -> String {
        resolve_default(
            &self.default_job_description,
            "DEFAULT_JOB_DESCRIPTION",
            DEFAULT_JOB_DESCRIPTION,
        )
    }

    pub fn experience_required(&self) -> String {
        resolve_default(
            &self.default_experience_required,
            "DEFAULT_EXPERIENCE_REQUIRED",
            DEFAULT_EXPERIENCE_REQUIRED,
        )
    }

    pub fn candidate_name(&self) -> String {
        resolve_default(
            &self.default_candidate_name,
            "DEFAULT_CANDIDATE_NAME",
            DEFAULT_CANDIDATE_NAME,
        )
    }
}

fn resolve_default(configured: &Option<String>, env_key: &str, fallback: &str) -> String {
    configured
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub analysis_temperature: f32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: None,
            timeout_seconds: 60,
            analysis_temperature: 0.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SynthesisSettings {
    pub enabled: bool,
    pub binary: Option<String>,
    pub model_path: Option<String>,
    pub config_path: Option<String>,
    pub voices_dir: Option<String>,
    pub voice: String,
    pub timeout_seconds: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            model_path: None,
            config_path: None,
            voices_dir: None,
            voice: "en_US-amy-medium".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecognitionSettings {
    pub backend: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub command: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
            command: None,
            timeout_seconds: 15,
        }
    }
}

impl InterviewConfig {
    /// Load from an optional TOML file, then `INTERVIEW_<SECTION>__<KEY>`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("INTERVIEW")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        s.try_deserialize()
    }
}
