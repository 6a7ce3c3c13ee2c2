use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MemoryError, Result};
use crate::memory::types::Category;
use crate::retry::RetryPolicy;

/// Main configuration structure for Lorekeeper
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Personality threaded into every LLM task
    #[serde(default)]
    pub persona: PersonaConfig,
    /// Consolidation thresholds for the summarization ladder
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Learning extractor configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Retrieval engine configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Scheduler cadence configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-category ladder toggles
    #[serde(default)]
    pub categories: CategoryConfig,
    /// Remote LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Durable storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| MemoryError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from an explicit path, or the first default location that exists
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(&path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".lorekeeper").join("config.toml")),
            dirs::config_dir().map(|c| c.join("lorekeeper").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the ladder or retrieval invariants
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.short_trigger == 0 {
            return Err(MemoryError::Config(
                "thresholds.short_trigger must be at least 1".to_string(),
            ));
        }
        if self.thresholds.mid_trigger == 0 {
            return Err(MemoryError::Config(
                "thresholds.mid_trigger must be at least 1".to_string(),
            ));
        }
        let tau = self.extraction.dedup_threshold;
        if !(tau > 0.0 && tau <= 1.0) {
            return Err(MemoryError::Config(format!(
                "extraction.dedup_threshold must be in (0, 1], got {tau}"
            )));
        }
        if self.extraction.max_attempts == 0 {
            return Err(MemoryError::Config(
                "extraction.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(MemoryError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.retrieval.category_timeout_ms == 0 {
            return Err(MemoryError::Config(
                "retrieval.category_timeout_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.actions_per_session == 0 {
            return Err(MemoryError::Config(
                "scheduler.actions_per_session must be at least 1".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(MemoryError::Config(
                "scheduler.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.source_max_attempts == 0 {
            return Err(MemoryError::Config(
                "scheduler.source_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.persona.name.trim().is_empty() {
            return Err(MemoryError::Config("persona.name cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Personality shared by every prompt
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    /// Display name of the persona
    #[serde(default = "default_persona_name")]
    pub name: String,
    /// Short biography injected into prompts
    #[serde(default = "default_persona_bio")]
    pub bio: String,
    /// Tone guidance for anything the persona writes
    #[serde(default = "default_persona_voice")]
    pub voice: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            bio: default_persona_bio(),
            voice: default_persona_voice(),
        }
    }
}

fn default_persona_name() -> String {
    "Lore".to_string()
}

fn default_persona_bio() -> String {
    "An autonomous social agent that posts and replies about technology and crypto.".to_string()
}

fn default_persona_voice() -> String {
    "curious, concise, factual".to_string()
}

/// Consolidation thresholds ("5-3-1")
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    /// Unconsumed raw records needed to build one short summary
    #[serde(default = "default_short_trigger")]
    pub short_trigger: usize,
    /// Unconsumed short summaries needed to build one mid summary
    #[serde(default = "default_mid_trigger")]
    pub mid_trigger: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            short_trigger: default_short_trigger(),
            mid_trigger: default_mid_trigger(),
        }
    }
}

fn default_short_trigger() -> usize {
    5
}

fn default_mid_trigger() -> usize {
    3
}

/// Learning extractor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Candidates more similar than this to an unconsumed raw record are dropped
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    /// Attempts per LLM call before the cycle is aborted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: default_dedup_threshold(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_dedup_threshold() -> f32 {
    0.9
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

/// Retrieval engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum records returned per category
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Per-category search timeout in milliseconds
    #[serde(default = "default_category_timeout_ms")]
    pub category_timeout_ms: u64,
}

impl RetrievalConfig {
    pub fn category_timeout(&self) -> Duration {
        Duration::from_millis(self.category_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            category_timeout_ms: default_category_timeout_ms(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_category_timeout_ms() -> u64 {
    2000
}

/// Scheduler cadence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Agent actions per session boundary
    #[serde(default = "default_actions_per_session")]
    pub actions_per_session: u32,
    /// Seconds between meditation sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Attempts when reading the raw log before giving up
    #[serde(default = "default_source_max_attempts")]
    pub source_max_attempts: u32,
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            actions_per_session: default_actions_per_session(),
            sweep_interval_secs: default_sweep_interval_secs(),
            source_max_attempts: default_source_max_attempts(),
        }
    }
}

fn default_actions_per_session() -> u32 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_source_max_attempts() -> u32 {
    3
}

/// Whether the content categories pass through the ladder or stay verbatim
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    /// Summarize primary-post content like every other category
    #[serde(default = "default_ladder_enabled")]
    pub ladder_primary_posts: bool,
    /// Summarize generated-media prompts like every other category
    #[serde(default = "default_ladder_enabled")]
    pub ladder_media_prompts: bool,
}

impl CategoryConfig {
    pub fn ladder_enabled(&self, category: &Category) -> bool {
        match category {
            Category::PrimaryPost => self.ladder_primary_posts,
            Category::MediaPrompts => self.ladder_media_prompts,
            _ => true,
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            ladder_primary_posts: default_ladder_enabled(),
            ladder_media_prompts: default_ladder_enabled(),
        }
    }
}

fn default_ladder_enabled() -> bool {
    true
}

/// Remote API configuration for the LLM collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// API endpoint URL (OpenAI-compatible)
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    /// Model identifier for remote API
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    /// Maximum completion tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "LOREKEEPER_API_KEY".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_max_tokens() -> u32 {
    2048
}

/// Durable storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".lorekeeper"))
        .unwrap_or_else(|| PathBuf::from(".lorekeeper"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.thresholds.short_trigger, 5);
        assert_eq!(config.thresholds.mid_trigger, 3);
        assert!((config.extraction.dedup_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.extraction.max_attempts, 3);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.category_timeout_ms, 2000);
        assert_eq!(config.scheduler.actions_per_session, 10);
        assert_eq!(config.scheduler.sweep_interval_secs, 86_400);
        assert!(config.categories.ladder_primary_posts);
        assert!(config.categories.ladder_media_prompts);
        assert_eq!(config.llm.api_key_env, "LOREKEEPER_API_KEY");
        assert_eq!(config.persona.name, "Lore");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[persona]
name = "Satoshi Bot"
bio = "Talks about layer 2s"
voice = "dry"

[thresholds]
short_trigger = 4
mid_trigger = 2

[extraction]
dedup_threshold = 0.85
max_attempts = 5

[retrieval]
top_k = 8
category_timeout_ms = 750

[scheduler]
actions_per_session = 25
sweep_interval_secs = 3600

[categories]
ladder_media_prompts = false

[llm]
api_url = "https://api.openai.com/v1"
model = "gpt-4o"

[storage]
data_dir = "/tmp/lorekeeper"
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.persona.name, "Satoshi Bot");
        assert_eq!(config.persona.voice, "dry");
        assert_eq!(config.thresholds.short_trigger, 4);
        assert_eq!(config.thresholds.mid_trigger, 2);
        assert!((config.extraction.dedup_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.extraction.max_attempts, 5);
        assert_eq!(config.extraction.initial_backoff_ms, 500);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.category_timeout(), Duration::from_millis(750));
        assert_eq!(config.scheduler.actions_per_session, 25);
        assert_eq!(config.scheduler.sweep_interval(), Duration::from_secs(3600));
        assert!(config.categories.ladder_primary_posts);
        assert!(!config.categories.ladder_media_prompts);
        assert_eq!(config.llm.api_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/lorekeeper"));
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[retrieval]
top_k = 3
"#;

        let config = Config::from_toml_str(toml_str).expect("Failed to parse partial TOML");
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.category_timeout_ms, 2000);
        assert_eq!(config.thresholds.short_trigger, 5);
        assert_eq!(config.persona.name, "Lore");
    }

    #[test]
    fn test_validate_rejects_zero_triggers() {
        let mut config = Config::default();
        config.thresholds.short_trigger = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.mid_trigger = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_dedup_threshold() {
        for tau in [0.0, -0.2, 1.5] {
            let mut config = Config::default();
            config.extraction.dedup_threshold = tau;
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("dedup_threshold"), "unexpected error: {err}");
        }

        let mut config = Config::default();
        config.extraction.dedup_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_retrieval_limits() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.category_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_str_rejects_invalid_values() {
        let toml_str = r#"
[scheduler]
actions_per_session = 0
"#;
        let err = Config::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_ladder_toggle_per_category() {
        let config = CategoryConfig {
            ladder_primary_posts: false,
            ladder_media_prompts: true,
        };
        assert!(!config.ladder_enabled(&Category::PrimaryPost));
        assert!(config.ladder_enabled(&Category::MediaPrompts));
        assert!(config.ladder_enabled(&Category::WorldKnowledge));
        assert!(config.ladder_enabled(&Category::UserSpecific("dave".into())));
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[thresholds]\nshort_trigger = 7\n").unwrap();

        let config = Config::load(Some(path)).expect("Failed to load config");
        assert_eq!(config.thresholds.short_trigger, 7);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_extraction_retry_policy() {
        let config = ExtractionConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_millis(8000));
    }
}
