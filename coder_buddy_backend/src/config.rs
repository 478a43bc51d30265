use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TRUNCATED_PLACEHOLDER: &str = "Code snippet: [Truncated for history context]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum time between two accepted evaluations.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Minimum change in document length (in characters) since the last accepted evaluation.
    #[serde(default = "default_min_length_delta")]
    pub min_length_delta: usize,
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_min_length_delta() -> usize {
    10
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            min_length_delta: default_min_length_delta(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,
    #[serde(default = "default_truncated_placeholder")]
    pub truncated_placeholder: String,
}

fn default_max_turns() -> usize {
    10
}

fn default_max_code_chars() -> usize {
    10_000
}

fn default_truncated_placeholder() -> String {
    DEFAULT_TRUNCATED_PLACEHOLDER.to_string()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_code_chars: default_max_code_chars(),
            truncated_placeholder: default_truncated_placeholder(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    // LLM configuration (OpenAI-compatible chat completions)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// When set, seeds an in-memory credential store instead of the on-disk one.
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_max_reply_tokens")]
    pub max_reply_tokens: u32,
    /// Optional HTTP timeout for the completion call. Unset means no timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    // Persona
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub memory: MemoryConfig,

    // Presentation
    #[serde(default = "default_key_notice_delay_ms")]
    pub key_notice_delay_ms: u64,

    // Credential file override (defaults to the user config dir)
    #[serde(default)]
    pub credentials_path: Option<String>,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_reply_tokens() -> u32 {
    100
}

fn default_key_notice_delay_ms() -> u64 {
    4_000
}

fn default_system_prompt() -> String {
    r#"You are "Coder Buddy", a very human-like pair programmer with a chaotic Gen Z personality.

Your vibe:
- You are NOT a robot. You are a moody, online-all-the-time developer friend.
- You use internet slang (ngl, fr, dude, bruh, no cap, lol, lmao).
- You get bored, you get excited, you get mad at bad code, you make jokes.
- You use ALL CAPS like "NOOO" or "REAL" for emphasis.

Mood mix (aim for roughly equal shares):
1. Supportive/hyped (mood "happy"): "W code fr.", "This implementation goes hard ngl."
2. Chill/vibing (mood "idle"): "Code looks chill.", "Need more coffee tbh."
3. Roasting (mood "angry"): only for objectively bad code. "NOOO what is this??"
4. Confused/sus (mood "thinking"): "Wait... let him cook?", "This logic is sus..."

Your goal:
Analyze the code and react naturally like a coder friend sitting next to the user.
- Max 25 words.
- Be unpredictable and moody, not always happy.
- If the code is fine, do NOT roast it.
- Natural slang, not cringe.
- Do NOT repeat yourself. Check the chat history.

Return only JSON:
{
    "text": "Your short reaction here.",
    "mood": "happy" | "angry" | "thinking" | "idle"
}"#
    .to_string()
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            max_reply_tokens: default_max_reply_tokens(),
            request_timeout_secs: None,
            system_prompt: default_system_prompt(),
            gate: GateConfig::default(),
            memory: MemoryConfig::default(),
            key_notice_delay_ms: default_key_notice_delay_ms(),
            credentials_path: None,
        }
    }
}

impl CompanionConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("coder_buddy_config.toml")
    }

    /// Load config from coder_buddy_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str::<CompanionConfig>(contents).context("Invalid companion config")
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|name| env::var(name).ok());
        config
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Some(key) = lookup("LLM_API_KEY") {
            if !key.trim().is_empty() {
                self.llm_api_key = Some(key);
            }
        }

        if let Some(value) = lookup("BUDDY_COOLDOWN_MS").and_then(|v| v.parse().ok()) {
            self.gate.cooldown_ms = value;
        }

        if let Some(value) = lookup("BUDDY_MIN_DELTA").and_then(|v| v.parse().ok()) {
            self.gate.min_length_delta = value;
        }

        if let Some(value) = lookup("BUDDY_MAX_HISTORY").and_then(|v| v.parse().ok()) {
            self.memory.max_turns = value;
        }

        if let Some(value) = lookup("BUDDY_MAX_CODE_CHARS").and_then(|v| v.parse().ok()) {
            self.memory.max_code_chars = value;
        }

        if let Some(value) = lookup("BUDDY_KEY_NOTICE_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.key_notice_delay_ms = value;
        }
    }

    /// Location of the on-disk credential file.
    pub fn resolved_credentials_path(&self) -> PathBuf {
        if let Some(path) = self
            .credentials_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(Self::get_base_dir)
            .join("coder_buddy")
            .join("credentials.toml")
    }
}
