//! Config-file discovery and parsing (spec §6's config file shape),
//! grounded on the teacher's `AppConfig::load()` search-path pattern.
//! The crate accepts TOML on disk by default, matching the teacher's
//! convention, and also accepts the JSON shape verbatim when the path
//! (explicit `--config` or a discovered default) ends in `.json` —
//! both populate the same `AppConfig`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub rlm: RlmSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSection {
    #[serde(default = "default_provider_name")]
    pub provider: String,
    pub model: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider_name(),
            model: None,
            options: HashMap::new(),
        }
    }
}

fn default_provider_name() -> String {
    "gemini".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderConfig {
    #[serde(rename = "baseUrl", alias = "base_url")]
    pub base_url: Option<String>,
    #[serde(rename = "apiKey", alias = "api_key")]
    pub api_key: Option<String>,
    /// Name of an environment variable to read the API key from when
    /// `api_key` isn't set inline, the teacher's `api_key_env` indirection
    /// for keeping secrets out of the config file.
    #[serde(rename = "apiKeyEnv", alias = "api_key_env")]
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub adapter: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Resolves the key inline first, then via `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxSection {
    #[serde(rename = "maxSubCalls", alias = "max_sub_calls", default = "default_max_sub_calls")]
    pub max_sub_calls: u32,
    #[serde(rename = "turnTimeoutMs", alias = "turn_timeout_ms", default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    #[serde(rename = "memoryLimitMb", alias = "memory_limit_mb", default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            max_sub_calls: default_max_sub_calls(),
            turn_timeout_ms: default_turn_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

fn default_max_sub_calls() -> u32 {
    64
}
fn default_turn_timeout_ms() -> u64 {
    30_000
}
fn default_memory_limit_mb() -> u64 {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct RlmSection {
    #[serde(rename = "maxTurns", alias = "max_turns", default = "default_max_turns")]
    pub max_turns: u32,
}

impl Default for RlmSection {
    fn default() -> Self {
        Self { max_turns: default_max_turns() }
    }
}

fn default_max_turns() -> u32 {
    10
}

impl AppConfig {
    /// Loads from an explicit path (CLI `--config`) if given, else walks
    /// the teacher's documented search path. Missing/unparseable files
    /// fall back to documented defaults rather than failing the run.
    pub fn load(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            return Self::load_from_path(path).unwrap_or_else(|e| {
                tracing::warn!("failed to load config at {}: {}", path.display(), e);
                Self::default()
            });
        }

        let candidates = [
            PathBuf::from("rlm.config.json"),
            PathBuf::from("config.toml"),
            dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("rlm/config.toml"),
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".rlm/config.toml"),
        ];

        for path in candidates {
            if path.exists() {
                match Self::load_from_path(&path) {
                    Ok(cfg) => {
                        tracing::info!("loaded config from {}", path.display());
                        return cfg;
                    }
                    Err(e) => tracing::warn!("failed to parse config at {}: {}", path.display(), e),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Self::default()
    }

    fn load_from_path(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        }
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}
