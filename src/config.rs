//! TOML configuration schema for the core engine.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//! After the TOML load, environment variables of the form
//! `MERIDIAN_<SECTION>_<FIELD>` (e.g. `MERIDIAN_WINDOW_MAX_MESSAGES`)
//! override individual fields.
//!
//! Example `~/.meridian/config.toml`:
//! ```toml
//! [provider]
//! default_id = "openai"
//! default_model = "gpt-4o-mini"
//!
//! [research]
//! default_minimum_items = 3
//!
//! [window]
//! max_messages = 80
//! max_chars = 120000
//! ```

use std::path::Path;

use crate::error::CoreError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub default_id: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_id: "openai".to_owned(),
            default_model: "gpt-4o-mini".to_owned(),
            request_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolRunnerConfig {
    pub base_url: String,
    pub capability_probe_timeout_secs: u64,
}

impl Default for ToolRunnerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            capability_probe_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub event_post_timeout_secs: u64,
    pub message_post_timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            event_post_timeout_secs: 10,
            message_post_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchConfig {
    pub enabled: bool,
    pub default_minimum_items: usize,
    pub auto_deepen_seed_cap: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_minimum_items: 3,
            auto_deepen_seed_cap: 12,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub max_messages: usize,
    pub max_chars: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_messages: 80,
            max_chars: 120_000,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub tool_runner: ToolRunnerConfig,
    pub control_plane: ControlPlaneConfig,
    pub research: ResearchConfig,
    pub window: WindowConfig,
}

impl AppConfig {
    /// Loads configuration from `path` if it exists, else starts from
    /// defaults, then applies `MERIDIAN_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&raw).map_err(|e| CoreError::Config(format!("parsing config: {e}")))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        apply_env_str("MERIDIAN_PROVIDER_DEFAULT_ID", &mut self.provider.default_id);
        apply_env_str(
            "MERIDIAN_PROVIDER_DEFAULT_MODEL",
            &mut self.provider.default_model,
        );
        apply_env_u64(
            "MERIDIAN_PROVIDER_REQUEST_TIMEOUT_SECS",
            &mut self.provider.request_timeout_secs,
        );
        apply_env_u32("MERIDIAN_PROVIDER_MAX_RETRIES", &mut self.provider.max_retries);
        apply_env_str("MERIDIAN_TOOL_RUNNER_BASE_URL", &mut self.tool_runner.base_url);
        apply_env_str(
            "MERIDIAN_CONTROL_PLANE_BASE_URL",
            &mut self.control_plane.base_url,
        );
        apply_env_usize(
            "MERIDIAN_RESEARCH_DEFAULT_MINIMUM_ITEMS",
            &mut self.research.default_minimum_items,
        );
        apply_env_usize("MERIDIAN_WINDOW_MAX_MESSAGES", &mut self.window.max_messages);
        apply_env_usize("MERIDIAN_WINDOW_MAX_CHARS", &mut self.window.max_chars);
    }
}

fn apply_env_str(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *slot = v;
    }
}

fn apply_env_u64(key: &str, slot: &mut u64) {
    if let Some(v) = std::env::var(key).ok().and_then(|s| s.parse().ok()) {
        *slot = v;
    }
}

fn apply_env_u32(key: &str, slot: &mut u32) {
    if let Some(v) = std::env::var(key).ok().and_then(|s| s.parse().ok()) {
        *slot = v;
    }
}

fn apply_env_usize(key: &str, slot: &mut usize) {
    if let Some(v) = std::env::var(key).ok().and_then(|s| s.parse().ok()) {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/does/not/exist.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let dir = std::env::temp_dir().join(format!("meridian-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[provider]\ndefault_id = \"anthropic\"\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.provider.default_id, "anthropic");
        assert_eq!(config.provider.default_model, "gpt-4o-mini");
        assert_eq!(config.window, WindowConfig::default());
        std::fs::remove_dir_all(&dir).ok();
    }
}
