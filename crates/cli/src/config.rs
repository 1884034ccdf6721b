use ai_pipeline::{BackendKind, GeminiConfig, PoolConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "storyboard-studio";
const CONFIG_FILE_NAME: &str = "config.json";
const ENV_CONFIG_PATH: &str = "STORYBOARD_CONFIG_PATH";
const ENV_API_KEYS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];
const ENV_TEXT_MODEL: &str = "STORYBOARD_TEXT_MODEL";
const ENV_IMAGE_MODEL: &str = "STORYBOARD_IMAGE_MODEL";
const ENV_API_BASE: &str = "STORYBOARD_API_BASE";
const ENV_PROVIDER: &str = "STORYBOARD_PROVIDER";
const ENV_MAX_CONCURRENCY: &str = "STORYBOARD_MAX_CONCURRENCY";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub api_base: String,
    pub context_label: String,
    pub max_concurrency: usize,
    pub max_quota_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub provider: BackendKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        let gemini = GeminiConfig::default();
        let pool = PoolConfig::default();
        Self {
            api_key: None,
            text_model: gemini.text_model,
            image_model: gemini.image_model,
            api_base: gemini.api_base,
            context_label: ai_pipeline::DEFAULT_CONTEXT_LABEL.to_string(),
            max_concurrency: pool.max_concurrency,
            max_quota_retries: pool.max_quota_retries,
            backoff_base_ms: pool.backoff_base.as_millis() as u64,
            backoff_max_ms: pool.backoff_max.as_millis() as u64,
            provider: BackendKind::Gemini,
        }
    }
}

impl AppConfig {
    /// Defaults, then the config file (`explicit` path, `STORYBOARD_CONFIG_PATH`,
    /// or the per-user config directory), then environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => env::var_os(ENV_CONFIG_PATH)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .or_else(default_config_path),
        };
        if let Some(path) = path {
            if path.is_file() {
                config.apply_partial(read_partial(&path)?);
                tracing::debug!(path = %path.display(), "loaded config file");
            } else if explicit.is_some() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
        }

        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.api_key.clone().unwrap_or_default(),
            text_model: self.text_model.clone(),
            image_model: self.image_model.clone(),
            api_base: self.api_base.clone(),
            ..GeminiConfig::default()
        }
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_concurrency: self.max_concurrency.max(1),
            max_quota_retries: self.max_quota_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
        }
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(key) = partial.api_key.filter(|key| !key.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(model) = partial.text_model {
            self.text_model = model;
        }
        if let Some(model) = partial.image_model {
            self.image_model = model;
        }
        if let Some(base) = partial.api_base {
            self.api_base = base;
        }
        if let Some(label) = partial.context_label {
            self.context_label = label;
        }
        if let Some(value) = partial.max_concurrency {
            self.max_concurrency = value;
        }
        if let Some(value) = partial.max_quota_retries {
            self.max_quota_retries = value;
        }
        if let Some(value) = partial.backoff_base_ms {
            self.backoff_base_ms = value;
        }
        if let Some(value) = partial.backoff_max_ms {
            self.backoff_max_ms = value;
        }
        if let Some(provider) = partial.provider {
            self.provider = provider;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = ENV_API_KEYS.iter().find_map(|name| set(*name)) {
            self.api_key = Some(key);
        }
        if let Some(model) = set(ENV_TEXT_MODEL) {
            self.text_model = model;
        }
        if let Some(model) = set(ENV_IMAGE_MODEL) {
            self.image_model = model;
        }
        if let Some(base) = set(ENV_API_BASE) {
            self.api_base = base;
        }
        if let Some(provider) = set(ENV_PROVIDER) {
            self.provider = provider
                .parse::<BackendKind>()
                .with_context(|| format!("{ENV_PROVIDER} must be `gemini` or `mock`"))?;
        }
        if let Some(value) = set(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{ENV_MAX_CONCURRENCY} must be a positive integer"))?;
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    api_key: Option<String>,
    text_model: Option<String>,
    image_model: Option<String>,
    api_base: Option<String>,
    context_label: Option<String>,
    max_concurrency: Option<usize>,
    max_quota_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    provider: Option<BackendKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.text_model, "gemini-3-flash-preview");
        assert_eq!(config.image_model, "gemini-2.5-flash-image");
        assert_eq!(config.context_label, "Musical Video Storyboard");
        assert_eq!(config.pool(), PoolConfig::default());
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"api_key":"from-file","max_concurrency":2,"provider":"mock"}"#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.apply_partial(read_partial(&path).unwrap());
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.provider, BackendKind::Mock);

        let env: HashMap<&str, &str> = HashMap::from([
            ("API_KEY", "fallback"),
            ("GEMINI_API_KEY", "primary"),
            ("STORYBOARD_MAX_CONCURRENCY", "6"),
        ]);
        config
            .apply_env(|name| env.get(name).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("primary"));
        assert_eq!(config.max_concurrency, 6);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|name| (name == ENV_PROVIDER).then(|| "openai".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("missing.json"))).is_err());
    }
}
