//! Configuration file support

use colloquy_ai::ModelRef;
use colloquy_chat::GenerationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for colloquy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider for new conversations (openai, ollama)
    pub provider: Option<String>,
    /// Model for new conversations
    pub model: Option<String>,
    /// Sent as the first message of every request
    pub system_prompt: Option<String>,
    /// Earlier turns replayed with each request
    pub history_window: usize,
    /// Save a streaming reply every N fragments (0 = only when it ends)
    pub checkpoint_every: usize,
    /// Where conversations are stored
    pub data_dir: Option<PathBuf>,
    pub openai: OpenAIConfig,
    pub ollama: OllamaConfig,
}

/// OpenAI-compatible endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let generation = GenerationConfig::default();
        Self {
            provider: None,
            model: None,
            system_prompt: None,
            history_window: generation.history_window,
            checkpoint_every: generation.checkpoint_every,
            data_dir: None,
            openai: OpenAIConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colloquy")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file; a missing or broken file gives the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("ollama".to_string()),
            model: Some("llama3.2".to_string()),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// OpenAI key from the config file, falling back to `OPENAI_API_KEY`
    pub fn openai_api_key(&self) -> Option<String> {
        self.openai
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    /// Conversation directory: configured, or the platform data dir
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("colloquy")
                .join("conversations")
        })
    }

    /// The configured default model, if both halves are set
    pub fn default_model(&self) -> Option<ModelRef> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(ModelRef::new(provider.clone(), model.clone())),
            _ => None,
        }
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            system_prompt: self.system_prompt.clone().filter(|p| !p.trim().is_empty()),
            history_window: self.history_window,
            checkpoint_every: self.checkpoint_every,
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# colloquy configuration file
# Place at ~/.config/colloquy/config.toml (Linux), or point
# COLLOQUY_CONFIG_PATH at another file.

# Model for new conversations (provider: openai, ollama)
provider = "ollama"
model = "llama3.2"

# Sent first with every request (optional)
# system_prompt = "You are a concise assistant."

# Earlier turns replayed with each request
history_window = 10

# Save a streaming reply every N fragments (0 = only when it ends)
checkpoint_every = 32

# Where conversations are stored (defaults to the platform data dir)
# data_dir = "/home/me/.local/share/colloquy/conversations"

[openai]
# Any OpenAI-compatible server works (LM Studio, vLLM, Groq, ...)
# base_url = "https://api.openai.com/v1"
# It's recommended to use OPENAI_API_KEY instead
# api_key = "sk-..."

[ollama]
# base_url = "http://localhost:11434"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml"));
        assert_eq!(config, Config::default());
        assert_eq!(config.history_window, 10);
        assert_eq!(config.checkpoint_every, 32);
        assert!(config.default_model().is_none());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.default_model(), Some(ModelRef::new("ollama", "llama3.2")));
        assert_eq!(config.history_window, 10);
        assert!(config.openai.base_url.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "provider = \"openai\"\nmodel = \"gpt-4o-mini\"\nhistory_window = 4\n\n[openai]\nbase_url = \"http://localhost:1234/v1\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.default_model(), Some(ModelRef::new("openai", "gpt-4o-mini")));
        assert_eq!(config.history_window, 4);
        assert_eq!(config.checkpoint_every, 32);
        assert_eq!(config.openai.base_url.as_deref(), Some("http://localhost:1234/v1"));

        let generation = config.generation_config();
        assert_eq!(generation.history_window, 4);
        assert!(generation.system_prompt.is_none());
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = [unterminated").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            system_prompt: Some("Be brief.".into()),
            data_dir: Some(dir.path().join("data")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
        assert_eq!(config.data_dir(), dir.path().join("data"));
    }
}
