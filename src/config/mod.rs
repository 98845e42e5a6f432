use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Maximum tokens for each LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Model requests allowed within one user turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,

    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,

    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Minutes of inactivity before a cached project session is dropped
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file. Empty means data_dir/projects.sqlite; ":memory:" keeps nothing on disk.
    #[serde(default)]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Sandbox template identifier handed to the preview service
    #[serde(default = "default_preview_template")]
    pub template: String,

    /// Extra npm dependencies made available to rendered variants
    #[serde(default = "default_preview_dependencies")]
    pub dependencies: Vec<String>,

    #[serde(default = "default_preview_resources")]
    pub external_resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> usize {
    16384
}
fn default_max_steps() -> usize {
    10
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_port() -> u16 {
    31328
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_session_timeout_mins() -> u64 {
    30
}
fn default_preview_template() -> String {
    "react-ts".to_string()
}
fn default_preview_dependencies() -> Vec<String> {
    vec!["lucide-react".to_string()]
}
fn default_preview_resources() -> Vec<String> {
    vec!["https://cdn.tailwindcss.com".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            max_steps: default_max_steps(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            session_timeout_mins: default_session_timeout_mins(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            template: default_preview_template(),
            dependencies: default_preview_dependencies(),
            external_resources: default_preview_resources(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths)
    }

    /// Load from an explicit config file path (the `--config` flag).
    pub fn load_file(path: &str) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let expanded = shellexpand::tilde(path).to_string();
        let content = fs::read_to_string(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", expanded, e))?;
        let mut config = Self::parse(&content)?;
        config.paths = paths;
        Ok(config)
    }

    fn load_from(paths: Paths) -> Result<Self> {
        let path = paths.config_file();

        if !path.exists() {
            let mut config = Self::parse(DEFAULT_CONFIG_TEMPLATE)?;
            config.paths = paths;
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)?;
        let mut config = Self::parse(&content)?;
        config.paths = paths;
        Ok(config)
    }

    /// Parse TOML content and expand `${VAR}` references in secrets.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Database location: `store.database` if set, otherwise the XDG data path.
    pub fn database_path(&self) -> PathBuf {
        if self.store.database.is_empty() {
            self.paths.database()
        } else {
            PathBuf::from(shellexpand::tilde(&self.store.database).to_string())
        }
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref mut openai) = self.providers.openai {
            openai.api_key = expand_env(&openai.api_key);
        }
        if let Some(ref mut anthropic) = self.providers.anthropic {
            anthropic.api_key = expand_env(&anthropic.api_key);
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["agent", "default_model"] => Ok(self.agent.default_model.clone()),
            ["agent", "max_tokens"] => Ok(self.agent.max_tokens.to_string()),
            ["agent", "max_steps"] => Ok(self.agent.max_steps.to_string()),
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "session_timeout_mins"] => Ok(self.server.session_timeout_mins.to_string()),
            ["store", "database"] => Ok(self.store.database.clone()),
            ["preview", "template"] => Ok(self.preview.template.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "json"] => Ok(self.logging.json.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["agent", "default_model"] => self.agent.default_model = value.to_string(),
            ["agent", "max_tokens"] => self.agent.max_tokens = value.parse()?,
            ["agent", "max_steps"] => self.agent.max_steps = value.parse()?,
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "session_timeout_mins"] => {
                self.server.session_timeout_mins = value.parse()?
            }
            ["store", "database"] => self.store.database = value.to_string(),
            ["preview", "template"] => self.preview.template = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "json"] => self.logging.json = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Design IDE Configuration
# Auto-created on first run. Edit as needed.

[agent]
# claude-* models use the Anthropic provider, gpt-*/o1/o3 models use OpenAI
default_model = "claude-sonnet-4-20250514"
max_tokens = 16384
# Model requests allowed per user turn (lets the model emit all five variants at once)
max_steps = 10

[providers.anthropic]
api_key = "${ANTHROPIC_API_KEY}"

# [providers.openai]
# api_key = "${OPENAI_API_KEY}"

[server]
port = 31328
bind = "127.0.0.1"
session_timeout_mins = 30

[store]
# Empty uses the XDG data dir (~/.local/share/design-ide/projects.sqlite)
# database = ":memory:"

[preview]
template = "react-ts"
dependencies = ["lucide-react"]
external_resources = ["https://cdn.tailwindcss.com"]

[logging]
level = "info"
json = false
"#;
