use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::disclosure::DisclosureDefaults;
use crate::engine::SessionOptions;

pub const CONFIG_FILE_NAME: &str = "runtree.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub disclosure: DisclosureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisplayConfig {
    /// Columns of indent per nesting level of sub-agent runs.
    #[serde(default = "default_indent_width")]
    pub indent_width: usize,
    /// Long text lines, args and results are truncated to this width.
    #[serde(default = "default_max_text_width")]
    pub max_text_width: usize,
    #[serde(default = "default_true")]
    pub show_thinking: bool,
    #[serde(default = "default_true")]
    pub show_suggestions: bool,
    #[serde(default = "default_true")]
    pub show_tool_args: bool,
}

fn default_indent_width() -> usize {
    2
}

fn default_max_text_width() -> usize {
    120
}

fn default_true() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            indent_width: default_indent_width(),
            max_text_width: default_max_text_width(),
            show_thinking: true,
            show_suggestions: true,
            show_tool_args: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisclosureConfig {
    #[serde(default = "default_true")]
    pub auto_expand_thinking: bool,
    #[serde(default = "default_true")]
    pub auto_collapse_on_content: bool,
    /// Initial state of tool-call detail panels.
    #[serde(default)]
    pub expand_tool_calls: bool,
}

impl Default for DisclosureConfig {
    fn default() -> Self {
        Self {
            auto_expand_thinking: true,
            auto_collapse_on_content: true,
            expand_tool_calls: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl Config {
    /// Resolves the config file: explicit path, `$RUNTREE_CONFIG`, the
    /// working directory, then the platform and home config dirs.
    pub fn load_with_path(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let config = Self::load_from(path)?;
            return Ok((config, Some(path.to_path_buf())));
        }

        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var("RUNTREE_CONFIG") {
            if !env_path.is_empty() {
                candidates.push(PathBuf::from(env_path));
            }
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("runtree").join(CONFIG_FILE_NAME));
        }
        candidates.push(crate::paths::config_dir().join(CONFIG_FILE_NAME));

        for path in candidates {
            if path.exists() {
                let config = Self::load_from(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.indent_width == 0 || self.display.indent_width > 16 {
            anyhow::bail!(
                "display.indent_width must be between 1 and 16, got {}",
                self.display.indent_width
            );
        }
        if self.display.max_text_width < 20 {
            anyhow::bail!(
                "display.max_text_width must be at least 20, got {}",
                self.display.max_text_width
            );
        }
        if self.logging.retention_days == Some(0) {
            anyhow::bail!("logging.retention_days must be greater than 0");
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            defaults: DisclosureDefaults {
                tool_call_expanded: self.disclosure.expand_tool_calls,
                ..DisclosureDefaults::default()
            },
            auto_expand_thinking: self.disclosure.auto_expand_thinking,
            auto_collapse_on_content: self.disclosure.auto_collapse_on_content,
        }
    }
}
