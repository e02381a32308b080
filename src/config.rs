//! Configuration management for keymenu
//!
//! Handles loading and saving configuration from ~/.config/keymenu/config.toml.
//! The configuration is read once at startup and passed by reference into the
//! supervisor, the worker and every selector invocation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
const APP_NAME: &str = "keymenu";

/// Default cache period, in minutes, before the database is re-read
pub const DEFAULT_CACHE_PERIOD_MIN: u64 = 360;

/// Default autotype sequence
pub const DEFAULT_AUTOTYPE: &str = "{USERNAME}{TAB}{PASSWORD}{ENTER}";

/// Commented example configuration covering every section
pub const EXAMPLE_CONFIG: &str = include_str!("../config.example.toml");

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Flag dialect spoken by the selector program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Dmenu,
    Rofi,
}

/// `[selector]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    /// Program to run (dmenu, rofi, bemenu, ...)
    #[serde(default = "default_selector_command")]
    pub command: String,

    /// Extra arguments passed through on every invocation
    #[serde(default)]
    pub args: Vec<String>,

    /// Force a flag dialect instead of detecting it from `command`
    #[serde(default)]
    pub dialect: Option<Dialect>,

    /// Hide typed characters on passphrase prompts
    #[serde(default = "default_true")]
    pub obscure: bool,

    /// Foreground and background colour used by dmenu to hide input
    #[serde(default = "default_obscure_color")]
    pub obscure_color: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            command: default_selector_command(),
            args: Vec::new(),
            dialect: None,
            obscure: true,
            obscure_color: default_obscure_color(),
        }
    }
}

impl SelectorConfig {
    /// Dialect to use: explicit override, otherwise guessed from the program name
    pub fn effective_dialect(&self) -> Dialect {
        if let Some(dialect) = self.dialect {
            return dialect;
        }
        let program = Path::new(&self.command)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.command);
        if program.starts_with("rofi") {
            Dialect::Rofi
        } else {
            Dialect::Dmenu
        }
    }
}

/// One `[[database]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,

    /// Optional keyfile mixed into the database key
    #[serde(default)]
    pub keyfile: Option<PathBuf>,

    /// Inline passphrase; when set no passphrase prompt is shown
    #[serde(default)]
    pub password: Option<String>,
}

/// `[daemon]` section
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Minutes before the open database is considered stale
    #[serde(default = "default_cache_period")]
    pub cache_period_min: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cache_period_min: DEFAULT_CACHE_PERIOD_MIN,
        }
    }
}

/// Program used to inject keystrokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypingBackend {
    #[default]
    Xdotool,
    Ydotool,
    Wtype,
}

/// `[typing]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypingConfig {
    #[serde(default)]
    pub backend: TypingBackend,

    /// Autotype sequence used when an entry is picked from the top menu
    #[serde(default = "default_autotype")]
    pub autotype: String,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            backend: TypingBackend::default(),
            autotype: default_autotype(),
        }
    }
}

/// `[external]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExternalConfig {
    /// Text editor for notes; falls back to $EDITOR, then vim
    #[serde(default)]
    pub editor: Option<String>,

    /// Terminal emulator the editor runs in; falls back to xterm
    #[serde(default)]
    pub terminal: Option<String>,

    /// pinentry program used for passphrase prompts instead of the selector
    #[serde(default)]
    pub pinentry: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default, rename = "database")]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub typing: TypingConfig,

    #[serde(default)]
    pub external: ExternalConfig,
}

fn default_selector_command() -> String {
    "dmenu".to_string()
}

fn default_obscure_color() -> String {
    "#222222".to_string()
}

fn default_cache_period() -> u64 {
    DEFAULT_CACHE_PERIOD_MIN
}

fn default_autotype() -> String {
    DEFAULT_AUTOTYPE.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Create a new configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path
    ///
    /// Returns ~/.config/keymenu/config.toml on Linux
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Get the config directory path
    pub fn config_dir() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        for db in &mut config.databases {
            db.path = expand_home(&db.path);
            db.keyfile = db.keyfile.as_deref().map(expand_home);
        }
        Ok(config)
    }

    /// Save configuration to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Whether at least one database is configured
    pub fn has_database(&self) -> bool {
        !self.databases.is_empty()
    }

    /// Cache period as a duration
    pub fn cache_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.daemon.cache_period_min.saturating_mul(60))
    }

    /// Editor command for notes
    pub fn editor(&self) -> String {
        self.external
            .editor
            .clone()
            .or_else(|| std::env::var("EDITOR").ok())
            .unwrap_or_else(|| "vim".to_string())
    }

    /// Terminal command the editor runs in
    pub fn terminal(&self) -> String {
        self.external
            .terminal
            .clone()
            .unwrap_or_else(|| "xterm".to_string())
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
