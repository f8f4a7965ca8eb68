//! Configuration types for the Eco tutor service.
//!
//! Configuration is read from `eco.json`. Every field has a default, so a
//! missing file yields a working configuration that only needs an API key.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "eco.json";

/// Default maximum length of a student message, in characters.
const fn default_max_message_chars() -> usize {
    5000
}

/// Default timeout in seconds for one AI turn.
const fn default_ai_timeout() -> u64 {
    60
}

/// Default state file path for the store snapshot.
fn default_state_file() -> String {
    ".eco/state.json".to_string()
}

/// Default tutor persona name.
fn default_tutor_name() -> String {
    "Eco".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the tutor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Maximum number of characters accepted in a single student message.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// How long to wait for the AI turn generator before falling back.
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,

    /// Path to the JSON snapshot of the store.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Optional assignment catalog to seed at startup.
    #[serde(default)]
    pub catalog: Option<String>,

    /// Shared secret the upstream gateway presents as a bearer token.
    #[serde(default)]
    pub gateway_token: Option<String>,

    /// Name the tutor uses to introduce itself.
    #[serde(default = "default_tutor_name")]
    pub tutor_name: String,

    /// Gemini provider settings.
    #[serde(default)]
    pub gemini: GeminiSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            ai_timeout_secs: default_ai_timeout(),
            state_file: default_state_file(),
            catalog: None,
            gateway_token: None,
            tutor_name: default_tutor_name(),
            gemini: GeminiSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `eco.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `eco.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `TutorError::ConfigValidationError` if a value
    /// is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_chars == 0 {
            return Err(TutorError::config_validation(
                "maxMessageChars must be greater than 0",
                "Set maxMessageChars to at least 1 in your eco.json (default is 5000)",
            ));
        }

        if self.ai_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "aiTimeoutSecs must be greater than 0",
                "Set aiTimeoutSecs to at least 1 second in your eco.json",
            ));
        }

        if self.state_file.trim().is_empty() {
            return Err(TutorError::config_validation(
                "stateFile must not be empty",
                "Provide a path such as '.eco/state.json' in your eco.json",
            ));
        }

        if self.tutor_name.trim().is_empty() {
            return Err(TutorError::config_validation(
                "tutorName must not be empty",
                "Set tutorName in your eco.json or remove it to use 'Eco'",
            ));
        }

        if matches!(&self.gateway_token, Some(token) if token.trim().is_empty()) {
            return Err(TutorError::config_validation(
                "gatewayToken must not be empty when set",
                "Remove gatewayToken from eco.json to disable the gateway check",
            ));
        }

        self.gemini.validate()
    }
}

/// Settings for the Gemini turn generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiSettings {
    /// Model identifier passed to `generateContent`.
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// API base URL, without a trailing slash.
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Whether to enable the Google Search grounding tool.
    #[serde(default = "default_true")]
    pub web_search: bool,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            api_key_env: default_api_key_env(),
            web_search: default_true(),
        }
    }
}

impl GeminiSettings {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("gemini.model", &self.model),
            ("gemini.baseUrl", &self.base_url),
            ("gemini.apiKeyEnv", &self.api_key_env),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(TutorError::config_validation(
                    format!("{name} must not be empty"),
                    format!("Remove {name} from eco.json to use the default"),
                ));
            }
        }
        Ok(())
    }
}
