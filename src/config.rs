//! YAML configuration for a bot run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable marking a constrained runtime (e.g. a container
/// with an ephemeral filesystem). When set, no profile directory is used.
pub const CLOUD_ENV: &str = "WAGPT_CLOUD";

/// Top-level config structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of this bot instance.
    pub name: String,

    /// Chat to watch, matched against the chat-list entry text or title.
    pub chat: String,

    /// Trigger keyword; matched case-insensitively as a message prefix.
    #[serde(default = "default_trigger")]
    pub trigger: String,

    /// Browser launch options.
    #[serde(default)]
    pub browser: BrowserOptions,

    /// Poll-loop pacing.
    #[serde(default)]
    pub poll: PollOptions,

    /// Keystroke pacing.
    #[serde(default)]
    pub typing: TypingOptions,

    /// Completion API endpoint.
    #[serde(default)]
    pub completion: CompletionOptions,

    /// What happens when the completion API fails.
    #[serde(default)]
    pub on_failure: OnFailure,
}

impl Config {
    /// Load config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse config from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("name is required".into()));
        }
        if self.chat.is_empty() {
            return Err(Error::Config("chat is required".into()));
        }
        if self.trigger.is_empty() {
            return Err(Error::Config("trigger must not be empty".into()));
        }
        if !self.trigger.is_ascii() {
            return Err(Error::Config("trigger must be ASCII".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::Config("poll.interval_ms must be at least 1".into()));
        }
        if self.poll.error_backoff_ms == 0 {
            return Err(Error::Config(
                "poll.error_backoff_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_trigger() -> String {
    "GPT".into()
}

/// Browser launch configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrowserOptions {
    /// Run without a visible window.
    #[serde(default)]
    pub headless: bool,

    /// Profile directory kept across runs so the QR login survives.
    pub profile_dir: Option<String>,

    /// Browser window size.
    #[serde(default)]
    pub window: WindowSize,
}

impl BrowserOptions {
    /// Profile directory to launch with, honoring the constrained-runtime
    /// environment flag.
    pub fn profile_path(&self) -> Option<PathBuf> {
        if constrained_runtime() {
            return None;
        }
        self.profile_dir.as_ref().map(PathBuf::from)
    }
}

/// Window dimensions.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Poll-loop pacing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollOptions {
    /// Pause between poll iterations, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Pause after a failed iteration, in milliseconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,

    /// How long to wait for the chat UI to finish loading.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
}

impl PollOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
            ready_timeout_ms: default_ready_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5000
}

fn default_ready_timeout() -> u64 {
    60000
}

/// Keystroke pacing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TypingOptions {
    /// Pause between injected characters, in milliseconds.
    #[serde(default = "default_char_delay")]
    pub char_delay_ms: u64,
}

impl TypingOptions {
    pub fn char_delay(&self) -> Duration {
        Duration::from_millis(self.char_delay_ms)
    }
}

impl Default for TypingOptions {
    fn default() -> Self {
        Self {
            char_delay_ms: default_char_delay(),
        }
    }
}

fn default_char_delay() -> u64 {
    10
}

/// Completion API endpoint configuration. The API key comes from the
/// environment, never from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionOptions {
    /// Model to request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            timeout_ms: default_request_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_request_timeout() -> u64 {
    60000
}

/// Failure handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OnFailure {
    /// What reaches the chat when the completion API fails.
    #[serde(default)]
    pub reply: FailurePolicy,

    /// Text delivered under the `apology` policy.
    #[serde(default = "default_apology")]
    pub apology: String,

    /// Screenshot path written after a failed poll iteration
    /// (supports `{timestamp}`).
    pub screenshot: Option<String>,
}

impl Default for OnFailure {
    fn default() -> Self {
        Self {
            reply: FailurePolicy::default(),
            apology: default_apology(),
            screenshot: None,
        }
    }
}

fn default_apology() -> String {
    "Sorry, I could not reach the language model. Please try again.".into()
}

/// Policy for completion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Deliver the configured apology line.
    #[default]
    Apology,
    /// Deliver nothing.
    Skip,
}

/// Whether the process runs in a constrained environment.
pub fn constrained_runtime() -> bool {
    std::env::var(CLOUD_ENV)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}
