//! # wagpt
//!
//! WhatsApp Web auto-responder. Watches one conversation for messages
//! prefixed with a trigger keyword, asks a chat-completion API for an
//! answer, and types the reply back into the thread as simulated
//! keystrokes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wagpt::{Bot, BrowserSession, ChatPage, CompletionClient, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> wagpt::Result<()> {
//! let config = Config::load("wagpt.yaml")?;
//! let completion = CompletionClient::from_env(&config.completion)?;
//!
//! let session = BrowserSession::launch(&config.browser).await?;
//! let chat = ChatPage::new(session.page());
//! chat.wait_until_ready(config.poll.ready_timeout()).await?;
//! chat.open_chat(&config.chat).await?;
//!
//! let mut bot = Bot::new(&config, session.page(), completion);
//! bot.run().await?;
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

pub mod bot;
pub mod chat;
pub mod completion;
pub mod config;
pub mod selectors;
pub mod session;
pub mod writer;

pub use bot::{Bot, DedupState, Outcome, Trigger};
pub use chat::{ChatPage, Message};
pub use completion::{CompletionClient, CompletionError, Respond};
pub use config::{Config, FailurePolicy};
pub use session::{BrowserSession, WHATSAPP_URL};
pub use writer::{Composer, KeySink, Outbox, TypingPace};

/// Result type for wagpt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("page not ready: {0}")]
    NotReady(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("message scrape failed: {0}")]
    Scrape(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: "Test"
chat: "+1 555 0100"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.name, "Test");
        assert_eq!(config.chat, "+1 555 0100");
        assert_eq!(config.trigger, "GPT");
        assert!(!config.browser.headless);
        assert!(config.browser.profile_dir.is_none());
    }

    #[test]
    fn test_parse_browser_options() {
        let yaml = r#"
name: "Test"
chat: "Me"
browser:
  headless: true
  profile_dir: "chrome_profile"
  window:
    width: 1280
    height: 720
"#;
        let config = Config::parse(yaml).unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.profile_dir, Some("chrome_profile".into()));
        assert_eq!(config.browser.window.width, 1280);
        assert_eq!(config.browser.window.height, 720);
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
name: "Test"
chat: "Me"
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.poll.interval_ms, 1000);
        assert_eq!(config.poll.error_backoff_ms, 5000);
        assert_eq!(config.poll.ready_timeout_ms, 60000);
        assert_eq!(config.typing.char_delay_ms, 10);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.base_url, "https://api.openai.com/v1");
        assert_eq!(config.browser.window.width, 1920);
        assert_eq!(config.browser.window.height, 1080);
        assert_eq!(config.on_failure.reply, FailurePolicy::Apology);
        assert!(config.on_failure.screenshot.is_none());
    }

    #[test]
    fn test_parse_failure_policy() {
        let yaml = r#"
name: "Test"
chat: "Me"
on_failure:
  reply: skip
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.on_failure.reply, FailurePolicy::Skip);
    }

    #[test]
    fn test_validation_missing_chat() {
        let yaml = r#"
name: "Test"
chat: ""
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("chat"));
    }

    #[test]
    fn test_validation_empty_name() {
        let yaml = r#"
name: ""
chat: "Me"
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_empty_trigger() {
        let yaml = r#"
name: "Test"
chat: "Me"
trigger: ""
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("trigger"));
    }

    #[test]
    fn test_validation_non_ascii_trigger() {
        let yaml = r#"
name: "Test"
chat: "Me"
trigger: "ロボ"
"#;
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let yaml = r#"
name: "Test"
chat: "Me"
poll:
  interval_ms: 0
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("interval_ms"));
    }

    #[test]
    fn test_load_example_config() {
        let config = Config::load("configs/example.yaml").unwrap();
        assert_eq!(config.name, "Example Bot");
        assert_eq!(config.trigger, "GPT");
        assert!(config.browser.headless);
        assert_eq!(
            config.on_failure.screenshot,
            Some("failure-{timestamp}.png".into())
        );
    }
}
