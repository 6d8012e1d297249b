//! The poll loop: dedup, trigger matching, exchange orchestration.

use std::time::{SystemTime, UNIX_EPOCH};

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotParams;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use crate::chat::ChatPage;
use crate::completion::Respond;
use crate::config::{Config, FailurePolicy};
use crate::writer::{Composer, Outbox, TypingPace};
use crate::Result;

/// Last-answered fingerprint. One message of history is all the dedup
/// rule needs; nothing survives a restart.
#[derive(Debug, Default)]
pub struct DedupState {
    last_answered: Option<String>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `text` differs from the last answered message.
    pub fn is_new(&self, text: &str) -> bool {
        self.last_answered.as_deref() != Some(text)
    }

    pub fn mark_answered(&mut self, text: impl Into<String>) {
        self.last_answered = Some(text.into());
    }

    pub fn last_answered(&self) -> Option<&str> {
        self.last_answered.as_deref()
    }
}

/// Case-insensitive message-prefix trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    keyword: String,
}

impl Trigger {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// If `text` starts with the keyword (any case), the prompt that
    /// remains after stripping it; `None` otherwise.
    pub fn strip<'t>(&self, text: &'t str) -> Option<&'t str> {
        let head = text.get(..self.keyword.len())?;
        if !head.eq_ignore_ascii_case(&self.keyword) {
            return None;
        }
        Some(text[self.keyword.len()..].trim_start())
    }
}

/// What one poll exchange did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing new, no trigger match, or an empty prompt.
    Ignored,
    /// A completion was delivered.
    Answered,
    /// The completion failed; the policy decided what was sent.
    Failed,
}

/// Apply the trigger/dedup policy to one scraped message and, on match,
/// run the completion and deliver the reply.
///
/// Both failure policies mark the message answered so a persistently
/// failing prompt is not re-submitted every poll tick.
pub async fn run_exchange<R, O>(
    state: &mut DedupState,
    trigger: &Trigger,
    policy: FailurePolicy,
    apology: &str,
    responder: &R,
    outbox: &mut O,
    message: &str,
) -> Result<Outcome>
where
    R: Respond,
    O: Outbox,
{
    if !state.is_new(message) {
        return Ok(Outcome::Ignored);
    }
    let Some(prompt) = trigger.strip(message) else {
        return Ok(Outcome::Ignored);
    };
    if prompt.is_empty() {
        debug!("trigger with no prompt, ignoring");
        return Ok(Outcome::Ignored);
    }

    info!("new question: {}", preview(message));
    match responder.complete(prompt).await {
        Ok(reply) => {
            outbox.deliver(&reply).await?;
            state.mark_answered(message);
            Ok(Outcome::Answered)
        }
        Err(err) => {
            warn!("completion failed: {err}");
            if policy == FailurePolicy::Apology {
                outbox.deliver(apology).await?;
            }
            state.mark_answered(message);
            Ok(Outcome::Failed)
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

/// Polls the open conversation forever.
pub struct Bot<'a, R: Respond> {
    page: &'a Page,
    chat: ChatPage<'a>,
    outbox: Composer<'a>,
    responder: R,
    trigger: Trigger,
    policy: FailurePolicy,
    apology: String,
    poll_interval: std::time::Duration,
    error_backoff: std::time::Duration,
    screenshot: Option<String>,
    state: DedupState,
}

impl<'a, R: Respond> Bot<'a, R> {
    pub fn new(config: &Config, page: &'a Page, responder: R) -> Self {
        Self {
            page,
            chat: ChatPage::new(page),
            outbox: Composer::new(page, TypingPace::new(config.typing.char_delay())),
            responder,
            trigger: Trigger::new(config.trigger.clone()),
            policy: config.on_failure.reply,
            apology: config.on_failure.apology.clone(),
            poll_interval: config.poll.interval(),
            error_backoff: config.poll.error_backoff(),
            screenshot: config.on_failure.screenshot.clone(),
            state: DedupState::new(),
        }
    }

    /// Poll until the process ends. Iteration failures are logged and
    /// retried after a backoff; there is no other exit condition.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "polling for messages prefixed with '{}'",
            self.trigger.keyword()
        );
        loop {
            match self.tick().await {
                Ok(_) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    warn!("poll iteration failed: {err}");
                    self.capture_failure().await;
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }

    async fn tick(&mut self) -> Result<Outcome> {
        let Some(message) = self.chat.latest_message().await? else {
            return Ok(Outcome::Ignored);
        };
        if let Some(stamp) = &message.stamp {
            debug!("latest bubble stamp: {stamp}");
        }
        run_exchange(
            &mut self.state,
            &self.trigger,
            self.policy,
            &self.apology,
            &self.responder,
            &mut self.outbox,
            &message.text,
        )
        .await
    }

    async fn capture_failure(&self) {
        let Some(ref pattern) = self.screenshot else {
            return;
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = pattern.replace("{timestamp}", &timestamp.to_string());
        match self
            .page
            .save_screenshot(CaptureScreenshotParams::default(), &path)
            .await
        {
            Ok(_) => info!("failure screenshot saved to {path}"),
            Err(err) => warn!("failed to save screenshot: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use std::cell::Cell;

    struct Fixed {
        reply: &'static str,
        calls: Cell<u32>,
    }

    impl Fixed {
        fn new(reply: &'static str) -> Self {
            Self {
                reply,
                calls: Cell::new(0),
            }
        }
    }

    impl Respond for Fixed {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.reply.to_string())
        }
    }

    struct Failing;

    impl Respond for Failing {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
            Err(CompletionError::Empty)
        }
    }

    #[derive(Default)]
    struct Sent(Vec<String>);

    impl Outbox for Sent {
        async fn deliver(&mut self, text: &str) -> Result<()> {
            self.0.push(text.to_string());
            Ok(())
        }
    }

    fn trigger() -> Trigger {
        Trigger::new("GPT")
    }

    #[test]
    fn trigger_is_case_insensitive_prefix_only() {
        let t = trigger();
        assert_eq!(t.strip("gpt hello"), Some("hello"));
        assert_eq!(t.strip("GPT hello"), Some("hello"));
        assert_eq!(t.strip("GpT hello"), Some("hello"));
        assert_eq!(t.strip("hi gpt"), None);
        assert_eq!(t.strip("gp"), None);
        assert_eq!(t.strip(""), None);
    }

    #[test]
    fn trigger_strip_handles_multibyte_text() {
        let t = trigger();
        assert_eq!(t.strip("gpt é isso aí"), Some("é isso aí"));
        assert_eq!(t.strip("日本語"), None);
    }

    #[tokio::test]
    async fn question_is_answered_and_fingerprint_updates() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();
        let responder = Fixed::new("4");

        let outcome = run_exchange(
            &mut state,
            &trigger(),
            FailurePolicy::Apology,
            "sorry",
            &responder,
            &mut sent,
            "GPT what is 2+2",
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Answered);
        assert_eq!(sent.0, vec!["4"]);
        assert_eq!(state.last_answered(), Some("GPT what is 2+2"));
    }

    #[tokio::test]
    async fn same_message_is_never_answered_twice() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();
        let responder = Fixed::new("4");

        for _ in 0..3 {
            run_exchange(
                &mut state,
                &trigger(),
                FailurePolicy::Apology,
                "sorry",
                &responder,
                &mut sent,
                "GPT what is 2+2",
            )
            .await
            .unwrap();
        }

        assert_eq!(responder.calls.get(), 1);
        assert_eq!(sent.0.len(), 1);
    }

    #[tokio::test]
    async fn untriggered_messages_are_ignored() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();
        let responder = Fixed::new("4");

        let outcome = run_exchange(
            &mut state,
            &trigger(),
            FailurePolicy::Apology,
            "sorry",
            &responder,
            &mut sent,
            "hi gpt",
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert!(sent.0.is_empty());
        assert_eq!(responder.calls.get(), 0);
        assert_eq!(state.last_answered(), None);
    }

    #[tokio::test]
    async fn bare_trigger_is_ignored() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();
        let responder = Fixed::new("4");

        let outcome = run_exchange(
            &mut state,
            &trigger(),
            FailurePolicy::Apology,
            "sorry",
            &responder,
            &mut sent,
            "GPT",
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert!(sent.0.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_sends_apology() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();

        let outcome = run_exchange(
            &mut state,
            &trigger(),
            FailurePolicy::Apology,
            "sorry, try again",
            &Failing,
            &mut sent,
            "GPT what is 2+2",
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(sent.0, vec!["sorry, try again"]);
        assert_eq!(state.last_answered(), Some("GPT what is 2+2"));
    }

    #[tokio::test]
    async fn failed_completion_with_skip_sends_nothing() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();

        let outcome = run_exchange(
            &mut state,
            &trigger(),
            FailurePolicy::Skip,
            "sorry",
            &Failing,
            &mut sent,
            "GPT what is 2+2",
        )
        .await
        .unwrap();

        assert_eq!(outcome, Outcome::Failed);
        assert!(sent.0.is_empty());
        // still fingerprinted, so the failing prompt is not hot-looped
        assert_eq!(state.last_answered(), Some("GPT what is 2+2"));
    }

    #[tokio::test]
    async fn new_question_after_answer_is_processed() {
        let mut state = DedupState::new();
        let mut sent = Sent::default();
        let responder = Fixed::new("42");

        for message in ["GPT first", "GPT first", "GPT second"] {
            run_exchange(
                &mut state,
                &trigger(),
                FailurePolicy::Apology,
                "sorry",
                &responder,
                &mut sent,
                message,
            )
            .await
            .unwrap();
        }

        assert_eq!(responder.calls.get(), 2);
        assert_eq!(state.last_answered(), Some("GPT second"));
    }
}
