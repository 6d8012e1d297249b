//! Typing replies into the compose box.
//!
//! Characters go in one CDP key event at a time so the page's input
//! handlers see something close to human typing. Line breaks inside a
//! reply become Shift+Enter; a single plain Enter submits.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use chromiumoxide::Page;
use tracing::{debug, info};

use crate::selectors::{self, first_match, DomProbe};
use crate::{Error, Result};

/// CDP modifier bit for a held Shift key.
const SHIFT: i64 = 8;

/// Pause after clicking the compose field.
const FOCUS_SETTLE: Duration = Duration::from_millis(1000);
/// Pause after clearing the compose field.
const CLEAR_SETTLE: Duration = Duration::from_millis(500);
/// Pause after a Shift+Enter line break.
const BREAK_SETTLE: Duration = Duration::from_millis(100);
/// Pause after the submitting Enter.
const SEND_SETTLE: Duration = Duration::from_millis(1000);

/// Paces keystroke injection.
#[derive(Debug, Clone, Copy)]
pub struct TypingPace {
    char_delay: Duration,
}

impl TypingPace {
    pub fn new(char_delay: Duration) -> Self {
        Self { char_delay }
    }

    /// Zero-delay pace for deterministic tests.
    pub fn instant() -> Self {
        Self {
            char_delay: Duration::ZERO,
        }
    }

    pub async fn pause(&self) {
        if !self.char_delay.is_zero() {
            tokio::time::sleep(self.char_delay).await;
        }
    }
}

impl Default for TypingPace {
    fn default() -> Self {
        Self {
            char_delay: Duration::from_millis(10),
        }
    }
}

/// Where keystrokes go. [`PageKeys`] drives the real page; tests record.
pub trait KeySink {
    async fn insert_char(&mut self, ch: char) -> Result<()>;
    /// Shift+Enter: a line break inside the compose field.
    async fn line_break(&mut self) -> Result<()>;
    /// Plain Enter: submit the message.
    async fn submit(&mut self) -> Result<()>;
}

/// Delivery seam between the poll loop and the page; faked in tests.
pub trait Outbox {
    async fn deliver(&mut self, text: &str) -> Result<()>;
}

/// Type a multi-line message: characters in order, a line break between
/// lines, one submit after the final line.
pub async fn type_message<S: KeySink>(sink: &mut S, pace: TypingPace, text: &str) -> Result<()> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    for (i, line) in lines.iter().enumerate() {
        for ch in line.chars() {
            sink.insert_char(ch).await?;
            pace.pause().await;
        }
        if i != last {
            sink.line_break().await?;
        }
    }
    sink.submit().await
}

/// Key sink backed by CDP `Input.dispatchKeyEvent`.
pub struct PageKeys<'a> {
    page: &'a Page,
}

impl<'a> PageKeys<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

impl KeySink for PageKeys<'_> {
    async fn insert_char(&mut self, ch: char) -> Result<()> {
        let params = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::Char)
            .key(ch.to_string())
            .text(ch.to_string())
            .build()
            .map_err(Error::SendFailed)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn line_break(&mut self) -> Result<()> {
        press_enter(self.page, SHIFT).await?;
        tokio::time::sleep(BREAK_SETTLE).await;
        Ok(())
    }

    async fn submit(&mut self) -> Result<()> {
        press_enter(self.page, 0).await?;
        tokio::time::sleep(SEND_SETTLE).await;
        Ok(())
    }
}

async fn press_enter(page: &Page, modifiers: i64) -> Result<()> {
    let down = DispatchKeyEventParams::builder()
        .r#type(DispatchKeyEventType::KeyDown)
        .modifiers(modifiers)
        .key("Enter")
        .code("Enter")
        .text("\r")
        .windows_virtual_key_code(13)
        .native_virtual_key_code(13)
        .build()
        .map_err(Error::SendFailed)?;
    page.execute(down).await?;

    let up = DispatchKeyEventParams::builder()
        .r#type(DispatchKeyEventType::KeyUp)
        .modifiers(modifiers)
        .key("Enter")
        .code("Enter")
        .windows_virtual_key_code(13)
        .native_virtual_key_code(13)
        .build()
        .map_err(Error::SendFailed)?;
    page.execute(up).await?;
    Ok(())
}

/// Focuses the compose box and delivers reply text as simulated typing.
pub struct Composer<'a> {
    page: &'a Page,
    pace: TypingPace,
}

impl<'a> Composer<'a> {
    pub fn new(page: &'a Page, pace: TypingPace) -> Self {
        Self { page, pace }
    }

    /// Locate the compose field, focus and clear it, then type `text`.
    pub async fn send(&self, text: &str) -> Result<()> {
        let mut probe = DomProbe::visible(self.page);
        let hit = first_match(&mut probe, selectors::COMPOSE_FIELDS)
            .await
            .ok_or_else(|| Error::ElementNotFound("compose field not found".into()))?;
        debug!(
            "compose field found (strategy: {})",
            selectors::COMPOSE_FIELDS[hit.index]
        );

        self.focus(&hit.selector).await?;
        tokio::time::sleep(FOCUS_SETTLE).await;
        self.clear(&hit.selector).await;
        tokio::time::sleep(CLEAR_SETTLE).await;

        let mut keys = PageKeys::new(self.page);
        type_message(&mut keys, self.pace, text).await?;
        info!("reply delivered ({} chars)", text.chars().count());
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.click();
                el.focus();
                return true;
            }})()"#,
            serde_json::to_string(selector).unwrap()
        );
        let focused = self
            .page
            .evaluate(js)
            .await?
            .value()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !focused {
            return Err(Error::ElementNotFound(format!(
                "compose field '{selector}' disappeared"
            )));
        }
        Ok(())
    }

    /// Best-effort clear; select-all + delete keeps the editor's internal
    /// state consistent for contenteditable fields.
    async fn clear(&self, selector: &str) {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.focus();
                document.execCommand('selectAll', false, null);
                document.execCommand('delete', false, null);
                return true;
            }})()"#,
            serde_json::to_string(selector).unwrap()
        );
        if self.page.evaluate(js).await.is_err() {
            debug!("could not clear compose field '{selector}'");
        }
    }
}

impl Outbox for Composer<'_> {
    async fn deliver(&mut self, text: &str) -> Result<()> {
        self.send(text).await
    }
}
