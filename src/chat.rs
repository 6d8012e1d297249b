//! Reading the open conversation: readiness, chat selection, messages.

use std::time::Duration;

use chromiumoxide::Page;
use serde::Deserialize;
use tracing::{debug, info};

use crate::selectors::{self, first_match, wait_first_match, DomProbe};
use crate::{Error, Result};

/// Pause after clicking into the chat list or a conversation.
const NAVIGATION_SETTLE: Duration = Duration::from_secs(2);

/// A message scraped from the conversation pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    /// The bubble's `data-pre-plain-text` attribute, when present. It
    /// carries the sender and timestamp but its format is not stable.
    pub stamp: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    text: String,
    stamp: Option<String>,
}

/// Wraps the page with chat-level operations.
pub struct ChatPage<'a> {
    page: &'a Page,
}

impl<'a> ChatPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    /// Wait until any readiness marker resolves.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        info!("waiting for the chat UI to load (scan the QR code if prompted)");
        let mut probe = DomProbe::present(self.page);
        let hit = wait_first_match(&mut probe, selectors::READY_MARKERS, timeout)
            .await
            .map_err(|_| {
                Error::NotReady(format!("no readiness marker appeared within {timeout:?}"))
            })?;
        info!(
            "chat UI loaded (marker: {})",
            selectors::READY_MARKERS[hit.index]
        );
        Ok(())
    }

    /// Locate the target conversation in the chat list and open it.
    pub async fn open_chat(&self, name: &str) -> Result<()> {
        let mut probe = DomProbe::present(self.page);

        // A conversation may already cover the chat list; back out first.
        if let Some(back) = first_match(&mut probe, selectors::BACK_BUTTON).await {
            debug!("returning to the chat list");
            let _ = self.click(&back.selector).await;
            tokio::time::sleep(NAVIGATION_SETTLE).await;
        }

        let entries = selectors::chat_entries(name);
        let hit = first_match(&mut probe, &entries).await.ok_or_else(|| {
            Error::ElementNotFound(format!("chat '{name}' not found in the chat list"))
        })?;
        info!("opening chat (strategy: {})", entries[hit.index]);
        self.click_row(&hit.selector).await?;
        tokio::time::sleep(NAVIGATION_SETTLE).await;
        Ok(())
    }

    /// Latest visible message. The first selector strategy that matches
    /// anything supplies the last matching element.
    pub async fn latest_message(&self) -> Result<Option<Message>> {
        for strategy in selectors::MESSAGE_TEXTS {
            let result = self.page.evaluate(last_message_js(&strategy.pattern)).await?;
            let Some(raw) = result.value().and_then(|v| v.as_str()) else {
                continue;
            };
            let parsed: RawMessage = serde_json::from_str(raw)
                .map_err(|err| Error::Scrape(format!("bad message payload: {err}")))?;
            debug!("latest message via {}", strategy);
            return Ok(Some(Message {
                text: parsed.text,
                stamp: parsed.stamp.filter(|s| !s.is_empty()),
            }));
        }
        Ok(None)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            serde_json::to_string(selector).unwrap()
        );
        let clicked = self
            .page
            .evaluate(js)
            .await?
            .value()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !clicked {
            return Err(Error::ElementNotFound(format!("'{selector}' disappeared")));
        }
        Ok(())
    }

    /// Click the chat-list row enclosing `selector`; matches often land
    /// on a title span rather than the clickable row itself.
    async fn click_row(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                const row = el.closest('[role="listitem"], [data-testid="cell-frame-container"]') || el;
                row.click();
                return true;
            }})()"#,
            serde_json::to_string(selector).unwrap()
        );
        let clicked = self
            .page
            .evaluate(js)
            .await?
            .value()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !clicked {
            return Err(Error::ElementNotFound(format!("'{selector}' disappeared")));
        }
        Ok(())
    }
}

fn last_message_js(selector: &str) -> String {
    format!(
        r#"(() => {{
            const nodes = document.querySelectorAll({});
            if (!nodes.length) return null;
            const last = nodes[nodes.length - 1];
            const text = (last.innerText || last.textContent || '').trim();
            if (!text) return null;
            const bubble = last.closest('[data-pre-plain-text]');
            return JSON.stringify({{
                text,
                stamp: bubble ? bubble.getAttribute('data-pre-plain-text') : null
            }});
        }})()"#,
        serde_json::to_string(selector).unwrap()
    )
}
