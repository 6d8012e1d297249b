//! Ranked selector strategies and the first-match resolver.
//!
//! WhatsApp Web reshuffles its DOM between UI versions, so every element
//! the bot touches is described by an ordered list of [`Strategy`]
//! descriptors, tried in priority order. Resolution goes through the
//! [`Probe`] trait so the ordering logic can be exercised without a
//! browser.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use chromiumoxide::Page;
use tracing::debug;

use crate::{Error, Result};

/// Pause between rescans in [`wait_first_match`].
const SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// How a pattern is matched against the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector.
    Css,
    /// Substring of an element's text content (case-insensitive).
    Text,
}

/// One locator kind plus its pattern.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub locator: Locator,
    pub pattern: Cow<'static, str>,
}

impl Strategy {
    pub const fn css(pattern: &'static str) -> Self {
        Self {
            locator: Locator::Css,
            pattern: Cow::Borrowed(pattern),
        }
    }

    pub const fn text(pattern: &'static str) -> Self {
        Self {
            locator: Locator::Text,
            pattern: Cow::Borrowed(pattern),
        }
    }

    pub fn css_owned(pattern: String) -> Self {
        Self {
            locator: Locator::Css,
            pattern: Cow::Owned(pattern),
        }
    }

    pub fn text_owned(pattern: String) -> Self {
        Self {
            locator: Locator::Text,
            pattern: Cow::Owned(pattern),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.locator {
            Locator::Css => write!(f, "css `{}`", self.pattern),
            Locator::Text => write!(f, "text contains `{}`", self.pattern),
        }
    }
}

/// Any one of these indicates the chat UI has finished loading.
pub const READY_MARKERS: &[Strategy] = &[
    Strategy::css(r#"[data-icon="menu"]"#),
    Strategy::css(r#"div[role="textbox"]"#),
    Strategy::css("#side"),
    Strategy::css(r#"div[data-testid="chat-list"]"#),
    Strategy::css(r#"div[data-testid="default-user"]"#),
    Strategy::css(r#"div[data-testid="menu-bar"]"#),
    Strategy::css(r#"div[role="navigation"]"#),
];

/// Ranked selectors for message text inside the open conversation.
pub const MESSAGE_TEXTS: &[Strategy] = &[
    Strategy::css("div.message-in span.selectable-text"),
    Strategy::css("div[data-pre-plain-text] span.selectable-text"),
    Strategy::css("div.copyable-text span.selectable-text"),
    Strategy::css(r#"div[role="row"] span.selectable-text"#),
];

/// Ranked selectors for the compose box.
pub const COMPOSE_FIELDS: &[Strategy] = &[
    Strategy::css(r#"div[data-testid="conversation-compose-box-input"]"#),
    Strategy::css(r#"footer div[contenteditable="true"]"#),
    Strategy::css(r#"div[contenteditable="true"][data-tab="10"]"#),
    Strategy::css(r#"div[contenteditable="true"][data-lexical-editor="true"]"#),
    Strategy::css(r#"div[contenteditable="true"][title="Type a message"]"#),
];

/// The back arrow shown while a conversation covers the chat list.
pub const BACK_BUTTON: &[Strategy] = &[Strategy::css(r#"span[data-icon="back"]"#)];

/// Ranked ways of finding the target conversation in the chat list.
pub fn chat_entries(name: &str) -> Vec<Strategy> {
    vec![
        Strategy::text_owned(name.to_string()),
        Strategy::css_owned(format!(r#"div[title*="{}"]"#, css_attr(name))),
        Strategy::text("(you)"),
        Strategy::css(r#"div[data-testid="cell-frame-title"]"#),
    ]
}

fn css_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A successful resolution: which strategy matched and the concrete CSS
/// selector it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub index: usize,
    pub selector: String,
}

/// Evaluates one strategy against a page (or a fixture, in tests).
pub trait Probe {
    /// `Ok(Some(css))` resolves the strategy to a concrete selector.
    async fn probe(&mut self, strategy: &Strategy) -> Result<Option<String>>;
}

/// Try each strategy in order; the first that resolves wins and later
/// strategies are never attempted. Probe failures count as misses.
pub async fn first_match<P: Probe>(probe: &mut P, strategies: &[Strategy]) -> Option<Hit> {
    for (index, strategy) in strategies.iter().enumerate() {
        match probe.probe(strategy).await {
            Ok(Some(selector)) => {
                debug!("matched {} (rank {})", strategy, index);
                return Some(Hit { index, selector });
            }
            Ok(None) => {}
            Err(err) => debug!("strategy {} failed: {}", strategy, err),
        }
    }
    None
}

/// Rescan all strategies round-robin until one resolves or the deadline
/// expires.
pub async fn wait_first_match<P: Probe>(
    probe: &mut P,
    strategies: &[Strategy],
    timeout: Duration,
) -> Result<Hit> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(hit) = first_match(probe, strategies).await {
            return Ok(hit);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "no strategy matched within {timeout:?}"
            )));
        }
        tokio::time::sleep(SCAN_INTERVAL).await;
    }
}

/// Probe backed by a live page. CSS strategies resolve to themselves;
/// text strategies resolve to a generated CSS path.
pub struct DomProbe<'a> {
    page: &'a Page,
    require_visible: bool,
}

impl<'a> DomProbe<'a> {
    /// Presence is enough.
    pub fn present(page: &'a Page) -> Self {
        Self {
            page,
            require_visible: false,
        }
    }

    /// The element must also be rendered.
    pub fn visible(page: &'a Page) -> Self {
        Self {
            page,
            require_visible: true,
        }
    }
}

impl Probe for DomProbe<'_> {
    async fn probe(&mut self, strategy: &Strategy) -> Result<Option<String>> {
        let js = match strategy.locator {
            Locator::Css => probe_css_js(&strategy.pattern, self.require_visible),
            Locator::Text => probe_text_js(&strategy.pattern, self.require_visible),
        };
        let result = self.page.evaluate(js).await?;
        Ok(result
            .value()
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }
}

fn probe_css_js(selector: &str, require_visible: bool) -> String {
    format!(
        r#"(() => {{
            const sel = {sel};
            const el = document.querySelector(sel);
            if (!el) return null;
            if ({vis}) {{
                const style = getComputedStyle(el);
                if (style.display === 'none' || style.visibility === 'hidden') return null;
                const rect = el.getBoundingClientRect();
                if (rect.width < 1 || rect.height < 1) return null;
            }}
            return sel;
        }})()"#,
        sel = serde_json::to_string(selector).unwrap(),
        vis = require_visible
    )
}

fn probe_text_js(needle: &str, require_visible: bool) -> String {
    format!(
        r#"(() => {{
            const needle = {needle}.toLowerCase();
            const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT, null);
            while (walker.nextNode()) {{
                const el = walker.currentNode;
                if (el.childElementCount > 0) continue;
                const text = (el.textContent || '').trim().toLowerCase();
                if (!text.includes(needle)) continue;
                if ({vis}) {{
                    const style = getComputedStyle(el);
                    if (style.display === 'none' || style.visibility === 'hidden') continue;
                }}
                const path = [];
                let node = el;
                while (node && node !== document.body) {{
                    if (node.id) {{
                        path.unshift('#' + CSS.escape(node.id));
                        break;
                    }}
                    let selector = node.tagName.toLowerCase();
                    const siblings = Array.from(node.parentNode ? node.parentNode.children : []);
                    if (siblings.length > 1) {{
                        selector += ':nth-child(' + (siblings.indexOf(node) + 1) + ')';
                    }}
                    path.unshift(selector);
                    node = node.parentNode;
                }}
                return path.join(' > ');
            }}
            return null;
        }})()"#,
        needle = serde_json::to_string(needle).unwrap(),
        vis = require_visible
    )
}
