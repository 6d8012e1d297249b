//! Browser lifecycle: launch, event drain, shutdown.

use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserOptions;
use crate::{Error, Result};

/// Address of the chat UI.
pub const WHATSAPP_URL: &str = "https://web.whatsapp.com";

/// Owns the running browser, its CDP event drain task, and the page the
/// chat UI is loaded in.
pub struct BrowserSession {
    browser: Browser,
    events: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Launch the browser and open the chat UI.
    ///
    /// A failed launch wipes the profile directory (if any) and retries
    /// once with a clean profile before giving up.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let profile = options.profile_path();
        let (browser, handler) = match launch_once(options, profile.as_deref()).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("browser launch failed: {err}; retrying with a clean profile");
                if let Some(dir) = profile.as_deref() {
                    if let Err(io) = std::fs::remove_dir_all(dir) {
                        debug!("could not remove profile dir {}: {}", dir.display(), io);
                    }
                }
                launch_once(options, profile.as_deref()).await?
            }
        };

        let mut stream = handler;
        let events = tokio::spawn(async move { while stream.next().await.is_some() {} });

        let page = browser.new_page(WHATSAPP_URL).await?;
        info!("opened {WHATSAPP_URL}");

        Ok(Self {
            browser,
            events,
            page,
        })
    }

    /// The page the chat UI lives in.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser and stop the event drain task.
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        self.events.abort();
        Ok(())
    }
}

async fn launch_once(
    options: &BrowserOptions,
    profile: Option<&Path>,
) -> Result<(Browser, Handler)> {
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .window_size(options.window.width, options.window.height)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-notifications");

    if !options.headless {
        builder = builder.with_head();
    }
    if let Some(dir) = profile {
        builder = builder.user_data_dir(dir);
    }

    let config = builder.build().map_err(Error::Launch)?;
    debug!(
        "launching browser (headless: {}, profile: {:?})",
        options.headless, profile
    );
    Ok(Browser::launch(config).await?)
}
