use std::time::Duration;

use scraper::{Html, Selector};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use super::browser::{Browser, snapshot};
use super::error::BrowserError;
use super::types::Timings;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
enum AttemptFailure {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("document not ready after {0:?}")]
    NotReady(Duration),

    #[error("`{selector}` did not appear within {timeout:?}")]
    ContentMissing { selector: String, timeout: Duration },
}

/// Bounded-retry page loader.
#[derive(Debug, Clone)]
pub struct Navigator {
    timings: Timings,
    max_attempts: usize,
}

impl Navigator {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Loads `url`, returning `false` once every attempt has failed.
    pub async fn navigate<B: Browser>(&self, browser: &mut B, url: &str) -> bool {
        self.navigate_until(browser, url, None).await
    }

    /// Like [`Navigator::navigate`], additionally requiring `ready_selector`
    /// to be present before the load counts as successful.
    pub async fn navigate_until<B: Browser>(
        &self,
        browser: &mut B,
        url: &str,
        ready_selector: Option<&str>,
    ) -> bool {
        for attempt in 1..=self.max_attempts {
            info!(url, attempt, max_attempts = self.max_attempts, "navigating");
            match self.attempt(browser, url, ready_selector).await {
                Ok(()) => {
                    info!(url, "page loaded");
                    return true;
                }
                Err(err) => {
                    warn!(url, attempt, error = %err, "navigation attempt failed");
                    if attempt < self.max_attempts {
                        sleep(self.timings.retry_backoff).await;
                    }
                }
            }
        }
        error!(url, attempts = self.max_attempts, "giving up on page");
        false
    }

    async fn attempt<B: Browser>(
        &self,
        browser: &mut B,
        url: &str,
        ready_selector: Option<&str>,
    ) -> Result<(), AttemptFailure> {
        browser.goto(url).await?;
        if !wait_for_ready_state(browser, &self.timings).await? {
            return Err(AttemptFailure::NotReady(self.timings.ready_timeout));
        }
        sleep(self.timings.settle).await;

        if let Some(selector) = ready_selector {
            let found = wait_for_element(
                browser,
                selector,
                self.timings.listing_timeout,
                self.timings.poll_interval,
            )
            .await?;
            if found.is_none() {
                return Err(AttemptFailure::ContentMissing {
                    selector: selector.to_string(),
                    timeout: self.timings.listing_timeout,
                });
            }
        }
        Ok(())
    }
}

async fn wait_for_ready_state<B: Browser>(
    browser: &mut B,
    timings: &Timings,
) -> Result<bool, BrowserError> {
    let deadline = Instant::now() + timings.ready_timeout;
    loop {
        if browser.ready_state().await? == "complete" {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(timings.poll_interval).await;
    }
}

/// Polls the page until `selector` matches, returning the snapshot that
/// matched. `None` on timeout or when the selector does not parse.
pub async fn wait_for_element<B: Browser>(
    browser: &mut B,
    selector: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<Option<Html>, BrowserError> {
    let Ok(parsed) = Selector::parse(selector) else {
        warn!(selector, "invalid selector");
        return Ok(None);
    };
    let deadline = Instant::now() + timeout;
    loop {
        let doc = snapshot(browser).await?;
        if doc.select(&parsed).next().is_some() {
            return Ok(Some(doc));
        }
        if Instant::now() >= deadline {
            debug!(selector, ?timeout, "element wait timed out");
            return Ok(None);
        }
        sleep(poll).await;
    }
}

/// Polls until `selector` no longer matches. `false` if it never went away.
pub async fn wait_for_absence<B: Browser>(
    browser: &mut B,
    selector: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<bool, BrowserError> {
    let Ok(parsed) = Selector::parse(selector) else {
        warn!(selector, "invalid selector");
        return Ok(true);
    };
    let deadline = Instant::now() + timeout;
    loop {
        let doc = snapshot(browser).await?;
        if doc.select(&parsed).next().is_none() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(poll).await;
    }
}
