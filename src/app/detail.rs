use std::time::Duration;

use tracing::{debug, info};

use super::browser::{Browser, snapshot};
use super::checkpoint::RecordOperation;
use super::error::StageError;
use super::extract::{Locator, Probe, Strategy, extract_field};
use super::listing::Overlays;
use super::navigator::Navigator;
use super::types::{Field, Record};

pub const DETAIL_PACING: Duration = Duration::from_secs(2);

const ABOUT_PATH: &str = "/html/body/main/section[4]/div/div/div/p";
const LONG_PARAGRAPH_CHARS: usize = 100;

/// Profile text lookup: the fixed profile slot first, then an "About"
/// section, then any long paragraph that reads like a company blurb.
pub fn about_strategy() -> Strategy {
    Strategy::new(vec![
        Probe::text(Locator::path(ABOUT_PATH)),
        Probe::headed_section("about"),
        Probe::long_paragraph(LONG_PARAGRAPH_CHARS, ["about", "our company"]),
    ])
}

/// Fills `about_text` from each contractor's profile page.
pub struct DetailStage<'a, B> {
    browser: &'a mut B,
    navigator: &'a Navigator,
    strategy: Strategy,
    pacing: Duration,
}

impl<'a, B: Browser> DetailStage<'a, B> {
    pub fn new(browser: &'a mut B, navigator: &'a Navigator) -> Self {
        Self {
            browser,
            navigator,
            strategy: about_strategy(),
            pacing: DETAIL_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Opens the first profile once so the cookie banner is out of the way
    /// before the loop starts.
    pub async fn prepare(&mut self, records: &[Record], overlays: &Overlays) {
        let Some(first) = records.iter().find(|r| r.is_resolved(Field::DetailUrl)) else {
            return;
        };
        if self.navigator.navigate(&mut *self.browser, &first.detail_url).await
            && let Err(err) = overlays
                .accept_cookies(&mut *self.browser, self.navigator.timings())
                .await
        {
            debug!(error = %err, "cookie handling failed");
        }
    }
}

impl<B: Browser> RecordOperation for DetailStage<'_, B> {
    fn field(&self) -> Field {
        Field::AboutText
    }

    fn is_eligible(&self, record: &Record) -> bool {
        record.is_resolved(Field::DetailUrl)
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }

    async fn apply(&mut self, record: &Record) -> Result<String, StageError> {
        let url = record.detail_url.as_str();
        if !self.navigator.navigate(&mut *self.browser, url).await {
            return Err(StageError::Navigation {
                url: url.to_string(),
            });
        }
        let doc = snapshot(&mut *self.browser).await?;
        let about = extract_field(doc.root_element(), &self.strategy);
        info!(name = %record.name, chars = about.chars().count(), "about text");
        Ok(about)
    }
}
