use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use super::browser::{Browser, snapshot};
use super::checkpoint::SnapshotStore;
use super::error::BrowserError;
use super::extract::{Extraction, Locator, Probe, Read, Strategy, extract};
use super::navigator::{Navigator, wait_for_absence, wait_for_element};
use super::types::{Field, Record, Timings};

pub const DEFAULT_START_URL: &str =
    "https://www.gaf.com/en-us/roofing-contractors/residential?distance=25";
pub const DEFAULT_MAX_PAGES: usize = 20;
pub const DEFAULT_ZIP: &str = "10001";

const PHONE_LABEL: &str = "Phone Number:";

/// Markup of the directory's result pages.
#[derive(Debug, Clone)]
pub struct ListingLayout {
    pub container: String,
    pub items: String,
    pub fields: Vec<(Field, Extraction)>,
    /// Tried in order; the pager's position in the markup is not stable.
    pub next_controls: Vec<String>,
    pub loading_indicator: String,
}

impl Default for ListingLayout {
    fn default() -> Self {
        let card = "div.certification-card__content > div:nth-child(1)";
        Self {
            container: "ul.contractor-listing__results".to_string(),
            items: "ul.contractor-listing__results > li".to_string(),
            fields: vec![
                (
                    Field::Name,
                    Extraction::First(Strategy::new(vec![Probe::text(Locator::css(format!(
                        "{card} > h2 > a > span"
                    )))])),
                ),
                (
                    Field::DetailUrl,
                    Extraction::First(Strategy::new(vec![Probe::attr(
                        Locator::css(format!("{card} > h2 > a")),
                        "href",
                    )])),
                ),
                (
                    Field::Rating,
                    Extraction::First(Strategy::new(vec![
                        Probe::text(Locator::css(format!(
                            "{card} > div > span.rating-stars__average"
                        ))),
                        Probe::text(Locator::css("span.rating-stars__average")),
                    ])),
                ),
                (
                    Field::Certifications,
                    Extraction::Joined {
                        locator: Locator::css("div.certification-card__certifications > ul > li"),
                        read: Read::Text,
                    },
                ),
                (
                    Field::PhoneNumber,
                    Extraction::First(Strategy::new(vec![
                        Probe::text_without(
                            Locator::css("a.certification-card__phone"),
                            PHONE_LABEL,
                        ),
                        Probe::text_without(Locator::css("a[href*='tel:']"), PHONE_LABEL),
                    ])),
                ),
            ],
            next_controls: vec![
                "ul.pagination > li:nth-child(9) > button".to_string(),
                "ul.pagination > li:nth-child(8) > button".to_string(),
                "button[aria-label='Next'], button.coveo-pager-next".to_string(),
            ],
            loading_indicator: ".coveo-processing-animation".to_string(),
        }
    }
}

/// Pop-ups that cover the directory on first visit.
#[derive(Debug, Clone)]
pub struct Overlays {
    pub cookie_button: String,
    pub location_input: String,
    pub location_submit: String,
    pub zip: Option<String>,
}

impl Default for Overlays {
    fn default() -> Self {
        Self {
            cookie_button: "button.cookie-banner__button, button#onetrust-accept-btn-handler"
                .to_string(),
            location_input: "input#location-input".to_string(),
            location_submit: "button.location-search__button".to_string(),
            zip: Some(DEFAULT_ZIP.to_string()),
        }
    }
}

impl Overlays {
    /// Accepts the cookie banner if one shows up. Best effort.
    pub async fn accept_cookies<B: Browser>(
        &self,
        browser: &mut B,
        timings: &Timings,
    ) -> Result<bool, BrowserError> {
        let banner = wait_for_element(
            browser,
            &self.cookie_button,
            timings.overlay_timeout,
            timings.poll_interval,
        )
        .await?;
        if banner.is_none() || !browser.click(&self.cookie_button).await? {
            debug!("no cookie banner");
            return Ok(false);
        }
        info!("accepted cookies");
        sleep(timings.overlay_settle).await;
        Ok(true)
    }

    /// Answers the location prompt with the configured ZIP code.
    pub async fn answer_location<B: Browser>(
        &self,
        browser: &mut B,
        timings: &Timings,
    ) -> Result<bool, BrowserError> {
        let Some(zip) = self.zip.as_deref() else {
            return Ok(false);
        };
        let prompt = wait_for_element(
            browser,
            &self.location_input,
            timings.overlay_timeout,
            timings.poll_interval,
        )
        .await?;
        if prompt.is_none() || !browser.fill(&self.location_input, zip).await? {
            debug!("no location prompt");
            return Ok(false);
        }
        info!(zip, "location prompt answered");
        if browser.click(&self.location_submit).await? {
            sleep(timings.settle).await;
        }
        Ok(true)
    }

    pub async fn dismiss<B: Browser>(&self, browser: &mut B, timings: &Timings) {
        if let Err(err) = self.accept_cookies(browser, timings).await {
            warn!(error = %err, "cookie handling failed");
        }
        if let Err(err) = self.answer_location(browser, timings).await {
            warn!(error = %err, "location handling failed");
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    MaxPages,
    NavigationFailed,
    NoItems,
    NoNextControl,
    NextDisabled,
    NextPageTimeout,
    BrowserError,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WalkState {
    LoadingPage,
    ExtractingItems,
    SeekingNext,
    Done(StopReason),
}

#[derive(Debug, Clone)]
pub struct Walk {
    pub records: Vec<Record>,
    pub pages: usize,
    pub stop: StopReason,
}

/// Walks the paginated directory, collecting one record per listing item.
pub struct ListingWalker<'a> {
    navigator: &'a Navigator,
    layout: &'a ListingLayout,
    overlays: Option<&'a Overlays>,
    max_pages: usize,
}

impl<'a> ListingWalker<'a> {
    pub fn new(navigator: &'a Navigator, layout: &'a ListingLayout, max_pages: usize) -> Self {
        Self {
            navigator,
            layout,
            overlays: None,
            max_pages,
        }
    }

    pub fn with_overlays(mut self, overlays: &'a Overlays) -> Self {
        self.overlays = Some(overlays);
        self
    }

    /// Runs the walk, checkpointing the records collected so far after each
    /// page. At most `max_pages` pages are loaded. Browser faults end the walk
    /// with whatever was collected up to that point.
    pub async fn walk<B, S>(&self, browser: &mut B, start_url: &str, store: &mut S) -> Walk
    where
        B: Browser,
        S: SnapshotStore,
    {
        let mut records = Vec::new();
        let mut page = 0usize;
        let mut current: Option<Html> = None;
        let mut state = WalkState::LoadingPage;

        let stop = loop {
            state = match state {
                WalkState::Done(reason) => break reason,
                WalkState::LoadingPage => {
                    self.load_first_page(browser, start_url, &mut page).await
                }
                WalkState::ExtractingItems => {
                    match self.extract_page(browser, store, &mut records, page).await {
                        Ok(Some(doc)) => {
                            current = Some(doc);
                            WalkState::SeekingNext
                        }
                        Ok(None) => WalkState::Done(StopReason::NoItems),
                        Err(err) => browser_failure(page, &err),
                    }
                }
                WalkState::SeekingNext => {
                    let doc = current.take();
                    match self.advance(browser, doc, &mut page).await {
                        Ok(next) => next,
                        Err(err) => browser_failure(page, &err),
                    }
                }
            };
        };

        info!(
            pages = page,
            records = records.len(),
            ?stop,
            "listing walk finished"
        );
        Walk {
            records,
            pages: page,
            stop,
        }
    }

    async fn load_first_page<B: Browser>(
        &self,
        browser: &mut B,
        start_url: &str,
        page: &mut usize,
    ) -> WalkState {
        if self.max_pages == 0 {
            return WalkState::Done(StopReason::MaxPages);
        }
        let container = Some(self.layout.container.as_str());
        if !self.navigator.navigate_until(browser, start_url, container).await {
            return WalkState::Done(StopReason::NavigationFailed);
        }
        if let Some(overlays) = self.overlays {
            overlays.dismiss(browser, self.navigator.timings()).await;
        }
        *page = 1;
        WalkState::ExtractingItems
    }

    /// Appends the current page's items and checkpoints them. `None` when the
    /// page shows no items.
    async fn extract_page<B, S>(
        &self,
        browser: &mut B,
        store: &mut S,
        records: &mut Vec<Record>,
        page: usize,
    ) -> Result<Option<Html>, BrowserError>
    where
        B: Browser,
        S: SnapshotStore,
    {
        let timings = self.navigator.timings();
        let found = wait_for_element(
            browser,
            &self.layout.items,
            timings.element_timeout,
            timings.poll_interval,
        )
        .await?;
        let Some(doc) = found else {
            info!(page, "no contractor items on page");
            return Ok(None);
        };
        let base = browser.current_url().await.ok();
        let items = extract_items(&doc, self.layout, base.as_deref());
        info!(
            page,
            max_pages = self.max_pages,
            count = items.len(),
            "extracted contractors"
        );
        records.extend(items);
        if let Err(err) = store.save(records) {
            warn!(page, error = %err, "checkpoint failed");
        }
        Ok(Some(doc))
    }

    async fn advance<B: Browser>(
        &self,
        browser: &mut B,
        doc: Option<Html>,
        page: &mut usize,
    ) -> Result<WalkState, BrowserError> {
        if *page >= self.max_pages {
            return Ok(WalkState::Done(StopReason::MaxPages));
        }
        let doc = match doc {
            Some(doc) => doc,
            None => snapshot(browser).await?,
        };
        let Some((selector, disabled)) = find_next_control(&doc, &self.layout.next_controls) else {
            info!(page = *page, "no next page control");
            return Ok(WalkState::Done(StopReason::NoNextControl));
        };
        if disabled {
            info!(page = *page, "next page control disabled");
            return Ok(WalkState::Done(StopReason::NextDisabled));
        }
        if !browser.click(selector).await? {
            warn!(page = *page, selector, "next page control vanished before click");
            return Ok(WalkState::Done(StopReason::NoNextControl));
        }

        let timings = self.navigator.timings();
        sleep(timings.next_page_settle).await;
        let settled = wait_for_absence(
            browser,
            &self.layout.loading_indicator,
            timings.element_timeout,
            timings.poll_interval,
        )
        .await?;
        if !settled {
            debug!(page = *page, "loading indicator still visible, continuing");
        }
        let reloaded = wait_for_element(
            browser,
            &self.layout.container,
            timings.listing_timeout,
            timings.poll_interval,
        )
        .await?;
        if reloaded.is_none() {
            warn!(page = *page, "listing did not reappear after paging");
            return Ok(WalkState::Done(StopReason::NextPageTimeout));
        }
        *page += 1;
        Ok(WalkState::ExtractingItems)
    }
}

fn browser_failure(page: usize, err: &BrowserError) -> WalkState {
    error!(page, error = %err, "browser failed during listing walk");
    WalkState::Done(StopReason::BrowserError)
}

/// The first next-page control found, and whether it is disabled.
fn find_next_control<'s>(doc: &Html, candidates: &'s [String]) -> Option<(&'s str, bool)> {
    candidates.iter().find_map(|candidate| {
        let selector = Selector::parse(candidate).ok()?;
        let el = doc.select(&selector).next()?;
        Some((candidate.as_str(), is_disabled(el)))
    })
}

fn is_disabled(el: ElementRef<'_>) -> bool {
    el.value().attr("disabled").is_some()
        || el
            .value()
            .attr("aria-disabled")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Extracts one record per listing item; relative detail links are resolved
/// against `base_url`.
pub fn extract_items(doc: &Html, layout: &ListingLayout, base_url: Option<&str>) -> Vec<Record> {
    let Ok(items) = Selector::parse(&layout.items) else {
        warn!(selector = %layout.items, "invalid selector");
        return Vec::new();
    };
    let base = base_url.and_then(|u| Url::parse(u).ok());
    doc.select(&items)
        .map(|item| {
            let mut record = extract(item, &layout.fields);
            if record.is_resolved(Field::DetailUrl)
                && let Some(absolute) = base
                    .as_ref()
                    .and_then(|base| base.join(&record.detail_url).ok())
            {
                record.set(Field::DetailUrl, absolute.to_string());
            }
            debug!(name = %record.name, phone = %record.phone_number, "contractor");
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::browser::testing::ScriptedBrowser;
    use crate::app::error::StoreError;
    use crate::app::types::SENTINEL;

    const START: &str = "https://directory.test/contractors";
    const NEXT_9: &str = "ul.pagination > li:nth-child(9) > button";

    #[derive(Default)]
    struct MemoryStore {
        snapshots: Vec<Vec<Record>>,
    }

    impl SnapshotStore for MemoryStore {
        fn save(&mut self, records: &[Record]) -> Result<(), StoreError> {
            self.snapshots.push(records.to_vec());
            Ok(())
        }
    }

    fn card(name: &str, slug: &str) -> String {
        format!(
            r#"<li><div class="certification-card__content">
                <div><h2><a href="/contractor/{slug}"><span>{name}</span></a></h2>
                    <div><span class="rating-stars__average">4.9</span></div></div>
                <div class="certification-card__certifications"><ul>
                    <li>Master Elite</li><li> </li><li>President's Club</li></ul></div>
                <a class="certification-card__phone" href="tel:5550100">Phone Number: (555) 010-0100</a>
            </div></li>"#
        )
    }

    fn pager(next_disabled: bool) -> String {
        let mut items = (1..=8)
            .map(|n| format!("<li><button>{n}</button></li>"))
            .collect::<String>();
        let disabled = if next_disabled { " disabled" } else { "" };
        items.push_str(&format!(r#"<li><button aria-label="Next"{disabled}>&gt;</button></li>"#));
        format!(r#"<ul class="pagination">{items}</ul>"#)
    }

    fn page(names: &[&str], next_disabled: Option<bool>) -> String {
        let cards = names
            .iter()
            .map(|n| card(n, &n.to_lowercase()))
            .collect::<String>();
        let pager = next_disabled.map(pager).unwrap_or_default();
        format!(
            r#"<html><body><ul class="contractor-listing__results">{cards}</ul>{pager}</body></html>"#
        )
    }

    #[test]
    fn items_become_records() {
        let doc = Html::parse_document(&page(&["Acme", "Bolt"], None));
        let records = extract_items(&doc, &ListingLayout::default(), Some(START));

        assert_eq!(records.len(), 2);
        let acme = &records[0];
        assert_eq!(acme.name, "Acme");
        assert_eq!(acme.detail_url, "https://directory.test/contractor/acme");
        assert_eq!(acme.rating, "4.9");
        assert_eq!(acme.certifications, "Master Elite, President's Club");
        assert_eq!(acme.phone_number, "(555) 010-0100");
        assert_eq!(acme.about_text, SENTINEL);
        assert_eq!(acme.analysis_text, SENTINEL);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_pages() {
        let mut browser = ScriptedBrowser::new()
            .route(START, page(&["A"], Some(false)))
            .on_click(
                NEXT_9,
                (0..10).map(|i| page(&[format!("P{i}").as_str()], Some(false))),
            );
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();
        let mut store = MemoryStore::default();

        let walk = ListingWalker::new(&navigator, &layout, 3)
            .walk(&mut browser, START, &mut store)
            .await;

        assert_eq!(walk.stop, StopReason::MaxPages);
        assert_eq!(walk.pages, 3);
        assert_eq!(browser.loads, 3);
        assert_eq!(walk.records.len(), 3);
        assert_eq!(store.snapshots.len(), 3);
        assert_eq!(store.snapshots.last().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn browser_fault_while_paging_keeps_collected_records() {
        let mut browser = ScriptedBrowser::new()
            .route(START, page(&["A"], Some(false)))
            .click_fails(NEXT_9);
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();
        let mut store = MemoryStore::default();

        let walk = ListingWalker::new(&navigator, &layout, 5)
            .walk(&mut browser, START, &mut store)
            .await;

        assert_eq!(walk.stop, StopReason::BrowserError);
        assert_eq!(walk.pages, 1);
        assert_eq!(walk.records.len(), 1);
        assert_eq!(walk.records[0].name, "A");
        assert_eq!(store.snapshots.len(), 1);
        assert!(browser.clicks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_next_control_halts() {
        let mut browser = ScriptedBrowser::new()
            .route(START, page(&["A", "B"], Some(true)))
            .on_click(NEXT_9, (0..5).map(|_| page(&["X"], Some(true))));
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();

        let walk = ListingWalker::new(&navigator, &layout, 100)
            .walk(&mut browser, START, &mut MemoryStore::default())
            .await;

        assert_eq!(walk.stop, StopReason::NextDisabled);
        assert_eq!(walk.pages, 1);
        assert!(browser.clicks.is_empty());
        assert_eq!(walk.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_next_control_halts() {
        let mut browser = ScriptedBrowser::new().route(START, page(&["A"], None));
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();

        let walk = ListingWalker::new(&navigator, &layout, 5)
            .walk(&mut browser, START, &mut MemoryStore::default())
            .await;
        assert_eq!(walk.stop, StopReason::NoNextControl);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_listing_ends_results() {
        let empty = r#"<html><body><ul class="contractor-listing__results"></ul></body></html>"#;
        let mut browser = ScriptedBrowser::new().route(START, empty);
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();
        let mut store = MemoryStore::default();

        let walk = ListingWalker::new(&navigator, &layout, 5)
            .walk(&mut browser, START, &mut store)
            .await;
        assert_eq!(walk.stop, StopReason::NoItems);
        assert!(walk.records.is_empty());
        assert!(store.snapshots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_container_is_a_navigation_failure() {
        let mut browser =
            ScriptedBrowser::new().route(START, "<html><body><p>maintenance</p></body></html>");
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();

        let walk = ListingWalker::new(&navigator, &layout, 5)
            .walk(&mut browser, START, &mut MemoryStore::default())
            .await;
        assert_eq!(walk.stop, StopReason::NavigationFailed);
        assert_eq!(walk.pages, 0);
        assert_eq!(browser.gotos.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overlays_are_dismissed_before_walking() {
        let first = format!(
            r#"<html><body>
                <button id="onetrust-accept-btn-handler">OK</button>
                <input id="location-input"><button class="location-search__button">Go</button>
                {}
            </body></html>"#,
            r#"<ul class="contractor-listing__results"></ul>"#
        );
        let mut browser = ScriptedBrowser::new()
            .route(START, first)
            .on_click("button.location-search__button", [page(&["Near"], None)]);
        let navigator = Navigator::new(Timings::default());
        let layout = ListingLayout::default();
        let overlays = Overlays::default();

        let walk = ListingWalker::new(&navigator, &layout, 1)
            .with_overlays(&overlays)
            .walk(&mut browser, START, &mut MemoryStore::default())
            .await;

        assert_eq!(
            browser.fills,
            vec![("input#location-input".to_string(), "10001".to_string())]
        );
        assert_eq!(walk.records.len(), 1);
        assert_eq!(walk.records[0].name, "Near");
        assert_eq!(walk.stop, StopReason::MaxPages);
    }
}
