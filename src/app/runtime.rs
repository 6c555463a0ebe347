use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::analysis::{AnalysisStage, ChatClient};
use super::browser::{Session, WebDriverSession, ensure_webdriver};
use super::checkpoint::{CheckpointedProcessor, Summary};
use super::cli::WebDriverArgs;
use super::data_io::{RowStore, resume_source};
use super::detail::DetailStage;
use super::error::{Error, StoreError};
use super::listing::{ListingLayout, ListingWalker, Overlays, Walk};
use super::navigator::Navigator;
use super::tui::{render_plain, run_review_tui};
use super::types::Timings;

pub struct ListingJob<'a> {
    pub start_url: &'a str,
    pub max_pages: usize,
    pub zip: &'a str,
    pub output: &'a Path,
}

pub struct AnalysisJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub batch_size: usize,
    pub model: &'a str,
    pub api_base: &'a str,
    pub retry_errors: bool,
    pub delay: Option<Duration>,
}

pub struct DetailJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub batch_size: usize,
    pub delay: Option<Duration>,
}

/// Opens a WebDriver session and runs `stage` in it.
async fn with_session<T, F>(args: &WebDriverArgs, timings: &Timings, stage: F) -> Result<T, Error>
where
    F: AsyncFnOnce(&mut WebDriverSession) -> Result<T, Error>,
{
    let _driver = ensure_webdriver(args).await?;
    let mut session =
        WebDriverSession::create(&args.webdriver_url, args.browser, args.headless, timings).await?;
    in_session(&mut session, stage).await
}

/// Hands `session` to `stage`, then closes it whatever the stage returned.
async fn in_session<S, T, F>(session: &mut S, stage: F) -> Result<T, Error>
where
    S: Session,
    F: AsyncFnOnce(&mut S) -> Result<T, Error>,
{
    let result = stage(&mut *session).await;
    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to close browser session");
    }
    result
}

/// Final save of a listing walk. A walk that collected nothing leaves an
/// existing file alone; returns whether anything was written.
fn save_listings(store: &RowStore, walk: &Walk) -> Result<bool, StoreError> {
    if walk.records.is_empty() && store.path().is_file() {
        warn!(
            path = %store.path().display(),
            stop = ?walk.stop,
            "no listings collected, keeping existing file"
        );
        return Ok(false);
    }
    store.save(&walk.records)?;
    Ok(true)
}

pub async fn run_listings(args: &WebDriverArgs, job: ListingJob<'_>) -> Result<Walk, Error> {
    let timings = Timings::default();
    let navigator = Navigator::new(timings.clone()).with_max_attempts(args.navigation_attempts);
    let layout = ListingLayout::default();
    let overlays = Overlays {
        zip: Some(job.zip.to_string()).filter(|z| !z.trim().is_empty()),
        ..Overlays::default()
    };
    let mut store = RowStore::new(job.output);

    let walk = with_session(args, &timings, async |session| {
        let walker =
            ListingWalker::new(&navigator, &layout, job.max_pages).with_overlays(&overlays);
        Ok(walker.walk(session, job.start_url, &mut store).await)
    })
    .await?;

    save_listings(&store, &walk)?;
    info!(
        path = %job.output.display(),
        records = walk.records.len(),
        pages = walk.pages,
        stop = ?walk.stop,
        "listings saved"
    );
    Ok(walk)
}

pub async fn run_details(args: &WebDriverArgs, job: DetailJob<'_>) -> Result<Summary, Error> {
    let source = resume_source(job.input, job.output);
    let mut records = RowStore::new(&source).load()?;
    let mut store = RowStore::new(job.output);
    let timings = Timings::default();
    let navigator = Navigator::new(timings.clone()).with_max_attempts(args.navigation_attempts);
    let processor = CheckpointedProcessor::new(job.batch_size);

    let summary = with_session(args, &timings, async |session| {
        let mut stage = DetailStage::new(session, &navigator);
        if let Some(delay) = job.delay {
            stage = stage.with_pacing(delay);
        }
        stage.prepare(&records, &Overlays::default()).await;
        Ok(processor.process(&mut records, &mut stage, &mut store).await?)
    })
    .await?;

    info!(path = %store.path().display(), ?summary, "about sections saved");
    Ok(summary)
}

pub async fn run_analysis(job: AnalysisJob<'_>) -> Result<Summary, Error> {
    let client = ChatClient::from_env()?
        .with_base_url(job.api_base)
        .with_model(job.model);
    info!(model = client.model(), "analysis client ready");

    let source = resume_source(job.input, job.output);
    let mut records = RowStore::new(&source).load()?;
    let mut store = RowStore::new(job.output);
    let mut stage = AnalysisStage::new(client).retry_errors(job.retry_errors);
    if let Some(delay) = job.delay {
        stage = stage.with_pacing(delay);
    }

    let summary = CheckpointedProcessor::new(job.batch_size)
        .process(&mut records, &mut stage, &mut store)
        .await?;
    info!(path = %store.path().display(), ?summary, "analysis saved");
    Ok(summary)
}

pub fn run_review(file: &Path, no_tui: bool) -> Result<(), Error> {
    let records = RowStore::new(file).load()?;
    if no_tui {
        print!("{}", render_plain(&records));
        return Ok(());
    }
    run_review_tui(&records, &file.display().to_string())?;
    Ok(())
}
