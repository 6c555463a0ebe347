use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use super::analysis::{DEFAULT_API_BASE, DEFAULT_MODEL};
use super::checkpoint::DEFAULT_BATCH_SIZE;
use super::data_io::{ANALYSIS_FILE, DETAILS_FILE, LISTINGS_FILE};
use super::listing::{DEFAULT_MAX_PAGES, DEFAULT_START_URL, DEFAULT_ZIP};
use super::navigator::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "roofscout",
    version,
    about = "Collects roofing contractor listings, profile text and lead analysis"
)]
pub struct Cli {
    #[command(flatten)]
    pub webdriver: WebDriverArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Clone)]
pub struct WebDriverArgs {
    #[arg(long, global = true, value_name = "URL", default_value = "http://localhost:4444")]
    pub webdriver_url: String,

    #[arg(long, global = true, value_enum, default_value_t = BrowserArg::Chrome)]
    pub browser: BrowserArg,

    #[arg(long, global = true, default_value_t = false)]
    pub headless: bool,

    #[arg(long, global = true, default_value_t = false)]
    pub no_webdriver_autostart: bool,

    #[arg(long, global = true, value_name = "PATH")]
    pub webdriver_binary: Option<String>,

    #[arg(long, global = true, value_name = "MS", default_value_t = 12000)]
    pub webdriver_start_timeout_ms: u64,

    /// Page loads tried before a page is given up on.
    #[arg(long, global = true, value_name = "N", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub navigation_attempts: usize,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum BrowserArg {
    Chrome,
    Firefox,
    Edge,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Walk the directory's result pages and save one row per contractor.
    Listings {
        #[arg(long, value_name = "URL", default_value = DEFAULT_START_URL)]
        url: String,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: usize,

        /// ZIP code typed into the location prompt.
        #[arg(long, value_name = "ZIP", default_value = DEFAULT_ZIP)]
        zip: String,

        #[arg(short, long, value_name = "FILE", default_value = LISTINGS_FILE)]
        output: PathBuf,
    },

    /// Visit each contractor profile and store its "about" text.
    Details {
        #[arg(short, long, value_name = "FILE", default_value = LISTINGS_FILE)]
        input: PathBuf,

        #[arg(short, long, value_name = "FILE", default_value = DETAILS_FILE)]
        output: PathBuf,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Pause after each profile (default 2000).
        #[arg(long, value_name = "MS")]
        delay_ms: Option<u64>,
    },

    /// Ask the analysis service for a lead summary of each contractor.
    Analyze {
        #[arg(short, long, value_name = "FILE", default_value = DETAILS_FILE)]
        input: PathBuf,

        #[arg(short, long, value_name = "FILE", default_value = ANALYSIS_FILE)]
        output: PathBuf,

        #[arg(long, value_name = "N", default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(long, value_name = "MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        #[arg(long, value_name = "URL", default_value = DEFAULT_API_BASE)]
        api_base: String,

        /// Pause after each call (default 1000).
        #[arg(long, value_name = "MS")]
        delay_ms: Option<u64>,

        /// Call the service again for rows whose earlier call failed.
        #[arg(long, default_value_t = false)]
        retry_errors: bool,
    },

    /// Browse a finished row-store.
    Review {
        #[arg(value_name = "FILE", default_value = ANALYSIS_FILE)]
        file: PathBuf,

        #[arg(long, default_value_t = false)]
        no_tui: bool,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_chain_the_stage_files() {
        let cli = Cli::try_parse_from(["roofscout", "details"]).unwrap();
        let Command::Details {
            input,
            output,
            batch_size,
            delay_ms,
        } = cli.command
        else {
            panic!("expected details");
        };
        assert_eq!(input, PathBuf::from(LISTINGS_FILE));
        assert_eq!(output, PathBuf::from(DETAILS_FILE));
        assert_eq!(batch_size, 5);
        assert_eq!(delay_ms, None);
        assert_eq!(cli.webdriver.navigation_attempts, 3);
        assert_eq!(cli.webdriver.browser, BrowserArg::Chrome);
        assert_eq!(cli.webdriver.webdriver_url, "http://localhost:4444");
    }

    #[test]
    fn global_webdriver_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "roofscout",
            "listings",
            "--max-pages",
            "2",
            "--browser",
            "firefox",
            "--headless",
        ])
        .unwrap();
        assert!(cli.webdriver.headless);
        assert_eq!(cli.webdriver.browser, BrowserArg::Firefox);
        assert!(matches!(cli.command, Command::Listings { max_pages: 2, .. }));
    }

    #[test]
    fn analyze_accepts_retry_flag() {
        let cli = Cli::try_parse_from(["roofscout", "analyze", "--retry-errors"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Analyze {
                retry_errors: true,
                ..
            }
        ));
    }
}
