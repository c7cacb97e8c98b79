//! Defines the configuration settings for the lead-sleuth application.

use crate::error::{AppError, Result};
use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATHS: &[&str] = &["./lead-sleuth.toml", "./config.toml"];

/// Command line arguments for the `run` command. Every flag overrides the
/// matching configuration file entry.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "LEAD_SLEUTH_CONFIG")]
    pub config_file: Option<String>,

    /// What to search for, e.g. "Cleaning Service"
    #[arg(short = 't', long, env = "LEAD_SLEUTH_SEARCH_TERM")]
    pub search_term: Option<String>,

    /// Comma-separated list of locations combined with the search term
    #[arg(short, long, value_delimiter = ',', env = "LEAD_SLEUTH_LOCATIONS")]
    pub locations: Vec<String>,

    /// Maximum results per query (0 = unlimited)
    #[arg(long, env = "LEAD_SLEUTH_MAX_RESULTS")]
    pub max_results: Option<usize>,

    /// Minimum digit count for a phone number to be accepted
    #[arg(long, env = "LEAD_SLEUTH_PHONE_MIN_DIGITS")]
    pub phone_min_digits: Option<usize>,

    /// Seconds to wait between feed scrolls
    #[arg(long, env = "LEAD_SLEUTH_SCROLL_PAUSE")]
    pub scroll_pause: Option<f32>,

    /// Maximum number of feed scrolls per query
    #[arg(long, env = "LEAD_SLEUTH_MAX_SCROLL_ATTEMPTS")]
    pub max_scroll_attempts: Option<u32>,

    /// Minimum sleep between candidates (seconds)
    #[arg(long, env = "LEAD_SLEUTH_MIN_DELAY")]
    pub min_delay: Option<f32>,

    /// Maximum sleep between candidates (seconds)
    #[arg(long, env = "LEAD_SLEUTH_MAX_DELAY")]
    pub max_delay: Option<f32>,

    /// Number of browser sessions working in parallel
    #[arg(short, long, env = "LEAD_SLEUTH_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long, default_value = "false", env = "LEAD_SLEUTH_VISIBLE")]
    pub visible: bool,

    /// Path to the Chrome/Chromium executable
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// SQLite database file the leads are written to
    #[arg(long, env = "LEAD_SLEUTH_DATABASE")]
    pub database: Option<String>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    search: Option<SearchConfig>,
    extraction: Option<ExtractionConfig>,
    pagination: Option<PaginationConfig>,
    pacing: Option<PacingConfig>,
    browser: Option<BrowserConfig>,
    storage: Option<StorageConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchConfig {
    term: Option<String>,
    locations: Option<Vec<String>>,
    max_results_per_query: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct ExtractionConfig {
    phone_min_digits: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct PaginationConfig {
    scroll_pause_secs: Option<f32>,
    max_scroll_attempts: Option<u32>,
    stall_threshold: Option<u32>,
    results_wait_secs: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct PacingConfig {
    candidate_min_delay: Option<f32>,
    candidate_max_delay: Option<f32>,
    query_min_delay: Option<f32>,
    query_max_delay: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct BrowserConfig {
    headless: Option<bool>,
    chrome_path: Option<PathBuf>,
    user_agent: Option<String>,
    concurrency: Option<usize>,
    detail_timeout_secs: Option<u64>,
    website_timeout_secs: Option<u64>,
    contact_timeout_secs: Option<u64>,
    page_settle_secs: Option<f32>,
    element_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
struct StorageConfig {
    database: Option<String>,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// What to search for; combined with every location.
    pub search_term: String,
    /// Locations in the order they are searched.
    pub locations: Vec<String>,
    /// Cap on candidates per query; zero means unlimited.
    pub max_results_per_query: usize,
    /// Fewest digits a phone number may have.
    pub phone_min_digits: usize,
    /// Pause between feed scrolls.
    pub scroll_pause: Duration,
    /// Maximum number of feed reads per query.
    pub max_scroll_attempts: u32,
    /// Consecutive no-growth feed reads that end collection.
    pub stall_threshold: u32,
    /// Wait after opening the search page before the feed is read.
    pub results_wait: Duration,
    /// Minimum and maximum sleep between candidates (seconds).
    pub candidate_delay: (f32, f32),
    /// Minimum and maximum sleep between queries (seconds).
    pub query_delay: (f32, f32),
    /// Run the browser without a window.
    pub headless: bool,
    /// Path to a specific Chrome/Chromium binary.
    pub chrome_path: Option<PathBuf>,
    /// User agent string presented by the browser.
    pub user_agent: String,
    /// Independent browser sessions (workers).
    pub concurrency: usize,
    /// Bound on loading and reading one detail page.
    pub detail_timeout: Duration,
    /// Bound on loading a business website.
    pub website_timeout: Duration,
    /// Bound on loading a website's contact page.
    pub contact_timeout: Duration,
    /// Pause after each navigation for client-side rendering.
    pub page_settle: Duration,
    /// How long the browser waits for a single element lookup.
    pub element_timeout: Duration,
    /// SQLite database file.
    pub database_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            search_term: String::new(),
            locations: Vec::new(),
            max_results_per_query: 0,
            phone_min_digits: 10,
            scroll_pause: Duration::from_secs(2),
            max_scroll_attempts: 20,
            stall_threshold: 3,
            results_wait: Duration::from_secs(4),
            candidate_delay: (3.0, 7.0),
            query_delay: (3.0, 7.0),
            headless: true,
            chrome_path: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            concurrency: 1,
            detail_timeout: Duration::from_secs(45),
            website_timeout: Duration::from_secs(30),
            contact_timeout: Duration::from_secs(20),
            page_settle: Duration::from_secs(2),
            element_timeout: Duration::from_secs(3),
            database_path: "leads.sqlite".to_string(),
        }
    }
}

/// Seconds from a float setting. Negative values mean zero; values that are
/// not finite or do not fit a `Duration` are rejected.
fn secs(setting: &str, value: f32) -> Result<Duration> {
    if !value.is_finite() {
        return Err(AppError::Config(format!(
            "{} must be a finite number of seconds, got {}",
            setting, value
        )));
    }
    Duration::try_from_secs_f32(value.max(0.0))
        .map_err(|e| AppError::Config(format!("{} is out of range ({}): {}", setting, value, e)))
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config = parse_config_file(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn parse_config_file(content: &str) -> std::result::Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) -> Result<()> {
    if let Some(search) = &file_config.search {
        if let Some(term) = &search.term {
            config.search_term = term.clone();
        }
        if let Some(locations) = &search.locations {
            config.locations = locations.clone();
        }
        if let Some(max) = search.max_results_per_query {
            config.max_results_per_query = max;
        }
    }

    if let Some(extraction) = &file_config.extraction {
        if let Some(digits) = extraction.phone_min_digits {
            config.phone_min_digits = digits;
        }
    }

    if let Some(pagination) = &file_config.pagination {
        if let Some(pause) = pagination.scroll_pause_secs {
            config.scroll_pause = secs("scroll_pause_secs", pause)?;
        }
        if let Some(attempts) = pagination.max_scroll_attempts {
            config.max_scroll_attempts = attempts;
        }
        if let Some(threshold) = pagination.stall_threshold {
            config.stall_threshold = threshold;
        }
        if let Some(wait) = pagination.results_wait_secs {
            config.results_wait = secs("results_wait_secs", wait)?;
        }
    }

    if let Some(pacing) = &file_config.pacing {
        if let Some(min) = pacing.candidate_min_delay {
            config.candidate_delay.0 = min;
        }
        if let Some(max) = pacing.candidate_max_delay {
            config.candidate_delay.1 = max;
        }
        if let Some(min) = pacing.query_min_delay {
            config.query_delay.0 = min;
        }
        if let Some(max) = pacing.query_max_delay {
            config.query_delay.1 = max;
        }
    }

    if let Some(browser) = &file_config.browser {
        if let Some(headless) = browser.headless {
            config.headless = headless;
        }
        if let Some(path) = &browser.chrome_path {
            config.chrome_path = Some(path.clone());
        }
        if let Some(agent) = &browser.user_agent {
            config.user_agent = agent.clone();
        }
        if let Some(concurrency) = browser.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = browser.detail_timeout_secs {
            config.detail_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = browser.website_timeout_secs {
            config.website_timeout = Duration::from_secs(timeout);
        }
        if let Some(timeout) = browser.contact_timeout_secs {
            config.contact_timeout = Duration::from_secs(timeout);
        }
        if let Some(settle) = browser.page_settle_secs {
            config.page_settle = secs("page_settle_secs", settle)?;
        }
        if let Some(timeout) = browser.element_timeout_secs {
            config.element_timeout = Duration::from_secs(timeout);
        }
    }

    if let Some(storage) = &file_config.storage {
        if let Some(database) = &storage.database {
            config.database_path = database.clone();
        }
    }

    Ok(())
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &RunArgs) -> Result<()> {
    if let Some(ref term) = args.search_term {
        config.search_term = term.clone();
    }

    if !args.locations.is_empty() {
        config.locations = args.locations.clone();
    }

    if let Some(max) = args.max_results {
        config.max_results_per_query = max;
    }

    if let Some(digits) = args.phone_min_digits {
        config.phone_min_digits = digits;
    }

    if let Some(pause) = args.scroll_pause {
        config.scroll_pause = secs("--scroll-pause", pause)?;
    }

    if let Some(attempts) = args.max_scroll_attempts {
        config.max_scroll_attempts = attempts;
    }

    if let Some(min) = args.min_delay {
        config.candidate_delay.0 = min;
    }

    if let Some(max) = args.max_delay {
        config.candidate_delay.1 = max;
    }

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    if args.visible {
        config.headless = false;
    }

    if let Some(ref path) = args.chrome_path {
        config.chrome_path = Some(path.clone());
    }

    if let Some(ref database) = args.database {
        config.database_path = database.clone();
    }

    Ok(())
}

fn repair_delay(label: &str, delay: &mut (f32, f32)) -> Result<()> {
    secs(&format!("{} min delay", label), delay.0)?;
    secs(&format!("{} max delay", label), delay.1)?;
    if delay.0 < 0.0 {
        delay.0 = 0.0;
    }
    if delay.0 > delay.1 {
        delay.1 = delay.0;
        tracing::warn!(
            "Min {} delay was greater than max. Setting both to {}",
            label,
            delay.0
        );
    }
    Ok(())
}

fn validate_config(config: &mut Config) -> Result<()> {
    config.search_term = config.search_term.trim().to_string();
    if config.search_term.is_empty() {
        return Err(AppError::Config("No search term provided".to_string()));
    }

    config.locations = config
        .locations
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if config.locations.is_empty() {
        return Err(AppError::Config(
            "No valid locations provided; add a 'locations' list under [search]".to_string(),
        ));
    }

    repair_delay("candidate", &mut config.candidate_delay)?;
    repair_delay("query", &mut config.query_delay)?;

    if config.phone_min_digits == 0 || config.phone_min_digits > crate::extract::MAX_PHONE_DIGITS {
        let clamped = config
            .phone_min_digits
            .clamp(1, crate::extract::MAX_PHONE_DIGITS);
        tracing::warn!(
            "Phone minimum digits {} is out of range. Setting to {}.",
            config.phone_min_digits,
            clamped
        );
        config.phone_min_digits = clamped;
    }

    if config.concurrency == 0 {
        config.concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.stall_threshold == 0 {
        config.stall_threshold = 1;
        tracing::warn!("Stall threshold was set to 0. Setting to 1.");
    }

    if config.max_scroll_attempts == 0 {
        config.max_scroll_attempts = 1;
        tracing::warn!("Max scroll attempts was set to 0. Setting to 1.");
    }

    Ok(())
}

/// Builds the run configuration: defaults, then the TOML file, then flags
/// and environment, then validation. Configuration defects are fatal.
pub(crate) fn build_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path).map_err(|e| AppError::Config(format!("{:#}", e)))?;
        apply_file_config(&mut config, &file_config)?;
    } else {
        for path in DEFAULT_CONFIG_PATHS {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config)?;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {:#}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args)?;

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            search_term: "Bakery".to_string(),
            locations: vec!["Athens".to_string()],
            ..Config::default()
        }
    }

    #[test]
    fn test_file_config_sections_apply() {
        let file = parse_config_file(
            r#"
            [search]
            term = "Cleaning Service"
            locations = ["Athens", "Thessaloniki"]
            max_results_per_query = 15

            [pagination]
            scroll_pause_secs = 0.5
            stall_threshold = 4

            [pacing]
            candidate_min_delay = 1.0
            candidate_max_delay = 2.0

            [browser]
            headless = false
            website_timeout_secs = 12

            [storage]
            database = "cleaning.sqlite"
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        apply_file_config(&mut config, &file).unwrap();

        assert_eq!(config.search_term, "Cleaning Service");
        assert_eq!(config.locations, vec!["Athens", "Thessaloniki"]);
        assert_eq!(config.max_results_per_query, 15);
        assert_eq!(config.scroll_pause, Duration::from_millis(500));
        assert_eq!(config.stall_threshold, 4);
        assert_eq!(config.candidate_delay, (1.0, 2.0));
        assert!(!config.headless);
        assert_eq!(config.website_timeout, Duration::from_secs(12));
        assert_eq!(config.database_path, "cleaning.sqlite");
        // Untouched sections keep their defaults.
        assert_eq!(config.phone_min_digits, 10);
        assert_eq!(config.max_scroll_attempts, 20);
    }

    #[test]
    fn test_cli_args_override_file() {
        let mut config = valid();
        let args = RunArgs {
            search_term: Some("Hotel".to_string()),
            locations: vec!["Chania".to_string(), "Heraklion".to_string()],
            concurrency: Some(3),
            visible: true,
            ..RunArgs::default()
        };
        apply_cli_args(&mut config, &args).unwrap();
        assert_eq!(config.search_term, "Hotel");
        assert_eq!(config.locations, vec!["Chania", "Heraklion"]);
        assert_eq!(config.concurrency, 3);
        assert!(!config.headless);
    }

    #[test]
    fn test_missing_search_term_is_fatal() {
        let mut config = valid();
        config.search_term = "   ".to_string();
        assert!(matches!(validate_config(&mut config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_blank_locations_are_fatal() {
        let mut config = valid();
        config.locations = vec![" ".to_string(), String::new()];
        assert!(matches!(validate_config(&mut config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validation_repairs_soft_defects() {
        let mut config = valid();
        config.locations = vec![" Athens ".to_string(), "".to_string(), "Patras".to_string()];
        config.candidate_delay = (8.0, 2.0);
        config.concurrency = 0;
        config.stall_threshold = 0;
        config.phone_min_digits = 40;
        validate_config(&mut config).unwrap();

        assert_eq!(config.locations, vec!["Athens", "Patras"]);
        assert_eq!(config.candidate_delay, (8.0, 8.0));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.stall_threshold, 1);
        assert_eq!(config.phone_min_digits, 15);
    }

    #[test]
    fn test_non_finite_seconds_are_rejected() {
        let file = parse_config_file(
            r#"
            [pagination]
            scroll_pause_secs = inf
            "#,
        )
        .unwrap();
        let mut config = valid();
        assert!(matches!(apply_file_config(&mut config, &file), Err(AppError::Config(_))));

        let file = parse_config_file("[browser]\npage_settle_secs = 1e30\n").unwrap();
        assert!(matches!(apply_file_config(&mut config, &file), Err(AppError::Config(_))));

        let args = RunArgs {
            scroll_pause: Some(f32::NAN),
            ..RunArgs::default()
        };
        assert!(matches!(apply_cli_args(&mut config, &args), Err(AppError::Config(_))));

        let mut config = valid();
        config.query_delay = (1.0, f32::INFINITY);
        assert!(matches!(validate_config(&mut config), Err(AppError::Config(_))));

        let mut config = valid();
        config.candidate_delay = (f32::NAN, 2.0);
        assert!(matches!(validate_config(&mut config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_unreadable_config_file_is_a_config_error() {
        let path = std::env::temp_dir().join(format!("lead-sleuth-bad-{}.toml", std::process::id()));
        fs::write(&path, "[search\nterm = ").unwrap();
        let args = RunArgs {
            config_file: Some(path.to_string_lossy().into_owned()),
            search_term: Some("Bakery".to_string()),
            locations: vec!["Athens".to_string()],
            ..RunArgs::default()
        };

        let result = build_config(&args);
        let _ = fs::remove_file(&path);
        match result {
            Err(AppError::Config(message)) => assert!(message.contains("Failed to parse TOML")),
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }
}
