use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a harvest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// URL to start crawling from
    #[serde(default)]
    pub start_url: String,

    /// URL for the WebDriver instance
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Location of the image cache database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory export packages are written to
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Bound of the capture event queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum length of any metadata string taken from page content
    #[serde(default = "default_max_field_len")]
    pub max_field_len: usize,

    /// Path segment after which the site name appears (e.g. `/view/<site>/<page>`)
    #[serde(default = "default_site_root_marker")]
    pub site_root_marker: String,

    /// Image CDN recognition rules
    #[serde(default)]
    pub cdn: CdnConfig,

    /// Pacing of scroll, sweep and navigation steps
    #[serde(default)]
    pub timings: CrawlTimings,
}

/// Which resource URLs count as capturable images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Host serving the images
    #[serde(default = "default_cdn_host")]
    pub host: String,

    /// Regex patterns, at least one of which must match the URL path
    #[serde(default = "default_cdn_path_patterns")]
    pub path_patterns: Vec<String>,

    /// Size directive requesting the original resolution
    #[serde(default = "default_full_size_marker")]
    pub full_size_marker: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            host: default_cdn_host(),
            path_patterns: default_cdn_path_patterns(),
            full_size_marker: default_full_size_marker(),
        }
    }
}

/// Fixed delays used to let the page render between automated steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTimings {
    #[serde(default = "default_scroll_step_px")]
    pub scroll_step_px: u64,

    #[serde(default = "default_scroll_interval_ms")]
    pub scroll_interval_ms: u64,

    /// Upper bound on scroll steps per page, for pages that keep growing
    #[serde(default = "default_max_scroll_steps")]
    pub max_scroll_steps: u32,

    #[serde(default = "default_initial_sweep_delay_ms")]
    pub initial_sweep_delay_ms: u64,

    #[serde(default = "default_post_scroll_settle_ms")]
    pub post_scroll_settle_ms: u64,

    #[serde(default = "default_post_navigation_settle_ms")]
    pub post_navigation_settle_ms: u64,
}

impl Default for CrawlTimings {
    fn default() -> Self {
        Self {
            scroll_step_px: default_scroll_step_px(),
            scroll_interval_ms: default_scroll_interval_ms(),
            max_scroll_steps: default_max_scroll_steps(),
            initial_sweep_delay_ms: default_initial_sweep_delay_ms(),
            post_scroll_settle_ms: default_post_scroll_settle_ms(),
            post_navigation_settle_ms: default_post_navigation_settle_ms(),
        }
    }
}

impl CrawlTimings {
    pub fn scroll_interval(&self) -> Duration {
        Duration::from_millis(self.scroll_interval_ms)
    }

    pub fn initial_sweep_delay(&self) -> Duration {
        Duration::from_millis(self.initial_sweep_delay_ms)
    }

    pub fn post_scroll_settle(&self) -> Duration {
        Duration::from_millis(self.post_scroll_settle_ms)
    }

    pub fn post_navigation_settle(&self) -> Duration {
        Duration::from_millis(self.post_navigation_settle_ms)
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("site-harvest.db")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_field_len() -> usize {
    100
}

fn default_site_root_marker() -> String {
    "view".to_string()
}

fn default_cdn_host() -> String {
    "lh3.googleusercontent.com".to_string()
}

fn default_cdn_path_patterns() -> Vec<String> {
    vec![r"^/sitesv/".to_string(), r"^/drive-viewer/".to_string()]
}

fn default_full_size_marker() -> String {
    "s0".to_string()
}

fn default_scroll_step_px() -> u64 {
    900
}

fn default_scroll_interval_ms() -> u64 {
    700
}

fn default_max_scroll_steps() -> u32 {
    200
}

fn default_initial_sweep_delay_ms() -> u64 {
    1500
}

fn default_post_scroll_settle_ms() -> u64 {
    1200
}

fn default_post_navigation_settle_ms() -> u64 {
    2200
}

impl HarvestConfig {
    /// Create a new configuration with default values
    pub fn new(start_url: &str) -> Self {
        Self {
            start_url: start_url.to_string(),
            webdriver_url: default_webdriver_url(),
            database_path: default_database_path(),
            export_dir: default_export_dir(),
            queue_capacity: default_queue_capacity(),
            max_field_len: default_max_field_len(),
            site_root_marker: default_site_root_marker(),
            cdn: CdnConfig::default(),
            timings: CrawlTimings::default(),
        }
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_json(&contents)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
