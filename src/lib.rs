pub mod browser;
pub mod capture;
pub mod config;
pub mod context;
pub mod crawlers;
pub mod error;
pub mod export;
pub mod filter;
pub mod parsers;
pub mod records;
pub mod store;
pub mod transport;

// Re-export commonly used types for convenience
pub use capture::CaptureStats;
pub use config::HarvestConfig;
pub use context::PageContext;
pub use crawlers::{CrawlReport, CrawlSession, CrawlState};
pub use error::HarvestError;
pub use export::ExportReport;
pub use records::{ImageMetadata, ImageRecord};

use browser::WebDriverPage;
use capture::{CaptureEngine, HttpFetcher, MetadataExtractor};
use crawlers::CrawlController;
use error::ConfigError;
use export::ExportBuilder;
use filter::{CdnFilter, LinkFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{ImageStore, SqliteImageStore};
use transport::{StoreHost, Transport};
use url::Url;

/// Status text shown when the cache holds nothing to export
pub const NO_IMAGES_STATUS: &str = "No images found. Visit a site first.";

/// What a crawl run did
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub crawl: CrawlReport,
    pub capture: CaptureStats,
}

/// Main builder for a crawl of one site
pub struct Harvester {
    config: HarvestConfig,
    ctx: PageContext,
}

impl Harvester {
    /// Create a harvester for `start_url` with default settings
    pub fn new(start_url: &str) -> Self {
        Self {
            config: HarvestConfig::new(start_url),
            ctx: PageContext::new(),
        }
    }

    /// Replace the configuration, keeping the start URL if the new one has none
    pub fn with_config(mut self, mut config: HarvestConfig) -> Self {
        if config.start_url.is_empty() {
            config.start_url = std::mem::take(&mut self.config.start_url);
        }
        self.config = config;
        self
    }

    /// Load configuration from a file
    pub fn with_config_file(self, path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let config = HarvestConfig::from_file(path)?;
        Ok(self.with_config(config))
    }

    pub fn with_webdriver_url(mut self, webdriver_url: &str) -> Self {
        self.config.webdriver_url = webdriver_url.to_string();
        self
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Share an existing context, so the caller can invalidate the run
    pub fn with_context(mut self, ctx: PageContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn context(&self) -> &PageContext {
        &self.ctx
    }

    /// Crawl the site, caching every image seen, until no unvisited page
    /// remains or the context is invalidated.
    pub async fn crawl(mut self) -> Result<HarvestReport, HarvestError> {
        // Override the WebDriver URL with an environment variable if provided
        if let Ok(webdriver_url) = std::env::var("WEBDRIVER_URL") {
            if !webdriver_url.is_empty() {
                self.config.webdriver_url = webdriver_url;
            }
        }

        let config = &self.config;
        let start_url = Url::parse(&config.start_url).map_err(|source| ConfigError::Url {
            url: config.start_url.clone(),
            source,
        })?;
        let cdn = CdnFilter::new(&config.cdn).map_err(ConfigError::from)?;
        let fetcher = Arc::new(HttpFetcher::new()?);

        let page = WebDriverPage::connect(&config.webdriver_url).await?;
        let cache = match Cache::open(config, self.ctx.clone()).await {
            Ok(cache) => cache,
            Err(e) => {
                page.close().await;
                return Err(e);
            }
        };

        ::log::info!("Starting harvest at {}", start_url);

        let engine = CaptureEngine::new(
            cdn,
            MetadataExtractor::new(&config.site_root_marker, config.max_field_len),
            fetcher,
            cache.transport.clone(),
        );
        let (queue, worker) = engine.spawn(config.queue_capacity);

        let mut controller = CrawlController::new(
            page,
            self.ctx.clone(),
            queue,
            LinkFilter::new(&start_url),
            config.timings.clone(),
        );

        let crawl = match controller.open(&start_url).await {
            Ok(()) => {
                let mut session = CrawlSession::new();
                Ok(controller.run(&mut session).await)
            }
            Err(e) => Err(e),
        };

        // dropping the controller closes the capture queue
        let page = controller.into_driver();
        let capture = match worker.await {
            Ok(stats) => stats,
            Err(e) => {
                ::log::error!("Capture worker failed: {}", e);
                CaptureStats::default()
            }
        };
        page.close().await;
        cache.shutdown().await;

        let crawl = crawl?;
        ::log::info!(
            "Harvest finished: {} pages visited, {} images cached",
            crawl.pages_visited,
            capture.stored
        );
        Ok(HarvestReport { crawl, capture })
    }
}

/// Result of an export request
#[derive(Debug, Clone)]
pub struct ExportStatus {
    /// Short text for the user
    pub message: String,
    /// Where the package was written, if one was
    pub path: Option<PathBuf>,
    pub report: ExportReport,
}

impl ExportStatus {
    fn message_only(message: &str) -> Self {
        Self {
            message: message.to_string(),
            path: None,
            report: ExportReport::default(),
        }
    }
}

/// The image store behind its host, reached through a transport
pub struct Cache {
    transport: Transport,
    host: Arc<StoreHost>,
    sqlite: Option<Arc<SqliteImageStore>>,
}

impl Cache {
    /// Open the configured cache database
    pub async fn open(config: &HarvestConfig, ctx: PageContext) -> Result<Self, HarvestError> {
        let store = Arc::new(SqliteImageStore::open(&config.database_path).await?);
        let mut cache = Self::from_store(store.clone(), ctx, config.queue_capacity);
        cache.sqlite = Some(store);
        Ok(cache)
    }

    pub fn from_store(store: Arc<dyn ImageStore>, ctx: PageContext, capacity: usize) -> Self {
        let host = Arc::new(StoreHost::new(store, capacity));
        let transport = Transport::new(ctx, host.clone());
        Self {
            transport,
            host,
            sqlite: None,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// "Images cached: N"; zero when the count cannot be read
    pub async fn status(&self) -> String {
        let count = match self.transport.count().await {
            Ok(count) => count,
            Err(e) => {
                ::log::error!("Failed to count cached images: {}", e);
                0
            }
        };
        format!("Images cached: {}", count)
    }

    pub async fn clear(&self) -> String {
        match self.transport.clear().await {
            Ok(()) => "Cache cleared!".to_string(),
            Err(e) => {
                ::log::error!("Failed to clear cache: {}", e);
                "Failed to clear cache.".to_string()
            }
        }
    }

    /// Package every cached image into `dir` as `site-images-<date>.zip`
    pub async fn export(&self, dir: &Path, date: chrono::NaiveDate) -> ExportStatus {
        let records = match self.transport.list_all().await {
            Ok(records) => records,
            Err(e) => {
                ::log::error!("Failed to read cached images: {}", e);
                return ExportStatus::message_only("Export failed.");
            }
        };
        if records.is_empty() {
            return ExportStatus::message_only(NO_IMAGES_STATUS);
        }

        let file_name = export::package_file_name(date);
        let written = ExportBuilder::new().build(&records).and_then(|package| {
            let path = export::write_package(dir, &file_name, &package.bytes)?;
            Ok((path, package.report))
        });

        match written {
            Ok((path, report)) => ExportStatus {
                message: report.status_line(),
                path: Some(path),
                report,
            },
            Err(e) => {
                ::log::error!("Export failed: {}", e);
                ExportStatus::message_only("Export failed.")
            }
        }
    }

    /// Stop the host and close the database
    pub async fn shutdown(self) {
        self.host.shutdown().await;
        if let Some(sqlite) = self.sqlite {
            sqlite.close().await;
        }
    }
}

/// Count the images in the configured cache
pub async fn cache_status(config: &HarvestConfig) -> Result<String, HarvestError> {
    let cache = Cache::open(config, PageContext::new()).await?;
    let status = cache.status().await;
    cache.shutdown().await;
    Ok(status)
}

/// Remove every image from the configured cache
pub async fn clear_cache(config: &HarvestConfig) -> Result<String, HarvestError> {
    let cache = Cache::open(config, PageContext::new()).await?;
    let status = cache.clear().await;
    cache.shutdown().await;
    Ok(status)
}

/// Export the configured cache into its export directory, dated today
pub async fn export_archive(config: &HarvestConfig) -> Result<ExportStatus, HarvestError> {
    let cache = Cache::open(config, PageContext::new()).await?;
    let today = chrono::Local::now().date_naive();
    let status = cache.export(&config.export_dir, today).await;
    cache.shutdown().await;
    Ok(status)
}
