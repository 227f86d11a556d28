//! The browser session the crawl drives.

pub mod webdriver;

pub use webdriver::WebDriverPage;

use crate::error::DriverError;
use crate::records::PageInfo;
use async_trait::async_trait;
use url::Url;

/// `sessionStorage` key holding the visited page list
pub const VISITED_KEY: &str = "__harvest_pages_visited";

/// Operations the crawl needs from a live page
#[async_trait]
pub trait PageDriver: Send {
    /// Full load of a URL (used once for the start page)
    async fn open(&mut self, url: &Url) -> Result<(), DriverError>;

    async fn current_page(&mut self) -> Result<PageInfo, DriverError>;

    /// Serialized DOM as currently rendered
    async fn page_source(&mut self) -> Result<String, DriverError>;

    async fn document_height(&mut self) -> Result<u64, DriverError>;

    async fn scroll_to(&mut self, y: u64) -> Result<(), DriverError>;

    /// Install the resource-timing and mutation observers. Idempotent per document.
    async fn install_observers(&mut self) -> Result<(), DriverError>;

    /// Resource URLs loaded since the last call
    async fn take_resource_urls(&mut self) -> Result<Vec<String>, DriverError>;

    /// Whether the DOM changed since the last call
    async fn take_dom_changed(&mut self) -> Result<bool, DriverError>;

    /// History navigation without a full reload
    async fn navigate_in_place(&mut self, url: &Url) -> Result<(), DriverError>;

    /// Visited pages recorded earlier in this browser session
    async fn load_visited(&mut self) -> Result<Vec<String>, DriverError>;

    async fn save_visited(&mut self, visited: &[String]) -> Result<(), DriverError>;
}
