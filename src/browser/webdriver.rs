use super::{PageDriver, VISITED_KEY};
use crate::error::DriverError;
use crate::records::PageInfo;
use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder};
use serde_json::{Value, json};
use url::Url;

const DOCUMENT_HEIGHT_JS: &str = r#"
    const body = document.body ? document.body.scrollHeight : 0;
    const root = document.documentElement ? document.documentElement.scrollHeight : 0;
    return Math.max(body, root);
"#;

const SCROLL_JS: &str = "window.scrollTo(0, arguments[0]); return true;";

const INSTALL_OBSERVERS_JS: &str = r#"
    if (!window.__harvestObserving) {
        window.__harvestObserving = true;
        window.__harvestResources = [];
        window.__harvestDirty = false;
        new PerformanceObserver(list => {
            for (const entry of list.getEntries()) {
                window.__harvestResources.push(entry.name);
            }
        }).observe({ type: "resource", buffered: true });
        new MutationObserver(() => { window.__harvestDirty = true; })
            .observe(document.documentElement, {
                childList: true,
                subtree: true,
                attributes: true,
                attributeFilter: ["src", "srcset"]
            });
    }
    return true;
"#;

const TAKE_RESOURCES_JS: &str = r#"
    const entries = window.__harvestResources || [];
    window.__harvestResources = [];
    return entries;
"#;

const TAKE_DIRTY_JS: &str = r#"
    const dirty = !!window.__harvestDirty;
    window.__harvestDirty = false;
    return dirty;
"#;

const NAVIGATE_JS: &str = r#"
    history.pushState(null, "", arguments[0]);
    window.dispatchEvent(new PopStateEvent("popstate", { state: null }));
    return true;
"#;

const LOAD_SESSION_JS: &str = "return window.sessionStorage.getItem(arguments[0]);";

const SAVE_SESSION_JS: &str =
    "window.sessionStorage.setItem(arguments[0], arguments[1]); return true;";

/// Common WebDriver endpoints tried when the configured one is unreachable
const FALLBACK_WEBDRIVER_URLS: [&str; 4] = [
    "http://localhost:9515", // ChromeDriver default
    "http://localhost:4444", // Selenium / geckodriver default
    "http://127.0.0.1:4444",
    "http://127.0.0.1:9515",
];

/// A page in a WebDriver-controlled browser
pub struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    /// Connect to the WebDriver server, trying common local endpoints if the
    /// configured one fails
    pub async fn connect(webdriver_url: &str) -> Result<Self, DriverError> {
        match ClientBuilder::native().connect(webdriver_url).await {
            Ok(client) => {
                ::log::debug!("Connected to WebDriver at {}", webdriver_url);
                return Ok(Self { client });
            }
            Err(e) => {
                ::log::error!("Failed to connect to WebDriver at {}: {}", webdriver_url, e);
            }
        }

        for url in FALLBACK_WEBDRIVER_URLS.iter() {
            if *url == webdriver_url {
                continue;
            }

            ::log::info!("Trying fallback WebDriver URL: {}", url);
            if let Ok(client) = ClientBuilder::native().connect(url).await {
                ::log::debug!("Connected to fallback WebDriver at {}", url);
                return Ok(Self { client });
            }
        }

        ::log::error!(
            "Make sure a WebDriver server is running or set the WEBDRIVER_URL environment variable"
        );
        Err(DriverError::Connect(webdriver_url.to_string()))
    }

    /// End the browser session
    pub async fn close(self) {
        if let Err(e) = self.client.close().await {
            ::log::warn!("Failed to close WebDriver session: {}", e);
        }
    }

    async fn run(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.client
            .execute(script, args)
            .await
            .map_err(command_error)
    }
}

/// Map a WebDriver failure, recognizing a lost session by its status code
fn command_error(error: CmdError) -> DriverError {
    let lost = matches!(error, CmdError::Lost(_))
        || error.is_invalid_session_id()
        || error.is_no_such_window();

    if lost {
        DriverError::SessionLost(error.to_string())
    } else {
        DriverError::Command(error.to_string())
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn open(&mut self, url: &Url) -> Result<(), DriverError> {
        self.client.goto(url.as_str()).await.map_err(command_error)
    }

    async fn current_page(&mut self) -> Result<PageInfo, DriverError> {
        let url = self.client.current_url().await.map_err(command_error)?;
        let title = self.client.title().await.map_err(command_error)?;
        Ok(PageInfo::new(url.to_string(), title))
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        self.client.source().await.map_err(command_error)
    }

    async fn document_height(&mut self) -> Result<u64, DriverError> {
        let value = self.run(DOCUMENT_HEIGHT_JS, Vec::new()).await?;
        value
            .as_f64()
            .map(|h| h.max(0.0) as u64)
            .ok_or_else(|| DriverError::Script(format!("document height: {}", value)))
    }

    async fn scroll_to(&mut self, y: u64) -> Result<(), DriverError> {
        self.run(SCROLL_JS, vec![json!(y)]).await.map(|_| ())
    }

    async fn install_observers(&mut self) -> Result<(), DriverError> {
        self.run(INSTALL_OBSERVERS_JS, Vec::new()).await.map(|_| ())
    }

    async fn take_resource_urls(&mut self) -> Result<Vec<String>, DriverError> {
        let value = self.run(TAKE_RESOURCES_JS, Vec::new()).await?;
        serde_json::from_value(value).map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn take_dom_changed(&mut self) -> Result<bool, DriverError> {
        let value = self.run(TAKE_DIRTY_JS, Vec::new()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn navigate_in_place(&mut self, url: &Url) -> Result<(), DriverError> {
        self.run(NAVIGATE_JS, vec![json!(url.as_str())]).await.map(|_| ())
    }

    async fn load_visited(&mut self) -> Result<Vec<String>, DriverError> {
        let value = self.run(LOAD_SESSION_JS, vec![json!(VISITED_KEY)]).await?;
        let visited = value
            .as_str()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default();
        Ok(visited)
    }

    async fn save_visited(&mut self, visited: &[String]) -> Result<(), DriverError> {
        let encoded =
            serde_json::to_string(visited).map_err(|e| DriverError::Script(e.to_string()))?;
        self.run(SAVE_SESSION_JS, vec![json!(VISITED_KEY), json!(encoded)])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fantoccini::error::{ErrorStatus, WebDriver};

    #[test]
    fn test_invalid_session_maps_to_session_lost() {
        let error = CmdError::Standard(WebDriver::new(
            ErrorStatus::InvalidSessionId,
            "session deleted",
        ));
        assert!(command_error(error).is_session_lost());
    }

    #[test]
    fn test_closed_window_maps_to_session_lost() {
        let error = CmdError::Standard(WebDriver::new(ErrorStatus::NoSuchWindow, "window closed"));
        assert!(command_error(error).is_session_lost());
    }

    #[test]
    fn test_other_failures_map_to_command_error() {
        let error = CmdError::Standard(WebDriver::new(
            ErrorStatus::NoSuchElement,
            "no element matches",
        ));
        assert!(matches!(command_error(error), DriverError::Command(_)));
    }
}
