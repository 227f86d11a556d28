use super::session::{CrawlSession, CrawlState};
use crate::browser::PageDriver;
use crate::capture::{CaptureEvent, CaptureQueue};
use crate::config::CrawlTimings;
use crate::context::PageContext;
use crate::error::{DriverError, TransportError};
use crate::filter::LinkFilter;
use crate::parsers::html;
use url::Url;

/// How a crawl run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// State the machine stopped in
    pub final_state: CrawlState,
    /// `true` when the run stopped because the page context was invalidated
    pub halted: bool,
    pub pages_visited: usize,
}

/// Raised inside a step when the context is gone; the machine stops in place
#[derive(Debug)]
struct Halt;

impl From<TransportError> for Halt {
    fn from(_: TransportError) -> Self {
        Halt
    }
}

/// Drives one browser session through every same-origin page reachable
/// from where it starts, forcing lazy content to load on each page and
/// feeding what it sees to the capture queue.
pub struct CrawlController<D: PageDriver> {
    driver: D,
    ctx: PageContext,
    capture: CaptureQueue,
    links: LinkFilter,
    timings: CrawlTimings,
    page_url: Option<Url>,
    /// Page the crawl started on; already swept, so never a link target
    start_url: Option<Url>,
}

impl<D: PageDriver> CrawlController<D> {
    pub fn new(
        driver: D,
        ctx: PageContext,
        capture: CaptureQueue,
        links: LinkFilter,
        timings: CrawlTimings,
    ) -> Self {
        Self {
            driver,
            ctx,
            capture,
            links,
            timings,
            page_url: None,
            start_url: None,
        }
    }

    /// Load the start page with a full navigation
    pub async fn open(&mut self, url: &Url) -> Result<(), DriverError> {
        ::log::info!("Opening {}", url);
        let opened = self.driver.open(url).await;
        if let Err(e) = &opened {
            if e.is_session_lost() {
                self.ctx.invalidate();
            }
        }
        opened
    }

    /// Give back the browser session, dropping the capture queue handle
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Run the state machine until `Exhausted` or until the context is
    /// invalidated. Never errors: driver failures are logged and skipped,
    /// a lost session invalidates the context.
    pub async fn run(&mut self, session: &mut CrawlSession) -> CrawlReport {
        let halted = loop {
            if !self.ctx.is_valid() {
                break true;
            }

            let state = session.state().clone();
            let next = match state {
                CrawlState::Exhausted => break false,
                CrawlState::Idle => self.start(session).await,
                CrawlState::Scrolling => self.scroll().await,
                CrawlState::Sweeping => self.settle_and_sweep().await,
                CrawlState::ChoosingNextLink => self.choose_next_link(session).await,
                CrawlState::Navigating(url) => self.navigate(session, url).await,
            };

            match next {
                Ok(next) => {
                    ::log::trace!("Crawl state {:?} -> {:?}", session.state(), next);
                    session.set_state(next);
                }
                Err(Halt) => break true,
            }
        };

        if halted {
            ::log::info!("Crawl halted in state {:?}", session.state());
        } else {
            ::log::info!(
                "Crawl exhausted after visiting {} pages",
                session.visited().len()
            );
        }

        CrawlReport {
            final_state: session.state().clone(),
            halted,
            pages_visited: session.visited().len(),
        }
    }

    async fn start(&mut self, session: &mut CrawlSession) -> Result<CrawlState, Halt> {
        let stored = tolerate(&self.ctx, "loading visited pages", self.driver.load_visited().await)?;
        if let Some(stored) = stored {
            if !stored.is_empty() {
                ::log::info!("Resuming with {} pages already visited", stored.len());
            }
            session.restore(stored);
        }

        self.announce().await?;
        self.start_url = self.page_url.clone();
        tolerate(&self.ctx, "installing observers", self.driver.install_observers().await)?;
        self.ctx.sleep(self.timings.initial_sweep_delay()).await?;
        self.observe().await?;
        self.sweep().await?;

        Ok(CrawlState::Scrolling)
    }

    /// Step down the page until its bottom is reached, giving lazy images
    /// time to request their sources after each step
    async fn scroll(&mut self) -> Result<CrawlState, Halt> {
        let step = self.timings.scroll_step_px.max(1);
        let mut y = 0;

        for _ in 0..self.timings.max_scroll_steps {
            y += step;
            tolerate(&self.ctx, "scrolling", self.driver.scroll_to(y).await)?;
            self.ctx.sleep(self.timings.scroll_interval()).await?;
            self.observe().await?;

            let height = tolerate(&self.ctx, "measuring page", self.driver.document_height().await)?
                .unwrap_or(0);
            if y >= height {
                return Ok(CrawlState::Sweeping);
            }
        }

        ::log::warn!(
            "Stopped scrolling {} after {} steps",
            self.page_url.as_ref().map(Url::as_str).unwrap_or("page"),
            self.timings.max_scroll_steps
        );
        Ok(CrawlState::Sweeping)
    }

    async fn settle_and_sweep(&mut self) -> Result<CrawlState, Halt> {
        self.ctx.sleep(self.timings.post_scroll_settle()).await?;
        self.observe().await?;
        self.sweep().await?;
        Ok(CrawlState::ChoosingNextLink)
    }

    async fn choose_next_link(&mut self, session: &CrawlSession) -> Result<CrawlState, Halt> {
        let Some(page_url) = self.page_url.clone() else {
            return Ok(CrawlState::Exhausted);
        };

        let source = tolerate(&self.ctx, "reading page", self.driver.page_source().await)?
            .unwrap_or_default();
        let hrefs = html::parse_links(&source);
        let candidates = self
            .links
            .page_links(&page_url, hrefs.iter().map(String::as_str));

        let next = candidates
            .into_iter()
            .find(|link| !session.is_visited(link) && self.start_url.as_ref() != Some(link));
        match next {
            Some(next) => Ok(CrawlState::Navigating(next)),
            None => Ok(CrawlState::Exhausted),
        }
    }

    async fn navigate(&mut self, session: &mut CrawlSession, url: Url) -> Result<CrawlState, Halt> {
        session.mark_visited(&url);
        // stored before leaving so a reload mid-navigation does not repeat it
        tolerate(
            &self.ctx,
            "saving visited pages",
            self.driver.save_visited(session.visited()).await,
        )?;

        ::log::info!("Navigating to {}", url);
        let moved = tolerate(&self.ctx, "navigating", self.driver.navigate_in_place(&url).await)?;
        if moved.is_none() {
            return Ok(CrawlState::ChoosingNextLink);
        }

        self.ctx.sleep(self.timings.post_navigation_settle()).await?;
        self.announce().await?;
        tolerate(&self.ctx, "installing observers", self.driver.install_observers().await)?;
        self.observe().await?;
        self.sweep().await?;

        Ok(CrawlState::Scrolling)
    }

    /// Tell capture which page it is now on
    async fn announce(&mut self) -> Result<(), Halt> {
        let Some(page) = tolerate(&self.ctx, "reading page info", self.driver.current_page().await)?
        else {
            return Ok(());
        };

        match Url::parse(&page.url) {
            Ok(url) => self.page_url = Some(url),
            Err(e) => ::log::warn!("Page reported unparseable url {}: {}", page.url, e),
        }
        self.emit(CaptureEvent::PageChanged(page)).await;
        Ok(())
    }

    /// Forward loaded resources, and re-sweep if the DOM changed
    async fn observe(&mut self) -> Result<(), Halt> {
        let resources = tolerate(&self.ctx, "reading resources", self.driver.take_resource_urls().await)?
            .unwrap_or_default();
        for url in resources {
            self.emit(CaptureEvent::Resource(url)).await;
        }

        let changed = tolerate(&self.ctx, "checking mutations", self.driver.take_dom_changed().await)?
            .unwrap_or(false);
        if changed {
            self.sweep().await?;
        }
        Ok(())
    }

    /// Queue every image element currently in the DOM
    async fn sweep(&mut self) -> Result<(), Halt> {
        let Some(page_url) = self.page_url.clone() else {
            return Ok(());
        };

        let source = tolerate(&self.ctx, "reading page", self.driver.page_source().await)?
            .unwrap_or_default();
        let images = html::parse_images(&source, &page_url);
        ::log::debug!("Sweep found {} images on {}", images.len(), page_url);

        for image in images {
            self.emit(CaptureEvent::Element(image)).await;
        }
        Ok(())
    }

    async fn emit(&self, event: CaptureEvent) {
        if !self.capture.send(event).await {
            ::log::debug!("Capture worker has stopped, dropping event");
        }
    }
}

/// Keep going past ordinary driver failures; a lost session halts the crawl
fn tolerate<T>(
    ctx: &PageContext,
    action: &str,
    result: Result<T, DriverError>,
) -> Result<Option<T>, Halt> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_session_lost() => {
            ::log::warn!("Lost browser session while {}: {}", action, e);
            ctx.invalidate();
            Err(Halt)
        }
        Err(e) => {
            ::log::warn!("Failed {}: {}", action, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PageInfo;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    const ROOT: &str = "https://sites.google.com/view/garden";

    fn link_page(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!(r#"<a href="{}">x</a>"#, href))
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    struct FakeDriver {
        pages: HashMap<String, String>,
        resources: HashMap<String, Vec<String>>,
        current: String,
        height: u64,
        growing: bool,
        scrolls: Vec<u64>,
        navigations: Vec<String>,
        session_storage: Vec<String>,
        lose_session_on_navigate: bool,
        /// Report one DOM mutation once this many scroll steps have run
        mutation_after_scrolls: Option<usize>,
    }

    impl FakeDriver {
        fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, html)| (url.to_string(), html.clone()))
                    .collect(),
                resources: HashMap::new(),
                current: ROOT.to_string(),
                height: 2000,
                growing: false,
                scrolls: Vec::new(),
                navigations: Vec::new(),
                session_storage: Vec::new(),
                lose_session_on_navigate: false,
                mutation_after_scrolls: None,
            }
        }
    }

    #[async_trait]
    impl PageDriver for FakeDriver {
        async fn open(&mut self, url: &Url) -> Result<(), DriverError> {
            self.current = url.to_string();
            Ok(())
        }

        async fn current_page(&mut self) -> Result<PageInfo, DriverError> {
            Ok(PageInfo::new(self.current.clone(), "Garden"))
        }

        async fn page_source(&mut self) -> Result<String, DriverError> {
            Ok(self.pages.get(&self.current).cloned().unwrap_or_default())
        }

        async fn document_height(&mut self) -> Result<u64, DriverError> {
            if self.growing {
                return Ok(self.scrolls.last().copied().unwrap_or(0) + 1000);
            }
            Ok(self.height)
        }

        async fn scroll_to(&mut self, y: u64) -> Result<(), DriverError> {
            self.scrolls.push(y);
            Ok(())
        }

        async fn install_observers(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn take_resource_urls(&mut self) -> Result<Vec<String>, DriverError> {
            Ok(self.resources.remove(&self.current).unwrap_or_default())
        }

        async fn take_dom_changed(&mut self) -> Result<bool, DriverError> {
            if self.mutation_after_scrolls == Some(self.scrolls.len()) {
                self.mutation_after_scrolls = None;
                return Ok(true);
            }
            Ok(false)
        }

        async fn navigate_in_place(&mut self, url: &Url) -> Result<(), DriverError> {
            if self.lose_session_on_navigate {
                return Err(DriverError::SessionLost("window closed".into()));
            }
            self.navigations.push(url.to_string());
            self.current = url.to_string();
            Ok(())
        }

        async fn load_visited(&mut self) -> Result<Vec<String>, DriverError> {
            Ok(self.session_storage.clone())
        }

        async fn save_visited(&mut self, visited: &[String]) -> Result<(), DriverError> {
            self.session_storage = visited.to_vec();
            Ok(())
        }
    }

    fn three_link_site() -> FakeDriver {
        let sub = link_page(&[
            "/view/garden",
            "/view/garden/a",
            "/view/garden/b",
            "/view/garden/c",
        ]);
        FakeDriver::new(&[
            (
                ROOT,
                link_page(&[
                    "/view/garden/a",
                    "#top",
                    "/view/garden/b?tab=2",
                    "https://elsewhere.example.com/x",
                    "/view/garden/b",
                    "/view/garden/c",
                ]),
            ),
            ("https://sites.google.com/view/garden/a", sub.clone()),
            ("https://sites.google.com/view/garden/b", sub.clone()),
            ("https://sites.google.com/view/garden/c", sub),
        ])
    }

    fn controller(
        driver: FakeDriver,
        ctx: PageContext,
    ) -> (CrawlController<FakeDriver>, mpsc::Receiver<CaptureEvent>) {
        let (queue, rx) = CaptureQueue::channel(1024);
        let root = Url::parse(ROOT).unwrap();
        let controller = CrawlController::new(
            driver,
            ctx,
            queue,
            LinkFilter::new(&root),
            CrawlTimings::default(),
        );
        (controller, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_visits_each_link_once_then_exhausts() {
        let (mut controller, _rx) = controller(three_link_site(), PageContext::new());
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert_eq!(report.final_state, CrawlState::Exhausted);
        assert!(!report.halted);
        assert_eq!(report.pages_visited, 3);

        let driver = controller.into_driver();
        assert_eq!(
            driver.navigations,
            [
                "https://sites.google.com/view/garden/a",
                "https://sites.google.com/view/garden/b",
                "https://sites.google.com/view/garden/c",
            ]
        );
        assert_eq!(driver.session_storage.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_visited_earlier_in_session_are_skipped() {
        let mut driver = three_link_site();
        driver.session_storage = vec![
            "https://sites.google.com/view/garden/a".to_string(),
            "https://sites.google.com/view/garden/b".to_string(),
        ];
        let (mut controller, _rx) = controller(driver, PageContext::new());
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert_eq!(report.final_state, CrawlState::Exhausted);
        assert_eq!(report.pages_visited, 3);
        assert_eq!(
            controller.into_driver().navigations,
            ["https://sites.google.com/view/garden/c"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_context_halts_before_any_step() {
        let ctx = PageContext::new();
        ctx.invalidate();
        let (mut controller, mut rx) = controller(three_link_site(), ctx);
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert!(report.halted);
        assert_eq!(report.final_state, CrawlState::Idle);
        assert!(rx.try_recv().is_err());
        let driver = controller.into_driver();
        assert!(driver.navigations.is_empty());
        assert!(driver.scrolls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_session_invalidates_and_halts_in_place() {
        let mut driver = three_link_site();
        driver.lose_session_on_navigate = true;
        let ctx = PageContext::new();
        let (mut controller, _rx) = controller(driver, ctx.clone());
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert!(report.halted);
        assert!(!ctx.is_valid());
        let first = Url::parse("https://sites.google.com/view/garden/a").unwrap();
        assert_eq!(report.final_state, CrawlState::Navigating(first.clone()));
        assert!(session.is_visited(&first));
        assert_eq!(
            controller.into_driver().session_storage,
            ["https://sites.google.com/view/garden/a"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrolls_to_bottom_in_fixed_steps() {
        let driver = FakeDriver::new(&[(ROOT, link_page(&[]))]);
        let (mut controller, _rx) = controller(driver, PageContext::new());
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert_eq!(report.final_state, CrawlState::Exhausted);
        assert_eq!(controller.into_driver().scrolls, [900, 1800, 2700]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_page_stops_at_scroll_limit() {
        let mut driver = FakeDriver::new(&[(ROOT, link_page(&[]))]);
        driver.growing = true;
        let (queue, _rx) = CaptureQueue::channel(16);
        let timings = CrawlTimings {
            max_scroll_steps: 5,
            ..CrawlTimings::default()
        };
        let mut controller = CrawlController::new(
            driver,
            PageContext::new(),
            queue,
            LinkFilter::new(&Url::parse(ROOT).unwrap()),
            timings,
        );

        let report = controller.run(&mut CrawlSession::new()).await;

        assert_eq!(report.final_state, CrawlState::Exhausted);
        assert_eq!(controller.into_driver().scrolls.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_change_precedes_image_events() {
        let mut driver = FakeDriver::new(&[(
            ROOT,
            r#"<html><body><img src="https://lh3.googleusercontent.com/sitesv/IMG=w400" alt="Bed"></body></html>"#
                .to_string(),
        )]);
        driver.resources.insert(
            ROOT.to_string(),
            vec!["https://lh3.googleusercontent.com/sitesv/IMG=w200".to_string()],
        );
        let (mut controller, mut rx) = controller(driver, PageContext::new());

        controller.run(&mut CrawlSession::new()).await;
        drop(controller);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(&events[0], CaptureEvent::PageChanged(page) if page.url == ROOT));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, CaptureEvent::Resource(url) if url.ends_with("=w200")))
        );
        assert!(events.iter().any(
            |e| matches!(e, CaptureEvent::Element(img) if img.alt.as_deref() == Some("Bed"))
        ));
    }

    fn drain(rx: &mut mpsc::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn bed_sweeps(events: &[CaptureEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::Element(img) if img.alt.as_deref() == Some("Bed")))
            .count()
    }

    fn single_image_page() -> FakeDriver {
        FakeDriver::new(&[(
            ROOT,
            r#"<html><body><img src="https://lh3.googleusercontent.com/sitesv/IMG=w400" alt="Bed"></body></html>"#
                .to_string(),
        )])
    }

    #[tokio::test(start_paused = true)]
    async fn test_dom_mutation_triggers_extra_sweep() {
        let (mut quiet, mut quiet_rx) = controller(single_image_page(), PageContext::new());
        quiet.run(&mut CrawlSession::new()).await;
        drop(quiet);
        let baseline = bed_sweeps(&drain(&mut quiet_rx));

        let mut driver = single_image_page();
        driver.mutation_after_scrolls = Some(1);
        let (mut mutated, mut mutated_rx) = controller(driver, PageContext::new());
        mutated.run(&mut CrawlSession::new()).await;
        drop(mutated);
        let events = drain(&mut mutated_rx);

        assert_eq!(baseline, 2);
        assert_eq!(bed_sweeps(&events), baseline + 1);
        let pages = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::PageChanged(_)))
            .count();
        assert_eq!(pages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_page_link_is_not_navigated_back_to() {
        let (mut controller, _rx) = controller(three_link_site(), PageContext::new());
        let mut session = CrawlSession::new();

        let report = controller.run(&mut session).await;

        assert_eq!(report.pages_visited, 3);
        let driver = controller.into_driver();
        assert!(!driver.navigations.iter().any(|url| url == ROOT));
        assert_eq!(driver.navigations.len(), 3);
    }
}
