//! Turns observed image URLs into cached, content-addressed records.
//!
//! The crawl pushes [`CaptureEvent`]s into a bounded queue. A single worker
//! consumes them in order, filters and deduplicates per page visit, and
//! spawns one fetch task per new image. Fetches run concurrently and never
//! block the queue.

pub mod fetch;
pub mod metadata;

pub use fetch::{FetchedImage, HttpFetcher, ImageFetcher};
pub use metadata::MetadataExtractor;

use crate::error::TransportError;
use crate::filter::CdnFilter;
use crate::records::{ImageElement, ImageRecord, PageInfo};
use crate::store::PutOutcome;
use crate::transport::Transport;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

/// Something the crawl observed on the page
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The browser now shows a different page; resets per-page dedup
    PageChanged(PageInfo),
    /// A network resource finished loading
    Resource(String),
    /// An image element found by a DOM sweep
    Element(ImageElement),
}

/// Sending half of the capture queue
#[derive(Debug, Clone)]
pub struct CaptureQueue {
    tx: mpsc::Sender<CaptureEvent>,
}

impl CaptureQueue {
    /// A queue and its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CaptureEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue an event; `false` once the worker has stopped
    pub async fn send(&self, event: CaptureEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Per-navigation state: the page being captured and the normalized image
/// URLs already claimed for fetching on it
#[derive(Debug)]
pub struct PageVisit {
    page: PageInfo,
    captured_urls: HashSet<String>,
}

impl PageVisit {
    pub fn new(page: PageInfo) -> Self {
        Self {
            page,
            captured_urls: HashSet::new(),
        }
    }

    pub fn page(&self) -> &PageInfo {
        &self.page
    }

    /// Claim a URL for fetching. `false` if it was already claimed on this visit.
    pub fn claim(&mut self, url: &Url) -> bool {
        self.captured_urls.insert(url.to_string())
    }
}

/// Counters for one capture run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub pages: u64,
    pub candidates: u64,
    pub ignored: u64,
    pub duplicates: u64,
    pub stored: u64,
    pub already_present: u64,
    pub fetch_failed: u64,
    pub submit_failed: u64,
    pub cancelled: u64,
}

#[derive(Debug)]
enum CaptureOutcome {
    Stored,
    AlreadyPresent,
    FetchFailed,
    SubmitFailed,
    Cancelled,
}

impl CaptureStats {
    fn record(&mut self, outcome: CaptureOutcome) {
        match outcome {
            CaptureOutcome::Stored => self.stored += 1,
            CaptureOutcome::AlreadyPresent => self.already_present += 1,
            CaptureOutcome::FetchFailed => self.fetch_failed += 1,
            CaptureOutcome::SubmitFailed => self.submit_failed += 1,
            CaptureOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

pub struct CaptureEngine {
    filter: CdnFilter,
    extractor: Arc<MetadataExtractor>,
    fetcher: Arc<dyn ImageFetcher>,
    transport: Transport,
}

impl CaptureEngine {
    pub fn new(
        filter: CdnFilter,
        extractor: MetadataExtractor,
        fetcher: Arc<dyn ImageFetcher>,
        transport: Transport,
    ) -> Self {
        Self {
            filter,
            extractor: Arc::new(extractor),
            fetcher,
            transport,
        }
    }

    /// Start the worker. It runs until every [`CaptureQueue`] clone is dropped
    /// and all in-flight fetches have settled.
    pub fn spawn(self, capacity: usize) -> (CaptureQueue, JoinHandle<CaptureStats>) {
        let (queue, rx) = CaptureQueue::channel(capacity);
        let handle = tokio::spawn(self.run(rx));
        (queue, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<CaptureEvent>) -> CaptureStats {
        let mut stats = CaptureStats::default();
        let mut visit: Option<PageVisit> = None;
        let mut tasks: JoinSet<CaptureOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.on_event(event, &mut visit, &mut tasks, &mut stats),
                    None => break,
                },
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::settle(done, &mut stats);
                }
            }
        }

        while let Some(done) = tasks.join_next().await {
            Self::settle(done, &mut stats);
        }

        ::log::info!(
            "Capture finished: {} stored, {} already cached, {} duplicates, {} failed fetches",
            stats.stored,
            stats.already_present,
            stats.duplicates,
            stats.fetch_failed
        );
        stats
    }

    fn settle(
        done: Result<CaptureOutcome, tokio::task::JoinError>,
        stats: &mut CaptureStats,
    ) {
        match done {
            Ok(outcome) => stats.record(outcome),
            Err(e) => {
                ::log::error!("Capture task failed: {}", e);
                stats.submit_failed += 1;
            }
        }
    }

    fn on_event(
        &self,
        event: CaptureEvent,
        visit: &mut Option<PageVisit>,
        tasks: &mut JoinSet<CaptureOutcome>,
        stats: &mut CaptureStats,
    ) {
        let (raw, element) = match event {
            CaptureEvent::PageChanged(page) => {
                ::log::debug!("Capturing on {}", page.url);
                stats.pages += 1;
                *visit = Some(PageVisit::new(page));
                return;
            }
            CaptureEvent::Resource(url) => (url, None),
            CaptureEvent::Element(element) => (element.src.clone(), Some(element)),
        };

        stats.candidates += 1;
        if !self.transport.context().is_valid() {
            stats.cancelled += 1;
            return;
        }

        let Some(url) = self.filter.accept(&raw) else {
            stats.ignored += 1;
            return;
        };

        let Some(visit) = visit.as_mut() else {
            ::log::debug!("No page announced yet, ignoring {}", url);
            stats.ignored += 1;
            return;
        };

        // claimed before the fetch is issued so a second signal for the
        // same image is dropped here
        if !visit.claim(&url) {
            ::log::trace!("Already captured on this page: {}", url);
            stats.duplicates += 1;
            return;
        }

        tasks.spawn(capture_one(
            Arc::clone(&self.fetcher),
            self.transport.clone(),
            Arc::clone(&self.extractor),
            visit.page().clone(),
            url,
            element,
        ));
    }
}

async fn capture_one(
    fetcher: Arc<dyn ImageFetcher>,
    transport: Transport,
    extractor: Arc<MetadataExtractor>,
    page: PageInfo,
    url: Url,
    element: Option<ImageElement>,
) -> CaptureOutcome {
    if !transport.context().is_valid() {
        return CaptureOutcome::Cancelled;
    }

    let fetched = match fetcher.fetch(&url).await {
        Ok(fetched) => fetched,
        Err(e) => {
            ::log::debug!("Fetch failed for {}: {}", url, e);
            return CaptureOutcome::FetchFailed;
        }
    };

    let metadata = extractor.extract(&page, &url, element.as_ref());
    let record = match tokio::task::spawn_blocking(move || {
        ImageRecord::new(fetched.bytes, &fetched.media_type, metadata)
    })
    .await
    {
        Ok(record) => record,
        Err(e) => {
            ::log::warn!("Hashing failed for {}: {}", url, e);
            return CaptureOutcome::SubmitFailed;
        }
    };

    let hash = record.content_hash.clone();
    match transport.submit(record).await {
        Ok(PutOutcome::Inserted) => {
            ::log::debug!("Cached {:.8} from {}", hash, url);
            CaptureOutcome::Stored
        }
        Ok(PutOutcome::AlreadyPresent) => CaptureOutcome::AlreadyPresent,
        Err(TransportError::Cancelled) => CaptureOutcome::Cancelled,
        Err(e) => {
            ::log::warn!("Failed to cache {}: {}", url, e);
            CaptureOutcome::SubmitFailed
        }
    }
}
