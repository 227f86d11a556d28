use std::collections::HashSet;
use url::Url;

/// Where the crawl state machine currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Scrolling,
    Sweeping,
    ChoosingNextLink,
    Navigating(Url),
    /// No unvisited same-origin link remains. Terminal.
    Exhausted,
}

/// State of one crawl run: the pages already navigated to, in visit order.
///
/// The visited set only grows; it lives as long as the browser session.
#[derive(Debug, Clone)]
pub struct CrawlSession {
    state: CrawlState,
    visited: Vec<String>,
    visited_set: HashSet<String>,
}

impl Default for CrawlSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlSession {
    pub fn new() -> Self {
        Self {
            state: CrawlState::Idle,
            visited: Vec::new(),
            visited_set: HashSet::new(),
        }
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: CrawlState) {
        self.state = state;
    }

    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited_set.contains(url.as_str())
    }

    /// Record a page as visited; `false` if it already was
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.remember(url.as_str())
    }

    /// Merge pages recorded earlier in the same browser session
    pub fn restore<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.remember(url.as_ref());
        }
    }

    fn remember(&mut self, url: &str) -> bool {
        if !self.visited_set.insert(url.to_string()) {
            return false;
        }
        self.visited.push(url.to_string());
        true
    }
}
