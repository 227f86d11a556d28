//! The crawl state machine and the session state it walks with.

pub mod session;
pub mod web;

pub use session::{CrawlSession, CrawlState};
pub use web::{CrawlController, CrawlReport};
