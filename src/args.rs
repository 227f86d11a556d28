use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "site-harvest")]
#[command(about = "Crawls a site and caches every CDN image it shows, then exports them by page")]
#[command(version)]
pub struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Image cache database
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl a site from a start page, caching its images
    Crawl(CrawlArgs),
    /// Package the cached images into a zip grouped by site and page
    Export {
        /// Directory the package is written to
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Show how many images are cached
    Count,
    /// Remove every cached image
    Clear,
}

#[derive(ClapArgs, Debug)]
pub struct CrawlArgs {
    /// Page to start crawling from
    pub url: Option<String>,

    /// WebDriver server (WEBDRIVER_URL takes precedence)
    #[arg(short, long)]
    pub webdriver_url: Option<String>,
}
