use anyhow::{Context, bail};
use clap::Parser;
use site_harvest::{Harvester, HarvestConfig, PageContext};

mod args;
use args::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HarvestConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarvestConfig::new(""),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }

    match args.command {
        Command::Crawl(crawl) => {
            if let Some(url) = crawl.url {
                config.start_url = url;
            }
            if let Some(webdriver_url) = crawl.webdriver_url {
                config.webdriver_url = webdriver_url;
            }
            if config.start_url.is_empty() {
                bail!("no start url given on the command line or in the config file");
            }

            println!("Note: crawling requires a WebDriver server (e.g., ChromeDriver).");
            println!(
                "Set WEBDRIVER_URL environment variable if not using {}",
                config.webdriver_url
            );

            let ctx = PageContext::new();
            let interrupt = ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ::log::warn!("Interrupted, stopping crawl");
                    interrupt.invalidate();
                }
            });

            let start_time = std::time::Instant::now();
            let report = Harvester::new(&config.start_url)
                .with_config(config)
                .with_context(ctx)
                .crawl()
                .await?;

            println!(
                "Visited {} pages in {:.2} seconds: {} images cached, {} already cached, {} failed",
                report.crawl.pages_visited,
                start_time.elapsed().as_secs_f64(),
                report.capture.stored,
                report.capture.already_present,
                report.capture.fetch_failed + report.capture.submit_failed
            );
            if report.crawl.halted {
                println!("Crawl stopped before all pages were visited");
            }
        }
        Command::Export { out_dir } => {
            if let Some(out_dir) = out_dir {
                config.export_dir = out_dir;
            }
            let status = site_harvest::export_archive(&config).await?;
            println!("{}", status.message);
            if let Some(path) = status.path {
                println!("{}", path.display());
            }
        }
        Command::Count => println!("{}", site_harvest::cache_status(&config).await?),
        Command::Clear => println!("{}", site_harvest::clear_cache(&config).await?),
    }

    Ok(())
}
