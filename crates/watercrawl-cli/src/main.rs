//! `watercrawl` command-line front end.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use watercrawl::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API key sent as `X-API-Key`
    #[arg(long, env = "WATERCRAWL_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Service base URL
    #[arg(
        long,
        env = "WATERCRAWL_BASE_URL",
        default_value = watercrawl::config::DEFAULT_BASE_URL
    )]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List crawl requests
    List(PageArgs),
    /// Show one crawl request
    Get { id: String },
    /// Submit a crawl request without waiting
    Create(TargetArgs),
    /// Stop a running crawl request
    Stop { id: String },
    /// List per-page results of a crawl request
    Results {
        id: String,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Download the accumulated result of a crawl request
    Download { id: String },
    /// Print status stream events as JSON lines
    Monitor {
        id: String,
        /// Replace streamed results with the downloaded result
        #[arg(long)]
        download: bool,
    },
    /// Submit a crawl request and wait for its result
    Scrape {
        #[command(flatten)]
        target: TargetArgs,
        /// Return right after submission
        #[arg(long)]
        no_wait: bool,
        /// Never download the accumulated result
        #[arg(long)]
        no_download: bool,
        /// Budget for each result download, in seconds
        #[arg(long, default_value_t = 30)]
        download_timeout_secs: u64,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 10)]
    page_size: u32,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// One or more URLs to crawl
    #[arg(required = true)]
    urls: Vec<String>,
    /// Spider options as a JSON object
    #[arg(long, value_parser = parse_object)]
    spider_options: Option<JsonObject>,
    /// Page options as a JSON object
    #[arg(long, value_parser = parse_object)]
    page_options: Option<JsonObject>,
    /// Plugin options as a JSON object
    #[arg(long, value_parser = parse_object)]
    plugin_options: Option<JsonObject>,
}

impl TargetArgs {
    fn target(&self) -> CrawlTarget {
        match self.urls.as_slice() {
            [single] => CrawlTarget::from(single.clone()),
            many => CrawlTarget::from(many.to_vec()),
        }
    }
}

fn parse_object(raw: &str) -> Result<JsonObject, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(object)) => Ok(object),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Fires `abort` on the first Ctrl-C.
fn abort_on_ctrl_c(abort: AbortHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "cli.interrupted", domain = "cli");
            abort.abort();
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    watercrawl::init_observability();

    let config = ClientConfig::new(cli.api_key)
        .base_url(cli.base_url)
        .request_timeout(Duration::from_secs(cli.timeout_secs));
    let client = WaterCrawlClient::new(config)?;

    match cli.command {
        Command::List(page) => {
            print_json(&client.list_crawl_requests(page.page, page.page_size).await?)?
        }
        Command::Get { id } => print_json(&client.get_crawl_request(&id).await?)?,
        Command::Create(target) => {
            let input = CreateCrawlRequestInput::new(target.target()).options(CrawlOptions {
                spider_options: target.spider_options.unwrap_or_default(),
                page_options: target.page_options.unwrap_or_default(),
                plugin_options: target.plugin_options.unwrap_or_default(),
            });
            print_json(&client.create_crawl_request(&input).await?)?
        }
        Command::Stop { id } => {
            client.stop_crawl_request(&id).await?;
            eprintln!("stopped {id}");
        }
        Command::Results { id, page } => print_json(
            &client
                .get_crawl_request_results(&id, page.page, page.page_size)
                .await?,
        )?,
        Command::Download { id } => print_json(&client.download_crawl_request(&id).await?)?,
        Command::Monitor { id, download } => {
            let abort = AbortHandle::new();
            abort_on_ctrl_c(abort.clone());
            let mut events = client
                .monitor(id)
                .download_results(download)
                .abort_handle(abort)
                .start()
                .await?;
            while let Some(event) = events.next_event().await {
                println!("{}", serde_json::to_string(&event)?);
            }
            let end = events.finish().await?;
            eprintln!("stream ended: {end:?}");
        }
        Command::Scrape {
            target,
            no_wait,
            no_download,
            download_timeout_secs,
        } => {
            let abort = AbortHandle::new();
            abort_on_ctrl_c(abort.clone());
            let mut scrape = client
                .scrape(target.target())
                .wait_for_completion(!no_wait)
                .download_result(!no_download)
                .download_timeout(Duration::from_secs(download_timeout_secs))
                .abort_handle(abort);
            if let Some(options) = target.spider_options {
                scrape = scrape.spider_options(options);
            }
            if let Some(options) = target.page_options {
                scrape = scrape.page_options(options);
            }
            if let Some(options) = target.plugin_options {
                scrape = scrape.plugin_options(options);
            }
            match scrape.run().await? {
                Outcome::Delivered(payload) => print_json(&payload)?,
                Outcome::Degraded(state) => {
                    eprintln!("result unavailable, printing last known state");
                    print_json(&state)?;
                }
                Outcome::Failed(failure) => return Err(failure.into()),
            }
        }
    }
    Ok(())
}
