use watercrawl::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), WaterCrawlError> {
    watercrawl::init_observability();
    let client = WaterCrawlClient::from_env()?;

    let job = client
        .create_crawl_request(&CreateCrawlRequestInput::new("https://example.com"))
        .await?;

    let mut events = client
        .monitor(job.uuid.clone())
        .download_results(true)
        .start()
        .await?;

    while let Some(event) = events.next_event().await {
        match &event {
            Event::Progress(_) => {
                if let Some(percent) = event.progress_percent() {
                    eprintln!("progress: {percent:.1}%");
                }
            }
            Event::State(_) => eprintln!("state: {}", event.state_status().unwrap_or("unknown")),
            Event::Result(payload) => println!("{payload}"),
            Event::Error(payload) => eprintln!("job error: {payload}"),
            Event::Completed(_) | Event::Other { .. } => {}
        }
    }

    let end = events.finish().await?;
    eprintln!("stream ended: {end:?}");
    Ok(())
}
