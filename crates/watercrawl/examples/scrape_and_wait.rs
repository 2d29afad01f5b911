use watercrawl::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), WaterCrawlError> {
    watercrawl::init_observability();
    let client = WaterCrawlClient::from_env()?;

    let mut page_options = JsonObject::new();
    page_options.insert("only_main_content".into(), serde_json::Value::Bool(true));

    let outcome = client
        .scrape("https://example.com")
        .page_options(page_options)
        .run()
        .await?;

    match outcome {
        Outcome::Delivered(page) => println!("{}", serde_json::Value::Object(page)),
        Outcome::Degraded(state) => {
            eprintln!("no result available, last state follows");
            println!("{}", serde_json::Value::Object(state));
        }
        Outcome::Failed(failure) => eprintln!("scrape failed: {failure}"),
    }
    Ok(())
}
