use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use feedback::{
    batch::{into_requests, read_batch},
    lexicon::seed_keywords,
};
use scoring::{
    clock::SystemClock,
    executable_utils::initialize_executable,
    processor::{CancellationFlag, Processor},
    providers::HttpLegitimacyProvider,
    storage::InMemoryStorage,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let (config, args) = initialize_executable()?;
    let input = args.input.ok_or("--input <batch.json> is required")?;

    let items = read_batch(Path::new(&input))?;
    let (requests, matcher) = into_requests(items);
    info!(requests = requests.len(), verified = matcher.len(), "Loaded batch");

    let processor = Processor::from_storage(
        &config,
        Arc::new(InMemoryStorage::new()),
        Arc::new(HttpLegitimacyProvider::new(&config.context)?),
        Arc::new(matcher),
        Arc::new(SystemClock),
    )?;
    processor.keywords().bulk_create(seed_keywords()).await?;

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight identities");
                cancel.cancel();
            }
        });
    }

    let report = processor.rescore_batch(requests, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
