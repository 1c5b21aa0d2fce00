mod bootstrap;

use ingestion_pipeline::run_worker_loop;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let context = bootstrap::build_context().await?;

    info!("Starting worker process");
    run_worker_loop(context.db, context.pipeline, &context.config).await?;

    Ok(())
}
