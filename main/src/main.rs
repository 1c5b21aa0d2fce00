mod bootstrap;

use api_router::api_routes;
use axum::Router;
use ingestion_pipeline::run_worker_loop;
use tracing::{error, info};

/// Combined single-process deployment: API server plus queue worker.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let context = bootstrap::build_context().await?;

    let app = Router::new()
        .merge(api_routes())
        .with_state(context.api_state.clone());

    let serve_address = format!("0.0.0.0:{}", context.config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {e}");
        }
    });

    info!("Starting worker process");
    if let Err(e) = run_worker_loop(context.db, context.pipeline, &context.config).await {
        error!("Worker process error: {e}");
    }

    server.await?;
    Ok(())
}
