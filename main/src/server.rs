mod bootstrap;

use api_router::api_routes;
use axum::Router;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let context = bootstrap::build_context().await?;

    let app = Router::new()
        .merge(api_routes())
        .with_state(context.api_state);

    let serve_address = format!("0.0.0.0:{}", context.config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
