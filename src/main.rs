use hemmer_provider_squadcast::{init_logging, serve, SquadcastProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Squadcast provider");
    serve(SquadcastProvider::new()).await
}
