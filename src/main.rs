use kong_provider::{init_logging, serve, KongProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Kong provider");

    serve(KongProvider::new()).await
}
