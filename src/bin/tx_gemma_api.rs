use medgen_services::{config::TX_GEMMA, server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    server::run_local(&TX_GEMMA, server::tx_gemma_router).await
}
