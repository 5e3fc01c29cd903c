use medgen_services::{config::BIOGPT, server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    server::run_local(&BIOGPT, server::biogpt_router).await
}
