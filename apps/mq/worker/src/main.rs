//! Queue Worker Service - Entry Point

#[tokio::main]
async fn main() -> eyre::Result<()> {
    mq_worker::run().await
}
