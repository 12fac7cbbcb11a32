use anyhow::Result;
use ftl_cli::app;

#[tokio::main]
async fn main() -> Result<()> {
    app::run().await
}
