use anyhow::Result;
use clap::Parser;
use coverage_dashboard::app::{self, AppConfig, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    app::init_tracing();
    let config = AppConfig::from(cli);
    app::run(config).await
}
