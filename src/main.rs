use anyhow::Result;
use clap::Parser;
use studyflow_lib::commands::{self, Cli};
use studyflow_lib::{init_tracing, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env();
    init_tracing(&config.log_filter);

    commands::run(cli, config).await
}
