use clap::Parser;

use amqpprox_server::app_config::{self, DaemonArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let args = DaemonArgs::parse();
    let config = app_config::load_config(&args);
    tracing::info!(profile = %config.profile, "starting amqpprox");

    amqpprox_server::run(config).await
}
