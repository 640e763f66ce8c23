use std::sync::Arc;

use qms_adapter::{AmqpAdapter, Config, QmsForwarder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lapin=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting qms-adapter");

    let config = Config::from_env()?;

    tracing::info!(
        exchange = %config.amqp.exchange,
        exchange_type = %config.amqp.exchange_type,
        queue = %config.amqp.queue,
        routing_key = %config.amqp.routing_key,
        prefetch_count = config.amqp.prefetch_count,
        qms_enabled = config.qms.enabled,
        "configuration loaded"
    );

    let forwarder = Arc::new(QmsForwarder::new(&config.qms)?);

    let adapter = AmqpAdapter::new(&config.amqp, forwarder).await?;
    tracing::info!("done connecting to the AMQP broker");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    adapter.close().await;

    Ok(())
}
