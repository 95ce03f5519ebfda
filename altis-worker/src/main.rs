use altis_store::app_config::Config;
use altis_worker::{bootstrap, worker};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "altis_worker=debug,altis_order=debug,altis_inventory=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting Altis booking worker");

    let runtime = bootstrap::build(&config).await?;
    let engine = runtime.engine.clone();

    // Relay first so events from recovery are not missed
    let (stop, shutdown) = watch::channel(false);
    let relay = tokio::spawn(worker::relay_events(
        runtime.events.subscribe(),
        runtime.forward.clone(),
        shutdown.clone(),
    ));

    let recovered = engine.recover().await?;
    tracing::info!(recovered, "Booking engine ready");

    let sweeper = tokio::spawn(worker::run_sweeper(engine.clone(), runtime.sweep_interval, shutdown));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    engine.shutdown().await;
    stop.send(true)?;
    let swept = sweeper.await?;
    let relayed = relay.await?;
    tracing::info!(swept, relayed, "Altis booking worker stopped");
    Ok(())
}
