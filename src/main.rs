use apex_mqtt_bridge::config::{resolve_config_path, BridgeConfig};
use apex_mqtt_bridge::controller::{ApexClient, SimulatedApex};
use apex_mqtt_bridge::mapping::{TopicLayout, TopicRegistry};
use apex_mqtt_bridge::mqtt::MqttHandler;
use apex_mqtt_bridge::sync::{CommandWorker, StatusPublisher, SyncHandle};
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = resolve_config_path(std::env::args().nth(1))?;
    let config = BridgeConfig::load(&path).await?;
    let layout = TopicLayout::new(&config.bridge.instance_name);
    info!("Bridging controller {} to {}", config.controller.host, layout.root());

    let shutdown = CancellationToken::new();

    // MQTT
    let (msg_tx, msg_rx) = mpsc::channel(config.mqtt.channel_capacity);
    let mqtt_handler = MqttHandler::new(config.mqtt.clone(), layout.subscriptions(), msg_tx);
    let publisher: Arc<dyn StatusPublisher> = Arc::new(mqtt_handler.publisher());
    let mqtt_task = tokio::spawn(mqtt_handler.run_until_cancelled(shutdown.clone()));

    // Controller
    let controller: Arc<dyn ApexClient> = Arc::new(SimulatedApex::from_config(&config.controller));
    let topics = Arc::new(TopicRegistry::new());

    let worker = CommandWorker::new(controller.clone(), topics.clone(), &layout);
    let worker_task = tokio::spawn(worker.run(msg_rx, shutdown.clone()));

    let mut sync = match SyncHandle::start(
        controller,
        publisher,
        topics,
        layout,
        config.bridge.sync_settings(),
        &shutdown,
    )
    .await
    {
        Ok(sync) => sync,
        Err(e) => {
            error!("Initial synchronization failed: {}", e);
            shutdown.cancel();
            let _ = tokio::join!(worker_task, mqtt_task);
            return Err(eyre!("Initial synchronization failed: {}", e));
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    if let Err(e) = sync.shutdown().await {
        warn!("Sync engine did not stop cleanly: {}", e);
    }
    shutdown.cancel();

    let (worker_result, mqtt_result) = tokio::join!(worker_task, mqtt_task);
    worker_result?;
    mqtt_result?;

    info!("Bridge stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
