//! Service entry point: wire configuration, serial link, MQTT bridge and
//! scheduler together, then poll until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xcomsrv::bridge::MqttBridge;
use xcomsrv::config::AppConfig;
use xcomsrv::executor::RequestExecutor;
use xcomsrv::scheduler::PollScheduler;
use xcomsrv::transport::SerialPortLink;

#[derive(Parser, Debug)]
#[command(
    name = "xcomsrv",
    about = "Polls Studer devices over an Xcom-232 serial link and republishes values over MQTT"
)]
struct Args {
    /// Serial device path (overrides the configuration file)
    device: Option<String>,

    /// Path to the YAML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config =
        AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(device) = args.device {
        config.serial.device = device;
    }

    // Both of these are fatal before the poll loop starts.
    let link = SerialPortLink::open(&config.serial)
        .with_context(|| format!("failed to open serial device {}", config.serial.device))?;
    info!("serial connection established on {}", config.serial.device);

    let table = Arc::new(config.parameters.clone());
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let (bridge, event_loop) = MqttBridge::connect(config.mqtt.clone(), table.clone(), cancel.clone());

    let executor = RequestExecutor::new(link);
    let mut scheduler = PollScheduler::new(executor, table, &config.poll);
    scheduler.run(&bridge, &cancel).await;

    info!("shutting down");
    bridge.shutdown().await;
    let _ = event_loop.await;
    info!("shutdown complete");
    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
