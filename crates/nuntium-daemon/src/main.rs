//! nuntium - headless MMS mediator daemon.
//!
//! Wires the mediator core to the default adapters: a reqwest HTTP
//! transport, a statically configured data context, the bincode
//! local-test codec, a unix-socket push injector and a logging bus.
//! The daemon runs until interrupted with Ctrl+C.

use std::sync::Arc;

use tokio::sync::Mutex;

use nuntium_mediator::{Mediator, MediatorConfig};
use nuntium_service::ServiceManager;
use nuntium_storage::Store;
use nuntium_types::{BusPath, NuntiumError, Result};

mod adapters;
mod codec;
mod config;
mod inject;
mod transport;

use adapters::{AlwaysNewHistory, LoggingBus, RetryingRadio, StaticAccounts, StaticContextRadio};
use codec::LocalCodec;
use config::{CliArgs, DaemonConfig};
use transport::HttpTransport;

/// Subdirectory of the data dir for transport spool files.
const SPOOL_DIR: &str = "spool";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = CliArgs::parse_from_env();
    let daemon_config = match &cli.config_path {
        Some(path) => match DaemonConfig::load(path) {
            Ok(config) => config.merge_cli(&cli),
            Err(e) => {
                tracing::error!("failed to load config file: {e}");
                std::process::exit(1);
            }
        },
        None => DaemonConfig::from_cli(&cli),
    };

    if let Err(e) = run_daemon(daemon_config).await {
        tracing::error!("daemon error: {e}");
        std::process::exit(1);
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let data_dir = config.data_dir();
    let identity = config.identity();
    tracing::info!(data_dir = %data_dir.display(), identity = %identity, "starting nuntium");

    let store = Arc::new(Store::open(&data_dir)?);
    let proxy = config.proxy_info()?;
    let context_path = config
        .context_path
        .clone()
        .map(BusPath::new)
        .unwrap_or_else(|| BusPath::new("/context1"));

    let bus = Arc::new(LoggingBus);
    let accounts = Arc::new(StaticAccounts::default());
    let radio = Arc::new(RetryingRadio::new(StaticContextRadio::new(
        context_path,
        proxy,
        config.message_center.clone(),
    )));
    let transport = Arc::new(HttpTransport::new(data_dir.join(SPOOL_DIR))?);

    let manager = Arc::new(Mutex::new(ServiceManager::new(
        bus,
        Arc::clone(&store),
        Arc::clone(&accounts) as _,
        config.use_delivery_reports,
    )));

    let mediator = Mediator::new(
        MediatorConfig {
            modem_path: BusPath::new(config.modem_path()),
            use_delivery_reports: config.use_delivery_reports,
        },
        store,
        Arc::new(LocalCodec),
        radio,
        transport,
        Arc::new(AlwaysNewHistory),
        accounts,
        manager,
    );

    let handle = mediator.handle();
    let loop_task = mediator.start();

    // Bring the account up and reconcile stored transactions.
    handle
        .identity_added_tx
        .send(identity)
        .map_err(|_| NuntiumError::Service {
            reason: "mediator loop ended before startup".into(),
        })?;

    let socket_task = tokio::spawn(inject::run_push_socket(
        config.socket(),
        handle.push_tx.clone(),
    ));

    tokio::signal::ctrl_c().await.map_err(|e| NuntiumError::Config {
        reason: format!("waiting for interrupt: {e}"),
    })?;
    tracing::info!("interrupted, shutting down");

    socket_task.abort();
    let _ = handle.terminate_tx.send(());
    let _ = loop_task.await;
    Ok(())
}
