//! Service process runner shared by the auth, shelter and profile binaries.

use std::sync::Arc;

use clap::Parser;
use shelterhub_client::Service;
use tracing::{error, info, warn};

use super::bootstrap::{init_tracing, ServiceCli};
use crate::bus::init_transport;
use crate::config::{Config, MessagingType};
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::dlq::{create_publisher, DlqConfig};
use crate::password::{Argon2Hasher, PasswordHasher};
use crate::services::handlers_for;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::init_storage;

/// Run one service until a termination signal, then shut down gracefully.
///
/// A broker that stays unreachable through the configured connection
/// attempts is fatal.
pub async fn run_service(service: Service) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = ServiceCli::parse();
    let config = Config::load(cli.config.config.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(service = %service, queue = service.queue(), "Starting shelterhub service");

    if config.messaging.messaging_type == MessagingType::Channel {
        warn!("In-memory broker selected; only this process can reach the queue");
    }

    let transport = init_transport(&config.messaging).await.map_err(|e| {
        error!(error = %e, "Broker unreachable");
        e
    })?;

    let stores = init_storage(&config.storage).await.map_err(|e| {
        error!(error = %e, "Failed to initialize storage");
        e
    })?;

    let dead_letters = create_publisher(
        &DlqConfig {
            enabled: config.dispatcher.dead_letter,
        },
        transport.clone(),
    );
    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new());

    let dispatcher = Dispatcher::new(
        transport.clone(),
        handlers_for(service, &stores, hasher),
        dead_letters,
        DispatcherConfig::for_service(service, &config.dispatcher),
    );

    let coordinator = ShutdownCoordinator::from_settings(&config.shutdown);
    let token = coordinator.token();
    let mut consumer = coordinator.spawn(async move { dispatcher.run(token).await });

    info!(service = %service, "Service running, press Ctrl+C to exit");

    tokio::select! {
        _ = coordinator.wait_for_signal() => {}
        result = &mut consumer => match result {
            Ok(Ok(())) => warn!(service = %service, "Dispatcher stopped unexpectedly"),
            Ok(Err(e)) => error!(service = %service, error = %e, "Dispatcher failed"),
            Err(e) => error!(service = %service, error = %e, "Dispatcher task panicked"),
        },
    }

    let report = coordinator.shutdown(None, transport.as_ref()).await;
    info!(
        service = %service,
        drained = report.drained,
        "Service stopped"
    );
    Ok(())
}
