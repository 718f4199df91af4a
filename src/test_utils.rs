//! Test utilities.
//!
//! [`TestDeployment`] runs service dispatchers over one in-memory broker,
//! each on its own connection as if it were a separate process, backed by a
//! shared [`MockStore`].

use std::sync::Arc;
use std::time::Duration;

use shelterhub_client::Service;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::bus::{ChannelBroker, ChannelTransport, Transport};
use crate::config::DispatcherSettings;
use crate::dispatch::{Dispatcher, DispatcherConfig, HandlerRegistry};
use crate::dlq::{ChannelDeadLetterPublisher, DeadLetter};
use crate::password::Argon2Hasher;
use crate::rpc::{RpcClient, RpcClientConfig};
use crate::services::handlers_for;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::storage::{MockStore, Stores};

pub struct TestDeployment {
    pub broker: ChannelBroker,
    pub store: Arc<MockStore>,
    /// Dead letters from every dispatcher.
    pub dead_letters: UnboundedReceiver<DeadLetter>,
    publisher: Arc<ChannelDeadLetterPublisher>,
    settings: DispatcherSettings,
    coordinator: ShutdownCoordinator,
    connections: Vec<Arc<ChannelTransport>>,
}

impl TestDeployment {
    /// Start dispatchers for `services` with default dispatcher settings.
    pub fn start(services: &[Service]) -> Self {
        Self::start_with(services, DispatcherSettings::default())
    }

    pub fn start_with(services: &[Service], settings: DispatcherSettings) -> Self {
        let (publisher, dead_letters) = ChannelDeadLetterPublisher::new();
        let mut deployment = Self {
            broker: ChannelBroker::new(),
            store: Arc::new(MockStore::new()),
            dead_letters,
            publisher: Arc::new(publisher),
            settings,
            coordinator: ShutdownCoordinator::new(Duration::from_secs(1)),
            connections: Vec::new(),
        };
        for &service in services {
            deployment.add_service(service);
        }
        deployment
    }

    /// Run the real handlers for `service`.
    pub fn add_service(&mut self, service: Service) {
        let stores = Stores::in_memory(self.store.clone());
        let handlers = handlers_for(service, &stores, Arc::new(Argon2Hasher::fast()));
        self.add_dispatcher(service, handlers);
    }

    /// Run `handlers` on `service`'s queue.
    pub fn add_dispatcher(&mut self, service: Service, handlers: HandlerRegistry) {
        let transport = Arc::new(self.broker.connect());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            handlers,
            self.publisher.clone(),
            DispatcherConfig::for_service(service, &self.settings),
        );
        let token = self.coordinator.token();
        self.coordinator
            .spawn(async move { dispatcher.run(token).await });
        self.connections.push(transport);
    }

    /// A request/reply client on a fresh connection.
    pub async fn client(&self, name: &str, timeout: Duration) -> RpcClient {
        let transport = Arc::new(self.broker.connect());
        let config = RpcClientConfig::new(name).with_timeout(timeout);
        match RpcClient::start(transport, config).await {
            Ok(client) => client,
            Err(e) => panic!("Failed to start test client: {}", e),
        }
    }

    /// Stop every dispatcher and close their connections.
    pub async fn stop(self) -> ShutdownReport {
        let closer = self.broker.connect();
        let report = self.coordinator.shutdown(None, &closer).await;
        for connection in &self.connections {
            let _ = connection.close().await;
        }
        report
    }
}

impl Drop for TestDeployment {
    fn drop(&mut self) {
        self.coordinator.token().cancel();
    }
}
