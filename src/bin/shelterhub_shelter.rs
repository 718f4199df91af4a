//! shelterhub-shelter: shelter service
//!
//! Consumes `shelterhub.shelter` and replies to each request on its reply
//! queue. Runs until Ctrl+C or SIGTERM, then finishes the message in hand
//! and exits.
//!
//! ## Configuration
//! - `--config <path>` or SHELTERHUB_CONFIG: YAML configuration file
//! - SHELTERHUB__MESSAGING__AMQP__URL: RabbitMQ connection string
//! - SHELTERHUB_LOG: log filter (default: info)

use shelterhub::utils::service::run_service;
use shelterhub_client::Service;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run_service(Service::Shelter).await
}
