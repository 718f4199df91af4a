//! Bootstrap utilities for shelterhub binaries.
//!
//! Shared initialization code for the service and caller binaries.

use clap::{Args, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CONFIG_ENV_VAR, LOG_ENV_VAR};

/// Initialize tracing with the SHELTERHUB_LOG environment variable.
///
/// Defaults to "info" level if SHELTERHUB_LOG is not set. Logs go to stderr
/// so a caller's stdout carries only its output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// `--config` option shared by every shelterhub binary.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigArgs {
    /// Configuration file (YAML), layered over `shelterhub.yaml`
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    pub config: Option<String>,
}

/// Command line of the auth, shelter and profile services.
#[derive(Parser, Debug)]
#[command(version, about = "Run a shelterhub service until SIGINT or SIGTERM")]
pub struct ServiceCli {
    #[command(flatten)]
    pub config: ConfigArgs,
}
