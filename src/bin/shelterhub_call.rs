//! shelterhub-call: one request/reply against a running service
//!
//! ```text
//! shelterhub-call [--config <path>] <service> <action> [json]
//! shelterhub-call profile get_profile '{"user_id": 42}'
//! ```
//!
//! Prints the reply as JSON on stdout.
//!
//! ## Exit codes
//! - 0: `success: true`
//! - 1: `success: false` (the service refused the request)
//! - 2: service unavailable (timeout, broker unreachable)
//! - 64: usage error

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{Map, Value};
use tracing::{error, warn};

use shelterhub::bus::init_transport;
use shelterhub::config::Config;
use shelterhub::rpc::{RpcClient, RpcClientConfig};
use shelterhub::utils::bootstrap::{init_tracing, ConfigArgs};
use shelterhub_client::Service;

const EXIT_REJECTED: u8 = 1;
const EXIT_UNAVAILABLE: u8 = 2;
const EXIT_USAGE: u8 = 64;

#[derive(Parser, Debug)]
#[command(name = "shelterhub-call")]
#[command(version, about = "Send one request to a shelterhub service and print the reply")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Target service: auth, shelter or profile
    service: Service,

    /// Action name, e.g. get_profile
    action: String,

    /// Request data as a JSON object
    json: Option<String>,
}

#[derive(Debug)]
struct Request {
    service: Service,
    action: String,
    data: Map<String, Value>,
}

impl Cli {
    fn request(&self) -> Result<Request, String> {
        let service = self.service;
        if !service.actions().contains(&self.action.as_str()) {
            return Err(format!(
                "unknown action '{}' for {} (known: {})",
                self.action,
                service,
                service.actions().join(", ")
            ));
        }

        let data = match self.json.as_deref() {
            None => Map::new(),
            Some(json) => match serde_json::from_str::<Value>(json) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err("request data must be a JSON object".to_string()),
                Err(e) => return Err(format!("invalid JSON: {}", e)),
            },
        };

        Ok(Request {
            service,
            action: self.action.clone(),
            data,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not usage errors.
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let request = match cli.request() {
        Ok(request) => request,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let config_path = cli.config.config;

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let transport = match init_transport(&config.messaging).await {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{} service unavailable: {}", request.service, e);
            return ExitCode::from(EXIT_UNAVAILABLE);
        }
    };

    let client = match RpcClient::start(
        Arc::clone(&transport),
        RpcClientConfig::from_settings("call", &config.rpc),
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} service unavailable: {}", request.service, e);
            let _ = transport.close().await;
            return ExitCode::from(EXIT_UNAVAILABLE);
        }
    };

    let outcome = client
        .call(
            request.service.queue(),
            &request.action,
            request.data,
            None,
        )
        .await;

    client.shutdown(Duration::ZERO).await;
    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close transport");
    }

    match outcome {
        Ok(reply) => {
            match serde_json::to_string_pretty(&reply) {
                Ok(json) => println!("{}", json),
                Err(e) => error!(error = %e, "Failed to print reply"),
            }
            if reply.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_REJECTED)
            }
        }
        Err(e) if e.is_unavailable() => {
            eprintln!("{} service unavailable: {}", request.service, e);
            ExitCode::from(EXIT_UNAVAILABLE)
        }
        Err(e) => {
            eprintln!("request failed: {}", e);
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("shelterhub-call").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_request_with_json_object() {
        let cli = parse(&["profile", "get_profile", r#"{"user_id": 42}"#]).unwrap();
        let request = cli.request().unwrap();

        assert_eq!(request.service, Service::Profile);
        assert_eq!(request.action, "get_profile");
        assert_eq!(request.data["user_id"], 42);
    }

    #[test]
    fn test_request_without_json_is_empty_object() {
        let cli = parse(&["--config", "dev.yaml", "shelter", "list_shelters"]).unwrap();
        assert_eq!(cli.config.config.as_deref(), Some("dev.yaml"));
        assert!(cli.request().unwrap().data.is_empty());
    }

    #[test]
    fn test_unknown_service_is_a_parse_error() {
        assert!(parse(&["billing", "charge"]).is_err());
    }

    #[test]
    fn test_missing_action_is_a_parse_error() {
        let err = parse(&["auth"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let cli = parse(&["auth", "teleport"]).unwrap();
        let message = cli.request().unwrap_err();
        assert!(message.starts_with("unknown action 'teleport' for auth"));
    }

    #[test]
    fn test_non_object_json_rejected() {
        let cli = parse(&["auth", "login", "[1, 2]"]).unwrap();
        assert_eq!(cli.request().unwrap_err(), "request data must be a JSON object");

        let cli = parse(&["auth", "login", "{oops"]).unwrap();
        assert!(cli.request().unwrap_err().starts_with("invalid JSON: "));
    }
}
