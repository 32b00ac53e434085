//! flagsim CLI
//!
//! Runs a simulation request file against a flagging service over HTTP, or
//! validates one without contacting the backend.

use clap::{Parser, Subcommand};
use flagsim_client::{ClientConfig, HttpBackend};
use flagsim_simulator::{SimulationError, SimulationResponse, Simulator, SimulatorConfig};
use flagsim_types::SimulationRequest;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flagsim")]
#[command(about = "Simulate flag evaluations and event tracking against a flagging backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation request against the backend
    Run {
        /// Path to the JSON request ({sdkKey, flagKey, events, userCount, contexts})
        #[arg(short, long)]
        request: PathBuf,

        /// SDK key; overrides the key in the request file
        #[arg(long, env = "FLAGSIM_SDK_KEY", hide_env_values = true)]
        sdk_key: Option<String>,

        /// Base URI of the flag polling service
        #[arg(long, default_value = "https://sdk.launchdarkly.com")]
        base_uri: String,

        /// Base URI of the event ingestion service
        #[arg(long, default_value = "https://events.launchdarkly.com")]
        events_uri: String,

        /// Maximum wait for the backend to become ready (e.g., "5s", "1m")
        #[arg(long, default_value = "5s")]
        ready_timeout: humantime::Duration,

        /// Buffered analytics events that trigger a delivery
        #[arg(long, default_value_t = 10_000)]
        event_capacity: usize,

        /// Seed for event firing draws, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Write the full report breakdown to stderr instead of a one-line summary
        #[arg(long)]
        report: bool,
    },

    /// Validate a request file without contacting the backend
    Validate {
        /// Path to the JSON request
        #[arg(short, long)]
        request: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read request file {path}: {source}")]
    ReadRequest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create HTTP backend: {0}")]
    Backend(#[from] flagsim_core::BackendError),
}

fn load_request(path: &Path) -> Result<Result<SimulationRequest, SimulationError>, CliError> {
    let json = std::fs::read_to_string(path).map_err(|source| CliError::ReadRequest {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(SimulationRequest::from_json(&json).map_err(SimulationError::from))
}

fn emit(response: &SimulationResponse) -> ExitCode {
    println!("{}", response.to_json_pretty());
    if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { request } => {
            let spec = load_request(&request)?.and_then(|r| r.validate().map_err(Into::into));
            let response = match spec {
                Ok(spec) => SimulationResponse::valid(&spec),
                Err(e) => SimulationResponse::from(e),
            };
            Ok(emit(&response))
        }

        Commands::Run {
            request,
            sdk_key,
            base_uri,
            events_uri,
            ready_timeout,
            event_capacity,
            seed,
            report,
        } => {
            // Logs go to stderr; stdout carries the JSON response.
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            let request = match load_request(&request)? {
                Ok(request) => request,
                Err(e) => return Ok(emit(&SimulationResponse::from(e))),
            };
            let request = match sdk_key {
                Some(key) => request.with_backend_credential(key),
                None => request,
            };

            let client_config = ClientConfig::default()
                .with_base_uri(base_uri)
                .with_events_uri(events_uri)
                .with_ready_timeout(*ready_timeout)
                .with_event_capacity(event_capacity);
            let backend = HttpBackend::new(client_config).map_err(CliError::from)?;

            let mut config = SimulatorConfig::new();
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }

            let mut simulator = Simulator::new(backend, config);
            let outcome = simulator.run_request(request).await;
            match &outcome {
                Ok(finished) if report => eprint!("{}", finished),
                Ok(finished) => eprintln!("{}", finished.summary()),
                Err(_) => {}
            }
            Ok(emit(&SimulationResponse::from(outcome)))
        }
    }
}
