//! valkey-scaler - reshapes a Valkey cluster running on Kubernetes.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Reads the cluster configuration from the environment
//! - Runs one of `init`, `scale-up`, `scale-down`, `settle` or `plan`

use std::error::Error as _;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use valkey_scaler::client::{ValkeyCli, ValkeyClientConfig, ValkeyDriver};
use valkey_scaler::config::ConfigError;
use valkey_scaler::orchestrator::{KubeStatefulSetSource, Orchestrator, OrchestratorConfig};
use valkey_scaler::{ClusterConfig, Result};

#[derive(Parser, Debug)]
#[command(name = "valkey-scaler")]
#[command(about = "Create, grow and shrink a Valkey cluster on Kubernetes", long_about = None)]
struct Cli {
    /// Log line format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the cluster once all pods are ready.
    Init,
    /// Add masters and replicas up to the configured shape.
    ScaleUp,
    /// Remove shards and replicas down to the configured shape.
    ScaleDown,
    /// Assign unowned slots and migrate misplaced ones onto the even distribution.
    Settle,
    /// Print the slot moves needed to reach the desired distribution.
    Plan {
        /// Print the plan as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing(format: LogFormat) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env().add_directive("valkey_scaler=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

async fn run(command: Command) -> Result<()> {
    let config = ClusterConfig::from_env()?;
    info!(
        cluster = %config.cluster_name,
        namespace = %config.namespace,
        masters = config.desired.masters,
        replicas_per_master = config.desired.replicas_per_master,
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    let pods = KubeStatefulSetSource::new(client, &config.namespace, config.naming.statefulset.clone());
    let driver = ValkeyDriver::new(
        ValkeyCli::new(config.valkey_cli.clone(), config.password.clone()),
        ValkeyClientConfig::default().with_password(config.password.clone()),
    );
    let orchestrator = Orchestrator::new(driver, pods, OrchestratorConfig::from(&config));

    match command {
        Command::Init => orchestrator.init().await,
        Command::ScaleUp => orchestrator.scale_up().await,
        Command::ScaleDown => orchestrator.scale_down().await,
        Command::Settle => orchestrator.settle_slots().await,
        Command::Plan { json } => {
            let summary = orchestrator.plan().await?.summary();
            if json {
                let rendered = serde_json::to_string_pretty(&summary)
                    .map_err(ConfigError::Json)?;
                println!("{rendered}");
            } else {
                for assignment in &summary.add_slots {
                    println!("add {} to ordinal {}", assignment.slots, assignment.ordinal);
                }
                for route in &summary.migrations {
                    println!("migrate {} along {}", route.slots, route.route);
                }
                println!(
                    "{} slots to add, {} slots to migrate",
                    summary.slots_to_add, summary.slots_to_migrate
                );
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("error: failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, logic_error = e.is_logic_error(), "Command failed");
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(1)
        }
    }
}
