//! Zentinel Contract Stub - CLI Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_contract_stub::compat::{self, CompatibilityReport};
use zentinel_contract_stub::{ContractConfig, StubEngine, StubServer};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-contract-stub",
    about = "Contract-driven stub server and backward-compatibility checker",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", global = true)]
    log_level: Level,

    /// Print an example contract and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a contract as a stub server
    Serve {
        /// Path to the contract file (YAML or JSON)
        #[arg(short, long, default_value = "contract.yaml")]
        contract: PathBuf,

        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:9090")]
        address: SocketAddr,
    },

    /// Check that a new contract version is backward compatible
    Compat {
        /// Previous contract version
        old: PathBuf,

        /// New contract version
        new: PathBuf,
    },

    /// Validate a contract and exit
    Validate {
        /// Path to the contract file (YAML or JSON)
        contract: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print example contract if requested
    if args.print_config {
        let default_config = include_str!("../demos/contract.yaml");
        println!("{}", default_config);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = args.command else {
        anyhow::bail!("No command given (try --help)");
    };

    match command {
        Command::Serve { contract, address } => {
            info!(path = ?contract, "Loading contract");
            let config = ContractConfig::from_file(&contract)?;
            let engine = StubEngine::from_config(&config)?;

            info!(
                contract = %config.specification_name(),
                address = %address,
                "Starting stub server"
            );
            StubServer::new(engine).run_until_signal(address).await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Compat { old, new } => {
            let old_config = ContractConfig::from_file(&old)?;
            let new_config = ContractConfig::from_file(&new)?;
            let rows = compat::check(&old_config.to_scenarios()?, &new_config.to_scenarios()?);

            for row in &rows {
                info!(
                    method = %row.method,
                    path = %row.path,
                    response_code = row.response_code,
                    status = ?row.status,
                    reasons = ?row.reasons,
                    "Compatibility"
                );
            }

            let service_type = new_config
                .service_type
                .as_deref()
                .or(old_config.service_type.as_deref());
            let report = CompatibilityReport::from_rows(
                new_config.specification_name(),
                service_type,
                &rows,
            );
            println!("{}", serde_json::to_string_pretty(&report)?);

            if compat::has_breaking_changes(&rows) {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Command::Validate { contract } => {
            let config = ContractConfig::from_file(&contract)?;
            println!(
                "Contract is valid ({} scenarios defined)",
                config.to_scenarios()?.len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
