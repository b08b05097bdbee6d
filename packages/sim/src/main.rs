//! Wayfare scenario runner CLI
//!
//! Runs the scripted end-to-end ride scenarios against the in-process
//! simulated relay, no live relay or mint required.

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

use wayfare_sim::scenarios;
use wayfare_sim::TestSuite;

#[derive(Parser)]
#[command(name = "wayfare-sim")]
#[command(about = "Scenario runner for the wayfare ride protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every scripted scenario
    Run {
        /// Run only a specific scenario by name
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// List available scenarios
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { scenario } => {
            tracing::info!("running ride scenarios...");

            let results = if let Some(name) = scenario {
                vec![run_single_scenario(&name).await]
            } else {
                scenarios::run_all().await
            };

            let mut suite = TestSuite::new("Ride Scenarios");
            for result in results {
                suite.add_result(result);
            }

            suite.print_summary();

            if suite.failed() > 0 {
                std::process::exit(1);
            }
        }

        Commands::Status => {
            println!("Available scenarios:");
            for name in SCENARIO_NAMES {
                println!("  {name}");
            }
        }
    }

    Ok(())
}

const SCENARIO_NAMES: &[&str] = &[
    "happy_path_same_mint",
    "pin_brute_force_cancels_ride",
    "broadcast_first_acceptance_wins",
    "cross_mint_bridge_pending_survives_restart",
    "driver_offline_mid_handshake",
    "replay_resistance_across_ride_boundaries",
    "coordinators_relay_offer_to_acceptance",
];

async fn run_single_scenario(name: &str) -> wayfare_sim::TestResult {
    match name {
        "happy_path_same_mint" => scenarios::happy_path_same_mint().await,
        "pin_brute_force_cancels_ride" => scenarios::pin_brute_force_cancels_ride().await,
        "broadcast_first_acceptance_wins" => scenarios::broadcast_first_acceptance_wins().await,
        "cross_mint_bridge_pending_survives_restart" => {
            scenarios::cross_mint_bridge_pending_survives_restart().await
        }
        "driver_offline_mid_handshake" => scenarios::driver_offline_mid_handshake().await,
        "replay_resistance_across_ride_boundaries" => {
            scenarios::replay_resistance_across_ride_boundaries().await
        }
        "coordinators_relay_offer_to_acceptance" => scenarios::coordinators_relay_offer_to_acceptance().await,
        other => wayfare_sim::TestResult::fail(other, format!("unknown scenario: {other}"), std::time::Duration::default()),
    }
}
