//! Command-line surface for the TEF II datáfono bridge.
//!
//! Each subcommand builds the configured transport, connects the
//! coordinator, runs one operation and prints the result as JSON. Declines
//! exit non-zero so shell callers can branch on the outcome.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::debug;

use tefbridge_core::config::BridgeConfig;
use tefbridge_core::protocol::{
    list_ports, MockTransport, PurchaseRequest, ReversalRequest, SerialPortTransport,
    SerialTransport, TefError, TerminalResponse, TransactionCoordinator,
};

#[derive(Parser)]
#[command(name = "tefbridge", version, about = "Credibanco TEF II datáfono bridge")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial device, overrides the configured one
    #[arg(long, global = true)]
    port: Option<String>,

    /// Use the in-memory mock transport instead of a real terminal
    #[arg(long, global = true)]
    mock: bool,

    /// Per-transaction timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available serial ports
    Ports,
    /// Report connection status for the configured device
    Status,
    /// Run a purchase against the terminal
    Purchase {
        /// Total amount in cents
        #[arg(long)]
        amount_cents: u64,
        #[arg(long, default_value_t = 0)]
        tax_cents: u64,
        #[arg(long, default_value_t = 0)]
        tip_cents: u64,
        #[arg(long, default_value_t = 0)]
        iac: u64,
        #[arg(long)]
        terminal_id: String,
        #[arg(long)]
        transaction_id: String,
        #[arg(long)]
        cashier_id: String,
        #[arg(long)]
        send_pan: bool,
    },
    /// Void a prior transaction by receipt number
    Reversal {
        #[arg(long)]
        receipt_number: String,
        #[arg(long)]
        terminal_id: String,
        #[arg(long)]
        transaction_id: String,
        #[arg(long)]
        cashier_id: String,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if cli.mock {
        config.tef.mock_mode = true;
    }
    if let Some(timeout) = cli.timeout_ms {
        config.tef.timeout_ms = timeout;
    }

    if let Command::Ports = cli.command {
        let ports = list_ports();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    let transport: Box<dyn SerialTransport> = if config.tef.mock_mode {
        Box::new(MockTransport::new())
    } else {
        Box::new(SerialPortTransport::new())
    };
    let coordinator = TransactionCoordinator::new(transport, config.clone());
    let port = if config.serial.port.is_empty() && config.tef.mock_mode {
        "mock".to_string()
    } else {
        config.serial.port.clone()
    };
    coordinator.connect(&port)?;
    debug!("connected on {port}");

    let timeout = Some(Duration::from_millis(config.tef.timeout_ms));
    let result = match cli.command {
        Command::Ports => unreachable!("handled above"),
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&coordinator.status())?);
            Ok(())
        }
        Command::Purchase {
            amount_cents,
            tax_cents,
            tip_cents,
            iac,
            terminal_id,
            transaction_id,
            cashier_id,
            send_pan,
        } => {
            let request = PurchaseRequest {
                amount_cents,
                tax_cents,
                tip_cents,
                iac,
                terminal_id,
                transaction_id,
                cashier_id,
                send_pan,
            };
            coordinator
                .send_purchase(&request, timeout)
                .and_then(report)
        }
        Command::Reversal {
            receipt_number,
            terminal_id,
            transaction_id,
            cashier_id,
        } => {
            let request = ReversalRequest {
                receipt_number,
                terminal_id,
                transaction_id,
                cashier_id,
            };
            coordinator
                .send_reversal(&request, timeout)
                .and_then(report)
        }
    };

    coordinator.disconnect();
    result?;
    Ok(())
}

/// Print the terminal's answer; a decline becomes a non-zero exit
fn report(response: TerminalResponse) -> Result<(), TefError> {
    println!(
        "{}",
        serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
    );
    if response.approved {
        Ok(())
    } else {
        Err(TefError::Declined {
            code: response.response_code,
            message: response.message,
        })
    }
}
