//! Deliver mail through a pool of authenticated relay connections.

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use clap::{Parser, Subcommand};
use courier::{Courier, batch, controller::shutdown_signal};
use courier_common::internal;
use courier_delivery::DeliveryService;

/// Deliver mail through a pool of authenticated relay connections
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Send mail through a pooled SMTP relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a single plain-text message
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Subject line
        #[arg(long)]
        subject: String,

        /// Message body
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Read one RON request per line from stdin and deliver them concurrently
    Batch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let running = Courier::load()?.start().await?;

    let outcome = tokio::select! {
        r = run(cli.command, running.service()) => r,
        r = shutdown_signal() => r,
    };

    running.stop().await?;
    outcome
}

async fn run(command: Commands, service: &DeliveryService) -> anyhow::Result<()> {
    match command {
        Commands::Send { to, subject, body } => {
            let receipt = service.deliver(&to, &subject, &body).await?;
            internal!(
                level = INFO,
                "Delivered to {to} after {} attempt(s)",
                receipt.attempts
            );
        }
        Commands::Batch => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = batch::deliver_all(service, stdin).await?;
            internal!(
                level = INFO,
                "Batch finished: {} delivered, {} failed, {} malformed",
                summary.delivered,
                summary.failed,
                summary.malformed
            );
            if summary.failed > 0 {
                anyhow::bail!("{} of the batch's deliveries failed", summary.failed);
            }
        }
    }

    Ok(())
}
