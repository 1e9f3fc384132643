use clap::{CommandFactory, Parser, Subcommand};

use crate::commands::{self, certs};

/// Certsmith - TLS certificate provisioning and renewal over SSH
#[derive(Parser)]
#[command(name = "certsmith")]
#[command(version, disable_version_flag = true)]
#[command(about = "Certsmith - TLS certificate provisioning and renewal over SSH")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show version
    #[arg(long, global = true)]
    pub version: bool,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Certificate management commands
    #[command(subcommand)]
    Certs(certs::CertsCommands),

    /// Renew every certificate that is due, once
    Sweep {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the renewal scheduler until interrupted
    Scheduler,
}

impl Cli {
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        if self.version {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let Some(command) = self.command else {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        };

        match command {
            Commands::Certs(cmd) => certs::run(cmd),
            Commands::Sweep { json } => commands::renewal::run_sweep(json),
            Commands::Scheduler => commands::renewal::run_scheduler(),
        }
    }
}
