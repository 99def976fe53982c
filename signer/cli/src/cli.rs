use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{ClientCommand, ServeCommand};

/**
    ECDSA P-256 signing service.

    Without a subcommand, runs the interactive client. The isolated side is
    started in-process unless `--socket` points at a running daemon.
*/
#[derive(Parser)]
#[command(name = "signer", args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    client: ClientCommand,
}

#[derive(Subcommand)]
enum Command {
    /// Run the isolated side as a daemon on a Unix socket.
    Serve(ServeCommand),
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match self.command {
            Some(Command::Serve(_)) => "info",
            None => "warn",
        }
    }

    pub fn run(self) -> Result<()> {
        match self.command {
            Some(Command::Serve(cmd)) => cmd.run(),
            None => self.client.run(),
        }
    }
}
