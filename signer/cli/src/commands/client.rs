use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use signer_host::driver::{self, DEFAULT_MESSAGE, DEFAULT_PUBLIC_KEY_PATH, DEFAULT_SIGNATURE_PATH};
use signer_host::{Context as SignerContext, DriverConfig};
use signer_ta::TrustedApp;

use super::StorageArgs;

/**
    Interactive client menu.
*/
#[derive(Args)]
pub struct ClientCommand {
    /// Socket of a running `signer serve` daemon.
    #[arg(long, conflicts_with_all = ["storage", "ephemeral"])]
    pub socket: Option<PathBuf>,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Message to sign and verify.
    #[arg(long, default_value = DEFAULT_MESSAGE)]
    pub message: String,

    /// Where the public key (raw X || Y) is written.
    #[arg(long, default_value = DEFAULT_PUBLIC_KEY_PATH)]
    pub public_key: PathBuf,

    /// Where the signature (raw r || s) is written.
    #[arg(long, default_value = DEFAULT_SIGNATURE_PATH)]
    pub signature: PathBuf,
}

impl ClientCommand {
    pub fn run(self) -> Result<()> {
        let context = match &self.socket {
            Some(path) => SignerContext::connect(path)
                .with_context(|| format!("failed to connect to {}", path.display()))?,
            None => SignerContext::in_process(TrustedApp::start(self.storage.open()?))
                .context("failed to start the in-process signer")?,
        };

        let session = context.open_session().context("open session failed")?;

        let config = DriverConfig {
            message: self.message.into_bytes(),
            public_key_path: self.public_key,
            signature_path: self.signature,
        };
        driver::run(
            &session,
            &config,
            &mut io::stdin().lock(),
            &mut io::stdout().lock(),
        )?;

        session.close().context("close session failed")?;
        Ok(())
    }
}
