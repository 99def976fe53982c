use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{info, warn};

use signer_ta::TrustedApp;
use signer_ta::server::serve_unix;

use super::StorageArgs;

/**
    Run the isolated side as a daemon.
*/
#[derive(Args)]
pub struct ServeCommand {
    /// Unix socket to listen on.
    #[arg(long)]
    pub socket: PathBuf,

    #[command(flatten)]
    pub storage: StorageArgs,
}

impl ServeCommand {
    pub fn run(self) -> Result<()> {
        let app = Arc::new(TrustedApp::start(self.storage.open()?));
        if let Err(e) = app.instance() {
            // Keep serving so clients see the failure when opening a session
            warn!("instance unavailable, every session open will fail: {e}");
        }

        // Replace a socket left behind by an earlier run
        if let Ok(meta) = fs::symlink_metadata(&self.socket) {
            if !meta.file_type().is_socket() {
                bail!("{} exists and is not a socket", self.socket.display());
            }
            fs::remove_file(&self.socket)
                .with_context(|| format!("failed to remove stale {}", self.socket.display()))?;
        }

        let listener = UnixListener::bind(&self.socket)
            .with_context(|| format!("failed to bind {}", self.socket.display()))?;
        info!("signer daemon ready");

        serve_unix(app, listener).context("accept loop failed")
    }
}
