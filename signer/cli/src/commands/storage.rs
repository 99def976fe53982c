use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use signer_ta::{FsStore, MemoryStore, ObjectStore, SecureStorage};

/**
    Where the isolated side keeps the device key.
*/
#[derive(Args)]
pub struct StorageArgs {
    /// Key storage directory. Defaults to the per-user data directory.
    #[arg(long, conflicts_with = "ephemeral")]
    pub storage: Option<PathBuf>,

    /// Keep the key in memory only; a new key is generated on every start.
    #[arg(long)]
    pub ephemeral: bool,
}

impl StorageArgs {
    pub fn open(&self) -> Result<SecureStorage> {
        let backend: Arc<dyn ObjectStore> = if self.ephemeral {
            info!("using ephemeral key storage");
            Arc::new(MemoryStore::new())
        } else {
            let dir = match &self.storage {
                Some(dir) => dir.clone(),
                None => default_storage_dir()?,
            };
            let store = FsStore::new(&dir)
                .with_context(|| format!("failed to open key storage {}", dir.display()))?;
            info!("using key storage {}", dir.display());
            Arc::new(store)
        };

        Ok(SecureStorage::new(backend))
    }
}

fn default_storage_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("signer"))
        .context("no local data directory; pass --storage or --ephemeral")
}
