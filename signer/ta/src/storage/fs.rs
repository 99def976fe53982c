use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::error;

use signer_core::{TeeError, TeeResult};

use super::{ObjectId, ObjectStore};

/**
    Directory-backed object store, one file per object.

    Files are named after the hex-encoded object id. Writes go to a temporary
    file in the same directory which is then renamed into place.
*/
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /**
        Open (creating if needed) a store rooted at `dir`.
    */
    pub fn new(dir: impl Into<PathBuf>) -> TeeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &ObjectId) -> PathBuf {
        self.dir.join(format!("{}.obj", id.to_hex()))
    }
}

impl ObjectStore for FsStore {
    fn load(&self, id: &ObjectId) -> TeeResult<Vec<u8>> {
        let path = self.path_of(id);
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TeeError::ItemNotFound,
            _ => storage_error(&path, e),
        })
    }

    fn store(&self, id: &ObjectId, data: &[u8], overwrite: bool) -> TeeResult<()> {
        let path = self.path_of(id);

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| storage_error(&self.dir, e))?;
        tmp.write_all(data).map_err(|e| storage_error(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| storage_error(tmp.path(), e))?;

        let persisted = if overwrite {
            tmp.persist(&path)
        } else {
            tmp.persist_noclobber(&path)
        };

        persisted.map(drop).map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => {
                error!("object file {} already exists", path.display());
                TeeError::AccessConflict
            }
            _ => storage_error(&path, e.error),
        })
    }
}

fn storage_error(path: &Path, e: io::Error) -> TeeError {
    error!("storage I/O on {} failed: {e}", path.display());
    TeeError::StorageNotAvailable
}
