use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;

use signer_core::{TeeError, TeeResult};

use super::{ObjectId, ObjectStore};

/**
    Process-local object store. Contents are lost when it is dropped.
*/
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn load(&self, id: &ObjectId) -> TeeResult<Vec<u8>> {
        self.objects
            .lock()
            .get(id)
            .cloned()
            .ok_or(TeeError::ItemNotFound)
    }

    fn store(&self, id: &ObjectId, data: &[u8], overwrite: bool) -> TeeResult<()> {
        match self.objects.lock().entry(id.clone()) {
            Entry::Occupied(_) if !overwrite => Err(TeeError::AccessConflict),
            Entry::Occupied(mut entry) => {
                entry.insert(data.to_vec());
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(data.to_vec());
                Ok(())
            }
        }
    }
}
