/*!
    Persistent object storage for the isolated side.

    [`ObjectStore`] is the byte-level backend; [`SecureStorage`] layers the key
    record format and open-handle bookkeeping on top of it.
*/

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, error};

use signer_core::{OutputBuffer, TeeError, TeeResult};

use crate::object::{Attribute, EcKeyPair, TransientObject};

mod fs;
mod memory;

pub use self::fs::FsStore;
pub use self::memory::MemoryStore;

/**
    Identifier of a persistent object.
*/
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    /// Longest identifier accepted by the storage layer.
    pub const MAX_LEN: usize = 64;

    pub fn new(id: impl Into<Vec<u8>>) -> TeeResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            error!(
                "object id must be 1..={} bytes, got {}",
                Self::MAX_LEN,
                id.len()
            );
            return Err(TeeError::BadParameters);
        }
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

bitflags! {
    /**
        Access requested by a handle, and the access it tolerates from others.
    */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataFlags: u32 {
        const ACCESS_READ = 0x0000_0001;
        const ACCESS_WRITE = 0x0000_0002;
        const ACCESS_WRITE_META = 0x0000_0004;
        const SHARE_READ = 0x0000_0010;
        const SHARE_WRITE = 0x0000_0020;
        const OVERWRITE = 0x0000_0400;
    }
}

impl DataFlags {
    fn wants_write(self) -> bool {
        self.intersects(Self::ACCESS_WRITE | Self::ACCESS_WRITE_META)
    }

    /// Whether a handle with `self` may coexist with one holding `other`.
    fn compatible_with(self, other: Self) -> bool {
        let accepts = |holder: Self, requester: Self| {
            (!requester.contains(Self::ACCESS_READ) || holder.contains(Self::SHARE_READ))
                && (!requester.wants_write() || holder.contains(Self::SHARE_WRITE))
        };
        accepts(other, self) && accepts(self, other)
    }
}

/**
    Byte-level persistence backend.
*/
pub trait ObjectStore: Send + Sync {
    /// Load an object's bytes; [`TeeError::ItemNotFound`] when absent.
    fn load(&self, id: &ObjectId) -> TeeResult<Vec<u8>>;

    /**
        Store an object's bytes.

        Without `overwrite`, an existing object makes this fail with
        [`TeeError::AccessConflict`].
    */
    fn store(&self, id: &ObjectId, data: &[u8], overwrite: bool) -> TeeResult<()>;
}

/**
    Open handles per object, shared by every [`SecureStorage`] clone.
*/
#[derive(Debug, Default)]
struct HandleTable {
    inner: Mutex<HandleTableInner>,
}

#[derive(Debug, Default)]
struct HandleTableInner {
    next_token: u64,
    open: HashMap<ObjectId, Vec<(u64, DataFlags)>>,
}

impl HandleTable {
    fn register(self: &Arc<Self>, id: &ObjectId, flags: DataFlags) -> TeeResult<Registration> {
        let mut inner = self.inner.lock();

        if let Some(held) = inner.open.get(id)
            && let Some((_, other)) = held.iter().find(|(_, other)| !flags.compatible_with(*other))
        {
            error!("{id} is open with {other:?}, cannot open with {flags:?}");
            return Err(TeeError::AccessConflict);
        }

        inner.next_token += 1;
        let token = inner.next_token;
        inner.open.entry(id.clone()).or_default().push((token, flags));

        Ok(Registration {
            table: Arc::clone(self),
            id: id.clone(),
            token,
        })
    }

    fn is_open(&self, id: &ObjectId) -> bool {
        self.inner.lock().open.contains_key(id)
    }

    fn open_handles(&self, id: &ObjectId) -> usize {
        self.inner.lock().open.get(id).map_or(0, Vec::len)
    }
}

/**
    An entry in the handle table, removed again on drop.
*/
struct Registration {
    table: Arc<HandleTable>,
    id: ObjectId,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut inner = self.table.inner.lock();
        if let Some(held) = inner.open.get_mut(&self.id) {
            held.retain(|(token, _)| *token != self.token);
            if held.is_empty() {
                inner.open.remove(&self.id);
            }
        }
    }
}

/**
    Key storage with handle sharing rules.
*/
#[derive(Clone)]
pub struct SecureStorage {
    backend: Arc<dyn ObjectStore>,
    handles: Arc<HandleTable>,
}

impl SecureStorage {
    pub fn new(backend: Arc<dyn ObjectStore>) -> Self {
        Self {
            backend,
            handles: Arc::default(),
        }
    }

    /**
        Open an existing key object.
    */
    pub fn open(&self, id: &ObjectId, flags: DataFlags) -> TeeResult<PersistentObject> {
        let data = self.backend.load(id)?;
        let key = EcKeyPair::from_record(&data).inspect_err(|_| {
            error!("stored object {id} is not a valid key record");
        })?;
        let registration = self.handles.register(id, flags)?;

        debug!("opened {id} with {flags:?}");

        Ok(PersistentObject {
            id: id.clone(),
            flags,
            key,
            _registration: registration,
        })
    }

    /**
        Persist the key held by `transient` under `id` and return a handle to it.
    */
    pub fn create(
        &self,
        id: &ObjectId,
        flags: DataFlags,
        transient: &TransientObject,
    ) -> TeeResult<PersistentObject> {
        let Some(key) = transient.key() else {
            error!("cannot persist {id}: transient object holds no key");
            return Err(TeeError::BadState);
        };

        if self.handles.is_open(id) {
            error!("cannot create {id}: object is open");
            return Err(TeeError::AccessConflict);
        }

        self.backend
            .store(id, &key.to_record(), flags.contains(DataFlags::OVERWRITE))?;
        let registration = self.handles.register(id, flags)?;

        debug!("created {id} with {flags:?}");

        Ok(PersistentObject {
            id: id.clone(),
            flags,
            key: key.clone(),
            _registration: registration,
        })
    }

    /// Number of handles currently open on `id`.
    pub fn open_handles(&self, id: &ObjectId) -> usize {
        self.handles.open_handles(id)
    }
}

impl fmt::Debug for SecureStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStorage").finish_non_exhaustive()
    }
}

/**
    Open handle on a persisted key object. Closing is dropping.
*/
pub struct PersistentObject {
    id: ObjectId,
    flags: DataFlags,
    key: EcKeyPair,
    _registration: Registration,
}

impl PersistentObject {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn flags(&self) -> DataFlags {
        self.flags
    }

    /// Copy a public attribute into `out`; the private scalar is never exported.
    pub fn buffer_attribute(&self, attr: Attribute, out: &mut OutputBuffer) -> TeeResult<()> {
        self.key.buffer_attribute(attr, out)
    }

    pub(crate) fn key(&self) -> &EcKeyPair {
        &self.key
    }
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
