use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, error, info};

use signer_core::{ParamTypes, TeeError, TeeResult};

use crate::constants::{KEY_OBJECT_ID, KEY_SIZE_BITS, KEYPAIR_CONTAINER_BITS, MAX_LIVE_OPERATIONS};
use crate::crypto::OperationTracker;
use crate::object::{EccCurve, ObjectType, TransientObject};
use crate::session::Session;
use crate::storage::{DataFlags, ObjectId, SecureStorage};

/// Flags every handle on the device key is opened with.
const KEY_FLAGS: DataFlags = DataFlags::ACCESS_READ.union(DataFlags::SHARE_READ);

/**
    Device-wide service state, created once at startup.

    Creating an instance makes sure the device key exists, generating and
    persisting it the first time. Later instances over the same storage reuse
    the stored key.
*/
#[derive(Debug)]
pub struct Instance {
    storage: SecureStorage,
    key_id: ObjectId,
    operations: OperationTracker,
    next_session: AtomicU32,
}

impl Instance {
    pub fn create(storage: SecureStorage) -> TeeResult<Self> {
        Self::with_operation_limit(storage, MAX_LIVE_OPERATIONS)
    }

    /**
        Like [`Instance::create`], with a custom ceiling on live operations.
    */
    pub fn with_operation_limit(storage: SecureStorage, limit: usize) -> TeeResult<Self> {
        let key_id = ObjectId::new(KEY_OBJECT_ID)?;

        match storage.open(&key_id, KEY_FLAGS) {
            Ok(_) => info!("using existing device key {key_id}"),
            Err(TeeError::ItemNotFound) => {
                info!("device key {key_id} not found, generating");
                generate_key(&storage, &key_id)?;
            }
            Err(e) => {
                error!("cannot open device key {key_id}: {e} ({:#010x})", e.code());
                return Err(e);
            }
        }

        Ok(Self {
            storage,
            key_id,
            operations: OperationTracker::new(limit),
            next_session: AtomicU32::new(1),
        })
    }

    pub fn key_id(&self) -> &ObjectId {
        &self.key_id
    }

    pub fn storage(&self) -> &SecureStorage {
        &self.storage
    }

    pub fn operations(&self) -> &OperationTracker {
        &self.operations
    }

    /**
        Open a session bound to the device key.

        The caller must declare an empty parameter layout.
    */
    pub fn open_session(&self, types: ParamTypes) -> TeeResult<Session> {
        if types != ParamTypes::NONE {
            error!("open session expects {}, got {types}", ParamTypes::NONE);
            return Err(TeeError::BadParameters);
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id, self.operations.clone());
        session.bind(self.storage.open(&self.key_id, KEY_FLAGS)?)?;

        debug!("opened session {id}");
        Ok(session)
    }
}

fn generate_key(storage: &SecureStorage, key_id: &ObjectId) -> TeeResult<()> {
    let mut transient = TransientObject::allocate(ObjectType::EcdsaKeypair, KEYPAIR_CONTAINER_BITS)?;
    // Container is sized for P-521 while the key itself is P-256
    debug!(
        "allocated {:?} container of {} bits",
        transient.object_type(),
        transient.max_key_bits()
    );
    transient.generate_key(KEY_SIZE_BITS, EccCurve::NistP256)?;

    // Handle and transient container are released on return
    match storage.create(key_id, KEY_FLAGS, &transient) {
        Ok(_) => info!("generated device key {key_id}"),
        Err(TeeError::AccessConflict) => {
            // Another instance on the same storage persisted its key first
            info!("device key {key_id} appeared while generating, keeping the stored one");
            storage.open(key_id, KEY_FLAGS)?;
        }
        Err(e) => {
            error!("cannot persist device key {key_id}: {e} ({:#010x})", e.code());
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::session::SessionState;
    use crate::storage::{FsStore, MemoryStore, ObjectStore};
    use signer_core::{OutputBuffer, ParamType};

    use crate::object::Attribute;

    /// Backend that fails every call with a fixed error.
    pub(crate) struct FailingStore(pub TeeError);

    impl ObjectStore for FailingStore {
        fn load(&self, _: &ObjectId) -> TeeResult<Vec<u8>> {
            Err(self.0)
        }

        fn store(&self, _: &ObjectId, _: &[u8], _: bool) -> TeeResult<()> {
            Err(self.0)
        }
    }

    /// Backend whose first load misses, as if another instance had not yet
    /// finished writing the key.
    struct LateStore {
        inner: MemoryStore,
        missed: AtomicBool,
    }

    impl ObjectStore for LateStore {
        fn load(&self, id: &ObjectId) -> TeeResult<Vec<u8>> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Err(TeeError::ItemNotFound);
            }
            self.inner.load(id)
        }

        fn store(&self, id: &ObjectId, data: &[u8], overwrite: bool) -> TeeResult<()> {
            self.inner.store(id, data, overwrite)
        }
    }

    pub(crate) fn memory_instance() -> Instance {
        Instance::create(SecureStorage::new(Arc::new(MemoryStore::new()))).unwrap()
    }

    fn public_x(session: &Session) -> Vec<u8> {
        let mut x = OutputBuffer::with_capacity(32);
        session
            .key()
            .unwrap()
            .buffer_attribute(Attribute::EccPublicX, &mut x)
            .unwrap();
        x.into_bytes()
    }

    #[test]
    fn first_start_generates_and_persists_key() {
        let backend = Arc::new(MemoryStore::new());
        assert!(backend.is_empty());

        let instance = Instance::create(SecureStorage::new(backend.clone())).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(instance.key_id().as_bytes(), b"signer.key");
        assert_eq!(instance.storage().open_handles(instance.key_id()), 0);
    }

    #[test]
    fn key_generation_is_idempotent_across_restarts() {
        let dir = tempfile::tempdir().unwrap();

        let first = {
            let store = FsStore::new(dir.path()).unwrap();
            let instance = Instance::create(SecureStorage::new(Arc::new(store))).unwrap();
            public_x(&instance.open_session(ParamTypes::NONE).unwrap())
        };

        let second = {
            let store = FsStore::new(dir.path()).unwrap();
            let instance = Instance::create(SecureStorage::new(Arc::new(store))).unwrap();
            public_x(&instance.open_session(ParamTypes::NONE).unwrap())
        };

        assert_eq!(first, second);
    }

    #[test]
    fn storage_failure_is_fatal() {
        let storage = SecureStorage::new(Arc::new(FailingStore(TeeError::StorageNotAvailable)));
        let err = Instance::create(storage).unwrap_err();
        assert_eq!(err, TeeError::StorageNotAvailable);
    }

    #[test]
    fn corrupt_key_is_not_regenerated() {
        let backend = Arc::new(MemoryStore::new());
        let id = ObjectId::new(KEY_OBJECT_ID).unwrap();
        backend.store(&id, b"garbage", false).unwrap();

        let err = Instance::create(SecureStorage::new(backend.clone())).unwrap_err();
        assert_eq!(err, TeeError::CorruptObject);
        assert_eq!(backend.load(&id).unwrap(), b"garbage");
    }

    #[test]
    fn open_session_requires_empty_layout() {
        let instance = memory_instance();
        let types = ParamTypes::new(
            ParamType::MemrefInput,
            ParamType::None,
            ParamType::None,
            ParamType::None,
        );
        let err = instance.open_session(types).unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
        assert_eq!(instance.storage().open_handles(instance.key_id()), 0);
    }

    #[test]
    fn sessions_get_distinct_ids_and_share_the_key() {
        let instance = memory_instance();
        let a = instance.open_session(ParamTypes::NONE).unwrap();
        let b = instance.open_session(ParamTypes::NONE).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), SessionState::Active);
        assert_eq!(public_x(&a), public_x(&b));
        assert_eq!(instance.storage().open_handles(instance.key_id()), 2);
    }

    #[test]
    fn closing_one_session_keeps_the_other_usable() {
        let instance = memory_instance();
        let mut a = instance.open_session(ParamTypes::NONE).unwrap();
        let b = instance.open_session(ParamTypes::NONE).unwrap();

        a.close();
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(a.key().unwrap_err(), TeeError::BadState);
        assert_eq!(public_x(&b).len(), 32);
        assert_eq!(instance.storage().open_handles(instance.key_id()), 1);

        drop(b);
        assert_eq!(instance.storage().open_handles(instance.key_id()), 0);
    }

    #[test]
    fn key_persisted_by_another_instance_is_kept() {
        let existing = Arc::new(MemoryStore::new());
        let first = Instance::create(SecureStorage::new(existing.clone())).unwrap();
        let expected = public_x(&first.open_session(ParamTypes::NONE).unwrap());
        let id = ObjectId::new(KEY_OBJECT_ID).unwrap();

        let late = LateStore {
            inner: MemoryStore::new(),
            missed: AtomicBool::new(false),
        };
        late.inner.store(&id, &existing.load(&id).unwrap(), false).unwrap();

        let instance = Instance::create(SecureStorage::new(Arc::new(late))).unwrap();
        let session = instance.open_session(ParamTypes::NONE).unwrap();
        assert_eq!(public_x(&session), expected);
    }

    #[test]
    fn concurrent_first_starts_agree_on_one_key() {
        for _ in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let path = dir.path().to_path_buf();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let store = FsStore::new(&path).unwrap();
                        barrier.wait();
                        let instance =
                            Instance::create(SecureStorage::new(Arc::new(store))).unwrap();
                        public_x(&instance.open_session(ParamTypes::NONE).unwrap())
                    })
                })
                .collect();

            let keys: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
            assert_eq!(keys[0], keys[1]);
        }
    }
}
