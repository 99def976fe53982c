use tracing::error;

use signer_core::{ErrorOrigin, ParamTypes, TeeError};

use crate::instance::Instance;
use crate::session::Session;
use crate::storage::SecureStorage;

/**
    The isolated side as seen by the boundary server.

    Holds either a ready [`Instance`] or the error that prevented creating one.
    A failed instance is kept so that every later session open reports the
    original failure.
*/
#[derive(Debug)]
pub struct TrustedApp {
    instance: Result<Instance, TeeError>,
}

impl TrustedApp {
    /**
        Create the instance over `storage`.
    */
    pub fn start(storage: SecureStorage) -> Self {
        let instance = Instance::create(storage).inspect_err(|e| {
            error!("instance creation failed: {e} ({:#010x})", e.code());
        });
        Self { instance }
    }

    pub fn from_instance(instance: Instance) -> Self {
        Self {
            instance: Ok(instance),
        }
    }

    pub fn instance(&self) -> Result<&Instance, TeeError> {
        self.instance.as_ref().map_err(|e| *e)
    }

    pub fn is_ready(&self) -> bool {
        self.instance.is_ok()
    }

    /**
        Open a session, reporting which layer rejected it on failure.
    */
    pub fn open_session(&self, types: ParamTypes) -> Result<Session, (TeeError, ErrorOrigin)> {
        let instance = self.instance().map_err(|e| (e, ErrorOrigin::Tee))?;
        instance
            .open_session(types)
            .map_err(|e| (e, ErrorOrigin::TrustedApp))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::instance::tests::FailingStore;
    use crate::storage::MemoryStore;

    #[test]
    fn failed_instance_rejects_every_session() {
        let storage = SecureStorage::new(Arc::new(FailingStore(TeeError::StorageNotAvailable)));
        let app = TrustedApp::start(storage);
        assert!(!app.is_ready());

        for _ in 0..2 {
            let (err, origin) = app.open_session(ParamTypes::NONE).unwrap_err();
            assert_eq!(err, TeeError::StorageNotAvailable);
            assert_eq!(origin, ErrorOrigin::Tee);
        }
    }

    #[test]
    fn session_errors_come_from_the_app() {
        let app = TrustedApp::start(SecureStorage::new(Arc::new(MemoryStore::new())));
        assert!(app.is_ready());

        let (err, origin) = app.open_session(ParamTypes::from_raw(0x5).unwrap()).unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
        assert_eq!(origin, ErrorOrigin::TrustedApp);

        app.open_session(ParamTypes::NONE).unwrap();
    }
}
