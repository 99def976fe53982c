use tracing::{debug, error};

use signer_core::{ParamTypes, Params, TeeError, TeeResult};

use crate::crypto::OperationTracker;
use crate::dispatch;
use crate::storage::PersistentObject;

/**
    Lifecycle of a session.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Allocated, key not bound yet.
    Created,
    /// Key bound; commands are accepted.
    Active,
    /// Key released; nothing is accepted anymore.
    Closed,
}

/**
    A client session holding an open handle on the device key.
*/
#[derive(Debug)]
pub struct Session {
    id: u32,
    state: SessionState,
    key: Option<PersistentObject>,
    operations: OperationTracker,
}

impl Session {
    pub(crate) fn new(id: u32, operations: OperationTracker) -> Self {
        Self {
            id,
            state: SessionState::Created,
            key: None,
            operations,
        }
    }

    /**
        Bind the key handle and make the session active.
    */
    pub(crate) fn bind(&mut self, key: PersistentObject) -> TeeResult<()> {
        if self.state != SessionState::Created {
            error!("session {} cannot bind a key in state {:?}", self.id, self.state);
            return Err(TeeError::BadState);
        }
        debug!("session {} bound to {}", self.id, key.id());
        self.key = Some(key);
        self.state = SessionState::Active;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn operations(&self) -> &OperationTracker {
        &self.operations
    }

    /**
        The bound key handle. Fails with [`TeeError::BadState`] unless active.
    */
    pub fn key(&self) -> TeeResult<&PersistentObject> {
        match (&self.state, &self.key) {
            (SessionState::Active, Some(key)) => Ok(key),
            _ => {
                error!("session {} has no bound key ({:?})", self.id, self.state);
                Err(TeeError::BadState)
            }
        }
    }

    /**
        Run one command against this session.

        `types` is the layout the caller declared for `params`.
    */
    pub fn invoke(&mut self, command: u32, types: ParamTypes, params: &mut Params) -> TeeResult<()> {
        if self.state != SessionState::Active {
            error!(
                "session {} rejects command {command} in state {:?}",
                self.id, self.state
            );
            return Err(TeeError::BadState);
        }
        dispatch::invoke_command(self, command, types, params)
    }

    /**
        Release the key handle. Closing twice is a no-op.
    */
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.key = None;
        self.state = SessionState::Closed;
        debug!("session {} closed", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
