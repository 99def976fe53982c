/*!
    Isolated side of the signing service.

    Owns the device key and answers boundary requests: sessions are opened
    against the persisted key, and commands can read its public coordinates or
    sign messages with it. The private scalar never leaves this crate.
*/

#![allow(clippy::doc_overindented_list_items)]

mod app;
mod constants;
mod crypto;
mod dispatch;
mod handlers;
mod instance;
mod object;
mod session;

pub mod server;
pub mod storage;

pub use self::app::TrustedApp;
pub use self::constants::{
    KEY_OBJECT_ID, KEY_SIZE_BITS, KEYPAIR_CONTAINER_BITS, MAX_LIVE_OPERATIONS,
};
pub use self::crypto::{Algorithm, DigestOperation, OperationTracker, SignOperation};
pub use self::instance::Instance;
pub use self::object::{Attribute, EccCurve, ObjectType, TransientObject};
pub use self::session::{Session, SessionState};
pub use self::storage::{
    DataFlags, FsStore, MemoryStore, ObjectId, ObjectStore, PersistentObject, SecureStorage,
};
