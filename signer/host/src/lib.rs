/*!
    Client side of the signing service: boundary calls, the interactive menu,
    the artifact files and offline verification.
*/

#![allow(clippy::doc_overindented_list_items)]

mod artifact;
mod context;

pub mod driver;
pub mod verify;

pub use self::artifact::{ArtifactError, PublicKeyArtifact, SignatureArtifact};
pub use self::context::{Context, InvokeError, Session};
pub use self::driver::{DriverConfig, DriverError, MenuChoice};
pub use self::verify::{Verification, VerifyError};
