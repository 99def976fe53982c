/*!
    Command handlers.

    Each handler first turns the raw slots into a typed parameter contract,
    which only succeeds when the declared layout is exactly the one the command
    expects. No buffer is read or written before that check passes.
*/

use tracing::{debug, error};

use signer_core::{
    COORDINATE_LEN, OutputBuffer, Param, ParamType, ParamTypes, Params, SHA256_DIGEST_LEN,
    TeeError, TeeResult,
};

use crate::constants::KEY_SIZE_BITS;
use crate::crypto::{DigestOperation, SignOperation};
use crate::object::Attribute;
use crate::session::Session;

fn check_layout(command: &str, expected: ParamTypes, declared: ParamTypes) -> TeeResult<()> {
    if declared != expected {
        error!("{command}: expected param types {expected}, got {declared}");
        return Err(TeeError::BadParameters);
    }
    Ok(())
}

/**
    Slots of a GET_KEY call: two output buffers for X and Y.
*/
pub(crate) struct GetKeyParams<'a> {
    pub x: &'a mut OutputBuffer,
    pub y: &'a mut OutputBuffer,
}

impl<'a> GetKeyParams<'a> {
    pub const LAYOUT: ParamTypes = ParamTypes::new(
        ParamType::MemrefOutput,
        ParamType::MemrefOutput,
        ParamType::None,
        ParamType::None,
    );

    pub fn from_params(declared: ParamTypes, params: &'a mut Params) -> TeeResult<Self> {
        check_layout("GET_KEY", Self::LAYOUT, declared)?;
        match params {
            [Param::MemrefOutput(x), Param::MemrefOutput(y), Param::None, Param::None] => {
                Ok(Self { x, y })
            }
            _ => Err(TeeError::BadParameters),
        }
    }
}

/**
    Slots of a SIGN call: the message and an output buffer for the signature.
*/
pub(crate) struct SignParams<'a> {
    pub message: &'a [u8],
    pub signature: &'a mut OutputBuffer,
}

impl<'a> SignParams<'a> {
    pub const LAYOUT: ParamTypes = ParamTypes::new(
        ParamType::MemrefInput,
        ParamType::MemrefOutput,
        ParamType::None,
        ParamType::None,
    );

    pub fn from_params(declared: ParamTypes, params: &'a mut Params) -> TeeResult<Self> {
        check_layout("SIGN", Self::LAYOUT, declared)?;
        match params {
            [
                Param::MemrefInput(message),
                Param::MemrefOutput(signature),
                Param::None,
                Param::None,
            ] => Ok(Self { message, signature }),
            _ => Err(TeeError::BadParameters),
        }
    }
}

/**
    Write the public key coordinates of the session's key.

    Both buffers are checked before either is written, so a failure leaves
    them empty.
*/
pub(crate) fn get_public_key(
    session: &Session,
    declared: ParamTypes,
    params: &mut Params,
) -> TeeResult<()> {
    let params = GetKeyParams::from_params(declared, params)?;
    let key = session.key()?;

    if params.x.capacity() < COORDINATE_LEN || params.y.capacity() < COORDINATE_LEN {
        error!(
            "public key buffers hold {} and {} bytes, need {COORDINATE_LEN} each",
            params.x.capacity(),
            params.y.capacity()
        );
        return Err(TeeError::ShortBuffer);
    }

    key.buffer_attribute(Attribute::EccPublicX, params.x)
        .inspect_err(|e| error!("reading public X failed: {e}"))?;
    key.buffer_attribute(Attribute::EccPublicY, params.y)
        .inspect_err(|e| error!("reading public Y failed: {e}"))?;

    debug!("session {} exported public key", session.id());
    Ok(())
}

/**
    Hash the message with SHA-256 and sign the digest with the session's key.

    Operations are dropped as soon as they are no longer needed, and on every
    early return.
*/
pub(crate) fn sign(session: &Session, declared: ParamTypes, params: &mut Params) -> TeeResult<()> {
    let params = SignParams::from_params(declared, params)?;
    let key = session.key()?;
    let operations = session.operations();

    let mut digest = [0u8; SHA256_DIGEST_LEN];
    {
        let mut op = DigestOperation::allocate(operations)?;
        op.do_final(params.message, &mut digest)?;
    }

    let mut op = SignOperation::allocate(operations, KEY_SIZE_BITS)?;
    op.set_key(key)?;
    op.sign_digest(&digest, params.signature)?;

    debug!(
        "session {} signed {} bytes",
        session.id(),
        params.message.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::instance::Instance;
    use crate::instance::tests::memory_instance;
    use crate::storage::{MemoryStore, SecureStorage};
    use signer_core::{Command, param_types_of};

    fn get_key_params(x: usize, y: usize) -> Params {
        [Param::output(x), Param::output(y), Param::None, Param::None]
    }

    fn sign_params(message: &[u8], capacity: usize) -> Params {
        [
            Param::input(message.to_vec()),
            Param::output(capacity),
            Param::None,
            Param::None,
        ]
    }

    fn invoke(session: &mut Session, command: Command, params: &mut Params) -> TeeResult<()> {
        let types = param_types_of(params);
        session.invoke(command.to_u32(), types, params)
    }

    #[test]
    fn get_key_reports_32_bytes_per_coordinate() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = get_key_params(64, 32);
        invoke(&mut session, Command::GetKey, &mut params).unwrap();
        assert_eq!(params[0].as_output().unwrap().size(), 32);
        assert_eq!(params[1].as_output().unwrap().size(), 32);
    }

    #[test]
    fn get_key_into_short_buffer() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = get_key_params(32, 16);
        let err = invoke(&mut session, Command::GetKey, &mut params).unwrap_err();
        assert_eq!(err, TeeError::ShortBuffer);
        assert_eq!(params[0].as_output().unwrap().size(), 0);
        assert_eq!(params[1].as_output().unwrap().size(), 0);

        let mut params = get_key_params(16, 32);
        let err = invoke(&mut session, Command::GetKey, &mut params).unwrap_err();
        assert_eq!(err, TeeError::ShortBuffer);
        assert!(params.iter().filter_map(Param::as_output).all(|b| b.size() == 0));
    }

    #[test]
    fn layout_mismatch_touches_no_buffer() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        // GET_KEY layout sent to SIGN
        let mut params = get_key_params(64, 64);
        let err = invoke(&mut session, Command::Sign, &mut params).unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
        assert!(params.iter().filter_map(Param::as_output).all(|b| b.size() == 0));

        // SIGN layout sent to GET_KEY
        let mut params = sign_params(b"msg", 64);
        let err = invoke(&mut session, Command::GetKey, &mut params).unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
        assert_eq!(params[1].as_output().unwrap().size(), 0);
    }

    #[test]
    fn declared_layout_must_match_slots() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = sign_params(b"msg", 64);
        let declared = GetKeyParams::LAYOUT;
        let err = session
            .invoke(Command::Sign.to_u32(), declared, &mut params)
            .unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
    }

    #[test]
    fn sign_writes_64_bytes_and_frees_operations() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = sign_params(b"Noser Engineering", 128);
        invoke(&mut session, Command::Sign, &mut params).unwrap();
        assert_eq!(params[1].as_output().unwrap().size(), 64);
        assert_eq!(instance.operations().live(), 0);
    }

    #[test]
    fn failed_sign_releases_every_operation() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = sign_params(b"Noser Engineering", 63);
        let err = invoke(&mut session, Command::Sign, &mut params).unwrap_err();
        assert_eq!(err, TeeError::ShortBuffer);
        assert_eq!(params[1].as_output().unwrap().size(), 0);
        assert_eq!(instance.operations().live(), 0);
    }

    #[test]
    fn sign_fails_when_operations_are_exhausted() {
        let storage = SecureStorage::new(Arc::new(MemoryStore::new()));
        let instance = Instance::with_operation_limit(storage, 1).unwrap();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        // Digest and sign operations are never alive together
        let mut params = sign_params(b"Noser Engineering", 64);
        invoke(&mut session, Command::Sign, &mut params).unwrap();

        let storage = SecureStorage::new(Arc::new(MemoryStore::new()));
        let instance = Instance::with_operation_limit(storage, 0).unwrap();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = sign_params(b"Noser Engineering", 64);
        let err = invoke(&mut session, Command::Sign, &mut params).unwrap_err();
        assert_eq!(err, TeeError::OutOfMemory);
        assert_eq!(params[1].as_output().unwrap().size(), 0);
    }

    #[test]
    fn empty_message_is_signed() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params = sign_params(b"", 64);
        invoke(&mut session, Command::Sign, &mut params).unwrap();
        assert_eq!(params[1].as_output().unwrap().size(), 64);
    }

    #[test]
    fn closed_session_rejects_commands() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();
        session.close();

        let mut params = get_key_params(32, 32);
        let err = invoke(&mut session, Command::GetKey, &mut params).unwrap_err();
        assert_eq!(err, TeeError::BadState);
    }
}
