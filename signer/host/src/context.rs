/*!
    Client side of the boundary.

    A [`Context`] owns the connection to the isolated side; a [`Session`] is a
    handle on one session opened through it. Every call is a blocking
    request/response exchange over the framed protocol.
*/

use std::mem;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use signer_core::wire::{Request, Response, read_frame, write_frame};
use signer_core::{
    COORDINATE_LEN, Command, ErrorOrigin, Param, Params, SIGNATURE_LEN, TeeError, no_params,
};
use signer_ta::TrustedApp;
use signer_ta::server::serve_connection;

use crate::artifact::{PublicKeyArtifact, SignatureArtifact};

/**
    A failed boundary call: the result code and the layer that produced it.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{error} (code {code:#010x}, origin {origin})", code = .error.code())]
pub struct InvokeError {
    pub error: TeeError,
    pub origin: ErrorOrigin,
}

impl InvokeError {
    pub const fn new(error: TeeError, origin: ErrorOrigin) -> Self {
        Self { error, origin }
    }

    pub const fn code(&self) -> u32 {
        self.error.code()
    }

    const fn comms() -> Self {
        Self::new(TeeError::Communication, ErrorOrigin::Comms)
    }
}

/**
    Connection to the isolated side.
*/
pub struct Context {
    stream: Mutex<UnixStream>,
    server: Option<JoinHandle<()>>,
}

impl Context {
    /**
        Connect to a signing daemon listening on `path`.
    */
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, InvokeError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| {
            error!("cannot connect to {}: {e}", path.display());
            InvokeError::new(TeeError::Communication, ErrorOrigin::Api)
        })?;

        debug!("connected to {}", path.display());

        Ok(Self {
            stream: Mutex::new(stream),
            server: None,
        })
    }

    /**
        Run `app` on a dedicated thread and connect to it over a socket pair.
    */
    pub fn in_process(app: TrustedApp) -> Result<Self, InvokeError> {
        let (client, server) = UnixStream::pair().map_err(|e| {
            error!("cannot create socket pair: {e}");
            InvokeError::new(TeeError::Communication, ErrorOrigin::Api)
        })?;

        let handle = thread::Builder::new()
            .name("signer-ta".into())
            .spawn(move || {
                if let Err(e) = serve_connection(&app, server) {
                    warn!("in-process server stopped: {e}");
                }
            })
            .map_err(|e| {
                error!("cannot spawn server thread: {e}");
                InvokeError::new(TeeError::Generic, ErrorOrigin::Api)
            })?;

        Ok(Self {
            stream: Mutex::new(client),
            server: Some(handle),
        })
    }

    /**
        Send one request and wait for its response.
    */
    fn call(&self, request: &Request) -> Result<Response, InvokeError> {
        let mut stream = self.stream.lock();

        write_frame(&mut *stream, &request.encode()).map_err(|e| {
            error!("sending request failed: {e}");
            InvokeError::comms()
        })?;

        let body = match read_frame(&mut *stream) {
            Ok(Some(body)) => body,
            Ok(None) => {
                error!("isolated side closed the connection");
                return Err(InvokeError::comms());
            }
            Err(e) => {
                error!("receiving response failed: {e}");
                return Err(InvokeError::comms());
            }
        };

        Response::decode(&body, request.param_types()).map_err(|e| {
            error!("malformed response: {e}");
            InvokeError::comms()
        })
    }

    /**
        Open a session with an empty parameter layout.
    */
    pub fn open_session(&self) -> Result<Session<'_>, InvokeError> {
        self.open_session_with(no_params())
    }

    /**
        Open a session, passing `params` along with the request.
    */
    pub fn open_session_with(&self, params: Params) -> Result<Session<'_>, InvokeError> {
        let response = self.call(&Request::open_session(params))?;
        if let Some(error) = response.error() {
            return Err(InvokeError::new(error, response.origin));
        }

        debug!("opened session {}", response.session);

        Ok(Session {
            context: self,
            id: response.session,
            open: true,
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.stream.get_mut().shutdown(Shutdown::Both) {
            debug!("shutting down connection: {e}");
        }
        if let Some(handle) = self.server.take()
            && handle.join().is_err()
        {
            error!("in-process server thread panicked");
        }
    }
}

/**
    An open session. Dropping it closes the session.
*/
pub struct Session<'c> {
    context: &'c Context,
    id: u32,
    open: bool,
}

impl Session<'_> {
    pub fn id(&self) -> u32 {
        self.id
    }

    /**
        Invoke a raw command.

        On success the output buffers in `params` hold what the isolated side
        wrote; on failure they are left as they were.
    */
    pub fn invoke_command(&self, command: u32, params: &mut Params) -> Result<(), InvokeError> {
        let request = Request::invoke(self.id, command, mem::take(params));
        let result = self.context.call(&request);
        *params = request.params;

        let response = result?;
        if let Some(error) = response.error() {
            return Err(InvokeError::new(error, response.origin));
        }

        response.apply_outputs(params).map_err(|e| {
            error!("rejecting response: {e}");
            InvokeError::comms()
        })
    }

    /**
        Read the public coordinates of the device key.
    */
    pub fn get_public_key(&self) -> Result<PublicKeyArtifact, InvokeError> {
        let mut params: Params = [
            Param::output(COORDINATE_LEN),
            Param::output(COORDINATE_LEN),
            Param::None,
            Param::None,
        ];
        self.invoke_command(Command::GetKey.to_u32(), &mut params)?;

        let coordinate = |param: &Param| -> Result<[u8; COORDINATE_LEN], InvokeError> {
            let bytes = param.as_output().map(|buf| buf.as_bytes()).unwrap_or_default();
            bytes.try_into().map_err(|_| {
                error!(
                    "expected {COORDINATE_LEN}-byte coordinate, got {} bytes",
                    bytes.len()
                );
                InvokeError::comms()
            })
        };

        Ok(PublicKeyArtifact {
            x: coordinate(&params[0])?,
            y: coordinate(&params[1])?,
        })
    }

    /**
        Sign `message` with the device key.
    */
    pub fn sign(&self, message: &[u8]) -> Result<SignatureArtifact, InvokeError> {
        let mut params: Params = [
            Param::input(message),
            Param::output(SIGNATURE_LEN),
            Param::None,
            Param::None,
        ];
        self.invoke_command(Command::Sign.to_u32(), &mut params)?;

        let bytes = params[1]
            .as_output()
            .map(|buf| buf.as_bytes())
            .unwrap_or_default();
        SignatureArtifact::from_bytes(bytes).ok_or_else(|| {
            error!(
                "expected {SIGNATURE_LEN}-byte signature, got {} bytes",
                bytes.len()
            );
            InvokeError::comms()
        })
    }

    /**
        Close the session explicitly, reporting any failure.
    */
    pub fn close(mut self) -> Result<(), InvokeError> {
        self.open = false;
        self.send_close()
    }

    fn send_close(&self) -> Result<(), InvokeError> {
        let response = self.context.call(&Request::close_session(self.id))?;
        match response.error() {
            Some(error) => Err(InvokeError::new(error, response.origin)),
            None => {
                debug!("closed session {}", self.id);
                Ok(())
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self.send_close()
        {
            warn!("closing session {} failed: {e}", self.id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use signer_ta::{Instance, MemoryStore, SecureStorage, TrustedApp};

    pub(crate) fn in_process() -> Context {
        let storage = SecureStorage::new(Arc::new(MemoryStore::new()));
        Context::in_process(TrustedApp::start(storage)).unwrap()
    }

    #[test]
    fn invoke_error_display() {
        let err = InvokeError::new(TeeError::ShortBuffer, ErrorOrigin::TrustedApp);
        assert_eq!(
            err.to_string(),
            "short buffer (code 0xffff0010, origin trusted app)"
        );
        assert_eq!(err.code(), 0xFFFF_0010);
    }

    #[test]
    fn public_key_is_stable_across_calls() {
        let context = in_process();
        let session = context.open_session().unwrap();
        let first = session.get_public_key().unwrap();
        let second = session.get_public_key().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn sessions_on_one_context_share_the_key() {
        let context = in_process();
        let a = context.open_session().unwrap();
        let b = context.open_session().unwrap();
        assert_ne!(a.id(), b.id());

        let key = a.get_public_key().unwrap();
        a.close().unwrap();
        assert_eq!(b.get_public_key().unwrap(), key);
    }

    #[test]
    fn open_with_parameters_fails_in_the_app() {
        let context = in_process();
        let params = [Param::input(b"x"), Param::None, Param::None, Param::None];
        let err = context.open_session_with(params).err().unwrap();
        assert_eq!(err, InvokeError::new(TeeError::BadParameters, ErrorOrigin::TrustedApp));
    }

    #[test]
    fn exhausted_operations_fail_sign() {
        let storage = SecureStorage::new(Arc::new(MemoryStore::new()));
        let instance = Instance::with_operation_limit(storage, 0).unwrap();
        let context = Context::in_process(TrustedApp::from_instance(instance)).unwrap();
        let session = context.open_session().unwrap();

        let err = session.sign(b"message").unwrap_err();
        assert_eq!(err, InvokeError::new(TeeError::OutOfMemory, ErrorOrigin::TrustedApp));
    }

    #[test]
    fn short_output_is_reported_and_buffer_untouched() {
        let context = in_process();
        let session = context.open_session().unwrap();

        let mut params: Params = [Param::output(32), Param::output(8), Param::None, Param::None];
        let err = session
            .invoke_command(Command::GetKey.to_u32(), &mut params)
            .unwrap_err();
        assert_eq!(err.error, TeeError::ShortBuffer);
        assert_eq!(params[0].as_output().unwrap().size(), 0);
        assert_eq!(params[1].as_output().unwrap().capacity(), 8);
    }

    #[test]
    fn unknown_command_is_not_supported() {
        let context = in_process();
        let session = context.open_session().unwrap();
        let mut params = no_params();
        let err = session.invoke_command(7, &mut params).unwrap_err();
        assert_eq!(err, InvokeError::new(TeeError::NotSupported, ErrorOrigin::TrustedApp));
    }

    #[test]
    fn connects_to_a_daemon_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let storage = SecureStorage::new(Arc::new(MemoryStore::new()));
        let app = Arc::new(TrustedApp::start(storage));
        thread::spawn(move || signer_ta::server::serve_unix(app, listener));

        let context = Context::connect(&path).unwrap();
        let session = context.open_session().unwrap();
        assert_eq!(session.sign(b"hello").unwrap().to_bytes().len(), 64);
    }

    #[test]
    fn connect_to_missing_socket_is_an_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Context::connect(dir.path().join("missing.sock")).err().unwrap();
        assert_eq!(err, InvokeError::new(TeeError::Communication, ErrorOrigin::Api));
    }
}
