/*!
    Framed binary protocol between the client and the isolated side.

    Every message is `u32 BE length || body`.

    Request body:
      [0]       op: u8 (1 = open session, 2 = invoke command, 3 = close session)
      [1..5]    session id: u32 BE (0 for open)
      [5..9]    command id: u32 BE (0 for open/close)
      [9..13]   param types: u32 BE, packed layout
      [13..]    one entry per slot, by declared type:
                  NONE          -> nothing
                  MEMREF_INPUT  -> u32 BE length || bytes
                  MEMREF_OUTPUT -> u32 BE capacity

    Response body:
      [0..4]    result code: u32 BE (0 = success)
      [4..8]    origin: u32 BE
      [8..12]   session id: u32 BE
      [12..]    success only: for each MEMREF_OUTPUT slot, u32 BE size || bytes
*/

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::constants::{MAX_FRAME_LEN, MAX_PARAM_SIZE};
use crate::error::{ErrorOrigin, SUCCESS, TeeError};
use crate::params::{NUM_PARAMS, OutputBuffer, Param, ParamType, ParamTypes, Params, param_types_of};

/**
    Errors from framing and decoding protocol messages.
*/
#[derive(Debug, Error)]
pub enum WireError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("message is truncated")]
    Truncated,
    #[error("message has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("unknown request op {0}")]
    UnknownOp(u8),
    #[error("invalid param types {0:#x}")]
    BadParamTypes(u32),
    #[error("parameter of {0} bytes exceeds the limit")]
    ParamTooLarge(usize),

    #[error("unknown error origin {0}")]
    UnknownOrigin(u32),
    #[error("slot {slot} returned {size} bytes into a {capacity}-byte buffer")]
    OutputOverflow {
        slot: usize,
        size: usize,
        capacity: usize,
    },
}

impl WireError {
    /**
        Result code to report when a message cannot be processed.
    */
    pub fn to_tee_error(&self) -> TeeError {
        match self {
            Self::Io(_) => TeeError::Communication,
            Self::BadParamTypes(_) | Self::ParamTooLarge(_) => TeeError::BadParameters,
            _ => TeeError::BadFormat,
        }
    }
}

/**
    Kind of request carried by a frame.
*/
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOp {
    OpenSession = 1,
    InvokeCommand = 2,
    CloseSession = 3,
}

impl RequestOp {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            1 => Some(Self::OpenSession),
            2 => Some(Self::InvokeCommand),
            3 => Some(Self::CloseSession),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/**
    A request crossing from the client into the isolated side.

    Output slots carry only their capacity; the isolated side allocates the
    buffer and sends back what was written.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub op: RequestOp,
    pub session: u32,
    pub command: u32,
    pub params: Params,
}

impl Request {
    pub fn open_session(params: Params) -> Self {
        Self {
            op: RequestOp::OpenSession,
            session: 0,
            command: 0,
            params,
        }
    }

    pub fn invoke(session: u32, command: u32, params: Params) -> Self {
        Self {
            op: RequestOp::InvokeCommand,
            session,
            command,
            params,
        }
    }

    pub fn close_session(session: u32) -> Self {
        Self {
            op: RequestOp::CloseSession,
            session,
            command: 0,
            params: Params::default(),
        }
    }

    /// Declared layout of the request's slots.
    pub fn param_types(&self) -> ParamTypes {
        param_types_of(&self.params)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(13);
        buffer.push(self.op.to_u8());
        buffer.extend(&self.session.to_be_bytes());
        buffer.extend(&self.command.to_be_bytes());
        buffer.extend(&self.param_types().raw().to_be_bytes());

        for param in &self.params {
            match param {
                Param::None => {}
                Param::MemrefInput(data) => {
                    buffer.extend(&(data.len() as u32).to_be_bytes());
                    buffer.extend(data);
                }
                Param::MemrefOutput(out) => {
                    buffer.extend(&(out.capacity() as u32).to_be_bytes());
                }
            }
        }

        buffer
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(body);

        let op = reader.u8()?;
        let op = RequestOp::from_u8(op).ok_or(WireError::UnknownOp(op))?;
        let session = reader.u32()?;
        let command = reader.u32()?;
        let raw_types = reader.u32()?;
        let types =
            ParamTypes::from_raw(raw_types).map_err(|_| WireError::BadParamTypes(raw_types))?;

        let mut params = Params::default();
        for (slot, ty) in params.iter_mut().zip(types.types()) {
            *slot = match ty {
                ParamType::None => Param::None,
                ParamType::MemrefInput => {
                    let len = reader.len_field()?;
                    Param::MemrefInput(reader.bytes(len)?.to_vec())
                }
                ParamType::MemrefOutput => {
                    let capacity = reader.len_field()?;
                    Param::MemrefOutput(OutputBuffer::with_capacity(capacity))
                }
            };
        }

        reader.finish()?;

        Ok(Self {
            op,
            session,
            command,
            params,
        })
    }
}

/**
    A response crossing back from the isolated side.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u32,
    pub origin: ErrorOrigin,
    pub session: u32,
    /// Written bytes for each output slot (success only).
    pub outputs: [Option<Vec<u8>>; NUM_PARAMS],
}

impl Response {
    /**
        Successful response carrying everything the callee wrote into `params`.
    */
    pub fn success(session: u32, params: &Params) -> Self {
        let mut outputs: [Option<Vec<u8>>; NUM_PARAMS] = Default::default();
        for (out, param) in outputs.iter_mut().zip(params) {
            *out = param.as_output().map(|buf| buf.as_bytes().to_vec());
        }
        Self {
            code: SUCCESS,
            origin: ErrorOrigin::TrustedApp,
            session,
            outputs,
        }
    }

    /**
        Failed response. Output slots are never serialized for failures.
    */
    pub fn failure(error: TeeError, origin: ErrorOrigin, session: u32) -> Self {
        Self {
            code: error.code(),
            origin,
            session,
            outputs: Default::default(),
        }
    }

    pub fn error(&self) -> Option<TeeError> {
        TeeError::from_code(self.code)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(12);
        buffer.extend(&self.code.to_be_bytes());
        buffer.extend(&self.origin.to_u32().to_be_bytes());
        buffer.extend(&self.session.to_be_bytes());

        if self.code == SUCCESS {
            for data in self.outputs.iter().flatten() {
                buffer.extend(&(data.len() as u32).to_be_bytes());
                buffer.extend(data);
            }
        }

        buffer
    }

    /**
        Decode a response to a request that declared `types`.
    */
    pub fn decode(body: &[u8], types: ParamTypes) -> Result<Self, WireError> {
        let mut reader = Reader::new(body);

        let code = reader.u32()?;
        let origin = reader.u32()?;
        let origin = ErrorOrigin::from_u32(origin).ok_or(WireError::UnknownOrigin(origin))?;
        let session = reader.u32()?;

        let mut outputs: [Option<Vec<u8>>; NUM_PARAMS] = Default::default();
        if code == SUCCESS {
            for (out, ty) in outputs.iter_mut().zip(types.types()) {
                if ty == ParamType::MemrefOutput {
                    let len = reader.len_field()?;
                    *out = Some(reader.bytes(len)?.to_vec());
                }
            }
        }

        reader.finish()?;

        Ok(Self {
            code,
            origin,
            session,
            outputs,
        })
    }

    /**
        Copy returned output data into the caller's buffers.

        A size larger than the caller's declared capacity is a protocol violation.
    */
    pub fn apply_outputs(&self, params: &mut Params) -> Result<(), WireError> {
        for (slot, (param, data)) in params.iter_mut().zip(&self.outputs).enumerate() {
            if let (Some(buf), Some(data)) = (param.as_output_mut(), data) {
                let capacity = buf.capacity();
                buf.write(data).map_err(|_| WireError::OutputOverflow {
                    slot,
                    size: data.len(),
                    capacity,
                })?;
            }
        }
        Ok(())
    }
}

/**
    Write one length-prefixed frame.
*/
pub fn write_frame(writer: &mut impl Write, body: &[u8]) -> Result<(), WireError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/**
    Read one length-prefixed frame.

    Returns `Ok(None)` when the peer closed the stream cleanly between frames.
*/
pub fn read_frame(reader: &mut impl Read) -> Result<Option<Vec<u8>>, WireError> {
    let mut len = [0u8; 4];
    let mut filled = 0;
    while filled < len.len() {
        match reader.read(&mut len[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(WireError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => WireError::Truncated,
        _ => WireError::Io(e),
    })?;
    Ok(Some(body))
}

/**
    Bounds-checked cursor over a message body.
*/
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        let slice = self.data.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// A slot length or capacity, bounded by [`MAX_PARAM_SIZE`].
    fn len_field(&mut self) -> Result<usize, WireError> {
        let len = self.u32()? as usize;
        if len > MAX_PARAM_SIZE {
            return Err(WireError::ParamTooLarge(len));
        }
        Ok(len)
    }

    fn finish(self) -> Result<(), WireError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}
