/*!
    Parameter slots that cross the boundary with every request.

    A request carries up to [`NUM_PARAMS`] slots. The caller declares the type of
    each slot up front ([`ParamTypes`]); handlers compare that declaration against
    their own contract before they look at any buffer.
*/

use core::fmt;

use crate::error::{TeeError, TeeResult};

/// Number of parameter slots in every request.
pub const NUM_PARAMS: usize = 4;

/**
    Type of a single parameter slot, as packed into one nibble of [`ParamTypes`].
*/
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamType {
    #[default]
    None = 0x0,
    MemrefInput = 0x5,
    MemrefOutput = 0x6,
}

impl ParamType {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            0x0 => Some(Self::None),
            0x5 => Some(Self::MemrefInput),
            0x6 => Some(Self::MemrefOutput),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/**
    Declared layout of all four parameter slots.

    Packed on the wire as a `u32`, four bits per slot, slot 0 in the lowest nibble.
*/
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamTypes([ParamType; NUM_PARAMS]);

impl ParamTypes {
    /// Layout with every slot unused.
    pub const NONE: Self = Self([ParamType::None; NUM_PARAMS]);

    pub const fn new(t0: ParamType, t1: ParamType, t2: ParamType, t3: ParamType) -> Self {
        Self([t0, t1, t2, t3])
    }

    /**
        Unpack a layout received from the other side of the boundary.

        Unknown nibbles and any bits above the four slots are rejected.
    */
    pub fn from_raw(raw: u32) -> TeeResult<Self> {
        if raw >> (4 * NUM_PARAMS) != 0 {
            return Err(TeeError::BadParameters);
        }
        let mut types = [ParamType::None; NUM_PARAMS];
        for (i, slot) in types.iter_mut().enumerate() {
            let nibble = ((raw >> (4 * i)) & 0xF) as u8;
            *slot = ParamType::from_u8(nibble).ok_or(TeeError::BadParameters)?;
        }
        Ok(Self(types))
    }

    pub const fn raw(self) -> u32 {
        let mut raw = 0u32;
        let mut i = 0;
        while i < NUM_PARAMS {
            raw |= (self.0[i] as u32) << (4 * i);
            i += 1;
        }
        raw
    }

    pub const fn get(self, index: usize) -> ParamType {
        self.0[index]
    }

    pub const fn types(self) -> [ParamType; NUM_PARAMS] {
        self.0
    }
}

impl fmt::Debug for ParamTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamTypes({:#x})", self.raw())
    }
}

impl fmt::Display for ParamTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.raw())
    }
}

/**
    Caller-sized output buffer.

    The capacity is fixed at creation; the callee records how many bytes it
    actually wrote. The written size can never exceed the capacity.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    data: Vec<u8>,
    size: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written by the callee.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The bytes written by the callee.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /**
        Replace the buffer contents with `bytes`.

        Fails with [`TeeError::ShortBuffer`] and leaves the buffer untouched when
        `bytes` does not fit.
    */
    pub fn write(&mut self, bytes: &[u8]) -> TeeResult<()> {
        if bytes.len() > self.capacity() {
            return Err(TeeError::ShortBuffer);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.size = bytes.len();
        Ok(())
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.size);
        self.data
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size)
            .finish()
    }
}

/**
    A single parameter slot.
*/
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Param {
    #[default]
    None,
    MemrefInput(Vec<u8>),
    MemrefOutput(OutputBuffer),
}

impl Param {
    pub fn input(data: impl Into<Vec<u8>>) -> Self {
        Self::MemrefInput(data.into())
    }

    pub fn output(capacity: usize) -> Self {
        Self::MemrefOutput(OutputBuffer::with_capacity(capacity))
    }

    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::None => ParamType::None,
            Self::MemrefInput(_) => ParamType::MemrefInput,
            Self::MemrefOutput(_) => ParamType::MemrefOutput,
        }
    }

    pub fn as_output(&self) -> Option<&OutputBuffer> {
        match self {
            Self::MemrefOutput(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn as_output_mut(&mut self) -> Option<&mut OutputBuffer> {
        match self {
            Self::MemrefOutput(buf) => Some(buf),
            _ => None,
        }
    }
}

/// All four parameter slots of one request.
pub type Params = [Param; NUM_PARAMS];

/// An empty set of parameter slots.
pub fn no_params() -> Params {
    Default::default()
}

/// Layout described by the slots themselves.
pub fn param_types_of(params: &Params) -> ParamTypes {
    ParamTypes::new(
        params[0].param_type(),
        params[1].param_type(),
        params[2].param_type(),
        params[3].param_type(),
    )
}
