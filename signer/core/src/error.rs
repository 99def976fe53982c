use core::fmt;

use thiserror::Error;

/**
    Result codes that cross the boundary between the client and the isolated side.

    Every variant has a fixed numeric code (see [`TeeError::code`]); the code,
    not the Rust value, is what travels over the wire.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum TeeError {
    // ── Generic / crypto ───────────────────────────────────────────────
    #[error("generic failure")]
    Generic,
    #[error("out of memory")]
    OutOfMemory,

    // ── Caller errors ──────────────────────────────────────────────────
    #[error("bad parameters")]
    BadParameters,
    #[error("bad format")]
    BadFormat,
    #[error("short buffer")]
    ShortBuffer,
    #[error("not supported")]
    NotSupported,
    #[error("bad state")]
    BadState,

    // ── Storage ────────────────────────────────────────────────────────
    #[error("item not found")]
    ItemNotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("access conflict")]
    AccessConflict,
    #[error("corrupt object")]
    CorruptObject,
    #[error("storage not available")]
    StorageNotAvailable,

    // ── Transport ──────────────────────────────────────────────────────
    #[error("communication failure")]
    Communication,

    #[error("unknown result code {0:#010x}")]
    Unknown(u32),
}

impl TeeError {
    pub const fn code(self) -> u32 {
        match self {
            Self::Generic => 0xFFFF_0000,
            Self::AccessDenied => 0xFFFF_0001,
            Self::AccessConflict => 0xFFFF_0003,
            Self::BadFormat => 0xFFFF_0005,
            Self::BadParameters => 0xFFFF_0006,
            Self::BadState => 0xFFFF_0007,
            Self::ItemNotFound => 0xFFFF_0008,
            Self::NotSupported => 0xFFFF_000A,
            Self::OutOfMemory => 0xFFFF_000C,
            Self::Communication => 0xFFFF_000E,
            Self::ShortBuffer => 0xFFFF_0010,
            Self::CorruptObject => 0xF010_0001,
            Self::StorageNotAvailable => 0xF010_0003,
            Self::Unknown(code) => code,
        }
    }

    /**
        Map a numeric result code back to an error.

        Returns `None` for [`SUCCESS`], which is not an error.
    */
    pub const fn from_code(code: u32) -> Option<Self> {
        let err = match code {
            SUCCESS => return None,
            0xFFFF_0000 => Self::Generic,
            0xFFFF_0001 => Self::AccessDenied,
            0xFFFF_0003 => Self::AccessConflict,
            0xFFFF_0005 => Self::BadFormat,
            0xFFFF_0006 => Self::BadParameters,
            0xFFFF_0007 => Self::BadState,
            0xFFFF_0008 => Self::ItemNotFound,
            0xFFFF_000A => Self::NotSupported,
            0xFFFF_000C => Self::OutOfMemory,
            0xFFFF_000E => Self::Communication,
            0xFFFF_0010 => Self::ShortBuffer,
            0xF010_0001 => Self::CorruptObject,
            0xF010_0003 => Self::StorageNotAvailable,
            other => Self::Unknown(other),
        };
        Some(err)
    }
}

/// Result code for a successful call.
pub const SUCCESS: u32 = 0;

/**
    Type alias for results that may return a [`TeeError`].
*/
pub type TeeResult<T> = std::result::Result<T, TeeError>;

/**
    The layer that produced a failing result code.
*/
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorOrigin {
    /// Client-side API, before anything was sent.
    Api = 1,
    /// The transport between client and isolated side.
    Comms = 2,
    /// The isolated environment itself (instance lifecycle).
    Tee = 3,
    /// A command handler inside the isolated side.
    TrustedApp = 4,
}

impl ErrorOrigin {
    pub const fn from_u32(u: u32) -> Option<Self> {
        match u {
            1 => Some(Self::Api),
            2 => Some(Self::Comms),
            3 => Some(Self::Tee),
            4 => Some(Self::TrustedApp),
            _ => None,
        }
    }

    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Comms => "comms",
            Self::Tee => "tee",
            Self::TrustedApp => "trusted app",
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}
