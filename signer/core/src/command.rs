use core::fmt;

/**
    Commands understood by the signing service.

    Identifiers are fixed by the boundary protocol. Unknown identifiers are not
    representable here; the dispatcher rejects them as not supported.
*/
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Read the public X and Y coordinates of the device key.
    GetKey = 0,
    /// SHA-256 the input, then ECDSA-P256 sign the digest.
    Sign = 1,
}

impl Command {
    pub const fn from_u32(u: u32) -> Option<Self> {
        match u {
            0 => Some(Self::GetKey),
            1 => Some(Self::Sign),
            _ => None,
        }
    }

    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::GetKey => "GET_KEY",
            Self::Sign => "SIGN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}
