/*!
    Offline ECDSA P-256 verification.

    Works only from public data: the key coordinates, the raw signature
    scalars and the message. The signature is put through its DER
    `ECDSA-Sig-Value` encoding before verification, the form generic ECDSA
    verifiers consume.
*/

use core::fmt;

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use signer_core::{COORDINATE_LEN, SHA256_DIGEST_LEN};

use crate::artifact::{PublicKeyArtifact, SignatureArtifact};

/**
    Outcome of a verification that could be carried out.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verification {
    Success,
    /// The signature does not match the message under this key.
    Failure,
}

impl Verification {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

/**
    Inputs that prevent verification from being carried out at all.
*/
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{field} is not valid hex: {source}")]
    Hex {
        field: &'static str,
        source: hex::FromHexError,
    },
    #[error("{field} is {len} bytes, at most {} allowed", COORDINATE_LEN)]
    TooLong { field: &'static str, len: usize },
    #[error("public key is not a point on P-256")]
    InvalidPoint,
    #[error("signature scalars are out of range")]
    InvalidScalars,
    #[error("DER signature is malformed: {0}")]
    Der(#[source] p256::ecdsa::Error),
}

/// SHA-256 of `message`.
pub fn sha256(message: &[u8]) -> [u8; SHA256_DIGEST_LEN] {
    Sha256::digest(message).into()
}

/**
    Verify a raw `r || s` signature over `message` against public key `(x, y)`.
*/
pub fn verify(
    key: &PublicKeyArtifact,
    signature: &SignatureArtifact,
    message: &[u8],
) -> Result<Verification, VerifyError> {
    let digest = sha256(message);

    let point = EncodedPoint::from_affine_coordinates(
        &FieldBytes::from(key.x),
        &FieldBytes::from(key.y),
        false,
    );
    let verifying_key =
        VerifyingKey::from_encoded_point(&point).map_err(|_| VerifyError::InvalidPoint)?;

    let signature = Signature::from_scalars(signature.r, signature.s)
        .map_err(|_| VerifyError::InvalidScalars)?;
    let der = signature.to_der();
    let signature = Signature::from_der(der.as_bytes()).map_err(VerifyError::Der)?;

    debug!(
        "verifying {} byte DER signature over digest {}",
        der.as_bytes().len(),
        hex::encode_upper(digest)
    );

    Ok(match verifying_key.verify_prehash(&digest, &signature) {
        Ok(()) => Verification::Success,
        Err(_) => Verification::Failure,
    })
}

/**
    Like [`verify`], with the four values given as hex strings.

    Values shorter than 32 bytes (or with an odd number of digits) are read as
    big-endian numbers and left-padded with zeros.
*/
pub fn verify_hex(
    x: &str,
    y: &str,
    r: &str,
    s: &str,
    message: &[u8],
) -> Result<Verification, VerifyError> {
    let key = PublicKeyArtifact {
        x: decode_field("X", x)?,
        y: decode_field("Y", y)?,
    };
    let signature = SignatureArtifact {
        r: decode_field("R", r)?,
        s: decode_field("S", s)?,
    };
    verify(&key, &signature, message)
}

fn decode_field(field: &'static str, value: &str) -> Result<[u8; COORDINATE_LEN], VerifyError> {
    let value = value.trim();
    let bytes = if value.len() % 2 == 1 {
        hex::decode(format!("0{value}"))
    } else {
        hex::decode(value)
    }
    .map_err(|source| VerifyError::Hex { field, source })?;

    if bytes.len() > COORDINATE_LEN {
        return Err(VerifyError::TooLong {
            field,
            len: bytes.len(),
        });
    }

    let mut out = [0u8; COORDINATE_LEN];
    out[COORDINATE_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
