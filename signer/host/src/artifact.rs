/*!
    Files the client leaves behind for offline verification.

    Both artifacts are 64 raw bytes with no header:
      public key: X || Y
      signature:  r || s
    Each half is a 32-byte big-endian value. The public key can also be
    rendered as a PEM `SubjectPublicKeyInfo` for tools that need a
    self-describing key.
*/

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use p256::pkcs8::{EncodePublicKey, LineEnding, spki};
use p256::{EncodedPoint, FieldBytes, PublicKey};
use thiserror::Error;

use signer_core::COORDINATE_LEN;

const ARTIFACT_LEN: usize = 2 * COORDINATE_LEN;

/**
    Errors reading or writing an artifact file.
*/
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{} is {len} bytes, expected {}", .path.display(), ARTIFACT_LEN)]
    Length { path: PathBuf, len: usize },
    #[error("public key is not a point on P-256")]
    InvalidPoint,
    #[error("cannot encode public key: {0}")]
    Encode(spki::Error),
}

fn split(bytes: &[u8]) -> Option<([u8; COORDINATE_LEN], [u8; COORDINATE_LEN])> {
    if bytes.len() != ARTIFACT_LEN {
        return None;
    }
    let (a, b) = bytes.split_at(COORDINATE_LEN);
    Some((a.try_into().ok()?, b.try_into().ok()?))
}

fn join(a: &[u8; COORDINATE_LEN], b: &[u8; COORDINATE_LEN]) -> [u8; ARTIFACT_LEN] {
    let mut out = [0u8; ARTIFACT_LEN];
    out[..COORDINATE_LEN].copy_from_slice(a);
    out[COORDINATE_LEN..].copy_from_slice(b);
    out
}

fn read_with<T>(path: &Path, parse: impl FnOnce(&[u8]) -> Option<T>) -> Result<T, ArtifactError> {
    let data = fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_owned(),
        source,
    })?;
    parse(&data).ok_or(ArtifactError::Length {
        path: path.to_owned(),
        len: data.len(),
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    fs::write(path, bytes).map_err(|source| ArtifactError::Write {
        path: path.to_owned(),
        source,
    })
}

/**
    Public coordinates of the device key.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyArtifact {
    pub x: [u8; COORDINATE_LEN],
    pub y: [u8; COORDINATE_LEN],
}

impl PublicKeyArtifact {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        split(bytes).map(|(x, y)| Self { x, y })
    }

    pub fn to_bytes(&self) -> [u8; ARTIFACT_LEN] {
        join(&self.x, &self.y)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        read_with(path.as_ref(), Self::from_bytes)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        write_bytes(path.as_ref(), &self.to_bytes())
    }

    /**
        PEM `SubjectPublicKeyInfo` for the key, with the P-256 curve OID.
    */
    pub fn to_pem(&self) -> Result<String, ArtifactError> {
        let point = EncodedPoint::from_affine_coordinates(
            &FieldBytes::from(self.x),
            &FieldBytes::from(self.y),
            false,
        );
        let key = PublicKey::from_sec1_bytes(point.as_bytes())
            .map_err(|_| ArtifactError::InvalidPoint)?;
        key.to_public_key_pem(LineEnding::LF)
            .map_err(ArtifactError::Encode)
    }
}

/**
    A raw `r || s` ECDSA signature.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureArtifact {
    pub r: [u8; COORDINATE_LEN],
    pub s: [u8; COORDINATE_LEN],
}

impl SignatureArtifact {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        split(bytes).map(|(r, s)| Self { r, s })
    }

    pub fn to_bytes(&self) -> [u8; ARTIFACT_LEN] {
        join(&self.r, &self.s)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        read_with(path.as_ref(), Self::from_bytes)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        write_bytes(path.as_ref(), &self.to_bytes())
    }
}
