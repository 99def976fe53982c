/*!
    Digest and signature operations.

    Every operation occupies a slot in the instance's [`OperationTracker`] for
    as long as it is alive. Dropping the operation frees the slot, so the live
    count always returns to zero once a command finishes, whichever way it ends.
*/

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};
use tracing::{error, trace};

use signer_core::{OutputBuffer, SHA256_DIGEST_LEN, SIGNATURE_LEN, TeeError, TeeResult};

use crate::storage::{DataFlags, PersistentObject};

/**
    Algorithms an operation can be allocated for.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    EcdsaP256,
}

impl Algorithm {
    pub const fn to_name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::EcdsaP256 => "ECDSA P-256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

/**
    Counts live operation handles and enforces a ceiling on them.
*/
#[derive(Debug, Clone)]
pub struct OperationTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    live: AtomicUsize,
    limit: usize,
}

impl OperationTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                live: AtomicUsize::new(0),
                limit,
            }),
        }
    }

    /// Number of operations currently allocated.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    fn acquire(&self, algorithm: Algorithm) -> TeeResult<OperationSlot> {
        let limit = self.limit();
        self.inner
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|live| {
                error!("cannot allocate {algorithm} operation: {live}/{limit} in use");
                TeeError::OutOfMemory
            })?;

        trace!("allocated {algorithm} operation");

        Ok(OperationSlot {
            tracker: self.clone(),
            algorithm,
        })
    }
}

struct OperationSlot {
    tracker: OperationTracker,
    algorithm: Algorithm,
}

impl Drop for OperationSlot {
    fn drop(&mut self) {
        self.tracker.inner.live.fetch_sub(1, Ordering::AcqRel);
        trace!("freed {} operation", self.algorithm);
    }
}

/**
    SHA-256 digest operation.
*/
pub struct DigestOperation {
    hasher: Sha256,
    _slot: OperationSlot,
}

impl DigestOperation {
    pub fn allocate(tracker: &OperationTracker) -> TeeResult<Self> {
        Ok(Self {
            hasher: Sha256::new(),
            _slot: tracker.acquire(Algorithm::Sha256)?,
        })
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /**
        Absorb a final chunk and write the digest into `out`.

        Returns the digest length. `out` must hold at least 32 bytes; nothing is
        written otherwise.
    */
    pub fn do_final(&mut self, chunk: &[u8], out: &mut [u8]) -> TeeResult<usize> {
        if out.len() < SHA256_DIGEST_LEN {
            error!(
                "digest buffer too small: expected {SHA256_DIGEST_LEN}, got {}",
                out.len()
            );
            return Err(TeeError::ShortBuffer);
        }

        self.hasher.update(chunk);
        let digest = self.hasher.finalize_reset();
        out[..SHA256_DIGEST_LEN].copy_from_slice(&digest);

        Ok(SHA256_DIGEST_LEN)
    }
}

/**
    ECDSA P-256 signing operation over a precomputed digest.
*/
pub struct SignOperation {
    key: Option<SigningKey>,
    _slot: OperationSlot,
}

impl SignOperation {
    /// Largest key size an ECDSA P-256 operation can be allocated for.
    pub const MAX_KEY_BITS: u32 = 256;

    pub fn allocate(tracker: &OperationTracker, max_key_bits: u32) -> TeeResult<Self> {
        if max_key_bits != Self::MAX_KEY_BITS {
            error!(
                "{} operation needs a {}-bit key size, got {max_key_bits}",
                Algorithm::EcdsaP256,
                Self::MAX_KEY_BITS
            );
            return Err(TeeError::NotSupported);
        }

        Ok(Self {
            key: None,
            _slot: tracker.acquire(Algorithm::EcdsaP256)?,
        })
    }

    /**
        Bind the key to sign with. The key never leaves the operation.
    */
    pub fn set_key(&mut self, object: &PersistentObject) -> TeeResult<()> {
        if !object.flags().contains(DataFlags::ACCESS_READ) {
            error!("key {} is not open for reading", object.id());
            return Err(TeeError::AccessDenied);
        }

        let bits = object.key().curve().key_bits();
        if bits > Self::MAX_KEY_BITS {
            error!(
                "key {} is {bits} bits, operation allows {}",
                object.id(),
                Self::MAX_KEY_BITS
            );
            return Err(TeeError::BadParameters);
        }

        self.key = Some(object.key().signing_key());
        Ok(())
    }

    /**
        Sign a 32-byte digest into `out` as raw `r || s`.

        The nonce is derived deterministically (RFC 6979). On any failure `out`
        is left untouched.
    */
    pub fn sign_digest(&self, digest: &[u8], out: &mut OutputBuffer) -> TeeResult<()> {
        let Some(key) = &self.key else {
            error!("sign operation has no key bound");
            return Err(TeeError::BadState);
        };

        if digest.len() != SHA256_DIGEST_LEN {
            error!(
                "digest must be {SHA256_DIGEST_LEN} bytes, got {}",
                digest.len()
            );
            return Err(TeeError::BadParameters);
        }

        if out.capacity() < SIGNATURE_LEN {
            error!(
                "signature buffer too small: expected {SIGNATURE_LEN}, got {}",
                out.capacity()
            );
            return Err(TeeError::ShortBuffer);
        }

        let signature: Signature = key.sign_prehash(digest).map_err(|e| {
            error!("signing failed: {e}");
            TeeError::Generic
        })?;

        out.write(&signature.to_bytes())
    }
}
