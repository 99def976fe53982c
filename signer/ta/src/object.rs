/*!
    Key objects held inside the isolated side.

    A key is generated into a [`TransientObject`] and then persisted; everything
    that leaves this module is either public attribute data or a signature.

    Persisted record layout:
      [0..3]    magic "SKO"
      [3]       version: u8 (1)
      [4]       object type: u8 (1 = ECDSA keypair)
      [5]       curve: u8 (1 = NIST P-256)
      [6..8]    key size in bits: u16 big-endian
      [8..40]   private scalar d
      [40..72]  public X
      [72..104] public Y
*/

use core::fmt;

use p256::SecretKey;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;
use tracing::error;

use signer_core::{COORDINATE_LEN, OutputBuffer, TeeError, TeeResult};

const MAGIC: &[u8] = b"SKO";
const VERSION: u8 = 1;
const RECORD_LEN: usize = 8 + 3 * COORDINATE_LEN;

/**
    Kind of object stored in a container.
*/
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectType {
    EcdsaKeypair = 1,
}

impl ObjectType {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            1 => Some(Self::EcdsaKeypair),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/**
    NIST curves a keypair container can be asked for.

    Only P-256 key material can actually be generated.
*/
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EccCurve {
    NistP256 = 1,
    NistP384 = 2,
    NistP521 = 3,
}

impl EccCurve {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            1 => Some(Self::NistP256),
            2 => Some(Self::NistP384),
            3 => Some(Self::NistP521),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn key_bits(self) -> u32 {
        match self {
            Self::NistP256 => 256,
            Self::NistP384 => 384,
            Self::NistP521 => 521,
        }
    }

    pub const fn to_name(self) -> &'static str {
        match self {
            Self::NistP256 => "NIST P-256",
            Self::NistP384 => "NIST P-384",
            Self::NistP521 => "NIST P-521",
        }
    }
}

impl fmt::Display for EccCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

/**
    Attributes that can be requested from a key object.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    EccPublicX,
    EccPublicY,
    /// Never extractable.
    EccPrivate,
}

/**
    P-256 keypair with its public coordinates cached.
*/
#[derive(Clone)]
pub(crate) struct EcKeyPair {
    secret: SecretKey,
    x: [u8; COORDINATE_LEN],
    y: [u8; COORDINATE_LEN],
}

impl EcKeyPair {
    fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let point = secret.public_key().to_encoded_point(false);
        // Uncompressed SEC1: 0x04 || X || Y
        let bytes = point.as_bytes();

        let mut x = [0u8; COORDINATE_LEN];
        x.copy_from_slice(&bytes[1..1 + COORDINATE_LEN]);
        let mut y = [0u8; COORDINATE_LEN];
        y.copy_from_slice(&bytes[1 + COORDINATE_LEN..1 + 2 * COORDINATE_LEN]);

        Self { secret, x, y }
    }

    pub(crate) fn curve(&self) -> EccCurve {
        EccCurve::NistP256
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret)
    }

    /**
        Copy one attribute into a caller-sized buffer.
    */
    pub(crate) fn buffer_attribute(&self, attr: Attribute, out: &mut OutputBuffer) -> TeeResult<()> {
        match attr {
            Attribute::EccPublicX => out.write(&self.x),
            Attribute::EccPublicY => out.write(&self.y),
            Attribute::EccPrivate => {
                error!("refusing to export private key attribute");
                Err(TeeError::AccessDenied)
            }
        }
    }

    pub(crate) fn to_record(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(RECORD_LEN);

        // Header
        buffer.extend(MAGIC);
        buffer.push(VERSION);
        buffer.push(ObjectType::EcdsaKeypair.to_u8());
        buffer.push(self.curve().to_u8());
        buffer.extend(&(self.curve().key_bits() as u16).to_be_bytes());

        // Key material
        buffer.extend(&self.secret.to_bytes()[..]);
        buffer.extend(&self.x);
        buffer.extend(&self.y);

        buffer
    }

    pub(crate) fn from_record(data: &[u8]) -> TeeResult<Self> {
        if data.len() != RECORD_LEN || &data[0..MAGIC.len()] != MAGIC {
            return Err(TeeError::CorruptObject);
        }

        let version = data[3];
        let object_type = ObjectType::from_u8(data[4]);
        let curve = EccCurve::from_u8(data[5]);
        let key_bits = u16::from_be_bytes([data[6], data[7]]);

        if version != VERSION
            || object_type != Some(ObjectType::EcdsaKeypair)
            || curve != Some(EccCurve::NistP256)
            || u32::from(key_bits) != EccCurve::NistP256.key_bits()
        {
            return Err(TeeError::CorruptObject);
        }

        let secret =
            SecretKey::from_slice(&data[8..40]).map_err(|_| TeeError::CorruptObject)?;
        let key = Self::from_secret(secret);

        // Stored public part must match the private scalar
        if key.x[..] != data[40..72] || key.y[..] != data[72..104] {
            return Err(TeeError::CorruptObject);
        }

        Ok(key)
    }
}

impl fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("x", &hex::encode(self.x))
            .field("y", &hex::encode(self.y))
            .finish_non_exhaustive()
    }
}

/**
    Short-lived key container that exists only until its contents are persisted.
*/
#[derive(Debug)]
pub struct TransientObject {
    object_type: ObjectType,
    max_key_bits: u32,
    key: Option<EcKeyPair>,
}

impl TransientObject {
    /**
        Allocate an empty container able to hold keys of up to `max_key_bits`.
    */
    pub fn allocate(object_type: ObjectType, max_key_bits: u32) -> TeeResult<Self> {
        if !(EccCurve::NistP256.key_bits()..=EccCurve::NistP521.key_bits()).contains(&max_key_bits)
        {
            error!("unsupported {object_type:?} container size {max_key_bits}");
            return Err(TeeError::NotSupported);
        }
        Ok(Self {
            object_type,
            max_key_bits,
            key: None,
        })
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn max_key_bits(&self) -> u32 {
        self.max_key_bits
    }

    /**
        Generate key material of `key_bits` on `curve` into this container.
    */
    pub fn generate_key(&mut self, key_bits: u32, curve: EccCurve) -> TeeResult<()> {
        if self.key.is_some() {
            error!("container already holds key material");
            return Err(TeeError::BadState);
        }
        if key_bits > self.max_key_bits {
            error!(
                "requested {key_bits}-bit key exceeds {}-bit container",
                self.max_key_bits
            );
            return Err(TeeError::NotSupported);
        }
        if curve.key_bits() != key_bits {
            error!("curve {curve} does not produce {key_bits}-bit keys");
            return Err(TeeError::BadParameters);
        }
        if curve != EccCurve::NistP256 {
            error!("key generation on {curve} is not supported");
            return Err(TeeError::NotSupported);
        }

        self.key = Some(EcKeyPair::generate());
        Ok(())
    }

    pub(crate) fn key(&self) -> Option<&EcKeyPair> {
        self.key.as_ref()
    }

    pub fn buffer_attribute(&self, attr: Attribute, out: &mut OutputBuffer) -> TeeResult<()> {
        self.key
            .as_ref()
            .ok_or(TeeError::BadState)?
            .buffer_attribute(attr, out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;

    /// Private scalar of the fixed test keypair.
    pub(crate) const TEST_SCALAR: [u8; 32] = [0x11; 32];
    pub(crate) const TEST_X: [u8; 32] =
        hex!("0217E617F0B6443928278F96999E69A23A4F2C152BDF6D6CDF66E5B80282D4ED");
    pub(crate) const TEST_Y: [u8; 32] =
        hex!("194A7DEBCB97712D2DDA3CA85AA8765A56F45FC758599652F2897C65306E5794");

    pub(crate) fn test_key_pair() -> EcKeyPair {
        EcKeyPair::from_secret(SecretKey::from_slice(&TEST_SCALAR).unwrap())
    }

    #[test]
    fn fixed_scalar_derives_known_coordinates() {
        let key = test_key_pair();
        assert_eq!(key.x, TEST_X);
        assert_eq!(key.y, TEST_Y);
    }

    #[test]
    fn record_round_trip_preserves_key() {
        let key = test_key_pair();
        let record = key.to_record();
        assert_eq!(record.len(), RECORD_LEN);
        assert_eq!(&record[..3], b"SKO");
        assert_eq!(&record[6..8], &256u16.to_be_bytes());

        let loaded = EcKeyPair::from_record(&record).unwrap();
        assert_eq!(loaded.x, TEST_X);
        assert_eq!(loaded.y, TEST_Y);
    }

    #[test]
    fn record_with_mismatched_public_part_is_corrupt() {
        let mut record = test_key_pair().to_record();
        record[40] ^= 0x01;
        let err = EcKeyPair::from_record(&record).unwrap_err();
        assert_eq!(err, TeeError::CorruptObject);
    }

    #[test]
    fn record_with_wrong_header_is_corrupt() {
        let record = test_key_pair().to_record();

        let mut bad_magic = record.clone();
        bad_magic[0] = b'X';
        assert_eq!(
            EcKeyPair::from_record(&bad_magic).unwrap_err(),
            TeeError::CorruptObject
        );

        let mut bad_curve = record.clone();
        bad_curve[5] = EccCurve::NistP384.to_u8();
        assert_eq!(
            EcKeyPair::from_record(&bad_curve).unwrap_err(),
            TeeError::CorruptObject
        );

        assert_eq!(
            EcKeyPair::from_record(&record[..50]).unwrap_err(),
            TeeError::CorruptObject
        );
    }

    #[test]
    fn oversized_container_accepts_p256_generation() {
        let mut obj = TransientObject::allocate(ObjectType::EcdsaKeypair, 521).unwrap();
        assert_eq!(obj.object_type(), ObjectType::EcdsaKeypair);
        assert_eq!(obj.max_key_bits(), 521);
        obj.generate_key(256, EccCurve::NistP256).unwrap();

        let mut x = OutputBuffer::with_capacity(32);
        obj.buffer_attribute(Attribute::EccPublicX, &mut x).unwrap();
        assert_eq!(x.size(), 32);
    }

    #[test]
    fn generation_larger_than_container_is_rejected() {
        let mut obj = TransientObject::allocate(ObjectType::EcdsaKeypair, 256).unwrap();
        let err = obj.generate_key(384, EccCurve::NistP384).unwrap_err();
        assert_eq!(err, TeeError::NotSupported);
        assert!(obj.key().is_none());
    }

    #[test]
    fn curve_and_size_must_agree() {
        let mut obj = TransientObject::allocate(ObjectType::EcdsaKeypair, 521).unwrap();
        let err = obj.generate_key(256, EccCurve::NistP521).unwrap_err();
        assert_eq!(err, TeeError::BadParameters);
    }

    #[test]
    fn container_size_out_of_range() {
        let err = TransientObject::allocate(ObjectType::EcdsaKeypair, 128).unwrap_err();
        assert_eq!(err, TeeError::NotSupported);
        let err = TransientObject::allocate(ObjectType::EcdsaKeypair, 1024).unwrap_err();
        assert_eq!(err, TeeError::NotSupported);
    }

    #[test]
    fn second_generation_is_rejected() {
        let mut obj = TransientObject::allocate(ObjectType::EcdsaKeypair, 521).unwrap();
        assert_eq!(obj.object_type(), ObjectType::EcdsaKeypair);
        assert_eq!(obj.max_key_bits(), 521);
        obj.generate_key(256, EccCurve::NistP256).unwrap();
        let err = obj.generate_key(256, EccCurve::NistP256).unwrap_err();
        assert_eq!(err, TeeError::BadState);
    }

    #[test]
    fn private_attribute_is_never_exported() {
        let key = test_key_pair();
        let mut out = OutputBuffer::with_capacity(64);
        let err = key
            .buffer_attribute(Attribute::EccPrivate, &mut out)
            .unwrap_err();
        assert_eq!(err, TeeError::AccessDenied);
        assert_eq!(out.size(), 0);
    }

    #[test]
    fn attribute_into_short_buffer() {
        let key = test_key_pair();
        let mut out = OutputBuffer::with_capacity(31);
        let err = key
            .buffer_attribute(Attribute::EccPublicY, &mut out)
            .unwrap_err();
        assert_eq!(err, TeeError::ShortBuffer);
    }

    #[test]
    fn debug_output_hides_private_scalar() {
        let rendered = format!("{:?}", test_key_pair());
        assert!(rendered.contains(&hex::encode(TEST_X)));
        assert!(!rendered.contains(&hex::encode(TEST_SCALAR)));
    }
}
