/*!
    Signing service constants.

    - Identifier of the device key object in secure storage
    - Key sizes used when generating and using the device key
    - Ceiling on concurrently allocated crypto operations
*/

/// Identifier of the device-wide key object in secure storage.
pub const KEY_OBJECT_ID: &[u8] = b"signer.key";

/**
    Maximum size, in bits, of the transient container the device key is generated in.

    The container is sized for the largest NIST curve while generation itself
    asks for a 256-bit P-256 key. Both values are kept as they are.
*/
pub const KEYPAIR_CONTAINER_BITS: u32 = 521;

/// Size, in bits, of the generated device key (NIST P-256).
pub const KEY_SIZE_BITS: u32 = 256;

/// Default ceiling on live operation handles per instance.
pub const MAX_LIVE_OPERATIONS: usize = 16;
