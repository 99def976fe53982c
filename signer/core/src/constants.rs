/// Size of one P-256 public coordinate (X or Y).
pub const COORDINATE_LEN: usize = 32;

/// Size of a raw `r || s` P-256 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Size of a SHA-256 digest.
pub const SHA256_DIGEST_LEN: usize = 32;

/// Largest input length or output capacity accepted for one parameter slot.
pub const MAX_PARAM_SIZE: usize = 1 << 20;

/// Largest frame body accepted by either side: four full slots plus the fixed header.
pub const MAX_FRAME_LEN: usize = 4 * (MAX_PARAM_SIZE + 4) + 16;
