//! Key Fingerprints
//!
//! Every key and every node name is placed on the ring by its MD5 digest,
//! rendered as 32 uppercase hex characters. All range arithmetic compares
//! these strings lexicographically, which for fixed-width uppercase hex is
//! the same as comparing the underlying 128-bit integers.

/// Smallest position on the ring.
pub const RING_MIN: &str = "00000000000000000000000000000000";
/// Largest position on the ring.
pub const RING_MAX: &str = "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF";

/// Returns the ring position of `bytes`.
pub fn fingerprint(bytes: impl AsRef<[u8]>) -> String {
    let digest = md5::compute(bytes.as_ref());
    format!("{:032X}", u128::from_be_bytes(digest.0))
}

/// Half-open interval test `(start, end]` with wrap-around at `FFFF…F → 0000…0`.
///
/// When `start > end` the interval crosses zero and covers
/// `(start, FFFF…F] ∪ [0000…0, end]`. When `start == end` it is empty.
pub fn in_range(hash: &str, start: &str, end: &str) -> bool {
    if start < end {
        hash > start && hash <= end
    } else if start > end {
        hash > start || hash <= end
    } else {
        false
    }
}
