//! CRC32C content hashing.
//!
//! Level payloads are fingerprinted with CRC32C (Castagnoli) so that a
//! container rewrite can be checked for unchanged level data.

/// Compute CRC32C hash of a byte slice.
///
/// Uses hardware acceleration when available (SSE4.2 on x86).
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}
