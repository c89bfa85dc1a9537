//! CRC32C (Castagnoli) content hashing shared by the `tamc` build core.
//!
//! Everything the compiler fingerprints ultimately bottoms out in this
//! checksum. The Castagnoli polynomial is hardware-accelerated on common
//! targets, which matters because fingerprints gate recomputation, not trust.

/// Hash a buffer with CRC32C.
pub fn crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Standard CRC32C test vector from RFC 3720.
        assert_eq!(crc32c(b"123456789"), 0xe3069283);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(crc32c(b""), 0);
    }

    #[test]
    fn stable_across_calls() {
        let data = b"fn main() { }";
        assert_eq!(crc32c(data), crc32c(data));
        assert_ne!(crc32c(b"fn main() { }"), crc32c(b"fn main() {}"));
    }
}
