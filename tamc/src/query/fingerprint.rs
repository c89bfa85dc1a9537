//! 128-bit fingerprints for query inputs and outputs.
//!
//! Fingerprints decide reuse, not trust: a collision costs a wasted rebuild
//! or a stale artifact on adversarial input, never a security boundary.
//! CRC32C is therefore enough, and hardware-accelerated on common targets.
//! The two halves are derived from disjoint input regions so their collision
//! probabilities are independent.

use std::fmt;

use camino::Utf8Path;
use tamc_stable_hash::crc32c;

/// Salt mixed into the low half so that `high` and `low` never coincide for
/// short inputs. Golden-ratio constant.
const SALT: u32 = 0x9E37_79B9;

/// 128-bit content digest with high/low 64-bit halves.
///
/// `Fingerprint::ZERO` is a reserved sentinel meaning "not yet computed";
/// [`Fingerprint::bytes`] never produces it for non-empty input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fingerprint {
    pub high: u64,
    pub low: u64,
}

impl Fingerprint {
    pub const ZERO: Fingerprint = Fingerprint { high: 0, low: 0 };

    /// Returns true if this fingerprint has not been computed yet.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Hash a raw buffer. Empty input yields [`Fingerprint::ZERO`].
    pub fn bytes(data: &[u8]) -> Fingerprint {
        if data.is_empty() {
            return Self::ZERO;
        }

        let len = data.len();
        let half = len / 2;

        // High half: CRC of the first half of the input, packed with the length.
        let crc_high = crc32c(if half > 0 { &data[..half] } else { data });
        let high = (u64::from(crc_high) << 32) | len as u64;

        // Low half: CRC of the second half of the input, packed with the salt.
        let crc_low = crc32c(&data[half..]);
        let low = (u64::from(crc_low) << 32) | (u64::from(SALT) ^ (len as u64 >> 1));

        Fingerprint { high, low }
    }

    pub fn of_str(s: &str) -> Fingerprint {
        Self::bytes(s.as_bytes())
    }

    /// Hash the contents of a file.
    ///
    /// Returns [`Fingerprint::ZERO`] on any I/O failure; callers treat zero
    /// as "must recompute".
    pub fn of_file(path: &Utf8Path) -> Fingerprint {
        match std::fs::read(path) {
            Ok(content) => Self::bytes(&content),
            Err(_) => Self::ZERO,
        }
    }

    /// Mix two fingerprints, order-dependently.
    ///
    /// `a.combine(b) != b.combine(a)` in general, which is what dependency
    /// chains need: reordering dependencies must change the result.
    #[must_use]
    pub fn combine(self, other: Fingerprint) -> Fingerprint {
        Fingerprint {
            high: self.high ^ other.high.wrapping_mul(0x517C_C1B7_2722_0A95).wrapping_add(1),
            low: self.low ^ other.low.wrapping_mul(0x6C62_272E_07BB_0142).wrapping_add(1),
        }
    }

    /// 32 lowercase hex characters; used for log output and on-disk artifact
    /// file names.
    pub fn to_hex(&self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.high.to_le_bytes());
        buf[8..].copy_from_slice(&self.low.to_le_bytes());
        buf
    }

    pub fn from_le_bytes(buf: [u8; 16]) -> Fingerprint {
        Fingerprint {
            high: u64::from_le_bytes(buf[..8].try_into().unwrap()),
            low: u64::from_le_bytes(buf[8..].try_into().unwrap()),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
