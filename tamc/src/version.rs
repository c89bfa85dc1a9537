//! Compiler build identity.
//!
//! The build hash gates incremental cache reuse: a cache produced by a
//! different compiler build is discarded wholesale, because query payload
//! encodings may have silently changed between builds.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: &'static str,
    pub commit_hash: Option<&'static str>,
}

impl VersionInfo {
    /// Long form used for hashing and `--version` style output.
    pub fn long(&self) -> String {
        match self.commit_hash {
            Some(commit) => format!("{} ({commit})", self.version),
            None => self.version.to_string(),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.long())
    }
}

pub fn get() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        commit_hash: option_env!("TAMC_COMMIT_HASH"),
    }
}

/// Hash of the compiler build itself.
///
/// Changes whenever the compiler version (or the commit it was built from)
/// changes, invalidating every previously written incremental cache.
pub fn build_hash() -> u32 {
    tamc_stable_hash::crc32c(get().long().as_bytes())
}
