//! On-disk persistence of fingerprints, dependency edges, and codegen
//! artifacts.
//!
//! Cache directory layout:
//!
//! ```text
//! <cache-dir>/
//!   ├─ incr.bin     # binary index: header + {key, fingerprints, deps} tuples
//!   └─ ir/
//!       ├─ <hex>.ll    # cached IR text per codegen unit
//!       └─ <hex>.libs  # companion native library list
//! ```
//!
//! The index header gates reuse: magic, major version, compiler build hash,
//! and options hash must all match or the cache is discarded wholesale.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::internal::fsx;
use crate::query::fingerprint::Fingerprint;
use crate::query::key::QueryKey;

/// Magic bytes of the index file: "TMIC", the Tamarin incremental cache.
pub const INCR_CACHE_MAGIC: [u8; 4] = *b"TMIC";
/// Gates binary layout compatibility. Bump on any change to the payload or
/// index encoding, even if the index layout itself is unchanged.
pub const INCR_CACHE_VERSION_MAJOR: u16 = 2;
/// May add trailing fields readable by older consumers.
pub const INCR_CACHE_VERSION_MINOR: u16 = 0;

pub const INDEX_FILE_NAME: &str = "incr.bin";
pub const IR_DIR_NAME: &str = "ir";

/// Color of a key in the red-green resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryColor {
    #[default]
    Unknown,
    /// Inputs unchanged from the previous session; result may be reused.
    Green,
    /// Inputs changed, or a transitive dependency is red; must recompute.
    Red,
}

/// One persisted tuple from a previous compilation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevSessionEntry {
    pub input_fingerprint: Fingerprint,
    pub output_fingerprint: Fingerprint,
    pub dependencies: Vec<QueryKey>,
}

pub type PrevSessionMap = HashMap<QueryKey, PrevSessionEntry>;

/// Result of attempting to load an index file.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(PrevSessionMap),
    /// No index file yet; first build in this directory.
    Missing,
    /// Unreadable or produced by an incompatible build/configuration;
    /// discard and rebuild.
    Mismatch(String),
}

#[tracing::instrument(skip_all, level = "debug", fields(dir = %dir))]
pub fn load_index(dir: &Utf8Path, build_hash: u32, options_hash: u32) -> Result<LoadOutcome> {
    let path = dir.join(INDEX_FILE_NAME);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LoadOutcome::Missing);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read `{path}`"));
        }
    };

    let mut reader = bytes.as_slice();
    match parse_index(&mut reader, build_hash, options_hash) {
        Ok(map) => {
            debug!("loaded {} previous-session entries", map.len());
            Ok(LoadOutcome::Loaded(map))
        }
        Err(err) => Ok(LoadOutcome::Mismatch(format!("{err:#}"))),
    }
}

fn parse_index(
    reader: &mut impl Read,
    build_hash: u32,
    options_hash: u32,
) -> Result<PrevSessionMap> {
    let magic = read_array::<4>(reader).context("failed to read magic")?;
    anyhow::ensure!(magic == INCR_CACHE_MAGIC, "bad magic {magic:?}");

    let major = read_u16(reader)?;
    anyhow::ensure!(
        major == INCR_CACHE_VERSION_MAJOR,
        "major version {major} != {INCR_CACHE_VERSION_MAJOR}"
    );
    // Minor version only adds trailing fields; older minors parse fine.
    let _minor = read_u16(reader)?;

    let stored_build_hash = read_u32(reader)?;
    anyhow::ensure!(
        stored_build_hash == build_hash,
        "compiler build hash mismatch ({stored_build_hash:08x} != {build_hash:08x})"
    );
    let stored_options_hash = read_u32(reader)?;
    anyhow::ensure!(
        stored_options_hash == options_hash,
        "options hash mismatch ({stored_options_hash:08x} != {options_hash:08x})"
    );

    let count = read_u32(reader)?;
    let mut map = PrevSessionMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = QueryKey::decode(reader)?;
        let input_fingerprint = Fingerprint::from_le_bytes(read_array::<16>(reader)?);
        let output_fingerprint = Fingerprint::from_le_bytes(read_array::<16>(reader)?);
        let dep_count = read_u32(reader)?;
        let mut dependencies = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            dependencies.push(QueryKey::decode(reader)?);
        }
        map.insert(
            key,
            PrevSessionEntry { input_fingerprint, output_fingerprint, dependencies },
        );
    }
    Ok(map)
}

/// Write the index atomically: temp file in the same directory, fsync,
/// rename over the destination.
#[tracing::instrument(skip_all, level = "debug", fields(dir = %dir, entries = entries.len()))]
pub fn save_index(
    dir: &Utf8Path,
    entries: &[(QueryKey, PrevSessionEntry)],
    build_hash: u32,
    options_hash: u32,
) -> Result<()> {
    fsx::create_dir_all(dir)?;

    let mut sorted: Vec<&(QueryKey, PrevSessionEntry)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();
    buf.extend_from_slice(&INCR_CACHE_MAGIC);
    buf.extend_from_slice(&INCR_CACHE_VERSION_MAJOR.to_le_bytes());
    buf.extend_from_slice(&INCR_CACHE_VERSION_MINOR.to_le_bytes());
    buf.extend_from_slice(&build_hash.to_le_bytes());
    buf.extend_from_slice(&options_hash.to_le_bytes());
    buf.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for (key, entry) in sorted {
        key.encode_into(&mut buf);
        buf.extend_from_slice(&entry.input_fingerprint.to_le_bytes());
        buf.extend_from_slice(&entry.output_fingerprint.to_le_bytes());
        buf.extend_from_slice(&(entry.dependencies.len() as u32).to_le_bytes());
        for dep in &entry.dependencies {
            dep.encode_into(&mut buf);
        }
    }

    let tmp_path = dir.join(format!("{INDEX_FILE_NAME}.tmp"));
    let mut file = fsx::create(&tmp_path)?;
    file.write_all(&buf)
        .with_context(|| format!("failed to write `{tmp_path}`"))?;
    file.sync_all()
        .with_context(|| format!("failed to sync `{tmp_path}`"))?;
    drop(file);
    fsx::rename(&tmp_path, dir.join(INDEX_FILE_NAME))?;
    Ok(())
}

fn ir_dir(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(IR_DIR_NAME)
}

pub fn save_ir_artifact(
    dir: &Utf8Path,
    fingerprint: Fingerprint,
    ir: &str,
    native_libs: &[String],
) -> Result<()> {
    let ir_dir = ir_dir(dir);
    fsx::create_dir_all(&ir_dir)?;
    let hex = fingerprint.to_hex();
    fsx::write(ir_dir.join(format!("{hex}.ll")), ir)?;
    fsx::write(ir_dir.join(format!("{hex}.libs")), native_libs.join("\n"))?;
    Ok(())
}

/// Load the cached IR text and native library list for a green codegen unit.
pub fn load_ir_artifact(dir: &Utf8Path, fingerprint: Fingerprint) -> Result<(String, Vec<String>)> {
    let ir_dir = ir_dir(dir);
    let hex = fingerprint.to_hex();
    let ir = fsx::read_to_string(ir_dir.join(format!("{hex}.ll")))?;
    let libs = match std::fs::read_to_string(ir_dir.join(format!("{hex}.libs"))) {
        Ok(text) => text.lines().map(str::to_string).filter(|l| !l.is_empty()).collect(),
        Err(_) => Vec::new(),
    };
    Ok((ir, libs))
}

/// Best-effort removal of `ir/*` files whose fingerprint is no longer
/// referenced by the index.
pub fn sweep_stale_artifacts(dir: &Utf8Path, live_hex: &HashSet<String>) {
    let ir_dir = ir_dir(dir);
    let Ok(read_dir) = std::fs::read_dir(&ir_dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        let Some(stem) = path.file_stem() else {
            continue;
        };
        if !live_hex.contains(stem) {
            if let Err(err) = fsx::remove_file(&path) {
                warn!("failed to sweep stale artifact: {err:#}");
            }
        }
    }
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).context("unexpected end of index")?;
    Ok(buf)
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array::<2>(reader)?))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array::<4>(reader)?))
}
