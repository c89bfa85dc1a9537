//! Mostly [`fs`] extensions with extra error messaging.

use std::fs;
use std::fs::File;

use anyhow::{Context, Result};
use camino::Utf8Path;

/// Equivalent to [`fs::create_dir_all`] with better error messages.
pub fn create_dir_all(p: impl AsRef<Utf8Path>) -> Result<()> {
    return inner(p.as_ref());

    fn inner(p: &Utf8Path) -> Result<()> {
        fs::create_dir_all(p).with_context(|| format!("failed to create directory `{p}`"))?;
        Ok(())
    }
}

/// Equivalent to [`fs::read_to_string`] with better error messages.
pub fn read_to_string(path: impl AsRef<Utf8Path>) -> Result<String> {
    return inner(path.as_ref());

    fn inner(path: &Utf8Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("failed to read `{path}`"))
    }
}

/// Equivalent to [`fs::write`] with better error messages.
pub fn write(path: impl AsRef<Utf8Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    return inner(path.as_ref(), contents.as_ref());

    fn inner(path: &Utf8Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("failed to write `{path}`"))
    }
}

/// Equivalent to [`File::create`] with better error messages.
pub fn create(path: impl AsRef<Utf8Path>) -> Result<File> {
    return inner(path.as_ref());

    fn inner(path: &Utf8Path) -> Result<File> {
        File::create(path).with_context(|| format!("failed to create `{path}`"))
    }
}

/// Equivalent to [`fs::rename`] with better error messages.
pub fn rename(from: impl AsRef<Utf8Path>, to: impl AsRef<Utf8Path>) -> Result<()> {
    return inner(from.as_ref(), to.as_ref());

    fn inner(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("failed to rename `{from}` to `{to}`"))
    }
}

/// Equivalent to [`fs::remove_file`] with better error messages.
pub fn remove_file(path: impl AsRef<Utf8Path>) -> Result<()> {
    return inner(path.as_ref());

    fn inner(path: &Utf8Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("failed to remove `{path}`"))
    }
}
