//! Query identity: one key per memoized computation.

use std::fmt;
use std::io::Read;

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use smol_str::SmolStr;

/// Pipeline stage discriminant.
///
/// Doubles as the provider registry index and the on-disk key tag, so the
/// variant order is part of the cache format: reordering requires a major
/// version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum QueryKind {
    ReadSource = 0,
    Tokenize = 1,
    ParseModule = 2,
    TypecheckModule = 3,
    BorrowcheckModule = 4,
    HirLower = 5,
    ThirLower = 6,
    MirBuild = 7,
    CodegenUnit = 8,
}

impl QueryKind {
    pub const COUNT: usize = 9;

    pub const ALL: [QueryKind; Self::COUNT] = [
        QueryKind::ReadSource,
        QueryKind::Tokenize,
        QueryKind::ParseModule,
        QueryKind::TypecheckModule,
        QueryKind::BorrowcheckModule,
        QueryKind::HirLower,
        QueryKind::ThirLower,
        QueryKind::MirBuild,
        QueryKind::CodegenUnit,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_tag(tag: u8) -> Option<QueryKind> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryKind::ReadSource => "read_source",
            QueryKind::Tokenize => "tokenize",
            QueryKind::ParseModule => "parse_module",
            QueryKind::TypecheckModule => "typecheck_module",
            QueryKind::BorrowcheckModule => "borrowcheck_module",
            QueryKind::HirLower => "hir_lower",
            QueryKind::ThirLower => "thir_lower",
            QueryKind::MirBuild => "mir_build",
            QueryKind::CodegenUnit => "codegen_unit",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one memoized computation.
///
/// Two keys are equal iff all fields match exactly; paths are compared
/// verbatim, without normalization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryKey {
    ReadSource { path: Utf8PathBuf },
    Tokenize { path: Utf8PathBuf },
    ParseModule { path: Utf8PathBuf, module: SmolStr },
    TypecheckModule { path: Utf8PathBuf, module: SmolStr },
    BorrowcheckModule { path: Utf8PathBuf, module: SmolStr },
    HirLower { path: Utf8PathBuf, module: SmolStr },
    ThirLower { path: Utf8PathBuf, module: SmolStr },
    MirBuild { path: Utf8PathBuf, module: SmolStr },
    CodegenUnit { path: Utf8PathBuf, module: SmolStr },
}

impl QueryKey {
    pub fn read_source(path: impl Into<Utf8PathBuf>) -> QueryKey {
        QueryKey::ReadSource { path: path.into() }
    }

    pub fn tokenize(path: impl Into<Utf8PathBuf>) -> QueryKey {
        QueryKey::Tokenize { path: path.into() }
    }

    pub fn for_module(
        kind: QueryKind,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> QueryKey {
        let path = path.into();
        let module = module.into();
        match kind {
            QueryKind::ReadSource => QueryKey::ReadSource { path },
            QueryKind::Tokenize => QueryKey::Tokenize { path },
            QueryKind::ParseModule => QueryKey::ParseModule { path, module },
            QueryKind::TypecheckModule => QueryKey::TypecheckModule { path, module },
            QueryKind::BorrowcheckModule => QueryKey::BorrowcheckModule { path, module },
            QueryKind::HirLower => QueryKey::HirLower { path, module },
            QueryKind::ThirLower => QueryKey::ThirLower { path, module },
            QueryKind::MirBuild => QueryKey::MirBuild { path, module },
            QueryKind::CodegenUnit => QueryKey::CodegenUnit { path, module },
        }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            QueryKey::ReadSource { .. } => QueryKind::ReadSource,
            QueryKey::Tokenize { .. } => QueryKind::Tokenize,
            QueryKey::ParseModule { .. } => QueryKind::ParseModule,
            QueryKey::TypecheckModule { .. } => QueryKind::TypecheckModule,
            QueryKey::BorrowcheckModule { .. } => QueryKind::BorrowcheckModule,
            QueryKey::HirLower { .. } => QueryKind::HirLower,
            QueryKey::ThirLower { .. } => QueryKind::ThirLower,
            QueryKey::MirBuild { .. } => QueryKind::MirBuild,
            QueryKey::CodegenUnit { .. } => QueryKind::CodegenUnit,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        match self {
            QueryKey::ReadSource { path }
            | QueryKey::Tokenize { path }
            | QueryKey::ParseModule { path, .. }
            | QueryKey::TypecheckModule { path, .. }
            | QueryKey::BorrowcheckModule { path, .. }
            | QueryKey::HirLower { path, .. }
            | QueryKey::ThirLower { path, .. }
            | QueryKey::MirBuild { path, .. }
            | QueryKey::CodegenUnit { path, .. } => path,
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            QueryKey::ReadSource { .. } | QueryKey::Tokenize { .. } => None,
            QueryKey::ParseModule { module, .. }
            | QueryKey::TypecheckModule { module, .. }
            | QueryKey::BorrowcheckModule { module, .. }
            | QueryKey::HirLower { module, .. }
            | QueryKey::ThirLower { module, .. }
            | QueryKey::MirBuild { module, .. }
            | QueryKey::CodegenUnit { module, .. } => Some(module),
        }
    }

    /// Binary encoding used by the incremental index file.
    ///
    /// Layout: u8 kind tag, then u32-length-prefixed path bytes, then, for
    /// module-scoped kinds, u32-length-prefixed module bytes. Little-endian.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        let path = self.path().as_str().as_bytes();
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buf.extend_from_slice(path);
        if let Some(module) = self.module() {
            let module = module.as_bytes();
            buf.extend_from_slice(&(module.len() as u32).to_le_bytes());
            buf.extend_from_slice(module);
        }
    }

    /// Inverse of [`QueryKey::encode_into`].
    pub fn decode(reader: &mut impl Read) -> Result<QueryKey> {
        let mut tag = [0u8; 1];
        reader
            .read_exact(&mut tag)
            .context("failed to read query key tag")?;
        let Some(kind) = QueryKind::from_tag(tag[0]) else {
            bail!("unknown query key tag {}", tag[0]);
        };
        let path = read_string(reader).context("failed to read query key path")?;
        let path = Utf8PathBuf::from(path);
        match kind {
            QueryKind::ReadSource => Ok(QueryKey::ReadSource { path }),
            QueryKind::Tokenize => Ok(QueryKey::Tokenize { path }),
            _ => {
                let module = read_string(reader).context("failed to read query key module")?;
                Ok(QueryKey::for_module(kind, path, module))
            }
        }
    }
}

fn read_string(reader: &mut impl Read) -> Result<String> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).context("string field is not UTF-8")
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module() {
            Some(module) => write!(f, "{}({}, {module})", self.kind(), self.path()),
            None => write!(f, "{}({})", self.kind(), self.path()),
        }
    }
}
