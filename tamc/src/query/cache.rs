//! Thread-safe memoization cache for query results.
//!
//! Payloads are a closed sum over the pipeline stages, one variant per
//! [`QueryKind`]. That keeps lookups statically exhaustive; the kind check on
//! lookup exists only to catch driver bugs, and recovers as a miss.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::compiler::borrowck::BorrowckedModule;
use crate::compiler::codegen::CodegenUnit;
use crate::compiler::hir::HirModule;
use crate::compiler::lexer::TokenStream;
use crate::compiler::mir::MirModule;
use crate::compiler::parser::Module;
use crate::compiler::source::SourceFile;
use crate::compiler::thir::ThirModule;
use crate::compiler::typeck::TypecheckedModule;
use crate::query::fingerprint::Fingerprint;
use crate::query::key::{QueryKey, QueryKind};

/// A query result; one variant per pipeline stage.
#[derive(Debug, Clone)]
pub enum QueryOutput {
    Source(Arc<SourceFile>),
    Tokens(Arc<TokenStream>),
    Ast(Arc<Module>),
    Typechecked(Arc<TypecheckedModule>),
    Borrowcked(Arc<BorrowckedModule>),
    Hir(Arc<HirModule>),
    Thir(Arc<ThirModule>),
    Mir(Arc<MirModule>),
    Codegen(Arc<CodegenUnit>),
}

impl QueryOutput {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryOutput::Source(_) => QueryKind::ReadSource,
            QueryOutput::Tokens(_) => QueryKind::Tokenize,
            QueryOutput::Ast(_) => QueryKind::ParseModule,
            QueryOutput::Typechecked(_) => QueryKind::TypecheckModule,
            QueryOutput::Borrowcked(_) => QueryKind::BorrowcheckModule,
            QueryOutput::Hir(_) => QueryKind::HirLower,
            QueryOutput::Thir(_) => QueryKind::ThirLower,
            QueryOutput::Mir(_) => QueryKind::MirBuild,
            QueryOutput::Codegen(_) => QueryKind::CodegenUnit,
        }
    }

    /// Per-kind output fingerprint: file digest for sources, structural
    /// digest for token/AST stages, textual dump digest for IR stages.
    pub fn stable_digest(&self) -> Fingerprint {
        match self {
            QueryOutput::Source(source) => source.stable_digest(),
            QueryOutput::Tokens(tokens) => tokens.stable_digest(),
            QueryOutput::Ast(ast) => ast.stable_digest(),
            QueryOutput::Typechecked(typed) => typed.stable_digest(),
            QueryOutput::Borrowcked(borrowcked) => borrowcked.stable_digest(),
            QueryOutput::Hir(hir) => hir.stable_digest(),
            QueryOutput::Thir(thir) => thir.stable_digest(),
            QueryOutput::Mir(mir) => mir.stable_digest(),
            QueryOutput::Codegen(unit) => unit.stable_digest(),
        }
    }

    pub fn into_source(self) -> Option<Arc<SourceFile>> {
        match self {
            QueryOutput::Source(source) => Some(source),
            _ => None,
        }
    }

    pub fn into_tokens(self) -> Option<Arc<TokenStream>> {
        match self {
            QueryOutput::Tokens(tokens) => Some(tokens),
            _ => None,
        }
    }

    pub fn into_ast(self) -> Option<Arc<Module>> {
        match self {
            QueryOutput::Ast(ast) => Some(ast),
            _ => None,
        }
    }

    pub fn into_typechecked(self) -> Option<Arc<TypecheckedModule>> {
        match self {
            QueryOutput::Typechecked(typed) => Some(typed),
            _ => None,
        }
    }

    pub fn into_borrowcked(self) -> Option<Arc<BorrowckedModule>> {
        match self {
            QueryOutput::Borrowcked(borrowcked) => Some(borrowcked),
            _ => None,
        }
    }

    pub fn into_hir(self) -> Option<Arc<HirModule>> {
        match self {
            QueryOutput::Hir(hir) => Some(hir),
            _ => None,
        }
    }

    pub fn into_thir(self) -> Option<Arc<ThirModule>> {
        match self {
            QueryOutput::Thir(thir) => Some(thir),
            _ => None,
        }
    }

    pub fn into_mir(self) -> Option<Arc<MirModule>> {
        match self {
            QueryOutput::Mir(mir) => Some(mir),
            _ => None,
        }
    }

    pub fn into_codegen(self) -> Option<Arc<CodegenUnit>> {
        match self {
            QueryOutput::Codegen(unit) => Some(unit),
            _ => None,
        }
    }
}

/// A cached result with its fingerprints and recorded dependencies.
///
/// Entries are immutable once inserted; invalidation plus recompute replaces
/// them wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub output: QueryOutput,
    pub input_fingerprint: Fingerprint,
    pub output_fingerprint: Fingerprint,
    /// Keys the provider forced, in first-force order, deduplicated.
    pub dependencies: Vec<QueryKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Thread-safe memo table keyed by [`QueryKey`].
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached payload, counting a hit or a miss.
    ///
    /// A payload whose kind does not match the key is a driver bug; it is
    /// logged and treated as a miss.
    pub fn lookup(&self, key: &QueryKey) -> Option<QueryOutput> {
        let entries = self.entries.read().expect("query cache lock poisoned");
        match entries.get(key) {
            Some(entry) => {
                if entry.output.kind() != key.kind() {
                    warn!("cache payload for `{key}` has kind `{}`", entry.output.kind());
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.output.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Fetch the full entry without touching hit/miss counters.
    pub fn get_entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        let entries = self.entries.read().expect("query cache lock poisoned");
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        let entries = self.entries.read().expect("query cache lock poisoned");
        entries.contains_key(key)
    }

    pub fn insert(
        &self,
        key: QueryKey,
        output: QueryOutput,
        input_fingerprint: Fingerprint,
        output_fingerprint: Fingerprint,
        dependencies: Vec<QueryKey>,
    ) {
        let mut entries = self.entries.write().expect("query cache lock poisoned");
        entries.insert(
            key,
            CacheEntry { output, input_fingerprint, output_fingerprint, dependencies },
        );
    }

    pub fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.entries.write().expect("query cache lock poisoned");
        entries.remove(key);
    }

    /// Remove `key` and every entry whose dependency closure contains it.
    pub fn invalidate_dependents(&self, key: &QueryKey) {
        let mut entries = self.entries.write().expect("query cache lock poisoned");

        let mut to_invalidate: HashSet<QueryKey> = HashSet::new();
        let mut worklist: VecDeque<QueryKey> = VecDeque::new();
        to_invalidate.insert(key.clone());
        worklist.push_back(key.clone());

        while let Some(current) = worklist.pop_front() {
            for (entry_key, entry) in entries.iter() {
                if to_invalidate.contains(entry_key) {
                    continue;
                }
                if entry.dependencies.contains(&current) {
                    to_invalidate.insert(entry_key.clone());
                    worklist.push_back(entry_key.clone());
                }
            }
        }

        for key in &to_invalidate {
            entries.remove(key);
        }
    }

    /// All keys currently cached.
    pub fn keys(&self) -> Vec<QueryKey> {
        let entries = self.entries.read().expect("query cache lock poisoned");
        entries.keys().cloned().collect()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("query cache lock poisoned");
        entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().expect("query cache lock poisoned");
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn note_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
