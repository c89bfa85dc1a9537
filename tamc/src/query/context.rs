//! The query context: central coordinator of the compilation session.
//!
//! Owns the cache, dependency tracker, provider registry, interner, and
//! incremental-session state. All compilation goes through [`QueryContext::force`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::compiler::borrowck::BorrowckedModule;
use crate::compiler::codegen::CodegenUnit;
use crate::compiler::hir::HirModule;
use crate::compiler::lexer::TokenStream;
use crate::compiler::mir::MirModule;
use crate::compiler::parser::Module;
use crate::compiler::source::SourceFile;
use crate::compiler::thir::ThirModule;
use crate::compiler::typeck::TypecheckedModule;
use crate::diagnostics::Diagnostic;
use crate::intern::{Interner, TypeIdGen};
use crate::query::cache::{CacheStats, QueryCache, QueryOutput};
use crate::query::deps::DependencyTracker;
use crate::query::fingerprint::Fingerprint;
use crate::query::incremental::{
    self, LoadOutcome, PrevSessionEntry, PrevSessionMap, QueryColor,
};
use crate::query::key::{QueryKey, QueryKind};
use crate::query::provider::ProviderRegistry;
use crate::version;

/// Environment variable that can veto incremental reuse regardless of the
/// configured options.
pub const TAMC_INCREMENTAL: &str = "TAMC_INCREMENTAL";

/// Options passed to the context by the build driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Progress logging only; never affects results.
    pub verbose: bool,
    /// Attach source-location metadata to codegen output.
    pub debug_info: bool,
    /// Emit coverage instrumentation.
    pub coverage: bool,
    /// 0–3.
    pub optimization_level: u8,
    pub target_triple: String,
    pub sysroot: Utf8PathBuf,
    /// Relative source paths resolve against this directory.
    pub source_directory: Utf8PathBuf,
    /// Preprocessor symbols.
    pub defines: Vec<String>,
    pub profile_generate: bool,
    pub profile_use: Option<Utf8PathBuf>,
    /// Master switch for on-disk reuse.
    pub incremental: bool,
    /// Code emitter selection.
    pub backend: SmolStr,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            debug_info: false,
            coverage: false,
            optimization_level: 0,
            target_triple: String::new(),
            sysroot: Utf8PathBuf::new(),
            source_directory: Utf8PathBuf::new(),
            defines: Vec::new(),
            profile_generate: false,
            profile_use: None,
            incremental: true,
            backend: SmolStr::new("llvm"),
        }
    }
}

/// How an option participates in fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionClass {
    /// Part of the environment fingerprint; changing it invalidates every
    /// query by construction.
    Environment,
    /// Folded into the input fingerprints of the stages it influences.
    Scoped,
    /// Never affects results.
    Inert,
}

/// Declares the option classification table together with a destructuring of
/// [`QueryOptions`] that lists the same fields without `..`. A field added to
/// the struct but missing here (or listed twice, or misspelled) is a compile
/// error, so the table cannot drift from the field set.
macro_rules! option_classes {
    ($($field:ident => $class:ident),* $(,)?) => {
        /// Single source of truth for option classification. Every field of
        /// [`QueryOptions`] appears here exactly once; the `option_classes!`
        /// declaration pins the table to the struct's field set.
        pub const OPTION_CLASSES: &[(&str, OptionClass)] = &[
            $((stringify!($field), OptionClass::$class),)*
        ];

        fn assert_options_classified(options: &QueryOptions) {
            let QueryOptions { $($field: _,)* } = options;
        }
    };
}

option_classes! {
    verbose => Inert,
    debug_info => Scoped,
    coverage => Scoped,
    optimization_level => Scoped,
    target_triple => Environment,
    sysroot => Environment,
    source_directory => Environment,
    defines => Scoped,
    profile_generate => Scoped,
    profile_use => Scoped,
    incremental => Inert,
    backend => Environment,
}

impl QueryOptions {
    /// Canonical rendering of every non-inert option, in declaration order.
    /// Feeds the on-disk options hash.
    fn canonical_non_inert(&self) -> String {
        assert_options_classified(self);
        format!(
            "debug_info={};coverage={};opt={};target={};sysroot={};source_dir={};defines={};pgo_gen={};pgo_use={};backend={}",
            self.debug_info,
            self.coverage,
            self.optimization_level,
            self.target_triple,
            self.sysroot,
            self.source_directory,
            self.defines.join(","),
            self.profile_generate,
            self.profile_use.as_deref().unwrap_or(Utf8Path::new("")),
            self.backend,
        )
    }

    pub fn options_hash(&self) -> u32 {
        tamc_stable_hash::crc32c(self.canonical_non_inert().as_bytes())
    }
}

/// Driver-level failures surfaced to `force` callers.
///
/// Cache format and cache I/O problems never appear here: they are recovered
/// internally by degrading to non-incremental operation.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("dependency cycle detected: {}", format_key_path(.0))]
    CycleDetected(Vec<QueryKey>),
    #[error("{}", format_provider_failure(.key, .diagnostics))]
    ProviderFailure {
        key: QueryKey,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("no provider registered for `{0}`")]
    MissingProvider(QueryKind),
    #[error("cache payload for `{0}` has an unexpected kind")]
    PayloadMismatch(QueryKey),
}

fn format_key_path(path: &[QueryKey]) -> String {
    path.iter().map(ToString::to_string).join(" -> ")
}

fn format_provider_failure(key: &QueryKey, diagnostics: &[Diagnostic]) -> String {
    match diagnostics.first() {
        Some(first) if diagnostics.len() > 1 => {
            format!("`{key}` failed: {first} (and {} more)", diagnostics.len() - 1)
        }
        Some(first) => format!("`{key}` failed: {first}"),
        None => format!("`{key}` failed"),
    }
}

#[derive(Debug, Default)]
struct SessionState {
    /// Incremental reuse is active for this session.
    enabled: bool,
    cache_dir: Option<Utf8PathBuf>,
    prev_session: PrevSessionMap,
    colors: HashMap<QueryKey, QueryColor>,
}

/// Central coordinator for a compilation session.
pub struct QueryContext {
    options: QueryOptions,
    cache: QueryCache,
    tracker: DependencyTracker,
    providers: ProviderRegistry,
    interner: Interner,
    type_ids: TypeIdGen,
    diagnostics: Mutex<Vec<Diagnostic>>,
    env_fingerprint: Fingerprint,
    options_hash: u32,
    session: Mutex<SessionState>,
}

impl QueryContext {
    pub fn new(options: QueryOptions) -> Self {
        Self::with_providers(options, ProviderRegistry::with_core_providers())
    }

    /// Construct with a custom provider table. The registry must cover every
    /// kind the session will force.
    pub fn with_providers(options: QueryOptions, providers: ProviderRegistry) -> Self {
        let env_fingerprint = compute_env_fingerprint(&options);
        let options_hash = options.options_hash();
        let enabled = options.incremental && incremental_allowed_via_env();
        Self {
            options,
            cache: QueryCache::new(),
            tracker: DependencyTracker::new(),
            providers,
            interner: Interner::new(),
            type_ids: TypeIdGen::new(),
            diagnostics: Mutex::new(Vec::new()),
            env_fingerprint,
            options_hash,
            session: Mutex::new(SessionState { enabled, ..SessionState::default() }),
        }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn type_ids(&self) -> &TypeIdGen {
        &self.type_ids
    }

    pub fn deps(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn env_fingerprint(&self) -> Fingerprint {
        self.env_fingerprint
    }

    /// Force-execute a query: return the memoized result, reuse the previous
    /// session's work when it verifies green, or run the provider.
    pub fn force(&self, key: &QueryKey) -> Result<QueryOutput, QueryError> {
        if let Some(path) = self.tracker.detect_cycle(key) {
            return Err(QueryError::CycleDetected(path));
        }
        // Charge the edge to the calling provider, if any.
        self.tracker.record_dependency(key);

        let incremental = self.incremental_active();
        if let Some(entry) = self.cache.get_entry(key) {
            if !incremental || self.color_of(key) == QueryColor::Green {
                self.cache.note_hit();
                return Ok(entry.output);
            }
        }

        if incremental && key.kind() == QueryKind::CodegenUnit {
            if let Some(output) = self.try_mark_green_codegen(key) {
                self.cache.note_hit();
                return Ok(output);
            }
        }

        self.execute(key)
    }

    fn execute(&self, key: &QueryKey) -> Result<QueryOutput, QueryError> {
        let Some(provider) = self.providers.get(key.kind()) else {
            return Err(QueryError::MissingProvider(key.kind()));
        };
        self.cache.note_miss();
        if self.options.verbose {
            debug!("executing `{key}`");
        }

        self.tracker.push_active(key);
        let result = provider(self, key);
        let dependencies = self.tracker.pop_active();
        // Failed computations are not cached; no partial state remains.
        let output = result?;

        let dep_fingerprints: Vec<Fingerprint> = dependencies
            .iter()
            .map(|dep| {
                self.cache
                    .get_entry(dep)
                    .map(|entry| entry.output_fingerprint)
                    .unwrap_or(Fingerprint::ZERO)
            })
            .collect();
        let input_fingerprint = self.compute_input_fingerprint(key, &dep_fingerprints);
        let output_fingerprint = output.stable_digest();

        self.cache.insert(
            key.clone(),
            output.clone(),
            input_fingerprint,
            output_fingerprint,
            dependencies,
        );
        self.set_color(key, QueryColor::Green);
        Ok(output)
    }

    /// `input_fp = combine(env, scoped(kind), [file digest], dep output fps)`,
    /// folded left in that order. Used identically during execution and during
    /// green verification, which is what makes the two agree.
    fn compute_input_fingerprint(
        &self,
        key: &QueryKey,
        dep_fingerprints: &[Fingerprint],
    ) -> Fingerprint {
        let mut fp = self
            .env_fingerprint
            .combine(self.scoped_fingerprint(key.kind()));
        if let QueryKey::ReadSource { path } = key {
            fp = fp.combine(Fingerprint::of_file(&self.resolve_source_path(path)));
        }
        for dep in dep_fingerprints {
            fp = fp.combine(*dep);
        }
        fp
    }

    /// Digest of the scoped options a stage depends on. Stages not named in
    /// the classification table contribute nothing of their own.
    fn scoped_fingerprint(&self, kind: QueryKind) -> Fingerprint {
        match kind {
            QueryKind::ReadSource => {
                Fingerprint::of_str(&format!("defines={}", self.options.defines.join(",")))
            }
            QueryKind::MirBuild => {
                let profile = match &self.options.profile_use {
                    Some(path) => Fingerprint::of_file(path).to_hex(),
                    None => String::new(),
                };
                Fingerprint::of_str(&format!(
                    "pgo_gen={};pgo_use={profile}",
                    self.options.profile_generate
                ))
            }
            QueryKind::CodegenUnit => Fingerprint::of_str(&format!(
                "debug_info={};coverage={};opt={}",
                self.options.debug_info, self.options.coverage, self.options.optimization_level
            )),
            _ => Fingerprint::ZERO,
        }
    }

    pub fn resolve_source_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() || self.options.source_directory.as_str().is_empty() {
            path.to_path_buf()
        } else {
            self.options.source_directory.join(path)
        }
    }

    fn color_of(&self, key: &QueryKey) -> QueryColor {
        let state = self.session.lock().expect("session state lock poisoned");
        state.colors.get(key).copied().unwrap_or_default()
    }

    fn set_color(&self, key: &QueryKey, color: QueryColor) {
        let mut state = self.session.lock().expect("session state lock poisoned");
        state.colors.insert(key.clone(), color);
    }

    pub fn incremental_active(&self) -> bool {
        let state = self.session.lock().expect("session state lock poisoned");
        state.enabled
    }

    /// Reuse a codegen unit from the previous session if its whole input tree
    /// verifies green. Returns the reloaded payload on success.
    fn try_mark_green_codegen(&self, key: &QueryKey) -> Option<QueryOutput> {
        let (prev, cache_dir) = {
            let mut state = self.session.lock().expect("session state lock poisoned");
            if !state.prev_session.contains_key(key) {
                return None;
            }
            let mut visiting = HashSet::new();
            if !self.verify_green(key, &mut state, &mut visiting) {
                debug!("codegen unit `{key}` is red; recompiling");
                return None;
            }
            let prev = state.prev_session.get(key).cloned()?;
            (prev, state.cache_dir.clone()?)
        };

        match incremental::load_ir_artifact(&cache_dir, prev.output_fingerprint) {
            Ok((ir, native_libs)) => {
                debug!("reusing green codegen unit `{key}`");
                let unit = CodegenUnit {
                    module: key.module().unwrap_or_default().into(),
                    ir,
                    native_libs,
                };
                let output = QueryOutput::Codegen(Arc::new(unit));
                self.cache.insert(
                    key.clone(),
                    output.clone(),
                    prev.input_fingerprint,
                    prev.output_fingerprint,
                    prev.dependencies,
                );
                Some(output)
            }
            Err(err) => {
                warn!("failed to load cached artifact for `{key}`: {err:#}");
                None
            }
        }
    }

    /// Red/green resolution over the previous session's edge lists. Marks
    /// colors as it goes; never executes providers. The `visiting` set guards
    /// against corrupted (cyclic) on-disk data.
    fn verify_green(
        &self,
        key: &QueryKey,
        state: &mut SessionState,
        visiting: &mut HashSet<QueryKey>,
    ) -> bool {
        match state.colors.get(key) {
            Some(QueryColor::Green) => return true,
            Some(QueryColor::Red) => return false,
            _ => {}
        }
        if !visiting.insert(key.clone()) {
            return false;
        }

        let verdict = match state.prev_session.get(key).cloned() {
            None => false,
            Some(prev) => {
                let mut deps_green = true;
                for dep in &prev.dependencies {
                    if !self.verify_green(dep, state, visiting) {
                        deps_green = false;
                        break;
                    }
                }
                if deps_green {
                    let dep_fingerprints: Vec<Fingerprint> = prev
                        .dependencies
                        .iter()
                        .map(|dep| {
                            state
                                .prev_session
                                .get(dep)
                                .map(|entry| entry.output_fingerprint)
                                .unwrap_or(Fingerprint::ZERO)
                        })
                        .collect();
                    self.compute_input_fingerprint(key, &dep_fingerprints)
                        == prev.input_fingerprint
                } else {
                    false
                }
            }
        };

        visiting.remove(key);
        let color = if verdict { QueryColor::Green } else { QueryColor::Red };
        state.colors.insert(key.clone(), color);
        verdict
    }

    // ------------------------------------------------------------------
    // Convenience wrappers: build the key, force, unwrap the payload.
    // ------------------------------------------------------------------

    pub fn read_source(&self, path: impl Into<Utf8PathBuf>) -> Result<Arc<SourceFile>, QueryError> {
        let key = QueryKey::read_source(path);
        self.force(&key)?
            .into_source()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn tokenize(&self, path: impl Into<Utf8PathBuf>) -> Result<Arc<TokenStream>, QueryError> {
        let key = QueryKey::tokenize(path);
        self.force(&key)?
            .into_tokens()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn parse_module(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<Module>, QueryError> {
        let key = QueryKey::for_module(QueryKind::ParseModule, path, module);
        self.force(&key)?
            .into_ast()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn typecheck_module(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<TypecheckedModule>, QueryError> {
        let key = QueryKey::for_module(QueryKind::TypecheckModule, path, module);
        self.force(&key)?
            .into_typechecked()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn borrowcheck_module(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<BorrowckedModule>, QueryError> {
        let key = QueryKey::for_module(QueryKind::BorrowcheckModule, path, module);
        self.force(&key)?
            .into_borrowcked()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn hir_lower(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<HirModule>, QueryError> {
        let key = QueryKey::for_module(QueryKind::HirLower, path, module);
        self.force(&key)?
            .into_hir()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn thir_lower(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<ThirModule>, QueryError> {
        let key = QueryKey::for_module(QueryKind::ThirLower, path, module);
        self.force(&key)?
            .into_thir()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn mir_build(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<MirModule>, QueryError> {
        let key = QueryKey::for_module(QueryKind::MirBuild, path, module);
        self.force(&key)?
            .into_mir()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    pub fn codegen_unit(
        &self,
        path: impl Into<Utf8PathBuf>,
        module: impl Into<SmolStr>,
    ) -> Result<Arc<CodegenUnit>, QueryError> {
        let key = QueryKey::for_module(QueryKind::CodegenUnit, path, module);
        self.force(&key)?
            .into_codegen()
            .ok_or(QueryError::PayloadMismatch(key))
    }

    // ------------------------------------------------------------------
    // Cache management
    // ------------------------------------------------------------------

    /// Drop every cached entry whose key names `path`, plus their transitive
    /// dependents. Colors reset wholesale: the next force re-verifies.
    pub fn invalidate_file(&self, path: &Utf8Path) {
        let matching: Vec<QueryKey> = self
            .cache
            .keys()
            .into_iter()
            .filter(|key| key.path() == path)
            .collect();
        for key in &matching {
            self.cache.invalidate_dependents(key);
        }
        let mut state = self.session.lock().expect("session state lock poisoned");
        state.colors.clear();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        let mut state = self.session.lock().expect("session state lock poisoned");
        state.colors.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ------------------------------------------------------------------
    // Incremental persistence
    // ------------------------------------------------------------------

    /// Load the previous session's index. Returns true when entries were
    /// loaded; format mismatches discard the cache, I/O failures disable
    /// incremental reuse for this session. Neither surfaces to callers.
    pub fn load_incremental_cache(&self, dir: &Utf8Path) -> bool {
        if !self.incremental_active() {
            return false;
        }
        match incremental::load_index(dir, version::build_hash(), self.options_hash) {
            Ok(LoadOutcome::Loaded(map)) => {
                let mut state = self.session.lock().expect("session state lock poisoned");
                state.prev_session = map;
                state.cache_dir = Some(dir.to_path_buf());
                true
            }
            Ok(LoadOutcome::Missing) => {
                debug!("no incremental cache at `{dir}` yet");
                let mut state = self.session.lock().expect("session state lock poisoned");
                state.cache_dir = Some(dir.to_path_buf());
                false
            }
            Ok(LoadOutcome::Mismatch(reason)) => {
                warn!("discarding incompatible incremental cache at `{dir}`: {reason}");
                let mut state = self.session.lock().expect("session state lock poisoned");
                state.prev_session.clear();
                state.cache_dir = Some(dir.to_path_buf());
                false
            }
            Err(err) => {
                warn!("incremental cache unavailable: {err:#}; continuing without reuse");
                let mut state = self.session.lock().expect("session state lock poisoned");
                state.enabled = false;
                false
            }
        }
    }

    /// Persist this session's fingerprints, edges, and codegen artifacts.
    ///
    /// Entries verified green but not recomputed are carried over from the
    /// previous session, so an unchanged rebuild writes a byte-identical
    /// index.
    pub fn save_incremental_cache(&self, dir: &Utf8Path) -> bool {
        if !self.incremental_active() {
            return false;
        }

        let mut merged: PrevSessionMap = {
            let state = self.session.lock().expect("session state lock poisoned");
            state.prev_session.clone()
        };
        for key in self.cache.keys() {
            if let Some(entry) = self.cache.get_entry(&key) {
                merged.insert(
                    key,
                    PrevSessionEntry {
                        input_fingerprint: entry.input_fingerprint,
                        output_fingerprint: entry.output_fingerprint,
                        dependencies: entry.dependencies,
                    },
                );
            }
        }
        let entries: Vec<(QueryKey, PrevSessionEntry)> = merged.into_iter().collect();

        if let Err(err) =
            incremental::save_index(dir, &entries, version::build_hash(), self.options_hash)
        {
            warn!("failed to save incremental cache at `{dir}`: {err:#}");
            return false;
        }

        let live_hex: HashSet<String> = entries
            .iter()
            .filter(|(key, _)| key.kind() == QueryKind::CodegenUnit)
            .map(|(_, entry)| entry.output_fingerprint.to_hex())
            .collect();
        for key in self.cache.keys() {
            if key.kind() != QueryKind::CodegenUnit {
                continue;
            }
            let Some(entry) = self.cache.get_entry(&key) else {
                continue;
            };
            if let Some(unit) = entry.output.into_codegen() {
                if let Err(err) = incremental::save_ir_artifact(
                    dir,
                    entry.output_fingerprint,
                    &unit.ir,
                    &unit.native_libs,
                ) {
                    warn!("failed to save artifact for `{key}`: {err:#}");
                }
            }
        }
        incremental::sweep_stale_artifacts(dir, &live_hex);

        let mut state = self.session.lock().expect("session state lock poisoned");
        state.cache_dir = Some(dir.to_path_buf());
        true
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub(crate) fn sink_diagnostics(&self, diagnostics: &[Diagnostic]) {
        if diagnostics.is_empty() {
            return;
        }
        let mut sink = self.diagnostics.lock().expect("diagnostics lock poisoned");
        sink.extend_from_slice(diagnostics);
    }

    /// Diagnostics accumulated by every stage run so far this session.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .expect("diagnostics lock poisoned")
            .clone()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock().expect("diagnostics lock poisoned"))
    }
}

fn compute_env_fingerprint(options: &QueryOptions) -> Fingerprint {
    Fingerprint::of_str(&format!(
        "build={:08x};target={};sysroot={};source_dir={};backend={}",
        version::build_hash(),
        options.target_triple,
        options.sysroot,
        options.source_directory,
        options.backend,
    ))
}

/// `TAMC_INCREMENTAL=0` (or `false`/`off`) vetoes incremental reuse.
fn incremental_allowed_via_env() -> bool {
    match std::env::var(TAMC_INCREMENTAL) {
        Ok(value) => !matches!(value.to_lowercase().as_str(), "0" | "false" | "off"),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_option_is_classified() {
        // Missing, duplicate, or misspelled fields are compile errors via
        // `option_classes!`; here we only check the assigned classes.
        assert_options_classified(&QueryOptions::default());
        let class_of = |name: &str| {
            OPTION_CLASSES
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, class)| *class)
        };
        assert_eq!(class_of("verbose"), Some(OptionClass::Inert));
        assert_eq!(class_of("incremental"), Some(OptionClass::Inert));
        assert_eq!(class_of("optimization_level"), Some(OptionClass::Scoped));
        assert_eq!(class_of("defines"), Some(OptionClass::Scoped));
        assert_eq!(class_of("backend"), Some(OptionClass::Environment));
        assert_eq!(class_of("target_triple"), Some(OptionClass::Environment));
    }

    #[test]
    fn environment_options_change_the_env_fingerprint() {
        let base = compute_env_fingerprint(&QueryOptions::default());

        let mut options = QueryOptions::default();
        options.target_triple = "aarch64-unknown-linux-gnu".into();
        assert_ne!(compute_env_fingerprint(&options), base);

        let mut options = QueryOptions::default();
        options.backend = "cranelift".into();
        assert_ne!(compute_env_fingerprint(&options), base);
    }

    #[test]
    fn scoped_and_inert_options_leave_the_env_fingerprint_alone() {
        let base = compute_env_fingerprint(&QueryOptions::default());

        let mut options = QueryOptions::default();
        options.verbose = true;
        options.debug_info = true;
        options.coverage = true;
        options.optimization_level = 3;
        options.defines.push("DEBUG".into());
        assert_eq!(compute_env_fingerprint(&options), base);
    }

    #[test]
    fn options_hash_ignores_inert_options() {
        let base = QueryOptions::default().options_hash();

        let mut options = QueryOptions::default();
        options.verbose = true;
        options.incremental = false;
        assert_eq!(options.options_hash(), base);

        let mut options = QueryOptions::default();
        options.optimization_level = 2;
        assert_ne!(options.options_hash(), base);
    }

    #[test]
    fn scoped_fingerprints_are_stage_local() {
        let mut options = QueryOptions::default();
        options.defines.push("TRACE".into());
        let ctx = QueryContext::new(options);

        let plain = QueryContext::new(QueryOptions::default());
        // Defines reach the preprocessor stage only.
        assert_ne!(
            ctx.scoped_fingerprint(QueryKind::ReadSource),
            plain.scoped_fingerprint(QueryKind::ReadSource)
        );
        assert_eq!(
            ctx.scoped_fingerprint(QueryKind::CodegenUnit),
            plain.scoped_fingerprint(QueryKind::CodegenUnit)
        );
    }

    #[test]
    fn missing_provider_is_reported() {
        let ctx = QueryContext::new(QueryOptions::default());
        // All nine providers are registered at construction.
        for kind in QueryKind::ALL {
            assert!(ctx.providers.get(kind).is_some(), "{kind} missing");
        }
    }

    #[test]
    fn cycle_error_names_the_full_path() {
        let k1 = QueryKey::read_source("a.tam");
        let k2 = QueryKey::tokenize("a.tam");
        let err = QueryError::CycleDetected(vec![k1.clone(), k2, k1]);
        let message = err.to_string();
        assert!(message.contains("read_source(a.tam) -> tokenize(a.tam) -> read_source(a.tam)"));
    }
}
