//! End-to-end tests of the query pipeline: forcing, memoization, dependency
//! recording, invalidation, and failure propagation.

use camino::{Utf8Path, Utf8PathBuf};
use indoc::indoc;
use tamc::diagnostics::Severity;
use tamc::query::{
    ProviderRegistry, QueryContext, QueryError, QueryKey, QueryKind, QueryOptions,
};

struct Project {
    _guard: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Project {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(guard.path().to_path_buf()).unwrap();
        Self { _guard: guard, root }
    }

    fn add_file(&self, name: &str, text: &str) -> &Self {
        std::fs::write(self.root.join(name), text).unwrap();
        self
    }

    fn context(&self) -> QueryContext {
        self.context_with(|_| {})
    }

    fn context_with(&self, configure: impl FnOnce(&mut QueryOptions)) -> QueryContext {
        let mut options = QueryOptions {
            source_directory: self.root.clone(),
            incremental: false,
            ..QueryOptions::default()
        };
        configure(&mut options);
        QueryContext::new(options)
    }
}

const COUNT_SRC: &str = indoc! {"
    fn count(n: i64) -> i64 {
        let i = 0;
        while i < n {
            i = i + 1;
        }
        return i;
    }
"};

#[test]
fn codegen_cascades_through_the_whole_pipeline() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context();

    let unit = ctx.codegen_unit("count.tam", "count").unwrap();
    assert!(unit.ir.contains("define i64 @count"));
    assert_eq!(unit.native_libs, vec!["tamrt"]);

    // Every stage executed exactly once.
    let stats = ctx.cache_stats();
    assert_eq!(stats.entries, QueryKind::COUNT);
    assert_eq!(stats.misses, QueryKind::COUNT);
}

#[test]
fn second_force_is_a_cache_hit_with_identical_fingerprint() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context();

    let key = QueryKey::for_module(QueryKind::CodegenUnit, "count.tam", "count");
    let first = ctx.force(&key).unwrap();
    let misses_after_first = ctx.cache_stats().misses;
    let hits_after_first = ctx.cache_stats().hits;

    let second = ctx.force(&key).unwrap();
    let stats = ctx.cache_stats();
    assert_eq!(stats.misses, misses_after_first, "no recomputation expected");
    assert_eq!(stats.hits, hits_after_first + 1);
    assert_eq!(first.stable_digest(), second.stable_digest());
}

#[test]
fn dependencies_are_recorded_in_first_force_order() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context();
    ctx.codegen_unit("count.tam", "count").unwrap();

    let entry = |key: &QueryKey| ctx.cache().get_entry(key).unwrap();

    let tokenize = QueryKey::tokenize("count.tam");
    assert_eq!(
        entry(&tokenize).dependencies,
        vec![QueryKey::read_source("count.tam")]
    );

    let codegen = QueryKey::for_module(QueryKind::CodegenUnit, "count.tam", "count");
    assert_eq!(
        entry(&codegen).dependencies,
        vec![QueryKey::for_module(QueryKind::MirBuild, "count.tam", "count")]
    );

    // ThirLower forces HIR first, typecheck second.
    let thir = QueryKey::for_module(QueryKind::ThirLower, "count.tam", "count");
    assert_eq!(
        entry(&thir).dependencies,
        vec![
            QueryKey::for_module(QueryKind::HirLower, "count.tam", "count"),
            QueryKey::for_module(QueryKind::TypecheckModule, "count.tam", "count"),
        ]
    );
}

#[test]
fn infinite_loop_program_yields_one_warning() {
    let project = Project::new();
    project.add_file("spin.tam", "fn forever() { loop { } }\n");
    let ctx = project.context();

    ctx.mir_build("spin.tam", "spin").unwrap();

    let warnings: Vec<_> = ctx
        .diagnostics()
        .into_iter()
        .filter(|d| d.severity == Severity::Warning && d.message.contains("infinite loop"))
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].message.contains("always true with no exit path"));
}

#[test]
fn counted_loop_yields_no_warning() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context();

    ctx.mir_build("count.tam", "count").unwrap();

    assert!(
        ctx.diagnostics()
            .iter()
            .all(|d| !d.message.contains("infinite loop")),
        "{:?}",
        ctx.diagnostics()
    );
}

#[test]
fn leaked_allocation_yields_a_warning() {
    let project = Project::new();
    project.add_file("leak.tam", "fn f() { let b = alloc(8); }\n");
    let ctx = project.context();

    ctx.mir_build("leak.tam", "leak").unwrap();

    assert!(
        ctx.diagnostics()
            .iter()
            .any(|d| d.message.contains("memory leak")),
        "{:?}",
        ctx.diagnostics()
    );
}

#[test]
fn freed_allocation_yields_no_leak_warning() {
    let project = Project::new();
    project.add_file("ok.tam", "fn f() { let b = alloc(8); free(b); }\n");
    let ctx = project.context();

    ctx.mir_build("ok.tam", "ok").unwrap();

    assert!(
        ctx.diagnostics()
            .iter()
            .all(|d| !d.message.contains("memory leak")),
        "{:?}",
        ctx.diagnostics()
    );
}

#[test]
fn type_errors_fail_the_provider_and_are_not_cached() {
    let project = Project::new();
    project.add_file("bad.tam", "fn f() -> i64 { return true; }\n");
    let ctx = project.context();

    let err = ctx.typecheck_module("bad.tam", "bad").unwrap_err();
    assert!(matches!(err, QueryError::ProviderFailure { .. }));
    assert!(err.to_string().contains("return type mismatch"));

    let key = QueryKey::for_module(QueryKind::TypecheckModule, "bad.tam", "bad");
    assert!(!ctx.cache().contains(&key), "failed computation must not be cached");
    // Upstream stages succeeded and stay cached.
    assert!(ctx.cache().contains(&QueryKey::read_source("bad.tam")));
}

#[test]
fn missing_source_file_fails_read_source() {
    let project = Project::new();
    let ctx = project.context();
    let err = ctx.read_source("absent.tam").unwrap_err();
    assert!(matches!(err, QueryError::ProviderFailure { .. }));
}

#[test]
fn solver_failures_surface_as_typecheck_diagnostics() {
    let project = Project::new();
    project.add_file("solver.tam", "fn f() -> i64 { return (1 < 2) + (3 < 4); }\n");
    let ctx = project.context();

    let err = ctx.typecheck_module("solver.tam", "solver").unwrap_err();
    assert!(err.to_string().contains("no implementation of `Arith`"));
}

#[test]
fn invalidate_file_drops_the_whole_chain() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context();
    ctx.codegen_unit("count.tam", "count").unwrap();
    assert_eq!(ctx.cache_stats().entries, QueryKind::COUNT);

    ctx.invalidate_file(Utf8Path::new("count.tam"));
    assert_eq!(ctx.cache_stats().entries, 0);
}

#[test]
fn invalidate_file_spares_other_files() {
    let project = Project::new();
    project.add_file("a.tam", COUNT_SRC);
    project.add_file("b.tam", "fn main() -> i64 { return 7; }\n");
    let ctx = project.context();
    ctx.codegen_unit("a.tam", "a").unwrap();
    ctx.codegen_unit("b.tam", "b").unwrap();

    ctx.invalidate_file(Utf8Path::new("a.tam"));
    let stats = ctx.cache_stats();
    assert_eq!(stats.entries, QueryKind::COUNT);
    assert!(ctx
        .cache()
        .contains(&QueryKey::for_module(QueryKind::CodegenUnit, "b.tam", "b")));
}

#[test]
fn preprocessor_defines_gate_conditional_code() {
    let project = Project::new();
    let source = indoc! {"
        fn main() -> i64 {
            #if FAST
            return 1;
            #endif
            return 0;
        }
    "};
    project.add_file("cond.tam", source);

    let plain = project.context();
    let unit = plain.codegen_unit("cond.tam", "cond").unwrap();

    let fast_ctx = project.context_with(|options| {
        options.defines.push("FAST".into());
    });
    let fast_unit = fast_ctx.codegen_unit("cond.tam", "cond").unwrap();

    assert_ne!(unit.stable_digest(), fast_unit.stable_digest());
}

#[test]
fn cyclic_providers_are_rejected_without_installing_entries() {
    fn cyclic_tokenize(
        ctx: &QueryContext,
        key: &QueryKey,
    ) -> Result<tamc::query::QueryOutput, QueryError> {
        // Forces its own key: closes a cycle immediately.
        ctx.force(key)
    }

    let project = Project::new();
    project.add_file("a.tam", "fn f() { }\n");

    let mut registry = ProviderRegistry::with_core_providers();
    registry.register(QueryKind::Tokenize, cyclic_tokenize);
    let options = QueryOptions {
        source_directory: project.root.clone(),
        incremental: false,
        ..QueryOptions::default()
    };
    let ctx = QueryContext::with_providers(options, registry);

    let key = QueryKey::tokenize("a.tam");
    let err = ctx.force(&key).unwrap_err();
    let QueryError::CycleDetected(path) = err else {
        panic!("expected cycle, got {err}");
    };
    assert_eq!(path, vec![key.clone(), key.clone()]);
    assert!(!ctx.cache().contains(&key));
}

#[test]
fn repeated_forcing_is_deterministic_across_contexts() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);

    let first = project.context();
    let second = project.context();
    let key = QueryKey::for_module(QueryKind::CodegenUnit, "count.tam", "count");

    let a = first.force(&key).unwrap();
    let b = second.force(&key).unwrap();
    assert_eq!(a.stable_digest(), b.stable_digest());

    let entry_a = first.cache().get_entry(&key).unwrap();
    let entry_b = second.cache().get_entry(&key).unwrap();
    assert_eq!(entry_a.input_fingerprint, entry_b.input_fingerprint);
    assert_eq!(entry_a.dependencies, entry_b.dependencies);
}

#[test]
fn pgo_generate_instruments_the_unit() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    let ctx = project.context_with(|options| {
        options.profile_generate = true;
    });

    let unit = ctx.codegen_unit("count.tam", "count").unwrap();
    assert!(unit.ir.contains("tam_profile_counter"), "{}", unit.ir);
}

#[test]
fn pgo_use_annotates_hot_functions() {
    let project = Project::new();
    project.add_file("count.tam", COUNT_SRC);
    project.add_file("profile.txt", "count 4242\n");
    let ctx = project.context_with(|options| {
        options.profile_use = Some(project.root.join("profile.txt"));
    });

    let unit = ctx.codegen_unit("count.tam", "count").unwrap();
    assert!(unit.ir.contains("pgo entry count: 4242"), "{}", unit.ir);
}
