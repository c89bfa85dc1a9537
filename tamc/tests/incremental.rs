//! Cross-session incremental reuse: save, load, green verification, and
//! red recompilation.

use camino::Utf8PathBuf;
use indoc::indoc;
use tamc::query::incremental::INDEX_FILE_NAME;
use tamc::query::{QueryContext, QueryKey, QueryKind, QueryOptions};

struct Project {
    _guard: tempfile::TempDir,
    root: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
}

impl Project {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(guard.path().to_path_buf()).unwrap();
        let cache_dir = root.join(".incr-cache");
        Self { _guard: guard, root, cache_dir }
    }

    fn add_file(&self, name: &str, text: &str) -> &Self {
        std::fs::write(self.root.join(name), text).unwrap();
        self
    }

    fn options(&self) -> QueryOptions {
        QueryOptions {
            source_directory: self.root.clone(),
            ..QueryOptions::default()
        }
    }

    fn context(&self) -> QueryContext {
        QueryContext::new(self.options())
    }
}

const MAIN_SRC: &str = indoc! {"
    fn main() -> i64 {
        return count(10);
    }

    fn count(n: i64) -> i64 {
        let i = 0;
        while i < n {
            i = i + 1;
        }
        return i;
    }
"};

const UTIL_SRC: &str = "fn helper() -> i64 { return 7; }\n";

fn compile_both(ctx: &QueryContext) {
    ctx.codegen_unit("main.tam", "main").unwrap();
    ctx.codegen_unit("util.tam", "util").unwrap();
}

#[test]
fn unchanged_rebuild_reuses_codegen_without_running_providers() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);
    project.add_file("util.tam", UTIL_SRC);

    // First session: full build, then persist.
    let first = project.context();
    compile_both(&first);
    let first_unit = first.codegen_unit("main.tam", "main").unwrap();
    assert!(first.save_incremental_cache(&project.cache_dir));

    // Second session: nothing changed.
    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));
    let reused = second.codegen_unit("main.tam", "main").unwrap();

    let stats = second.cache_stats();
    assert_eq!(stats.misses, 0, "no provider may run on a green rebuild");
    assert_eq!(stats.hits, 1);
    assert_eq!(reused.ir, first_unit.ir);
    assert_eq!(reused.native_libs, first_unit.native_libs);

    // Green verification reproduced the stored output fingerprint.
    let key = QueryKey::for_module(QueryKind::CodegenUnit, "main.tam", "main");
    let entry = second.cache().get_entry(&key).unwrap();
    assert_eq!(entry.output_fingerprint, reused.stable_digest());
    assert_eq!(
        entry.output_fingerprint,
        first.cache().get_entry(&key).unwrap().output_fingerprint
    );
}

#[test]
fn persist_load_persist_is_byte_identical() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);
    project.add_file("util.tam", UTIL_SRC);

    let first = project.context();
    compile_both(&first);
    assert!(first.save_incremental_cache(&project.cache_dir));
    let original = std::fs::read(project.cache_dir.join(INDEX_FILE_NAME)).unwrap();

    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));
    compile_both(&second);
    assert!(second.save_incremental_cache(&project.cache_dir));
    let rewritten = std::fs::read(project.cache_dir.join(INDEX_FILE_NAME)).unwrap();

    assert_eq!(original, rewritten);
}

#[test]
fn changing_one_file_recompiles_only_its_unit() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);
    project.add_file("util.tam", UTIL_SRC);

    let first = project.context();
    compile_both(&first);
    assert!(first.save_incremental_cache(&project.cache_dir));

    // Touch util.tam with a semantic change.
    project.add_file("util.tam", "fn helper() -> i64 { return 8; }\n");

    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));

    // The untouched unit stays green.
    second.codegen_unit("main.tam", "main").unwrap();
    assert_eq!(second.cache_stats().misses, 0);

    // The changed unit is red and recompiles the whole chain.
    let recompiled = second.codegen_unit("util.tam", "util").unwrap();
    assert_eq!(second.cache_stats().misses, QueryKind::COUNT);
    assert!(recompiled.ir.contains("add i64 0, 8"), "{}", recompiled.ir);
}

#[test]
fn scoped_option_change_recompiles_codegen() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);

    let first = project.context();
    first.codegen_unit("main.tam", "main").unwrap();
    assert!(first.save_incremental_cache(&project.cache_dir));

    // Same sources, different codegen options: the options hash differs, so
    // the whole cache is discarded at load.
    let mut options = project.options();
    options.optimization_level = 2;
    let second = QueryContext::new(options);
    assert!(!second.load_incremental_cache(&project.cache_dir));
    second.codegen_unit("main.tam", "main").unwrap();
    assert_eq!(second.cache_stats().misses, QueryKind::COUNT);
}

#[test]
fn corrupt_index_degrades_to_full_rebuild() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);

    let first = project.context();
    first.codegen_unit("main.tam", "main").unwrap();
    assert!(first.save_incremental_cache(&project.cache_dir));

    std::fs::write(project.cache_dir.join(INDEX_FILE_NAME), b"garbage").unwrap();

    let second = project.context();
    assert!(!second.load_incremental_cache(&project.cache_dir));
    // Still compiles, and can persist a fresh cache afterwards.
    second.codegen_unit("main.tam", "main").unwrap();
    assert!(second.save_incremental_cache(&project.cache_dir));

    let third = project.context();
    assert!(third.load_incremental_cache(&project.cache_dir));
    third.codegen_unit("main.tam", "main").unwrap();
    assert_eq!(third.cache_stats().misses, 0);
}

#[test]
fn missing_artifact_falls_back_to_recompilation() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);

    let first = project.context();
    first.codegen_unit("main.tam", "main").unwrap();
    assert!(first.save_incremental_cache(&project.cache_dir));

    // Remove the cached IR side files but keep the index.
    std::fs::remove_dir_all(project.cache_dir.join("ir")).unwrap();

    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));
    let unit = second.codegen_unit("main.tam", "main").unwrap();
    assert!(unit.ir.contains("define i64 @main"));
    assert!(second.cache_stats().misses > 0, "must have recompiled");
}

#[test]
fn incremental_disabled_by_options_never_persists() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);

    let mut options = project.options();
    options.incremental = false;
    let ctx = QueryContext::new(options);
    assert!(!ctx.incremental_active());
    ctx.codegen_unit("main.tam", "main").unwrap();
    assert!(!ctx.save_incremental_cache(&project.cache_dir));
    assert!(!project.cache_dir.join(INDEX_FILE_NAME).exists());
}

#[test]
fn stale_artifacts_are_swept_on_save() {
    let project = Project::new();
    project.add_file("main.tam", MAIN_SRC);

    let first = project.context();
    let old_unit = first.codegen_unit("main.tam", "main").unwrap();
    assert!(first.save_incremental_cache(&project.cache_dir));
    let old_hex = old_unit.stable_digest().to_hex();
    assert!(project.cache_dir.join("ir").join(format!("{old_hex}.ll")).exists());

    // Change the source; the old artifact becomes unreferenced.
    project.add_file("main.tam", "fn main() -> i64 { return 1; }\n");
    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));
    let new_unit = second.codegen_unit("main.tam", "main").unwrap();
    assert!(second.save_incremental_cache(&project.cache_dir));

    let new_hex = new_unit.stable_digest().to_hex();
    assert!(project.cache_dir.join("ir").join(format!("{new_hex}.ll")).exists());
    assert!(
        !project.cache_dir.join("ir").join(format!("{old_hex}.ll")).exists(),
        "stale artifact should be swept"
    );
}

#[test]
fn artifact_reload_preserves_native_libs() {
    let project = Project::new();
    project.add_file("heap.tam", "fn f() { let b = alloc(8); free(b); }\n");

    let first = project.context();
    let unit = first.codegen_unit("heap.tam", "heap").unwrap();
    assert!(unit.native_libs.contains(&"tamrt_heap".to_string()));
    assert!(first.save_incremental_cache(&project.cache_dir));

    let second = project.context();
    assert!(second.load_incremental_cache(&project.cache_dir));
    let reloaded = second.codegen_unit("heap.tam", "heap").unwrap();
    assert_eq!(reloaded.native_libs, unit.native_libs);
    assert_eq!(second.cache_stats().misses, 0);
}
