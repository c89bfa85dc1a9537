//! Provider registry and the per-stage provider implementations.
//!
//! A provider reads its inputs exclusively through `ctx` wrappers that go via
//! `force`, so every input becomes a recorded dependency edge. Stage
//! diagnostics flow into the context's sink; stage errors become
//! [`QueryError::ProviderFailure`] and the failed computation is not cached.

use std::sync::Arc;

use smol_str::SmolStr;
use tracing::trace_span;

use crate::compiler::codegen::{self, CodegenConfig};
use crate::compiler::mir::passes::infinite_loop::InfiniteLoopCheckPass;
use crate::compiler::mir::passes::leak_check::LeakCheckPass;
use crate::compiler::mir::passes::pgo::{parse_profile_data, PgoMode, PgoPass};
use crate::compiler::mir::passes::run_pass;
use crate::compiler::{borrowck, hir, lexer, mir, parser, source, thir, typeck};
use crate::diagnostics::{Diagnostic, Severity};
use crate::internal::fsx;
use crate::query::cache::QueryOutput;
use crate::query::context::{QueryContext, QueryError};
use crate::query::key::{QueryKey, QueryKind};

/// A provider computes one query kind. Deterministic given its forced
/// dependencies and the context's environment fingerprint.
pub type Provider = fn(&QueryContext, &QueryKey) -> Result<QueryOutput, QueryError>;

/// Maps each [`QueryKind`] to its provider. Exactly one per kind, installed
/// at context construction.
pub struct ProviderRegistry {
    table: [Option<Provider>; QueryKind::COUNT],
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { table: [None; QueryKind::COUNT] }
    }

    pub fn with_core_providers() -> Self {
        let mut registry = Self::new();
        registry.register(QueryKind::ReadSource, provide_read_source);
        registry.register(QueryKind::Tokenize, provide_tokenize);
        registry.register(QueryKind::ParseModule, provide_parse_module);
        registry.register(QueryKind::TypecheckModule, provide_typecheck_module);
        registry.register(QueryKind::BorrowcheckModule, provide_borrowcheck_module);
        registry.register(QueryKind::HirLower, provide_hir_lower);
        registry.register(QueryKind::ThirLower, provide_thir_lower);
        registry.register(QueryKind::MirBuild, provide_mir_build);
        registry.register(QueryKind::CodegenUnit, provide_codegen_unit);
        registry
    }

    pub fn register(&mut self, kind: QueryKind, provider: Provider) {
        self.table[kind.index()] = Some(provider);
    }

    pub fn get(&self, kind: QueryKind) -> Option<Provider> {
        self.table[kind.index()]
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_core_providers()
    }
}

/// Fail the provider if any stage diagnostic is an error.
fn bail_on_errors(key: &QueryKey, diagnostics: &[Diagnostic]) -> Result<(), QueryError> {
    let errors: Vec<Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .cloned()
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(QueryError::ProviderFailure { key: key.clone(), diagnostics: errors })
    }
}

fn module_name(key: &QueryKey) -> SmolStr {
    key.module().unwrap_or_default().into()
}

fn provide_read_source(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let span = trace_span!("read_source", path = %key.path());
    let _guard = span.enter();

    let full_path = ctx.resolve_source_path(key.path());
    let raw = fsx::read_to_string(&full_path).map_err(|err| QueryError::ProviderFailure {
        key: key.clone(),
        diagnostics: vec![Diagnostic::error("read_source", format!("{err:#}"))],
    })?;
    let (file, diagnostics) =
        source::preprocess(key.path().to_path_buf(), &raw, &ctx.options().defines);
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Source(Arc::new(file)))
}

fn provide_tokenize(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let source = ctx.read_source(key.path())?;
    let (stream, diagnostics) = lexer::tokenize(&source.text);
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Tokens(Arc::new(stream)))
}

fn provide_parse_module(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let stream = ctx.tokenize(key.path())?;
    let (module, diagnostics) = parser::parse_module(module_name(key), &stream);
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Ast(Arc::new(module)))
}

fn provide_typecheck_module(
    ctx: &QueryContext,
    key: &QueryKey,
) -> Result<QueryOutput, QueryError> {
    let ast = ctx.parse_module(key.path(), module_name(key))?;
    let (typed, diagnostics) = typeck::typecheck_module(ast, ctx.interner(), ctx.type_ids());
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Typechecked(Arc::new(typed)))
}

fn provide_borrowcheck_module(
    ctx: &QueryContext,
    key: &QueryKey,
) -> Result<QueryOutput, QueryError> {
    let typed = ctx.typecheck_module(key.path(), module_name(key))?;
    let (borrowcked, diagnostics) = borrowck::borrowck_module(typed);
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Borrowcked(Arc::new(borrowcked)))
}

fn provide_hir_lower(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let borrowcked = ctx.borrowcheck_module(key.path(), module_name(key))?;
    let hir = hir::hir_lower(&borrowcked.typed.ast);
    Ok(QueryOutput::Hir(Arc::new(hir)))
}

fn provide_thir_lower(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let hir = ctx.hir_lower(key.path(), module_name(key))?;
    let typed = ctx.typecheck_module(key.path(), module_name(key))?;
    let (thir, diagnostics) = thir::thir_lower(&hir, &typed);
    ctx.sink_diagnostics(&diagnostics);
    bail_on_errors(key, &diagnostics)?;
    Ok(QueryOutput::Thir(Arc::new(thir)))
}

fn provide_mir_build(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let thir = ctx.thir_lower(key.path(), module_name(key))?;
    let mut module = mir::build::mir_build(&thir);

    // Static analyses run on the freshly lowered IR; their findings are
    // warnings, never fatal.
    let mut loop_pass = InfiniteLoopCheckPass::new();
    run_pass(&mut loop_pass, &mut module);
    let loop_warnings: Vec<Diagnostic> = loop_pass
        .warnings()
        .iter()
        .map(|w| {
            Diagnostic::warning(
                "mir",
                format!(
                    "potential infinite loop in function `{}` at block `{}` (id={}): {}",
                    w.function, w.block, w.block_id, w.reason
                ),
            )
        })
        .collect();
    ctx.sink_diagnostics(&loop_warnings);

    let mut leak_pass = LeakCheckPass::new();
    run_pass(&mut leak_pass, &mut module);
    let leak_warnings: Vec<Diagnostic> = leak_pass
        .warnings()
        .iter()
        .map(|w| {
            Diagnostic::warning(
                "mir",
                format!("potential memory leak in function `{}`: {}", w.function, w.reason),
            )
        })
        .collect();
    ctx.sink_diagnostics(&leak_warnings);

    if ctx.options().profile_generate {
        run_pass(&mut PgoPass::new(PgoMode::Generate), &mut module);
    }
    if let Some(profile_path) = &ctx.options().profile_use {
        match fsx::read_to_string(profile_path) {
            Ok(text) => {
                let profile = parse_profile_data(&text);
                run_pass(&mut PgoPass::new(PgoMode::Use(profile)), &mut module);
            }
            Err(err) => {
                ctx.sink_diagnostics(&[Diagnostic::warning(
                    "mir",
                    format!("ignoring profile data: {err:#}"),
                )]);
            }
        }
    }

    Ok(QueryOutput::Mir(Arc::new(module)))
}

fn provide_codegen_unit(ctx: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
    let mir = ctx.mir_build(key.path(), module_name(key))?;
    let options = ctx.options();
    let config = CodegenConfig {
        target_triple: options.target_triple.clone(),
        optimization_level: options.optimization_level,
        debug_info: options.debug_info,
        coverage: options.coverage,
        backend: options.backend.clone(),
    };
    let unit = codegen::codegen_unit(&mir, &config);
    Ok(QueryOutput::Codegen(Arc::new(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_kinds_have_a_core_provider() {
        let registry = ProviderRegistry::with_core_providers();
        for kind in QueryKind::ALL {
            assert!(registry.get(kind).is_some(), "{kind} has no provider");
        }
    }

    #[test]
    fn empty_registry_has_no_providers() {
        let registry = ProviderRegistry::new();
        for kind in QueryKind::ALL {
            assert!(registry.get(kind).is_none());
        }
    }

    #[test]
    fn registration_replaces_the_previous_provider() {
        fn stub(_: &QueryContext, key: &QueryKey) -> Result<QueryOutput, QueryError> {
            Err(QueryError::MissingProvider(key.kind()))
        }
        let mut registry = ProviderRegistry::with_core_providers();
        registry.register(QueryKind::Tokenize, stub);
        assert_eq!(registry.get(QueryKind::Tokenize), Some(stub as Provider));
    }
}
