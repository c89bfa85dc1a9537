//! Type checking: AST → typed module.
//!
//! Operator typing goes through the behavior solver: `+` needs `Arith`,
//! comparisons need `Ord`, `==`/`!=` need `Eq`. Solver failures are converted
//! to stage diagnostics here and never escape to the driver.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::behaviors::builtins::{ARITH, EQ, ORD};
use crate::behaviors::{builtin_env, Goal, Solver, Ty};
use crate::compiler::parser::{BinOp, Expr, Function, Module, Stmt, UnOp};
use crate::diagnostics::Diagnostic;
use crate::intern::{Interner, TypeId, TypeIdGen};
use crate::query::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// A module together with the signatures the checker established.
#[derive(Debug, Clone)]
pub struct TypecheckedModule {
    pub ast: Arc<Module>,
    pub fn_sigs: BTreeMap<SmolStr, FnSig>,
    /// Session-local ids for the named types this module mentions. Ids are
    /// in-memory identity only and never participate in fingerprints.
    pub named_types: BTreeMap<SmolStr, TypeId>,
}

impl TypecheckedModule {
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.dump())
    }

    /// Stable textual form: module dump plus resolved signatures.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "(typechecked {}", self.ast.name).unwrap();
        for (name, sig) in &self.fn_sigs {
            let params: Vec<String> = sig.params.iter().map(|t| t.to_string()).collect();
            writeln!(out, "  (sig {name} ({}) -> {})", params.join(" "), sig.ret).unwrap();
        }
        out.push_str(&self.ast.dump());
        out.push(')');
        out
    }
}

/// Signatures of functions callable without declaration.
pub fn builtin_fn_sigs() -> BTreeMap<SmolStr, FnSig> {
    let mut sigs = BTreeMap::new();
    sigs.insert(
        SmolStr::new("print"),
        FnSig { params: vec![Ty::I64], ret: Ty::Unit },
    );
    sigs.insert(
        SmolStr::new("alloc"),
        FnSig { params: vec![Ty::I64], ret: Ty::Named("Box".into()) },
    );
    sigs.insert(
        SmolStr::new("free"),
        FnSig { params: vec![Ty::Named("Box".into())], ret: Ty::Unit },
    );
    sigs.insert(
        SmolStr::new("give"),
        FnSig { params: vec![Ty::Named("Box".into())], ret: Ty::Unit },
    );
    sigs
}

pub fn resolve_ty(name: &str) -> Ty {
    match name {
        "i64" => Ty::I64,
        "bool" => Ty::Bool,
        "unit" => Ty::Unit,
        other => Ty::Named(other.into()),
    }
}

/// Type-check a module.
pub fn typecheck_module(
    ast: Arc<Module>,
    interner: &Interner,
    type_ids: &TypeIdGen,
) -> (TypecheckedModule, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let env = builtin_env();
    let solver = Solver::new(&env);

    let mut fn_sigs = builtin_fn_sigs();
    for function in &ast.functions {
        let params = function
            .params
            .iter()
            .map(|p| resolve_ty(&p.ty))
            .collect();
        let ret = function
            .ret_ty
            .as_deref()
            .map(resolve_ty)
            .unwrap_or(Ty::Unit);
        if fn_sigs
            .insert(function.name.clone(), FnSig { params, ret })
            .is_some()
        {
            diagnostics.push(
                Diagnostic::error(
                    "typecheck",
                    format!("duplicate definition of function `{}`", function.name),
                )
                .at_line(function.line),
            );
        }
    }

    let mut named_types = BTreeMap::new();
    for function in &ast.functions {
        check_function(function, &fn_sigs, &solver, &mut diagnostics);
        for param in &function.params {
            if let Ty::Named(name) = resolve_ty(&param.ty) {
                record_named_type(&mut named_types, &name, interner, type_ids);
            }
        }
    }
    // `alloc` introduces `Box` even when no signature mentions it.
    record_named_type(&mut named_types, "Box", interner, type_ids);

    (TypecheckedModule { ast, fn_sigs, named_types }, diagnostics)
}

fn record_named_type(
    named_types: &mut BTreeMap<SmolStr, TypeId>,
    name: &str,
    interner: &Interner,
    type_ids: &TypeIdGen,
) {
    if !named_types.contains_key(name) {
        interner.intern(name);
        named_types.insert(name.into(), type_ids.fresh());
    }
}

/// Lexical scope: a stack of visible bindings.
struct Scope {
    vars: Vec<(SmolStr, Ty)>,
}

impl Scope {
    fn get(&self, name: &str) -> Option<&Ty> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, ty)| ty)
    }
}

fn check_function(
    function: &Function,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    solver: &Solver<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut scope = Scope {
        vars: function
            .params
            .iter()
            .map(|p| (p.name.clone(), resolve_ty(&p.ty)))
            .collect(),
    };
    let ret = function
        .ret_ty
        .as_deref()
        .map(resolve_ty)
        .unwrap_or(Ty::Unit);
    check_block(&function.body, &mut scope, &ret, fn_sigs, solver, diagnostics);
}

fn check_block(
    body: &[Stmt],
    scope: &mut Scope,
    ret: &Ty,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    solver: &Solver<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let depth = scope.vars.len();
    for stmt in body {
        match stmt {
            Stmt::Let { name, value, line } => {
                if let Some(ty) = check_expr(value, scope, fn_sigs, solver, diagnostics, *line) {
                    scope.vars.push((name.clone(), ty));
                }
            }
            Stmt::Assign { name, value, line } => {
                let value_ty = check_expr(value, scope, fn_sigs, solver, diagnostics, *line);
                match (scope.get(name), value_ty) {
                    (Some(var_ty), Some(value_ty)) if *var_ty != value_ty => {
                        diagnostics.push(
                            Diagnostic::error(
                                "typecheck",
                                format!(
                                    "cannot assign `{value_ty}` to `{name}` of type `{var_ty}`"
                                ),
                            )
                            .at_line(*line),
                        );
                    }
                    (None, _) => diagnostics.push(
                        Diagnostic::error(
                            "typecheck",
                            format!("assignment to undeclared variable `{name}`"),
                        )
                        .at_line(*line),
                    ),
                    _ => {}
                }
            }
            Stmt::While { cond, body, line } => {
                expect_bool(cond, scope, fn_sigs, solver, diagnostics, *line, "while condition");
                check_block(body, scope, ret, fn_sigs, solver, diagnostics);
            }
            Stmt::Loop { body, .. } => {
                check_block(body, scope, ret, fn_sigs, solver, diagnostics);
            }
            Stmt::If { cond, then_body, else_body, line } => {
                expect_bool(cond, scope, fn_sigs, solver, diagnostics, *line, "if condition");
                check_block(then_body, scope, ret, fn_sigs, solver, diagnostics);
                if let Some(else_body) = else_body {
                    check_block(else_body, scope, ret, fn_sigs, solver, diagnostics);
                }
            }
            Stmt::Return { value, line } => {
                let value_ty = match value {
                    Some(value) => {
                        check_expr(value, scope, fn_sigs, solver, diagnostics, *line)
                    }
                    None => Some(Ty::Unit),
                };
                if let Some(value_ty) = value_ty {
                    if value_ty != *ret {
                        diagnostics.push(
                            Diagnostic::error(
                                "typecheck",
                                format!("return type mismatch: expected `{ret}`, found `{value_ty}`"),
                            )
                            .at_line(*line),
                        );
                    }
                }
            }
            Stmt::Break { .. } => {}
            Stmt::Expr { expr, line } => {
                check_expr(expr, scope, fn_sigs, solver, diagnostics, *line);
            }
        }
    }
    scope.vars.truncate(depth);
}

fn expect_bool(
    cond: &Expr,
    scope: &Scope,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    solver: &Solver<'_>,
    diagnostics: &mut Vec<Diagnostic>,
    line: u32,
    what: &str,
) {
    if let Some(ty) = check_expr(cond, scope, fn_sigs, solver, diagnostics, line) {
        if ty != Ty::Bool {
            diagnostics.push(
                Diagnostic::error("typecheck", format!("{what} must be `bool`, found `{ty}`"))
                    .at_line(line),
            );
        }
    }
}

/// Infer the type of an expression, reporting problems as diagnostics.
/// Returns `None` when no type could be established.
fn check_expr(
    expr: &Expr,
    scope: &Scope,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    solver: &Solver<'_>,
    diagnostics: &mut Vec<Diagnostic>,
    line: u32,
) -> Option<Ty> {
    match expr {
        Expr::Int(_) => Some(Ty::I64),
        Expr::Bool(_) => Some(Ty::Bool),
        Expr::Var(name) => match scope.get(name) {
            Some(ty) => Some(ty.clone()),
            None => {
                diagnostics.push(
                    Diagnostic::error("typecheck", format!("unknown variable `{name}`"))
                        .at_line(line),
                );
                None
            }
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs_ty = check_expr(lhs, scope, fn_sigs, solver, diagnostics, line)?;
            let rhs_ty = check_expr(rhs, scope, fn_sigs, solver, diagnostics, line)?;
            if lhs_ty != rhs_ty {
                diagnostics.push(
                    Diagnostic::error(
                        "typecheck",
                        format!("operands of `{}` differ: `{lhs_ty}` vs `{rhs_ty}`", op.symbol()),
                    )
                    .at_line(line),
                );
                return None;
            }
            let (behavior, result) = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                    (Some(ARITH), lhs_ty.clone())
                }
                BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => (Some(ORD), Ty::Bool),
                BinOp::Eq | BinOp::Ne => (Some(EQ), Ty::Bool),
                BinOp::And | BinOp::Or => (None, Ty::Bool),
            };
            match behavior {
                Some(behavior) => {
                    let goal = Goal::implements(lhs_ty, behavior);
                    if let Err(err) = solver.solve(&goal) {
                        diagnostics
                            .push(Diagnostic::error("typecheck", err.to_string()).at_line(line));
                        return None;
                    }
                    Some(result)
                }
                None => {
                    if lhs_ty != Ty::Bool {
                        diagnostics.push(
                            Diagnostic::error(
                                "typecheck",
                                format!("operands of `{}` must be `bool`", op.symbol()),
                            )
                            .at_line(line),
                        );
                        return None;
                    }
                    Some(Ty::Bool)
                }
            }
        }
        Expr::Unary { op, operand } => {
            let ty = check_expr(operand, scope, fn_sigs, solver, diagnostics, line)?;
            match op {
                UnOp::Neg => {
                    let goal = Goal::implements(ty.clone(), ARITH);
                    if let Err(err) = solver.solve(&goal) {
                        diagnostics
                            .push(Diagnostic::error("typecheck", err.to_string()).at_line(line));
                        return None;
                    }
                    Some(ty)
                }
                UnOp::Not => {
                    if ty != Ty::Bool {
                        diagnostics.push(
                            Diagnostic::error("typecheck", format!("`!` needs `bool`, found `{ty}`"))
                                .at_line(line),
                        );
                        return None;
                    }
                    Some(Ty::Bool)
                }
            }
        }
        Expr::Call { callee, args } => {
            let Some(sig) = fn_sigs.get(callee) else {
                diagnostics.push(
                    Diagnostic::error("typecheck", format!("unknown function `{callee}`"))
                        .at_line(line),
                );
                return None;
            };
            if args.len() != sig.params.len() {
                diagnostics.push(
                    Diagnostic::error(
                        "typecheck",
                        format!(
                            "`{callee}` takes {} arguments, {} given",
                            sig.params.len(),
                            args.len()
                        ),
                    )
                    .at_line(line),
                );
                return None;
            }
            for (arg, expected) in args.iter().zip(&sig.params) {
                if let Some(found) = check_expr(arg, scope, fn_sigs, solver, diagnostics, line) {
                    if found != *expected {
                        diagnostics.push(
                            Diagnostic::error(
                                "typecheck",
                                format!(
                                    "argument to `{callee}`: expected `{expected}`, found `{found}`"
                                ),
                            )
                            .at_line(line),
                        );
                    }
                }
            }
            Some(sig.ret.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::compiler::lexer::tokenize;
    use crate::compiler::parser::parse_module;

    fn check(source: &str) -> (TypecheckedModule, Vec<Diagnostic>) {
        let (stream, _) = tokenize(source);
        let (module, diags) = parse_module("test".into(), &stream);
        assert!(diags.is_empty(), "parse diagnostics: {diags:?}");
        let interner = Interner::new();
        let type_ids = TypeIdGen::new();
        typecheck_module(Arc::new(module), &interner, &type_ids)
    }

    fn errors(source: &str) -> Vec<String> {
        check(source).1.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn well_typed_function_has_no_diagnostics() {
        let source = indoc! {"
            fn count(n: i64) -> i64 {
                let i = 0;
                while i < n {
                    i = i + 1;
                }
                return i;
            }
        "};
        let (module, diags) = check(source);
        assert!(diags.is_empty(), "{diags:?}");
        let sig = &module.fn_sigs["count"];
        assert_eq!(sig.params, vec![Ty::I64]);
        assert_eq!(sig.ret, Ty::I64);
    }

    #[test]
    fn condition_must_be_bool() {
        let errs = errors("fn f(n: i64) { while n { } }");
        assert!(errs.iter().any(|e| e.contains("must be `bool`")), "{errs:?}");
    }

    #[test]
    fn arithmetic_on_bool_is_a_solver_failure() {
        let errs = errors("fn f() -> i64 { return (1 < 2) + (3 < 4); }");
        assert!(
            errs.iter().any(|e| e.contains("no implementation of `Arith`")),
            "{errs:?}"
        );
    }

    #[test]
    fn equality_on_bool_is_allowed() {
        let errs = errors("fn f() -> bool { return (1 < 2) == (3 < 4); }");
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn return_type_mismatch_is_reported() {
        let errs = errors("fn f() -> i64 { return true; }");
        assert!(errs.iter().any(|e| e.contains("return type mismatch")), "{errs:?}");
    }

    #[test]
    fn unknown_function_is_reported() {
        let errs = errors("fn f() { missing(); }");
        assert!(errs.iter().any(|e| e.contains("unknown function")), "{errs:?}");
    }

    #[test]
    fn builtin_allocation_functions_are_known() {
        let errs = errors("fn f() { let b = alloc(8); free(b); }");
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn named_types_get_session_ids() {
        let (module, _) = check("fn f() { }");
        assert!(module.named_types.contains_key("Box"));
    }

    #[test]
    fn dump_excludes_session_ids() {
        // Two sessions with differently seeded id generators must agree.
        let (a, _) = check("fn f(x: i64) -> i64 { return x; }");
        let interner = Interner::new();
        let type_ids = TypeIdGen::new();
        type_ids.fresh();
        type_ids.fresh();
        let (stream, _) = tokenize("fn f(x: i64) -> i64 { return x; }");
        let (module, _) = parse_module("test".into(), &stream);
        let (b, _) = typecheck_module(Arc::new(module), &interner, &type_ids);
        assert_eq!(a.stable_digest(), b.stable_digest());
    }
}
