//! THIR: HIR with a type on every expression.
//!
//! Lowering re-derives expression types from the checked signatures; the
//! module has already passed typecheck, so failures here indicate a bug in an
//! earlier stage and surface as diagnostics rather than panics.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::behaviors::Ty;
use crate::compiler::hir::{HirModule, HirStmt};
use crate::compiler::parser::{BinOp, Expr, UnOp};
use crate::compiler::typeck::{resolve_ty, FnSig, TypecheckedModule};
use crate::diagnostics::Diagnostic;
use crate::query::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirModule {
    pub name: SmolStr,
    pub functions: Vec<ThirFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirFunction {
    pub name: SmolStr,
    pub params: Vec<(SmolStr, Ty)>,
    pub ret: Ty,
    pub body: Vec<ThirStmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThirStmt {
    Let { name: SmolStr, value: ThirExpr },
    Assign { name: SmolStr, value: ThirExpr },
    Loop { body: Vec<ThirStmt> },
    If { cond: ThirExpr, then_body: Vec<ThirStmt>, else_body: Vec<ThirStmt> },
    Return { value: Option<ThirExpr> },
    Break,
    Expr { expr: ThirExpr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirExpr {
    pub ty: Ty,
    pub kind: ThirExprKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThirExprKind {
    Int(i64),
    Bool(bool),
    Var(SmolStr),
    Binary { op: BinOp, lhs: Box<ThirExpr>, rhs: Box<ThirExpr> },
    Unary { op: UnOp, operand: Box<ThirExpr> },
    Call { callee: SmolStr, args: Vec<ThirExpr> },
}

impl ThirModule {
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.dump())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "(thir {}", self.name).unwrap();
        for function in &self.functions {
            let params: Vec<String> = function
                .params
                .iter()
                .map(|(name, ty)| format!("{name}:{ty}"))
                .collect();
            writeln!(out, "  (fn {} ({}) -> {}", function.name, params.join(" "), function.ret)
                .unwrap();
            for stmt in &function.body {
                dump_stmt(&mut out, stmt, 2);
            }
            out.push_str("  )\n");
        }
        out.push(')');
        out
    }
}

fn dump_stmt(out: &mut String, stmt: &ThirStmt, depth: usize) {
    let indent = "  ".repeat(depth);
    match stmt {
        ThirStmt::Let { name, value } => {
            writeln!(out, "{indent}(let {name} {})", dump_expr(value)).unwrap();
        }
        ThirStmt::Assign { name, value } => {
            writeln!(out, "{indent}(assign {name} {})", dump_expr(value)).unwrap();
        }
        ThirStmt::Loop { body } => {
            writeln!(out, "{indent}(loop").unwrap();
            for stmt in body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        ThirStmt::If { cond, then_body, else_body } => {
            writeln!(out, "{indent}(if {}", dump_expr(cond)).unwrap();
            for stmt in then_body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent}else").unwrap();
            for stmt in else_body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        ThirStmt::Return { value } => match value {
            Some(value) => writeln!(out, "{indent}(return {})", dump_expr(value)).unwrap(),
            None => writeln!(out, "{indent}(return)").unwrap(),
        },
        ThirStmt::Break => writeln!(out, "{indent}(break)").unwrap(),
        ThirStmt::Expr { expr } => writeln!(out, "{indent}{}", dump_expr(expr)).unwrap(),
    }
}

fn dump_expr(expr: &ThirExpr) -> String {
    let body = match &expr.kind {
        ThirExprKind::Int(v) => v.to_string(),
        ThirExprKind::Bool(v) => v.to_string(),
        ThirExprKind::Var(name) => name.to_string(),
        ThirExprKind::Binary { op, lhs, rhs } => {
            format!("({} {} {})", op.symbol(), dump_expr(lhs), dump_expr(rhs))
        }
        ThirExprKind::Unary { op, operand } => {
            let symbol = match op {
                UnOp::Neg => "-",
                UnOp::Not => "!",
            };
            format!("({symbol} {})", dump_expr(operand))
        }
        ThirExprKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(dump_expr).collect();
            format!("(call {callee} {})", args.join(" "))
        }
    };
    format!("{body}:{}", expr.ty)
}

/// Lower HIR to THIR using the signatures established by typecheck.
pub fn thir_lower(
    hir: &HirModule,
    typed: &Arc<TypecheckedModule>,
) -> (ThirModule, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let functions = hir
        .functions
        .iter()
        .map(|function| {
            let params: Vec<(SmolStr, Ty)> = function
                .params
                .iter()
                .map(|p| (p.name.clone(), resolve_ty(&p.ty)))
                .collect();
            let ret = function
                .ret_ty
                .as_deref()
                .map(resolve_ty)
                .unwrap_or(Ty::Unit);
            let mut vars: Vec<(SmolStr, Ty)> = params.clone();
            let body = lower_block(&function.body, &mut vars, &typed.fn_sigs, &mut diagnostics);
            ThirFunction { name: function.name.clone(), params, ret, body }
        })
        .collect();
    (ThirModule { name: hir.name.clone(), functions }, diagnostics)
}

fn lower_block(
    body: &[HirStmt],
    vars: &mut Vec<(SmolStr, Ty)>,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<ThirStmt> {
    let depth = vars.len();
    let lowered = body
        .iter()
        .map(|stmt| lower_stmt(stmt, vars, fn_sigs, diagnostics))
        .collect();
    vars.truncate(depth);
    lowered
}

fn lower_stmt(
    stmt: &HirStmt,
    vars: &mut Vec<(SmolStr, Ty)>,
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    diagnostics: &mut Vec<Diagnostic>,
) -> ThirStmt {
    match stmt {
        HirStmt::Let { name, value } => {
            let value = lower_expr(value, vars, fn_sigs, diagnostics);
            vars.push((name.clone(), value.ty.clone()));
            ThirStmt::Let { name: name.clone(), value }
        }
        HirStmt::Assign { name, value } => ThirStmt::Assign {
            name: name.clone(),
            value: lower_expr(value, vars, fn_sigs, diagnostics),
        },
        HirStmt::Loop { body } => ThirStmt::Loop {
            body: lower_block(body, vars, fn_sigs, diagnostics),
        },
        HirStmt::If { cond, then_body, else_body } => ThirStmt::If {
            cond: lower_expr(cond, vars, fn_sigs, diagnostics),
            then_body: lower_block(then_body, vars, fn_sigs, diagnostics),
            else_body: lower_block(else_body, vars, fn_sigs, diagnostics),
        },
        HirStmt::Return { value } => ThirStmt::Return {
            value: value
                .as_ref()
                .map(|value| lower_expr(value, vars, fn_sigs, diagnostics)),
        },
        HirStmt::Break => ThirStmt::Break,
        HirStmt::Expr { expr } => ThirStmt::Expr {
            expr: lower_expr(expr, vars, fn_sigs, diagnostics),
        },
    }
}

fn lower_expr(
    expr: &Expr,
    vars: &[(SmolStr, Ty)],
    fn_sigs: &BTreeMap<SmolStr, FnSig>,
    diagnostics: &mut Vec<Diagnostic>,
) -> ThirExpr {
    match expr {
        Expr::Int(v) => ThirExpr { ty: Ty::I64, kind: ThirExprKind::Int(*v) },
        Expr::Bool(v) => ThirExpr { ty: Ty::Bool, kind: ThirExprKind::Bool(*v) },
        Expr::Var(name) => {
            let ty = vars
                .iter()
                .rev()
                .find(|(var, _)| var == name)
                .map(|(_, ty)| ty.clone())
                .unwrap_or_else(|| {
                    diagnostics.push(Diagnostic::error(
                        "thir",
                        format!("variable `{name}` escaped typecheck"),
                    ));
                    Ty::Unit
                });
            ThirExpr { ty, kind: ThirExprKind::Var(name.clone()) }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = lower_expr(lhs, vars, fn_sigs, diagnostics);
            let rhs = lower_expr(rhs, vars, fn_sigs, diagnostics);
            let ty = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => lhs.ty.clone(),
                _ => Ty::Bool,
            };
            ThirExpr {
                ty,
                kind: ThirExprKind::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            }
        }
        Expr::Unary { op, operand } => {
            let operand = lower_expr(operand, vars, fn_sigs, diagnostics);
            let ty = match op {
                UnOp::Neg => operand.ty.clone(),
                UnOp::Not => Ty::Bool,
            };
            ThirExpr {
                ty,
                kind: ThirExprKind::Unary { op: *op, operand: Box::new(operand) },
            }
        }
        Expr::Call { callee, args } => {
            let args: Vec<ThirExpr> = args
                .iter()
                .map(|arg| lower_expr(arg, vars, fn_sigs, diagnostics))
                .collect();
            let ty = match fn_sigs.get(callee) {
                Some(sig) => sig.ret.clone(),
                None => {
                    diagnostics.push(Diagnostic::error(
                        "thir",
                        format!("call to `{callee}` escaped typecheck"),
                    ));
                    Ty::Unit
                }
            };
            ThirExpr { ty, kind: ThirExprKind::Call { callee: callee.clone(), args } }
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::compiler::hir::hir_lower;
    use crate::compiler::lexer::tokenize;
    use crate::compiler::parser::parse_module;
    use crate::compiler::typeck::typecheck_module;
    use crate::intern::{Interner, TypeIdGen};

    fn lower(source: &str) -> (ThirModule, Vec<Diagnostic>) {
        let (stream, _) = tokenize(source);
        let (module, diags) = parse_module("test".into(), &stream);
        assert!(diags.is_empty(), "parse diagnostics: {diags:?}");
        let ast = Arc::new(module);
        let (typed, diags) = typecheck_module(ast.clone(), &Interner::new(), &TypeIdGen::new());
        assert!(diags.is_empty(), "typecheck diagnostics: {diags:?}");
        let hir = hir_lower(&ast);
        thir_lower(&hir, &Arc::new(typed))
    }

    #[test]
    fn every_expression_carries_a_type() {
        let (thir, diags) = lower("fn f(x: i64) -> bool { return x < 10; }");
        assert!(diags.is_empty(), "{diags:?}");
        let ThirStmt::Return { value: Some(value) } = &thir.functions[0].body[0] else {
            panic!("expected return");
        };
        assert_eq!(value.ty, Ty::Bool);
        let ThirExprKind::Binary { lhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(lhs.ty, Ty::I64);
    }

    #[test]
    fn call_results_use_signature_types() {
        let (thir, diags) = lower("fn f() { let b = alloc(4); give(b); }");
        assert!(diags.is_empty(), "{diags:?}");
        let ThirStmt::Let { value, .. } = &thir.functions[0].body[0] else {
            panic!("expected let");
        };
        assert_eq!(value.ty, Ty::Named("Box".into()));
    }

    #[test]
    fn desugared_while_types_its_condition() {
        let source = indoc! {"
            fn f(n: i64) {
                let i = 0;
                while i < n {
                    i = i + 1;
                }
            }
        "};
        let (thir, diags) = lower(source);
        assert!(diags.is_empty(), "{diags:?}");
        let ThirStmt::Loop { body } = &thir.functions[0].body[1] else {
            panic!("expected loop");
        };
        let ThirStmt::If { cond, .. } = &body[0] else {
            panic!("expected if");
        };
        assert_eq!(cond.ty, Ty::Bool);
    }

    #[test]
    fn dump_includes_types() {
        let (thir, _) = lower("fn f() -> i64 { return 1 + 2; }");
        assert!(thir.dump().contains("(+ 1:i64 2:i64):i64"));
    }
}
