//! HIR: the AST after control-flow desugaring.
//!
//! `while` disappears here: `while c { b }` becomes
//! `loop { if c { b } else { break } }`, so later stages only ever see one
//! looping construct.

use std::fmt::Write;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::compiler::parser::{self, Expr, Module, Stmt};
use crate::query::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HirModule {
    pub name: SmolStr,
    pub functions: Vec<HirFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HirFunction {
    pub name: SmolStr,
    pub params: Vec<parser::Param>,
    pub ret_ty: Option<SmolStr>,
    pub body: Vec<HirStmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HirStmt {
    Let { name: SmolStr, value: Expr },
    Assign { name: SmolStr, value: Expr },
    Loop { body: Vec<HirStmt> },
    If { cond: Expr, then_body: Vec<HirStmt>, else_body: Vec<HirStmt> },
    Return { value: Option<Expr> },
    Break,
    Expr { expr: Expr },
}

impl HirModule {
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.dump())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "(hir {}", self.name).unwrap();
        for function in &self.functions {
            writeln!(out, "  (fn {}", function.name).unwrap();
            for stmt in &function.body {
                dump_stmt(&mut out, stmt, 2);
            }
            out.push_str("  )\n");
        }
        out.push(')');
        out
    }
}

fn dump_stmt(out: &mut String, stmt: &HirStmt, depth: usize) {
    let indent = "  ".repeat(depth);
    match stmt {
        HirStmt::Let { name, value } => {
            writeln!(out, "{indent}(let {name} {})", parser::dump_expr(value)).unwrap();
        }
        HirStmt::Assign { name, value } => {
            writeln!(out, "{indent}(assign {name} {})", parser::dump_expr(value)).unwrap();
        }
        HirStmt::Loop { body } => {
            writeln!(out, "{indent}(loop").unwrap();
            for stmt in body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        HirStmt::If { cond, then_body, else_body } => {
            writeln!(out, "{indent}(if {}", parser::dump_expr(cond)).unwrap();
            for stmt in then_body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent}else").unwrap();
            for stmt in else_body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        HirStmt::Return { value } => match value {
            Some(value) => {
                writeln!(out, "{indent}(return {})", parser::dump_expr(value)).unwrap();
            }
            None => writeln!(out, "{indent}(return)").unwrap(),
        },
        HirStmt::Break => writeln!(out, "{indent}(break)").unwrap(),
        HirStmt::Expr { expr } => writeln!(out, "{indent}{}", parser::dump_expr(expr)).unwrap(),
    }
}

/// Lower a module to HIR. Total: the input already parsed and type-checked.
pub fn hir_lower(ast: &Arc<Module>) -> HirModule {
    HirModule {
        name: ast.name.clone(),
        functions: ast
            .functions
            .iter()
            .map(|function| HirFunction {
                name: function.name.clone(),
                params: function.params.clone(),
                ret_ty: function.ret_ty.clone(),
                body: lower_block(&function.body),
            })
            .collect(),
    }
}

fn lower_block(body: &[Stmt]) -> Vec<HirStmt> {
    body.iter().map(lower_stmt).collect()
}

fn lower_stmt(stmt: &Stmt) -> HirStmt {
    match stmt {
        Stmt::Let { name, value, .. } => {
            HirStmt::Let { name: name.clone(), value: value.clone() }
        }
        Stmt::Assign { name, value, .. } => {
            HirStmt::Assign { name: name.clone(), value: value.clone() }
        }
        Stmt::While { cond, body, .. } => HirStmt::Loop {
            body: vec![HirStmt::If {
                cond: cond.clone(),
                then_body: lower_block(body),
                else_body: vec![HirStmt::Break],
            }],
        },
        Stmt::Loop { body, .. } => HirStmt::Loop { body: lower_block(body) },
        Stmt::If { cond, then_body, else_body, .. } => HirStmt::If {
            cond: cond.clone(),
            then_body: lower_block(then_body),
            else_body: else_body.as_deref().map(lower_block).unwrap_or_default(),
        },
        Stmt::Return { value, .. } => HirStmt::Return { value: value.clone() },
        Stmt::Break { .. } => HirStmt::Break,
        Stmt::Expr { expr, .. } => HirStmt::Expr { expr: expr.clone() },
    }
}
