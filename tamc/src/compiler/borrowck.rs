//! Ownership checking on the typed AST.
//!
//! The interesting property for the mini-pipeline is move tracking of heap
//! values: `free` and `give` consume their argument, so later uses (and
//! repeated consumption inside a loop body) are errors.

use std::collections::BTreeSet;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::compiler::parser::{Expr, Stmt};
use crate::compiler::typeck::TypecheckedModule;
use crate::diagnostics::Diagnostic;
use crate::query::fingerprint::Fingerprint;

/// Functions that take ownership of their argument.
const CONSUMING_FNS: &[&str] = &["free", "give"];

#[derive(Debug, Clone)]
pub struct BorrowckedModule {
    pub typed: Arc<TypecheckedModule>,
}

impl BorrowckedModule {
    pub fn stable_digest(&self) -> Fingerprint {
        self.typed
            .stable_digest()
            .combine(Fingerprint::of_str("borrowck"))
    }
}

pub fn borrowck_module(typed: Arc<TypecheckedModule>) -> (BorrowckedModule, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    for function in &typed.ast.functions {
        let mut owned = BTreeSet::new();
        let mut moved = BTreeSet::new();
        check_block(
            &function.body,
            &mut owned,
            &mut moved,
            false,
            &mut diagnostics,
        );
    }
    (BorrowckedModule { typed }, diagnostics)
}

fn check_block(
    body: &[Stmt],
    owned: &mut BTreeSet<SmolStr>,
    moved: &mut BTreeSet<SmolStr>,
    in_loop: bool,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for stmt in body {
        match stmt {
            Stmt::Let { name, value, line } => {
                check_expr(value, owned, moved, in_loop, diagnostics, *line);
                if matches!(value, Expr::Call { callee, .. } if callee == "alloc") {
                    owned.insert(name.clone());
                    moved.remove(name);
                }
            }
            Stmt::Assign { value, line, .. } => {
                check_expr(value, owned, moved, in_loop, diagnostics, *line);
            }
            Stmt::While { cond, body, line } => {
                check_expr(cond, owned, moved, in_loop, diagnostics, *line);
                check_block(body, owned, moved, true, diagnostics);
            }
            Stmt::Loop { body, .. } => {
                check_block(body, owned, moved, true, diagnostics);
            }
            Stmt::If { cond, then_body, else_body, line } => {
                check_expr(cond, owned, moved, in_loop, diagnostics, *line);
                // Conservative: moves in either branch count afterwards.
                check_block(then_body, owned, moved, in_loop, diagnostics);
                if let Some(else_body) = else_body {
                    check_block(else_body, owned, moved, in_loop, diagnostics);
                }
            }
            Stmt::Return { value, line } => {
                if let Some(value) = value {
                    check_expr(value, owned, moved, in_loop, diagnostics, *line);
                }
            }
            Stmt::Break { .. } => {}
            Stmt::Expr { expr, line } => {
                check_expr(expr, owned, moved, in_loop, diagnostics, *line);
            }
        }
    }
}

fn check_expr(
    expr: &Expr,
    owned: &BTreeSet<SmolStr>,
    moved: &mut BTreeSet<SmolStr>,
    in_loop: bool,
    diagnostics: &mut Vec<Diagnostic>,
    line: u32,
) {
    match expr {
        Expr::Int(_) | Expr::Bool(_) => {}
        Expr::Var(name) => {
            if moved.contains(name) {
                diagnostics.push(
                    Diagnostic::error("borrowck", format!("use of moved value `{name}`"))
                        .at_line(line),
                );
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            check_expr(lhs, owned, moved, in_loop, diagnostics, line);
            check_expr(rhs, owned, moved, in_loop, diagnostics, line);
        }
        Expr::Unary { operand, .. } => {
            check_expr(operand, owned, moved, in_loop, diagnostics, line);
        }
        Expr::Call { callee, args } => {
            let consuming = CONSUMING_FNS.contains(&callee.as_str());
            for arg in args {
                check_expr(arg, owned, moved, in_loop, diagnostics, line);
                if consuming {
                    if let Expr::Var(name) = arg {
                        if owned.contains(name) {
                            if in_loop {
                                diagnostics.push(
                                    Diagnostic::error(
                                        "borrowck",
                                        format!(
                                            "`{name}` would be moved again in a later loop iteration"
                                        ),
                                    )
                                    .at_line(line),
                                );
                            }
                            moved.insert(name.clone());
                        }
                    }
                }
            }
        }
    }
}
