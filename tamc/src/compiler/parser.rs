//! Parser: token stream → module AST.

use std::fmt::Write;

use smol_str::SmolStr;

use crate::compiler::lexer::{Token, TokenKind, TokenStream};
use crate::diagnostics::Diagnostic;
use crate::query::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: SmolStr,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: SmolStr,
    pub params: Vec<Param>,
    pub ret_ty: Option<SmolStr>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: SmolStr,
    pub ty: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Let { name: SmolStr, value: Expr, line: u32 },
    Assign { name: SmolStr, value: Expr, line: u32 },
    While { cond: Expr, body: Vec<Stmt>, line: u32 },
    Loop { body: Vec<Stmt>, line: u32 },
    If { cond: Expr, then_body: Vec<Stmt>, else_body: Option<Vec<Stmt>>, line: u32 },
    Return { value: Option<Expr>, line: u32 },
    Break { line: u32 },
    Expr { expr: Expr, line: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Var(SmolStr),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    Call { callee: SmolStr, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    fn from_symbol(s: &str) -> Option<BinOp> {
        Some(match s {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "<" => BinOp::Lt,
            ">" => BinOp::Gt,
            "<=" => BinOp::Le,
            ">=" => BinOp::Ge,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            "&&" => BinOp::And,
            "||" => BinOp::Or,
            _ => return None,
        })
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl Module {
    /// Structural digest: stable textual form of the tree.
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.dump())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "(module {}", self.name).unwrap();
        for function in &self.functions {
            dump_function(&mut out, function);
        }
        out.push(')');
        out
    }
}

fn dump_function(out: &mut String, function: &Function) {
    write!(out, "  (fn {} (", function.name).unwrap();
    for (i, param) in function.params.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write!(out, "{}:{}", param.name, param.ty).unwrap();
    }
    out.push(')');
    if let Some(ret) = &function.ret_ty {
        write!(out, " -> {ret}").unwrap();
    }
    out.push('\n');
    for stmt in &function.body {
        dump_stmt(out, stmt, 2);
    }
    out.push_str("  )\n");
}

fn dump_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    let indent = "  ".repeat(depth);
    match stmt {
        Stmt::Let { name, value, .. } => {
            writeln!(out, "{indent}(let {name} {})", dump_expr(value)).unwrap();
        }
        Stmt::Assign { name, value, .. } => {
            writeln!(out, "{indent}(assign {name} {})", dump_expr(value)).unwrap();
        }
        Stmt::While { cond, body, .. } => {
            writeln!(out, "{indent}(while {}", dump_expr(cond)).unwrap();
            for stmt in body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        Stmt::Loop { body, .. } => {
            writeln!(out, "{indent}(loop").unwrap();
            for stmt in body {
                dump_stmt(out, stmt, depth + 1);
            }
            writeln!(out, "{indent})").unwrap();
        }
        Stmt::If { cond, then_body, else_body, .. } => {
            writeln!(out, "{indent}(if {}", dump_expr(cond)).unwrap();
            for stmt in then_body {
                dump_stmt(out, stmt, depth + 1);
            }
            if let Some(else_body) = else_body {
                writeln!(out, "{indent}else").unwrap();
                for stmt in else_body {
                    dump_stmt(out, stmt, depth + 1);
                }
            }
            writeln!(out, "{indent})").unwrap();
        }
        Stmt::Return { value, .. } => match value {
            Some(value) => writeln!(out, "{indent}(return {})", dump_expr(value)).unwrap(),
            None => writeln!(out, "{indent}(return)").unwrap(),
        },
        Stmt::Break { .. } => writeln!(out, "{indent}(break)").unwrap(),
        Stmt::Expr { expr, .. } => writeln!(out, "{indent}{}", dump_expr(expr)).unwrap(),
    }
}

pub(crate) fn dump_expr(expr: &Expr) -> String {
    match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Bool(v) => v.to_string(),
        Expr::Var(name) => name.to_string(),
        Expr::Binary { op, lhs, rhs } => {
            format!("({} {} {})", op.symbol(), dump_expr(lhs), dump_expr(rhs))
        }
        Expr::Unary { op, operand } => {
            let symbol = match op {
                UnOp::Neg => "-",
                UnOp::Not => "!",
            };
            format!("({symbol} {})", dump_expr(operand))
        }
        Expr::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(dump_expr).collect();
            format!("(call {callee} {})", args.join(" "))
        }
    }
}

/// Parse a full module. Parsing is total: on error the parser reports a
/// diagnostic and recovers at the next function, so the caller always gets a
/// module (possibly with fewer functions than the source had).
pub fn parse_module(name: SmolStr, stream: &TokenStream) -> (Module, Vec<Diagnostic>) {
    let mut parser = Parser {
        tokens: &stream.tokens,
        pos: 0,
        diagnostics: Vec::new(),
    };
    let mut functions = Vec::new();
    while let Some(token) = parser.peek() {
        if token.is("fn") {
            match parser.function() {
                Some(function) => functions.push(function),
                None => parser.recover_to_fn(),
            }
        } else {
            let (token, line) = (token.clone(), token.line);
            parser.advance();
            parser.error(format!("expected `fn`, found {token}"), line);
            parser.recover_to_fn();
        }
    }
    (Module { name, functions }, parser.diagnostics)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(text))
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn last_line(&self) -> u32 {
        self.tokens.last().map(|t| t.line).unwrap_or(1)
    }

    fn error(&mut self, message: String, line: u32) {
        self.diagnostics
            .push(Diagnostic::error("parse", message).at_line(line));
    }

    fn expect(&mut self, text: &str) -> Option<&'a Token> {
        match self.peek() {
            Some(token) if token.is(text) => self.advance(),
            Some(token) => {
                let (token, line) = (token.clone(), token.line);
                self.error(format!("expected `{text}`, found {token}"), line);
                None
            }
            None => {
                let line = self.last_line();
                self.error(format!("expected `{text}`, found end of input"), line);
                None
            }
        }
    }

    fn expect_ident(&mut self) -> Option<&'a Token> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Ident => self.advance(),
            Some(token) => {
                let (token, line) = (token.clone(), token.line);
                self.error(format!("expected identifier, found {token}"), line);
                None
            }
            None => {
                let line = self.last_line();
                self.error("expected identifier, found end of input".into(), line);
                None
            }
        }
    }

    fn recover_to_fn(&mut self) {
        while let Some(token) = self.peek() {
            if token.is("fn") {
                break;
            }
            self.pos += 1;
        }
    }

    fn function(&mut self) -> Option<Function> {
        let fn_token = self.expect("fn")?;
        let line = fn_token.line;
        let name = self.expect_ident()?.text.clone();
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.peek_is(")") {
            loop {
                let param_name = self.expect_ident()?.text.clone();
                self.expect(":")?;
                let ty = self.expect_ident()?.text.clone();
                params.push(Param { name: param_name, ty });
                if self.peek_is(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(")")?;
        let ret_ty = if self.peek_is("->") {
            self.advance();
            Some(self.expect_ident()?.text.clone())
        } else {
            None
        };
        let body = self.block()?;
        Some(Function { name, params, ret_ty, body, line })
    }

    fn block(&mut self) -> Option<Vec<Stmt>> {
        self.expect("{")?;
        let mut stmts = Vec::new();
        while !self.peek_is("}") {
            if self.at_end() {
                let line = self.last_line();
                self.error("unterminated block".into(), line);
                return None;
            }
            stmts.push(self.stmt()?);
        }
        self.expect("}")?;
        Some(stmts)
    }

    fn stmt(&mut self) -> Option<Stmt> {
        let token = self.peek()?;
        let line = token.line;
        match token.text.as_str() {
            "let" => {
                self.advance();
                let name = self.expect_ident()?.text.clone();
                self.expect("=")?;
                let value = self.expr(0)?;
                self.expect(";")?;
                Some(Stmt::Let { name, value, line })
            }
            "while" => {
                self.advance();
                let cond = self.expr(0)?;
                let body = self.block()?;
                Some(Stmt::While { cond, body, line })
            }
            "loop" => {
                self.advance();
                let body = self.block()?;
                Some(Stmt::Loop { body, line })
            }
            "if" => {
                self.advance();
                let cond = self.expr(0)?;
                let then_body = self.block()?;
                let else_body = if self.peek_is("else") {
                    self.advance();
                    Some(self.block()?)
                } else {
                    None
                };
                Some(Stmt::If { cond, then_body, else_body, line })
            }
            "return" => {
                self.advance();
                let value = if self.peek_is(";") { None } else { Some(self.expr(0)?) };
                self.expect(";")?;
                Some(Stmt::Return { value, line })
            }
            "break" => {
                self.advance();
                self.expect(";")?;
                Some(Stmt::Break { line })
            }
            _ => {
                // Assignment or expression statement.
                if token.kind == TokenKind::Ident
                    && self.tokens.get(self.pos + 1).is_some_and(|t| t.is("="))
                {
                    let name = self.advance()?.text.clone();
                    self.advance(); // `=`
                    let value = self.expr(0)?;
                    self.expect(";")?;
                    return Some(Stmt::Assign { name, value, line });
                }
                let expr = self.expr(0)?;
                self.expect(";")?;
                Some(Stmt::Expr { expr, line })
            }
        }
    }

    /// Precedence-climbing expression parser.
    fn expr(&mut self, min_precedence: u8) -> Option<Expr> {
        let mut lhs = self.unary()?;
        while let Some(token) = self.peek() {
            let Some(op) = BinOp::from_symbol(&token.text) else {
                break;
            };
            if op.precedence() <= min_precedence {
                break;
            }
            self.advance();
            let rhs = self.expr(op.precedence())?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Some(lhs)
    }

    fn unary(&mut self) -> Option<Expr> {
        if self.peek_is("-") {
            self.advance();
            let operand = self.unary()?;
            return Some(Expr::Unary { op: UnOp::Neg, operand: Box::new(operand) });
        }
        if self.peek_is("!") {
            self.advance();
            let operand = self.unary()?;
            return Some(Expr::Unary { op: UnOp::Not, operand: Box::new(operand) });
        }
        self.primary()
    }

    fn primary(&mut self) -> Option<Expr> {
        let token = match self.peek() {
            Some(token) => token,
            None => {
                let line = self.last_line();
                self.error("expected expression, found end of input".into(), line);
                return None;
            }
        };
        let line = token.line;
        match token.kind {
            TokenKind::Int => {
                let text = self.advance()?.text.clone();
                match text.parse::<i64>() {
                    Ok(value) => Some(Expr::Int(value)),
                    Err(_) => {
                        self.error(format!("integer literal `{text}` out of range"), line);
                        None
                    }
                }
            }
            TokenKind::Keyword if token.is("true") => {
                self.advance();
                Some(Expr::Bool(true))
            }
            TokenKind::Keyword if token.is("false") => {
                self.advance();
                Some(Expr::Bool(false))
            }
            TokenKind::Ident => {
                let name = self.advance()?.text.clone();
                if self.peek_is("(") {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.peek_is(")") {
                        loop {
                            args.push(self.expr(0)?);
                            if self.peek_is(",") {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(")")?;
                    Some(Expr::Call { callee: name, args })
                } else {
                    Some(Expr::Var(name))
                }
            }
            _ if token.is("(") => {
                self.advance();
                let expr = self.expr(0)?;
                self.expect(")")?;
                Some(expr)
            }
            _ => {
                let token = token.clone();
                self.error(format!("expected expression, found {token}"), line);
                None
            }
        }
    }
}
