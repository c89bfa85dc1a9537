//! Behavior resolution: does a type implement a named capability, and what
//! are its associated types?
//!
//! The solver is pure: given the same environment and goal it always produces
//! the same answer. It is invoked from the typecheck and HIR providers, so it
//! participates in the dependency graph only through its inputs.

pub mod builtins;
pub mod solver;

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

pub use builtins::builtin_env;
pub use solver::{Solution, SolveError, Solver};

/// A type as the solver sees it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ty {
    I64,
    Bool,
    Unit,
    Named(SmolStr),
    /// A generic parameter; unifies with any type.
    Param(SmolStr),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::I64 => f.write_str("i64"),
            Ty::Bool => f.write_str("bool"),
            Ty::Unit => f.write_str("unit"),
            Ty::Named(name) => f.write_str(name),
            Ty::Param(name) => write!(f, "?{name}"),
        }
    }
}

/// A proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Goal {
    /// Does `ty` implement `behavior[args]`?
    Implements { ty: Ty, behavior: SmolStr, args: Vec<Ty> },
    /// What is the concrete type of `ty::assoc`?
    Project { ty: Ty, assoc: SmolStr },
}

impl Goal {
    pub fn implements(ty: Ty, behavior: impl Into<SmolStr>) -> Goal {
        Goal::Implements { ty, behavior: behavior.into(), args: Vec::new() }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Implements { ty, behavior, args } => {
                write!(f, "{ty}: {behavior}")?;
                if !args.is_empty() {
                    write!(f, "[")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Goal::Project { ty, assoc } => write!(f, "{ty}::{assoc}"),
        }
    }
}

/// Declaration of a behavior: its super-behaviors and solving policy.
#[derive(Debug, Clone)]
pub struct BehaviorDecl {
    pub name: SmolStr,
    /// Behaviors every implementor must also implement.
    pub supers: Vec<SmolStr>,
    /// The declaration permits auto-derivation for types without an explicit
    /// implementation.
    pub auto_derive: bool,
    /// Cycles through this behavior are coinductively accepted.
    pub cycle_safe: bool,
}

impl BehaviorDecl {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            supers: Vec::new(),
            auto_derive: false,
            cycle_safe: false,
        }
    }

    pub fn with_supers(mut self, supers: impl IntoIterator<Item = &'static str>) -> Self {
        self.supers = supers.into_iter().map(SmolStr::from).collect();
        self
    }

    pub fn auto_derivable(mut self) -> Self {
        self.auto_derive = true;
        self
    }

    pub fn cycle_safe(mut self) -> Self {
        self.cycle_safe = true;
        self
    }
}

/// An explicit `impl` block in scope.
#[derive(Debug, Clone)]
pub struct ImplDef {
    pub behavior: SmolStr,
    pub ty: Ty,
    pub args: Vec<Ty>,
    /// Obligations that must hold for this impl to apply.
    pub where_clauses: Vec<Goal>,
    /// Associated type bindings.
    pub assoc: BTreeMap<SmolStr, Ty>,
}

impl ImplDef {
    pub fn new(behavior: impl Into<SmolStr>, ty: Ty) -> Self {
        Self {
            behavior: behavior.into(),
            ty,
            args: Vec::new(),
            where_clauses: Vec::new(),
            assoc: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = Ty>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_where(mut self, clauses: impl IntoIterator<Item = Goal>) -> Self {
        self.where_clauses = clauses.into_iter().collect();
        self
    }

    pub fn with_assoc(mut self, name: impl Into<SmolStr>, ty: Ty) -> Self {
        self.assoc.insert(name.into(), ty);
        self
    }
}

/// A `where`-clause bound in the current environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPredicate {
    pub ty: Ty,
    pub behavior: SmolStr,
    pub args: Vec<Ty>,
}

/// Everything the solver consults: declarations, impls, ambient bounds, and
/// hard-wired builtin implementations.
#[derive(Debug, Clone, Default)]
pub struct BehaviorEnv {
    behaviors: BTreeMap<SmolStr, BehaviorDecl>,
    impls: Vec<ImplDef>,
    bounds: Vec<BoundPredicate>,
    builtins: Vec<(SmolStr, Ty)>,
}

impl BehaviorEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, decl: BehaviorDecl) -> &mut Self {
        self.behaviors.insert(decl.name.clone(), decl);
        self
    }

    pub fn add_impl(&mut self, impl_def: ImplDef) -> &mut Self {
        self.impls.push(impl_def);
        self
    }

    pub fn add_bound(&mut self, bound: BoundPredicate) -> &mut Self {
        self.bounds.push(bound);
        self
    }

    pub fn add_builtin(&mut self, behavior: impl Into<SmolStr>, ty: Ty) -> &mut Self {
        self.builtins.push((behavior.into(), ty));
        self
    }

    pub fn behavior(&self, name: &str) -> Option<&BehaviorDecl> {
        self.behaviors.get(name)
    }

    pub(crate) fn impls(&self) -> &[ImplDef] {
        &self.impls
    }

    pub(crate) fn bounds(&self) -> &[BoundPredicate] {
        &self.bounds
    }

    pub(crate) fn builtins(&self) -> &[(SmolStr, Ty)] {
        &self.builtins
    }
}

/// Structural match of an impl pattern against a concrete type.
///
/// `Param` on the pattern side unifies with anything; everything else is
/// exact.
pub(crate) fn unify(pattern: &Ty, concrete: &Ty) -> bool {
    match (pattern, concrete) {
        (Ty::Param(_), _) | (_, Ty::Param(_)) => true,
        _ => pattern == concrete,
    }
}

pub(crate) fn unify_args(pattern: &[Ty], concrete: &[Ty]) -> bool {
    pattern.len() == concrete.len()
        && pattern.iter().zip(concrete).all(|(p, c)| unify(p, c))
}
