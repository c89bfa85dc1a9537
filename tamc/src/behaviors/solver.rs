//! Goal solving: candidate assembly, selection, obligation discharge, and
//! cycle handling.

use std::cell::RefCell;

use smol_str::SmolStr;
use thiserror::Error;

use super::{unify, unify_args, BehaviorEnv, Goal, Ty};

/// How a goal was satisfied. The order of the variants is the precedence
/// order used during selection, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Candidate {
    /// An explicit `impl` block in scope.
    Impl(usize),
    /// A `where`-clause obligation bound in the current environment.
    WhereClause(usize),
    /// A hard-wired builtin implementation.
    Builtin,
    /// Auto-derivation permitted by the behavior declaration.
    AutoDerive,
}

impl Candidate {
    fn tier(self) -> u8 {
        match self {
            Candidate::Impl(_) => 0,
            Candidate::WhereClause(_) => 1,
            Candidate::Builtin => 2,
            Candidate::AutoDerive => 3,
        }
    }

    fn describe(self, env: &BehaviorEnv) -> String {
        match self {
            Candidate::Impl(i) => {
                let impl_def = &env.impls()[i];
                format!("impl {} for {}", impl_def.behavior, impl_def.ty)
            }
            Candidate::WhereClause(i) => {
                let bound = &env.bounds()[i];
                format!("where {}: {}", bound.ty, bound.behavior)
            }
            Candidate::Builtin => "builtin implementation".into(),
            Candidate::AutoDerive => "auto-derivation".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Solution {
    Selected(Candidate),
    /// The goal is already on the solving stack and its behavior declares
    /// cycles safe; it is treated as provisionally true.
    Provisional,
    /// Result of a projection goal.
    Projected(Ty),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("no implementation of `{behavior}` found for `{ty}`")]
    Unsolved { ty: String, behavior: String },
    #[error("ambiguous resolution of `{behavior}` for `{ty}`: {}", .candidates.join("; "))]
    Ambiguous { ty: String, behavior: String, candidates: Vec<String> },
    #[error("overflow while solving `{goal}`: cyclic obligation")]
    Overflow { goal: String },
    #[error("`{ty}` has no associated type `{assoc}`")]
    NoSuchProjection { ty: String, assoc: String },
}

/// Solves goals against a fixed environment.
///
/// The solving stack lives in a `RefCell` so `solve` can stay `&self`; the
/// solver itself is not shared across threads.
pub struct Solver<'env> {
    env: &'env BehaviorEnv,
    stack: RefCell<Vec<Goal>>,
}

impl<'env> Solver<'env> {
    pub fn new(env: &'env BehaviorEnv) -> Self {
        Self { env, stack: RefCell::new(Vec::new()) }
    }

    pub fn solve(&self, goal: &Goal) -> Result<Solution, SolveError> {
        match goal {
            Goal::Implements { ty, behavior, args } => self.solve_implements(goal, ty, behavior, args),
            Goal::Project { ty, assoc } => self.solve_projection(ty, assoc).map(Solution::Projected),
        }
    }

    fn solve_implements(
        &self,
        goal: &Goal,
        ty: &Ty,
        behavior: &SmolStr,
        args: &[Ty],
    ) -> Result<Solution, SolveError> {
        if self.stack.borrow().contains(goal) {
            let cycle_safe = self
                .env
                .behavior(behavior)
                .is_some_and(|decl| decl.cycle_safe);
            if cycle_safe {
                return Ok(Solution::Provisional);
            }
            return Err(SolveError::Overflow { goal: goal.to_string() });
        }
        self.stack.borrow_mut().push(goal.clone());
        let result = self.solve_implements_inner(ty, behavior, args);
        self.stack.borrow_mut().pop();
        result
    }

    fn solve_implements_inner(
        &self,
        ty: &Ty,
        behavior: &SmolStr,
        args: &[Ty],
    ) -> Result<Solution, SolveError> {
        let candidates = self.assemble(ty, behavior, args);

        let Some(first) = candidates.first().copied() else {
            return Err(SolveError::Unsolved {
                ty: ty.to_string(),
                behavior: behavior.to_string(),
            });
        };
        let top_tier: Vec<Candidate> = candidates
            .iter()
            .copied()
            .filter(|c| c.tier() == first.tier())
            .collect();
        if top_tier.len() > 1 {
            return Err(SolveError::Ambiguous {
                ty: ty.to_string(),
                behavior: behavior.to_string(),
                candidates: top_tier.iter().map(|c| c.describe(self.env)).collect(),
            });
        }
        let selected = first;

        // Obligation discharge: where-clauses of the selected impl, then the
        // behavior's super-behaviors. Failures propagate to the caller.
        if let Candidate::Impl(i) = selected {
            for obligation in &self.env.impls()[i].where_clauses {
                self.solve(obligation)?;
            }
        }
        if let Some(decl) = self.env.behavior(behavior) {
            for super_behavior in &decl.supers {
                self.solve(&Goal::Implements {
                    ty: ty.clone(),
                    behavior: super_behavior.clone(),
                    args: Vec::new(),
                })?;
            }
        }

        Ok(Solution::Selected(selected))
    }

    /// Gather candidates from all four sources, in precedence order.
    fn assemble(&self, ty: &Ty, behavior: &SmolStr, args: &[Ty]) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (i, impl_def) in self.env.impls().iter().enumerate() {
            if impl_def.behavior == *behavior
                && unify(&impl_def.ty, ty)
                && unify_args(&impl_def.args, args)
            {
                candidates.push(Candidate::Impl(i));
            }
        }
        for (i, bound) in self.env.bounds().iter().enumerate() {
            if bound.behavior == *behavior && unify(&bound.ty, ty) && unify_args(&bound.args, args)
            {
                candidates.push(Candidate::WhereClause(i));
            }
        }
        for (builtin_behavior, builtin_ty) in self.env.builtins() {
            if builtin_behavior == behavior && unify(builtin_ty, ty) {
                candidates.push(Candidate::Builtin);
            }
        }
        if self
            .env
            .behavior(behavior)
            .is_some_and(|decl| decl.auto_derive)
        {
            candidates.push(Candidate::AutoDerive);
        }
        candidates
    }

    fn solve_projection(&self, ty: &Ty, assoc: &SmolStr) -> Result<Ty, SolveError> {
        let mut matches: Vec<(usize, Ty)> = Vec::new();
        for (i, impl_def) in self.env.impls().iter().enumerate() {
            if unify(&impl_def.ty, ty) {
                if let Some(bound_ty) = impl_def.assoc.get(assoc) {
                    matches.push((i, bound_ty.clone()));
                }
            }
        }
        match matches.len() {
            0 => Err(SolveError::NoSuchProjection {
                ty: ty.to_string(),
                assoc: assoc.to_string(),
            }),
            1 => {
                let (i, bound_ty) = matches.remove(0);
                // The providing impl must actually apply.
                for obligation in &self.env.impls()[i].where_clauses {
                    self.solve(obligation)?;
                }
                Ok(bound_ty)
            }
            _ => Err(SolveError::Ambiguous {
                ty: ty.to_string(),
                behavior: format!("::{assoc}"),
                candidates: matches
                    .iter()
                    .map(|(i, _)| Candidate::Impl(*i).describe(self.env))
                    .collect(),
            }),
        }
    }
}
