//! Builtin behavior implementations for primitive types.
//!
//! These hold without any explicit `impl` in source: arithmetic and ordering
//! on integers, equality on integers and booleans, and the auto-derived
//! marker behaviors.

use super::{BehaviorDecl, BehaviorEnv, Ty};

/// Behaviors the type checker relies on for operator typing.
pub const ARITH: &str = "Arith";
pub const ORD: &str = "Ord";
pub const EQ: &str = "Eq";
pub const COPY: &str = "Copy";
pub const SIZED: &str = "Sized";

/// The default environment: declarations plus primitive implementations.
pub fn builtin_env() -> BehaviorEnv {
    let mut env = BehaviorEnv::new();

    env.declare(BehaviorDecl::new(EQ));
    env.declare(BehaviorDecl::new(ORD).with_supers([EQ]));
    env.declare(BehaviorDecl::new(ARITH));
    env.declare(BehaviorDecl::new(COPY).auto_derivable());
    env.declare(BehaviorDecl::new(SIZED).auto_derivable().cycle_safe());

    env.add_builtin(ARITH, Ty::I64);
    env.add_builtin(ORD, Ty::I64);
    env.add_builtin(EQ, Ty::I64);
    env.add_builtin(EQ, Ty::Bool);

    env
}
