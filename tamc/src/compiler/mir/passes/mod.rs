//! Static analysis and instrumentation passes over MIR.

pub mod infinite_loop;
pub mod leak_check;
pub mod pgo;

use tracing::trace_span;

use crate::compiler::mir::MirModule;

/// A pass over a whole MIR module.
pub trait MirPass {
    fn name(&self) -> &'static str;

    /// Returns true if the pass modified the IR.
    fn run(&mut self, module: &mut MirModule) -> bool;
}

/// Run a pass under a tracing span.
pub fn run_pass(pass: &mut dyn MirPass, module: &mut MirModule) -> bool {
    let span = trace_span!("mir_pass", name = pass.name());
    let _guard = span.enter();
    pass.run(module)
}
