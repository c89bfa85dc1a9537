//! Infinite loop detection.
//!
//! Flags natural loops that have no exit edge and either branch on a
//! compile-time true condition or never modify the values their condition
//! reads. Runs before optimization; never modifies the IR.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

use crate::compiler::mir::passes::MirPass;
use crate::compiler::mir::{BasicBlock, BlockId, Function, InstKind, MirModule, Terminator, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfiniteLoopWarning {
    pub function: SmolStr,
    pub block: SmolStr,
    pub block_id: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct InfiniteLoopCheckPass {
    warnings: Vec<InfiniteLoopWarning>,
}

impl InfiniteLoopCheckPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> &[InfiniteLoopWarning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(
                "potential infinite loop in function `{}` at block `{}` (id={}): {}",
                warning.function, warning.block, warning.block_id, warning.reason
            );
        }
    }

    fn analyze_function(&mut self, function: &Function) {
        for block in &function.blocks {
            if !is_loop_header(function, block) {
                continue;
            }
            let loop_blocks = natural_loop_blocks(function, block.id);
            if loop_has_exit(function, &loop_blocks) {
                continue;
            }
            if condition_always_true(function, block) {
                self.warnings.push(InfiniteLoopWarning {
                    function: function.name.clone(),
                    block: block.name.clone(),
                    block_id: block.id.0,
                    reason: "loop condition is always true with no exit path".into(),
                });
            } else if !modifies_condition_values(function, block, &loop_blocks) {
                self.warnings.push(InfiniteLoopWarning {
                    function: function.name.clone(),
                    block: block.name.clone(),
                    block_id: block.id.0,
                    reason: "loop condition variables are never modified inside the loop".into(),
                });
            }
        }
    }
}

impl MirPass for InfiniteLoopCheckPass {
    fn name(&self) -> &'static str {
        "infinite-loop-check"
    }

    fn run(&mut self, module: &mut MirModule) -> bool {
        self.warnings.clear();
        for function in &module.functions {
            self.analyze_function(function);
        }
        false
    }
}

/// A block is a loop header if some predecessor sits at the same or a later
/// layout position, i.e. reaches it through a back-edge. Covers self-loops.
fn is_loop_header(function: &Function, block: &BasicBlock) -> bool {
    let Some(position) = function.block_position(block.id) else {
        return false;
    };
    block
        .predecessors
        .iter()
        .any(|pred| function.block_position(*pred).is_some_and(|p| p >= position))
}

/// The natural loop of a header: the header plus every block that reaches one
/// of its back-edge sources without passing through the header.
fn natural_loop_blocks(function: &Function, header: BlockId) -> HashSet<BlockId> {
    let mut loop_blocks = HashSet::new();
    loop_blocks.insert(header);

    let mut worklist: Vec<BlockId> = Vec::new();
    for block in &function.blocks {
        if block.id != header && block.successors.contains(&header) {
            if loop_blocks.insert(block.id) {
                worklist.push(block.id);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        let Some(block) = function.block(id) else {
            continue;
        };
        for pred in &block.predecessors {
            if loop_blocks.insert(*pred) {
                worklist.push(*pred);
            }
        }
    }

    loop_blocks
}

fn loop_has_exit(function: &Function, loop_blocks: &HashSet<BlockId>) -> bool {
    for id in loop_blocks {
        let Some(block) = function.block(*id) else {
            continue;
        };
        let Some(terminator) = &block.terminator else {
            continue;
        };
        if matches!(terminator, Terminator::Return { .. }) {
            return true;
        }
        if terminator
            .successors()
            .iter()
            .any(|succ| !loop_blocks.contains(succ))
        {
            return true;
        }
    }
    false
}

fn condition_always_true(function: &Function, header: &BasicBlock) -> bool {
    match &header.terminator {
        // An unconditional branch out of a no-exit loop header loops forever.
        Some(Terminator::Branch { .. }) => true,
        Some(Terminator::CondBranch { cond, .. }) => {
            match function.defining_inst(*cond).map(|inst| &inst.kind) {
                Some(InstKind::ConstBool(value)) => *value,
                Some(InstKind::ConstInt(value)) => *value != 0,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Whether any value the loop condition transitively reads is written inside
/// the loop. A phi feeding the condition counts as a write: its value changes
/// across iterations.
fn modifies_condition_values(
    function: &Function,
    header: &BasicBlock,
    loop_blocks: &HashSet<BlockId>,
) -> bool {
    let Some(Terminator::CondBranch { cond, .. }) = &header.terminator else {
        // Not a conditional loop; nothing to analyze.
        return true;
    };

    // Transitive operands of the condition.
    let mut deps: HashSet<ValueId> = HashSet::new();
    let mut worklist = vec![*cond];
    while let Some(value) = worklist.pop() {
        if !deps.insert(value) {
            continue;
        }
        let Some(inst) = function.defining_inst(value) else {
            continue;
        };
        match &inst.kind {
            InstKind::Binary { lhs, rhs, .. } => {
                worklist.push(*lhs);
                worklist.push(*rhs);
            }
            InstKind::Unary { operand, .. } => worklist.push(*operand),
            InstKind::Load { ptr } => worklist.push(*ptr),
            InstKind::Phi { incoming } => {
                for (value, _) in incoming {
                    worklist.push(*value);
                }
            }
            _ => {}
        }
    }

    for id in loop_blocks {
        let Some(block) = function.block(*id) else {
            continue;
        };
        for inst in &block.instructions {
            match &inst.kind {
                InstKind::Store { ptr, .. } if deps.contains(ptr) => return true,
                InstKind::Phi { .. } if deps.contains(&inst.result) => return true,
                _ => {}
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::BinOp;

    fn check(module: &mut MirModule) -> Vec<InfiniteLoopWarning> {
        let mut pass = InfiniteLoopCheckPass::new();
        pass.run(module);
        pass.warnings().to_vec()
    }

    fn module_of(function: Function) -> MirModule {
        MirModule { name: "m".into(), functions: vec![function] }
    }

    #[test]
    fn self_loop_with_no_exit_warns_always_true() {
        let mut function = Function::new("forever");
        let block = function.add_block("spin");
        function.set_terminator(block, Terminator::Branch { target: block });
        function.recompute_edges();

        let warnings = check(&mut module_of(function));
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].reason,
            "loop condition is always true with no exit path"
        );
        assert_eq!(warnings[0].block_id, 0);
    }

    #[test]
    fn constant_true_condition_with_internal_branches_warns() {
        // header: br true body body; both successors stay in the loop.
        let mut function = Function::new("f");
        let entry = function.add_block("entry");
        let header = function.add_block("header");
        let body = function.add_block("body");
        function.set_terminator(entry, Terminator::Branch { target: header });
        let cond = function.push_inst(header, InstKind::ConstBool(true));
        function.set_terminator(
            header,
            Terminator::CondBranch { cond, then_block: body, else_block: body },
        );
        function.set_terminator(body, Terminator::Branch { target: header });
        function.recompute_edges();

        let warnings = check(&mut module_of(function));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].reason.contains("always true"));
    }

    #[test]
    fn counted_loop_does_not_warn() {
        // i stored in a slot, incremented in the body, compared in the header.
        let mut function = Function::new("count");
        let entry = function.add_block("entry");
        let header = function.add_block("header");
        let body = function.add_block("body");
        let exit = function.add_block("exit");

        let zero = function.push_inst(entry, InstKind::ConstInt(0));
        let slot = function.push_inst(entry, InstKind::Slot("i".into()));
        function.push_inst(entry, InstKind::Store { ptr: slot, value: zero });
        function.set_terminator(entry, Terminator::Branch { target: header });

        let i = function.push_inst(header, InstKind::Load { ptr: slot });
        let n = function.push_inst(header, InstKind::ConstInt(10));
        let cond = function.push_inst(header, InstKind::Binary { op: BinOp::Lt, lhs: i, rhs: n });
        function.set_terminator(
            header,
            Terminator::CondBranch { cond, then_block: body, else_block: exit },
        );

        let i2 = function.push_inst(body, InstKind::Load { ptr: slot });
        let one = function.push_inst(body, InstKind::ConstInt(1));
        let sum = function.push_inst(body, InstKind::Binary { op: BinOp::Add, lhs: i2, rhs: one });
        function.push_inst(body, InstKind::Store { ptr: slot, value: sum });
        function.set_terminator(body, Terminator::Branch { target: header });

        function.set_terminator(exit, Terminator::Return { value: None });
        function.recompute_edges();

        let warnings = check(&mut module_of(function));
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn unmodified_condition_with_no_exit_warns() {
        // Condition loads a slot nothing in the loop writes; both branch
        // targets stay inside the loop.
        let mut function = Function::new("stuck");
        let entry = function.add_block("entry");
        let header = function.add_block("header");
        let body = function.add_block("body");

        let flag = function.push_inst(entry, InstKind::Slot("flag".into()));
        let yes = function.push_inst(entry, InstKind::ConstBool(true));
        function.push_inst(entry, InstKind::Store { ptr: flag, value: yes });
        function.set_terminator(entry, Terminator::Branch { target: header });

        let cond = function.push_inst(header, InstKind::Load { ptr: flag });
        function.set_terminator(
            header,
            Terminator::CondBranch { cond, then_block: body, else_block: body },
        );
        function.set_terminator(body, Terminator::Branch { target: header });
        function.recompute_edges();

        let warnings = check(&mut module_of(function));
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].reason,
            "loop condition variables are never modified inside the loop"
        );
    }

    #[test]
    fn loop_with_a_path_to_return_does_not_warn() {
        // header: br %c ret_block body; body: br header.
        let mut function = Function::new("f");
        let header = function.add_block("header");
        let ret_block = function.add_block("ret");
        let body = function.add_block("body");
        let cond = function.push_inst(header, InstKind::ConstBool(true));
        function.set_terminator(
            header,
            Terminator::CondBranch { cond, then_block: ret_block, else_block: body },
        );
        function.set_terminator(ret_block, Terminator::Return { value: None });
        function.set_terminator(body, Terminator::Branch { target: header });
        function.recompute_edges();

        let warnings = check(&mut module_of(function));
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn pass_does_not_modify_ir() {
        let mut function = Function::new("forever");
        let block = function.add_block("spin");
        function.set_terminator(block, Terminator::Branch { target: block });
        function.recompute_edges();
        let mut module = module_of(function);
        let before = module.dump();
        let changed = InfiniteLoopCheckPass::new().run(&mut module);
        assert!(!changed);
        assert_eq!(module.dump(), before);
    }
}
