//! Memory leak detection.
//!
//! Shadow-interprets allocation and release sites: every path from an
//! `Alloc` to a function return must pass a release of the allocated value.
//! Passing the value to a call transfers ownership and counts as a release,
//! as does storing it into a reachable container. Local stack slots are not
//! containers: a value parked in a slot is still owned here, and loads from
//! that slot alias the allocation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

use crate::compiler::mir::passes::MirPass;
use crate::compiler::mir::{BasicBlock, BlockId, Function, InstKind, MirModule, Terminator, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakWarning {
    pub function: SmolStr,
    /// Block holding the allocation.
    pub block: SmolStr,
    pub block_id: u32,
    /// The allocated value.
    pub value: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LeakCheckPass {
    warnings: Vec<LeakWarning>,
}

impl LeakCheckPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> &[LeakWarning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(
                "potential memory leak in function `{}`: {} (allocated in block `{}`)",
                warning.function, warning.reason, warning.block
            );
        }
    }

    fn analyze_function(&mut self, function: &Function) {
        for block in &function.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                if matches!(inst.kind, InstKind::Alloc { .. }) {
                    self.analyze_allocation(function, block, index, inst.result);
                }
            }
        }
    }

    fn analyze_allocation(
        &mut self,
        function: &Function,
        alloc_block: &BasicBlock,
        alloc_index: usize,
        value: ValueId,
    ) {
        let aliases = alias_set(function, value);
        if leaks_on_some_path(function, alloc_block, alloc_index, &aliases) {
            self.warnings.push(LeakWarning {
                function: function.name.clone(),
                block: alloc_block.name.clone(),
                block_id: alloc_block.id.0,
                value: value.0,
                reason: format!(
                    "allocation %{} escapes on a return path without a matching release",
                    value.0
                ),
            });
        }
    }
}

impl MirPass for LeakCheckPass {
    fn name(&self) -> &'static str {
        "memory-leak-check"
    }

    fn run(&mut self, module: &mut MirModule) -> bool {
        self.warnings.clear();
        for function in &module.functions {
            self.analyze_function(function);
        }
        false
    }
}

fn is_local_slot(function: &Function, ptr: ValueId) -> bool {
    matches!(
        function.defining_inst(ptr).map(|inst| &inst.kind),
        Some(InstKind::Slot(_))
    )
}

/// Values that hold the allocation: the `Alloc` result plus every load from a
/// local slot the allocation was parked in. Computed to a fixed point, since
/// a loaded value can itself be stored into another slot.
fn alias_set(function: &Function, alloc: ValueId) -> HashSet<ValueId> {
    let mut aliases: HashSet<ValueId> = HashSet::new();
    aliases.insert(alloc);
    let mut holding_slots: HashSet<ValueId> = HashSet::new();

    loop {
        let mut changed = false;
        for inst in function.blocks.iter().flat_map(|b| &b.instructions) {
            match &inst.kind {
                InstKind::Store { ptr, value }
                    if aliases.contains(value) && is_local_slot(function, *ptr) =>
                {
                    changed |= holding_slots.insert(*ptr);
                }
                InstKind::Load { ptr } if holding_slots.contains(ptr) => {
                    changed |= aliases.insert(inst.result);
                }
                _ => {}
            }
        }
        if !changed {
            break;
        }
    }
    aliases
}

/// Instructions that end the shadow lifetime of the allocation.
fn releases(function: &Function, inst: &InstKind, aliases: &HashSet<ValueId>) -> bool {
    match inst {
        InstKind::Release { ptr } => aliases.contains(ptr),
        // Ownership-transferring call.
        InstKind::Call { args, .. } => args.iter().any(|arg| aliases.contains(arg)),
        // Stored into a reachable container; parking in a local slot is not
        // an escape.
        InstKind::Store { ptr, value } => {
            aliases.contains(value) && !is_local_slot(function, *ptr)
        }
        _ => false,
    }
}

fn block_releases(
    function: &Function,
    block: &BasicBlock,
    from_index: usize,
    aliases: &HashSet<ValueId>,
) -> bool {
    block.instructions[from_index..]
        .iter()
        .any(|inst| releases(function, &inst.kind, aliases))
}

/// True if some path from the allocation reaches a `Return` without passing a
/// release.
fn leaks_on_some_path(
    function: &Function,
    alloc_block: &BasicBlock,
    alloc_index: usize,
    aliases: &HashSet<ValueId>,
) -> bool {
    // Remainder of the allocating block.
    if block_releases(function, alloc_block, alloc_index + 1, aliases) {
        return false;
    }
    if matches!(alloc_block.terminator, Some(Terminator::Return { .. })) {
        return true;
    }

    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut worklist: Vec<BlockId> = alloc_block
        .terminator
        .as_ref()
        .map(|t| t.successors())
        .unwrap_or_default();

    while let Some(id) = worklist.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(block) = function.block(id) else {
            continue;
        };
        if block_releases(function, block, 0, aliases) {
            // The value dies on this path.
            continue;
        }
        match &block.terminator {
            Some(Terminator::Return { .. }) => return true,
            Some(terminator) => worklist.extend(terminator.successors()),
            None => {}
        }
    }
    false
}
