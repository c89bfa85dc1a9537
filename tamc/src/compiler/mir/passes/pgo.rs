//! Profile-guided optimization support.
//!
//! In generate mode the pass inserts a profile counter at every function
//! entry and loop header. In use mode it annotates functions with entry
//! counts read from previously collected profile data.

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::compiler::mir::passes::MirPass;
use crate::compiler::mir::{Function, Inst, InstKind, MirModule};

/// Runtime hook invoked by instrumented code.
pub const PROFILE_COUNTER_FN: &str = "tam_profile_counter";

#[derive(Debug, Clone)]
pub enum PgoMode {
    /// Insert counter increments.
    Generate,
    /// Annotate functions with entry counts from collected data.
    Use(HashMap<SmolStr, u64>),
}

#[derive(Debug)]
pub struct PgoPass {
    mode: PgoMode,
    next_counter: i64,
}

impl PgoPass {
    pub fn new(mode: PgoMode) -> Self {
        Self { mode, next_counter: 0 }
    }

    fn instrument_function(&mut self, function: &mut Function) -> bool {
        // Counter sites: the entry block plus every loop header.
        let mut sites = Vec::new();
        if !function.blocks.is_empty() {
            sites.push(0);
        }
        for (position, block) in function.blocks.iter().enumerate() {
            if position == 0 {
                continue;
            }
            let is_header = block
                .predecessors
                .iter()
                .any(|pred| function.block_position(*pred).is_some_and(|p| p >= position));
            if is_header {
                sites.push(position);
            }
        }
        for position in &sites {
            let counter = self.next_counter;
            self.next_counter += 1;
            let id_value = function.fresh_value();
            let call_value = function.fresh_value();
            let block = &mut function.blocks[*position];
            block.instructions.insert(
                0,
                Inst { result: id_value, kind: InstKind::ConstInt(counter) },
            );
            block.instructions.insert(
                1,
                Inst {
                    result: call_value,
                    kind: InstKind::Call {
                        callee: PROFILE_COUNTER_FN.into(),
                        args: vec![id_value],
                    },
                },
            );
        }
        !sites.is_empty()
    }
}

impl MirPass for PgoPass {
    fn name(&self) -> &'static str {
        "pgo"
    }

    fn run(&mut self, module: &mut MirModule) -> bool {
        match &self.mode {
            PgoMode::Generate => {
                let mut changed = false;
                for function in &mut module.functions {
                    changed |= self.instrument_function(function);
                }
                changed
            }
            PgoMode::Use(profile) => {
                let mut changed = false;
                for function in &mut module.functions {
                    if let Some(count) = profile.get(&function.name) {
                        function.profile_entry_count = Some(*count);
                        changed = true;
                    }
                }
                changed
            }
        }
    }
}

/// Parse collected profile data: one `function_name count` pair per line.
/// Malformed lines are skipped.
pub fn parse_profile_data(text: &str) -> HashMap<SmolStr, u64> {
    let mut profile = HashMap::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(count)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let Ok(count) = count.parse::<u64>() {
            profile.insert(SmolStr::new(name), count);
        }
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::mir::Terminator;

    fn counter_calls(function: &Function) -> usize {
        function
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|inst| {
                matches!(&inst.kind, InstKind::Call { callee, .. } if callee == PROFILE_COUNTER_FN)
            })
            .count()
    }

    #[test]
    fn generate_mode_instruments_entry_and_loop_headers() {
        let mut function = Function::new("f");
        let entry = function.add_block("entry");
        let header = function.add_block("header");
        let exit = function.add_block("exit");
        function.set_terminator(entry, Terminator::Branch { target: header });
        let cond = function.push_inst(header, InstKind::ConstBool(true));
        function.set_terminator(
            header,
            Terminator::CondBranch { cond, then_block: header, else_block: exit },
        );
        function.set_terminator(exit, Terminator::Return { value: None });
        function.recompute_edges();

        let mut module = MirModule { name: "m".into(), functions: vec![function] };
        let changed = PgoPass::new(PgoMode::Generate).run(&mut module);
        assert!(changed);
        assert_eq!(counter_calls(&module.functions[0]), 2);
        // Counters sit at the head of their blocks.
        assert!(matches!(
            module.functions[0].blocks[0].instructions[0].kind,
            InstKind::ConstInt(0)
        ));
    }

    #[test]
    fn use_mode_attaches_entry_counts() {
        let mut function = Function::new("hot");
        let entry = function.add_block("entry");
        function.set_terminator(entry, Terminator::Return { value: None });
        let mut module = MirModule { name: "m".into(), functions: vec![function] };

        let profile = parse_profile_data("hot 1200\ncold 1\n");
        let changed = PgoPass::new(PgoMode::Use(profile)).run(&mut module);
        assert!(changed);
        assert_eq!(module.functions[0].profile_entry_count, Some(1200));
    }

    #[test]
    fn malformed_profile_lines_are_skipped() {
        let profile = parse_profile_data("good 5\nbad\nworse x\n");
        assert_eq!(profile.len(), 1);
        assert_eq!(profile.get("good"), Some(&5));
    }
}
