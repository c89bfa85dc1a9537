//! MIR: a control-flow graph of typed instructions.
//!
//! Blocks reference each other by [`BlockId`] within the owning function;
//! there are no pointers between nodes. The block vector is stable for the
//! function's lifetime, so traversals resolve ids through [`Function::block`]
//! and iterate by id.

pub mod build;
pub mod passes;

use std::fmt::Write;

use smol_str::SmolStr;

use crate::compiler::parser::{BinOp, UnOp};
use crate::query::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    ConstInt(i64),
    ConstBool(bool),
    /// Function parameter by position.
    Param(u32),
    /// Stack slot for a named local; yields the slot address.
    Slot(SmolStr),
    Load { ptr: ValueId },
    Store { ptr: ValueId, value: ValueId },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Unary { op: UnOp, operand: ValueId },
    /// Heap allocation; yields an owned pointer.
    Alloc { size: ValueId },
    /// Releases an owned pointer.
    Release { ptr: ValueId },
    Call { callee: SmolStr, args: Vec<ValueId> },
    Phi { incoming: Vec<(ValueId, BlockId)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub result: ValueId,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch { target: BlockId },
    CondBranch { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Switch { disc: ValueId, cases: Vec<(i64, BlockId)>, default: BlockId },
    Return { value: Option<ValueId> },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch { target } => vec![*target],
            Terminator::CondBranch { then_block, else_block, .. } => {
                vec![*then_block, *else_block]
            }
            Terminator::Switch { cases, default, .. } => {
                let mut successors: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                successors.push(*default);
                successors
            }
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: SmolStr,
    pub instructions: Vec<Inst>,
    pub terminator: Option<Terminator>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: SmolStr,
    pub params: Vec<SmolStr>,
    pub blocks: Vec<BasicBlock>,
    /// Entry count from profile data, when compiling with `profile_use`.
    pub profile_entry_count: Option<u64>,
    next_value: u32,
}

impl Function {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            blocks: Vec::new(),
            profile_entry_count: None,
            next_value: 0,
        }
    }

    pub fn add_block(&mut self, name: impl Into<SmolStr>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            name: name.into(),
            instructions: Vec::new(),
            terminator: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Position of a block in layout order.
    pub fn block_position(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn push_inst(&mut self, block: BlockId, kind: InstKind) -> ValueId {
        let result = self.fresh_value();
        if let Some(block) = self.block_mut(block) {
            block.instructions.push(Inst { result, kind });
        }
        result
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        if let Some(block) = self.block_mut(block) {
            block.terminator = Some(terminator);
        }
    }

    /// Recompute predecessor/successor lists from the terminators.
    pub fn recompute_edges(&mut self) {
        for block in &mut self.blocks {
            block.predecessors.clear();
            block.successors.clear();
        }
        let edges: Vec<(BlockId, Vec<BlockId>)> = self
            .blocks
            .iter()
            .filter_map(|b| b.terminator.as_ref().map(|t| (b.id, t.successors())))
            .collect();
        for (from, successors) in edges {
            for to in successors {
                if let Some(block) = self.block_mut(from) {
                    if !block.successors.contains(&to) {
                        block.successors.push(to);
                    }
                }
                if let Some(block) = self.block_mut(to) {
                    if !block.predecessors.contains(&from) {
                        block.predecessors.push(from);
                    }
                }
            }
        }
    }

    /// Find the instruction defining a value.
    pub fn defining_inst(&self, value: ValueId) -> Option<&Inst> {
        self.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find(|inst| inst.result == value)
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "fn {}({}) {{", self.name, self.params.join(", ")).unwrap();
        for block in &self.blocks {
            writeln!(out, "{}:  ; bb{}", block.name, block.id.0).unwrap();
            for inst in &block.instructions {
                writeln!(out, "  %{} = {}", inst.result.0, dump_inst(&inst.kind)).unwrap();
            }
            match &block.terminator {
                Some(terminator) => {
                    writeln!(out, "  {}", dump_terminator(terminator)).unwrap();
                }
                None => writeln!(out, "  <unterminated>").unwrap(),
            }
        }
        out.push_str("}\n");
        out
    }
}

fn dump_inst(kind: &InstKind) -> String {
    match kind {
        InstKind::ConstInt(v) => format!("const {v}"),
        InstKind::ConstBool(v) => format!("const {v}"),
        InstKind::Param(i) => format!("param {i}"),
        InstKind::Slot(name) => format!("slot {name}"),
        InstKind::Load { ptr } => format!("load %{}", ptr.0),
        InstKind::Store { ptr, value } => format!("store %{} -> %{}", value.0, ptr.0),
        InstKind::Binary { op, lhs, rhs } => {
            format!("{} %{} %{}", op.symbol(), lhs.0, rhs.0)
        }
        InstKind::Unary { op, operand } => {
            let symbol = match op {
                UnOp::Neg => "neg",
                UnOp::Not => "not",
            };
            format!("{symbol} %{}", operand.0)
        }
        InstKind::Alloc { size } => format!("alloc %{}", size.0),
        InstKind::Release { ptr } => format!("release %{}", ptr.0),
        InstKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|a| format!("%{}", a.0)).collect();
            format!("call {callee}({})", args.join(", "))
        }
        InstKind::Phi { incoming } => {
            let incoming: Vec<String> = incoming
                .iter()
                .map(|(v, b)| format!("[%{}, bb{}]", v.0, b.0))
                .collect();
            format!("phi {}", incoming.join(" "))
        }
    }
}

fn dump_terminator(terminator: &Terminator) -> String {
    match terminator {
        Terminator::Branch { target } => format!("br bb{}", target.0),
        Terminator::CondBranch { cond, then_block, else_block } => {
            format!("br %{} bb{} bb{}", cond.0, then_block.0, else_block.0)
        }
        Terminator::Switch { disc, cases, default } => {
            let cases: Vec<String> = cases
                .iter()
                .map(|(v, b)| format!("{v} -> bb{}", b.0))
                .collect();
            format!("switch %{} [{}] default bb{}", disc.0, cases.join(", "), default.0)
        }
        Terminator::Return { value } => match value {
            Some(value) => format!("ret %{}", value.0),
            None => "ret".into(),
        },
        Terminator::Unreachable => "unreachable".into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirModule {
    pub name: SmolStr,
    pub functions: Vec<Function>,
}

impl MirModule {
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.dump())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        writeln!(out, "; mir module {}", self.name).unwrap();
        for function in &self.functions {
            out.push_str(&function.dump());
        }
        out
    }
}
