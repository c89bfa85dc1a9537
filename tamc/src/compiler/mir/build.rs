//! THIR → MIR lowering.
//!
//! Locals live in stack slots addressed by `Slot` values; reads and writes go
//! through `Load`/`Store`. Heap ownership is explicit: `alloc` lowers to
//! `Alloc`, `free` to `Release`, and ownership-transferring calls stay calls.

use smol_str::SmolStr;

use crate::compiler::mir::{BlockId, Function, InstKind, MirModule, Terminator, ValueId};
use crate::compiler::thir::{ThirExpr, ThirExprKind, ThirFunction, ThirModule, ThirStmt};

pub fn mir_build(thir: &ThirModule) -> MirModule {
    MirModule {
        name: thir.name.clone(),
        functions: thir.functions.iter().map(lower_function).collect(),
    }
}

fn lower_function(thir_function: &ThirFunction) -> Function {
    let mut function = Function::new(thir_function.name.clone());
    function.params = thir_function.params.iter().map(|(name, _)| name.clone()).collect();

    let entry = function.add_block("entry");
    let mut lowering = Lowering {
        function,
        current: entry,
        terminated: false,
        slots: Vec::new(),
        loop_exits: Vec::new(),
        label: 0,
    };

    for (index, (name, _)) in thir_function.params.iter().enumerate() {
        let value = lowering.push(InstKind::Param(index as u32));
        let slot = lowering.push(InstKind::Slot(name.clone()));
        lowering.push(InstKind::Store { ptr: slot, value });
        lowering.slots.push((name.clone(), slot));
    }

    lowering.lower_block(&thir_function.body);
    if !lowering.terminated {
        lowering
            .function
            .set_terminator(lowering.current, Terminator::Return { value: None });
    }

    let mut function = lowering.function;
    function.recompute_edges();
    function
}

struct Lowering {
    function: Function,
    current: BlockId,
    terminated: bool,
    slots: Vec<(SmolStr, ValueId)>,
    loop_exits: Vec<BlockId>,
    label: u32,
}

impl Lowering {
    fn push(&mut self, kind: InstKind) -> ValueId {
        self.function.push_inst(self.current, kind)
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.set_terminator(self.current, terminator);
        self.terminated = true;
    }

    fn start_block(&mut self, id: BlockId) {
        self.current = id;
        self.terminated = false;
    }

    fn next_label(&mut self) -> u32 {
        self.label += 1;
        self.label
    }

    fn slot_of(&self, name: &str) -> Option<ValueId> {
        self.slots
            .iter()
            .rev()
            .find(|(slot_name, _)| slot_name == name)
            .map(|(_, slot)| *slot)
    }

    fn lower_block(&mut self, body: &[ThirStmt]) {
        let depth = self.slots.len();
        for stmt in body {
            if self.terminated {
                break;
            }
            self.lower_stmt(stmt);
        }
        self.slots.truncate(depth);
    }

    fn lower_stmt(&mut self, stmt: &ThirStmt) {
        match stmt {
            ThirStmt::Let { name, value } => {
                let value = self.lower_expr(value);
                let slot = self.push(InstKind::Slot(name.clone()));
                self.push(InstKind::Store { ptr: slot, value });
                self.slots.push((name.clone(), slot));
            }
            ThirStmt::Assign { name, value } => {
                let value = self.lower_expr(value);
                if let Some(slot) = self.slot_of(name) {
                    self.push(InstKind::Store { ptr: slot, value });
                }
            }
            ThirStmt::Loop { body } => {
                let label = self.next_label();
                let header = self.function.add_block(format!("loop_header{label}"));
                let exit = self.function.add_block(format!("loop_exit{label}"));
                self.terminate(Terminator::Branch { target: header });
                self.start_block(header);
                self.loop_exits.push(exit);
                self.lower_block(body);
                self.loop_exits.pop();
                if !self.terminated {
                    // Back edge.
                    self.terminate(Terminator::Branch { target: header });
                }
                self.start_block(exit);
            }
            ThirStmt::If { cond, then_body, else_body } => {
                let cond = self.lower_expr(cond);
                let label = self.next_label();
                let then_block = self.function.add_block(format!("then{label}"));
                let else_block = self.function.add_block(format!("else{label}"));
                let join = self.function.add_block(format!("join{label}"));
                self.terminate(Terminator::CondBranch { cond, then_block, else_block });

                self.start_block(then_block);
                self.lower_block(then_body);
                let then_terminated = self.terminated;
                if !then_terminated {
                    self.terminate(Terminator::Branch { target: join });
                }

                self.start_block(else_block);
                self.lower_block(else_body);
                let else_terminated = self.terminated;
                if !else_terminated {
                    self.terminate(Terminator::Branch { target: join });
                }

                self.start_block(join);
                if then_terminated && else_terminated {
                    self.terminate(Terminator::Unreachable);
                }
            }
            ThirStmt::Return { value } => {
                let value = value.as_ref().map(|value| self.lower_expr(value));
                self.terminate(Terminator::Return { value });
            }
            ThirStmt::Break => {
                if let Some(exit) = self.loop_exits.last().copied() {
                    self.terminate(Terminator::Branch { target: exit });
                }
            }
            ThirStmt::Expr { expr } => {
                self.lower_expr(expr);
            }
        }
    }

    fn lower_expr(&mut self, expr: &ThirExpr) -> ValueId {
        match &expr.kind {
            ThirExprKind::Int(v) => self.push(InstKind::ConstInt(*v)),
            ThirExprKind::Bool(v) => self.push(InstKind::ConstBool(*v)),
            ThirExprKind::Var(name) => match self.slot_of(name) {
                Some(ptr) => self.push(InstKind::Load { ptr }),
                // Unresolved names cannot survive typecheck; keep lowering total.
                None => self.push(InstKind::ConstInt(0)),
            },
            ThirExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.push(InstKind::Binary { op: *op, lhs, rhs })
            }
            ThirExprKind::Unary { op, operand } => {
                let operand = self.lower_expr(operand);
                self.push(InstKind::Unary { op: *op, operand })
            }
            ThirExprKind::Call { callee, args } => {
                let args: Vec<ValueId> =
                    args.iter().map(|arg| self.lower_expr(arg)).collect();
                match callee.as_str() {
                    "alloc" => self.push(InstKind::Alloc { size: args[0] }),
                    "free" => self.push(InstKind::Release { ptr: args[0] }),
                    _ => self.push(InstKind::Call { callee: callee.clone(), args }),
                }
            }
        }
    }
}
