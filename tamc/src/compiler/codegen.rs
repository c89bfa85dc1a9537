//! Code generation: MIR → textual LLVM-style IR plus native library
//! references.
//!
//! The emitted text is the terminal query payload: it is what the incremental
//! store persists and reloads, so emission must be deterministic for a fixed
//! MIR module and configuration.

use std::fmt::Write;

use smol_str::SmolStr;

use crate::compiler::mir::{Function, InstKind, MirModule, Terminator};
use crate::compiler::parser::{BinOp, UnOp};
use crate::query::fingerprint::Fingerprint;

/// Options that shape emitted IR. A strict subset of the session options:
/// exactly those classified as affecting codegen output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    pub target_triple: String,
    pub optimization_level: u8,
    pub debug_info: bool,
    pub coverage: bool,
    pub backend: SmolStr,
}

/// The emitted artifact for one source module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenUnit {
    pub module: SmolStr,
    pub ir: String,
    pub native_libs: Vec<String>,
}

impl CodegenUnit {
    pub fn stable_digest(&self) -> Fingerprint {
        let mut fp = Fingerprint::of_str(&self.ir);
        for lib in &self.native_libs {
            fp = fp.combine(Fingerprint::of_str(lib));
        }
        fp
    }
}

pub fn codegen_unit(mir: &MirModule, config: &CodegenConfig) -> CodegenUnit {
    let mut ir = String::new();
    writeln!(ir, "; ModuleID = '{}'", mir.name).unwrap();
    writeln!(ir, "; backend: {}", config.backend).unwrap();
    writeln!(ir, "; opt level: {}", config.optimization_level).unwrap();
    if !config.target_triple.is_empty() {
        writeln!(ir, "target triple = \"{}\"", config.target_triple).unwrap();
    }
    if config.coverage {
        writeln!(ir, "; coverage instrumentation enabled").unwrap();
    }
    ir.push('\n');

    let mut uses_heap = false;
    let mut uses_io = false;
    for function in &mir.functions {
        emit_function(&mut ir, function, config);
        for inst in function.blocks.iter().flat_map(|b| &b.instructions) {
            match &inst.kind {
                InstKind::Alloc { .. } | InstKind::Release { .. } => uses_heap = true,
                InstKind::Call { callee, .. } if callee == "print" => uses_io = true,
                _ => {}
            }
        }
    }

    let mut native_libs = vec!["tamrt".to_string()];
    if uses_heap {
        native_libs.push("tamrt_heap".to_string());
    }
    if uses_io {
        native_libs.push("tamrt_io".to_string());
    }

    CodegenUnit { module: mir.name.clone(), ir, native_libs }
}

fn emit_function(ir: &mut String, function: &Function, config: &CodegenConfig) {
    let params: Vec<String> = function
        .params
        .iter()
        .enumerate()
        .map(|(i, name)| format!("i64 %arg{i}.{name}"))
        .collect();
    if let Some(count) = function.profile_entry_count {
        writeln!(ir, "; pgo entry count: {count}").unwrap();
    }
    writeln!(ir, "define i64 @{}({}) {{", function.name, params.join(", ")).unwrap();
    for block in &function.blocks {
        writeln!(ir, "bb{}.{}:", block.id.0, block.name).unwrap();
        if config.coverage {
            writeln!(ir, "  call void @__tam_coverage(i32 {})", block.id.0).unwrap();
        }
        for inst in &block.instructions {
            let text = emit_inst(&inst.kind, inst.result.0);
            if config.debug_info {
                writeln!(ir, "  {text}, !dbg !{}", block.id.0).unwrap();
            } else {
                writeln!(ir, "  {text}").unwrap();
            }
        }
        match &block.terminator {
            Some(terminator) => writeln!(ir, "  {}", emit_terminator(terminator)).unwrap(),
            None => writeln!(ir, "  unreachable").unwrap(),
        }
    }
    ir.push_str("}\n\n");
}

fn emit_inst(kind: &InstKind, result: u32) -> String {
    match kind {
        InstKind::ConstInt(v) => format!("%{result} = add i64 0, {v}"),
        InstKind::ConstBool(v) => format!("%{result} = add i1 0, {}", u8::from(*v)),
        InstKind::Param(i) => format!("%{result} = bitcast i64 %arg{i} to i64"),
        InstKind::Slot(name) => format!("%{result} = alloca i64 ; {name}"),
        InstKind::Load { ptr } => format!("%{result} = load i64, ptr %{}", ptr.0),
        InstKind::Store { ptr, value } => {
            format!("store i64 %{}, ptr %{}", value.0, ptr.0)
        }
        InstKind::Binary { op, lhs, rhs } => {
            let op = match op {
                BinOp::Add => "add i64",
                BinOp::Sub => "sub i64",
                BinOp::Mul => "mul i64",
                BinOp::Div => "sdiv i64",
                BinOp::Lt => "icmp slt i64",
                BinOp::Gt => "icmp sgt i64",
                BinOp::Le => "icmp sle i64",
                BinOp::Ge => "icmp sge i64",
                BinOp::Eq => "icmp eq i64",
                BinOp::Ne => "icmp ne i64",
                BinOp::And => "and i1",
                BinOp::Or => "or i1",
            };
            format!("%{result} = {op} %{}, %{}", lhs.0, rhs.0)
        }
        InstKind::Unary { op, operand } => match op {
            UnOp::Neg => format!("%{result} = sub i64 0, %{}", operand.0),
            UnOp::Not => format!("%{result} = xor i1 %{}, 1", operand.0),
        },
        InstKind::Alloc { size } => {
            format!("%{result} = call ptr @tam_alloc(i64 %{})", size.0)
        }
        InstKind::Release { ptr } => format!("call void @tam_free(ptr %{})", ptr.0),
        InstKind::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(|a| format!("i64 %{}", a.0)).collect();
            format!("%{result} = call i64 @{callee}({})", args.join(", "))
        }
        InstKind::Phi { incoming } => {
            let incoming: Vec<String> = incoming
                .iter()
                .map(|(v, b)| format!("[ %{}, %bb{} ]", v.0, b.0))
                .collect();
            format!("%{result} = phi i64 {}", incoming.join(", "))
        }
    }
}

fn emit_terminator(terminator: &Terminator) -> String {
    match terminator {
        Terminator::Branch { target } => format!("br label %bb{}", target.0),
        Terminator::CondBranch { cond, then_block, else_block } => format!(
            "br i1 %{}, label %bb{}, label %bb{}",
            cond.0, then_block.0, else_block.0
        ),
        Terminator::Switch { disc, cases, default } => {
            let cases: Vec<String> = cases
                .iter()
                .map(|(v, b)| format!("i64 {v}, label %bb{}", b.0))
                .collect();
            format!(
                "switch i64 %{}, label %bb{} [ {} ]",
                disc.0,
                default.0,
                cases.join(" ")
            )
        }
        Terminator::Return { value } => match value {
            Some(value) => format!("ret i64 %{}", value.0),
            None => "ret i64 0".into(),
        },
        Terminator::Unreachable => "unreachable".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::mir::Function;

    fn config() -> CodegenConfig {
        CodegenConfig {
            target_triple: "x86_64-unknown-linux-gnu".into(),
            optimization_level: 0,
            debug_info: false,
            coverage: false,
            backend: "llvm".into(),
        }
    }

    fn simple_module() -> MirModule {
        let mut function = Function::new("main");
        let entry = function.add_block("entry");
        let value = function.push_inst(entry, InstKind::ConstInt(42));
        function.set_terminator(entry, Terminator::Return { value: Some(value) });
        function.recompute_edges();
        MirModule { name: "app".into(), functions: vec![function] }
    }

    #[test]
    fn emits_module_header_and_function() {
        let unit = codegen_unit(&simple_module(), &config());
        assert!(unit.ir.contains("; ModuleID = 'app'"));
        assert!(unit.ir.contains("define i64 @main()"));
        assert!(unit.ir.contains("ret i64 %0"));
        assert_eq!(unit.native_libs, vec!["tamrt"]);
    }

    #[test]
    fn heap_usage_adds_runtime_lib() {
        let mut function = Function::new("f");
        let entry = function.add_block("entry");
        let size = function.push_inst(entry, InstKind::ConstInt(8));
        let ptr = function.push_inst(entry, InstKind::Alloc { size });
        function.push_inst(entry, InstKind::Release { ptr });
        function.set_terminator(entry, Terminator::Return { value: None });
        let module = MirModule { name: "m".into(), functions: vec![function] };
        let unit = codegen_unit(&module, &config());
        assert!(unit.native_libs.contains(&"tamrt_heap".to_string()));
    }

    #[test]
    fn debug_info_changes_output() {
        let module = simple_module();
        let plain = codegen_unit(&module, &config());
        let mut debug_config = config();
        debug_config.debug_info = true;
        let debug = codegen_unit(&module, &debug_config);
        assert_ne!(plain.ir, debug.ir);
        assert_ne!(plain.stable_digest(), debug.stable_digest());
        assert!(debug.ir.contains("!dbg"));
    }

    #[test]
    fn coverage_changes_output() {
        let module = simple_module();
        let plain = codegen_unit(&module, &config());
        let mut coverage_config = config();
        coverage_config.coverage = true;
        let coverage = codegen_unit(&module, &coverage_config);
        assert_ne!(plain.stable_digest(), coverage.stable_digest());
        assert!(coverage.ir.contains("__tam_coverage"));
    }

    #[test]
    fn emission_is_deterministic() {
        let module = simple_module();
        let a = codegen_unit(&module, &config());
        let b = codegen_unit(&module, &config());
        assert_eq!(a.ir, b.ir);
        assert_eq!(a.stable_digest(), b.stable_digest());
    }
}
