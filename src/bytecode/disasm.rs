use std::fmt::Write;

use crate::bytecode::ir::{FunctionDef, Program};
use crate::bytecode::op::Op;

/// Render a whole program as text, `_start` first, for `--disasm`.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for function in &program.functions {
        disassemble_function(function, &mut out);
        out.push('\n');
    }
    out
}

fn disassemble_function(function: &FunctionDef, out: &mut String) {
    let _ = writeln!(
        out,
        "fn {} (id {}) ret={} params={} locals={}",
        function.name,
        function.id,
        function.return_slots,
        function.param_slots,
        function.local_slots
    );

    let targets = branch_targets(&function.code);
    for (ip, op) in function.code.iter().enumerate() {
        let marker = if targets.contains(&ip) { '>' } else { ' ' };
        match op.branch_displacement() {
            Some(disp) => {
                let target = ip as i64 + 1 + disp as i64;
                let _ = writeln!(out, "{:4} {} {:<16} ; -> {}", ip, marker, op.to_string(), target);
            }
            None => {
                let _ = writeln!(out, "{:4} {} {}", ip, marker, op);
            }
        }
    }
}

fn branch_targets(code: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();
    for (ip, op) in code.iter().enumerate() {
        if let Some(disp) = op.branch_displacement() {
            let target = ip as i64 + 1 + disp as i64;
            if target >= 0 && !targets.contains(&(target as usize)) {
                targets.push(target as usize);
            }
        }
    }
    targets
}
