//! Peephole pass over a finished program. The output encodes exactly what the input
//! encodes; only the instruction count changes.
//!
//! Two rewrites are applied, neither across a branch target:
//! - `size` reservations inside a run of fixed-width instructions are folded into the
//!   first reservation of the run;
//! - `seek 0` is dropped.
//!
//! Branch operands are then remapped to the new positions of their targets.
use tracing::debug;

use super::{
    instr::{Instr, OpCode},
    program::Program,
};

/// Opcodes that write or skip a fixed number of bytes and never reserve on their own.
fn is_fixed_width(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Size | OpCode::Byte | OpCode::Word | OpCode::Long | OpCode::Copy | OpCode::Seek
    )
}

/// Optimizes `program` in place, returning how many instructions were removed.
pub fn optimize(program: &mut Program) -> usize {
    let targets = program.branch_targets();
    let code = program.code_mut();
    let len = code.len();
    let mut keep = vec![true; len];

    // index of the `size` that absorbs the reservations following it
    let mut head: Option<usize> = None;
    for pc in 0..len {
        let ins = code[pc];
        let op = ins.op();
        if targets[pc] || !is_fixed_width(op) {
            head = None;
        }
        match op {
            OpCode::Size => {
                let merged = head.and_then(|at| {
                    let total = code[at].iv().checked_add(ins.iv())?;
                    Instr::with_int(OpCode::Size, total).ok().map(|m| (at, m))
                });
                match merged {
                    Some((at, m)) => {
                        code[at] = m;
                        keep[pc] = false;
                    }
                    None => head = Some(pc),
                }
            }
            OpCode::Seek if ins.iv() == 0 && !targets[pc] => keep[pc] = false,
            _ => {}
        }
    }

    // new position of every old position, end included
    let mut remap = Vec::with_capacity(len + 1);
    let mut next = 0usize;
    for kept in &keep {
        remap.push(next);
        next += usize::from(*kept);
    }
    remap.push(next);

    let mut out = 0usize;
    for pc in 0..len {
        if !keep[pc] {
            continue;
        }
        let ins = code[pc];
        code[out] = if ins.op().is_branch() {
            // branches past the end are left alone
            remap.get(ins.target()).map_or(ins, |&to| ins.retarget(to))
        } else {
            ins
        };
        out += 1;
    }
    code.truncate(out);

    let removed = len - out;
    if removed > 0 {
        debug!(before = len, after = out, "optimized program");
    }
    removed
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::optimize;
    use crate::{
        compiler::{OpCode, Program},
        types::TypeArena,
    };

    #[test]
    fn reservations_fold_into_the_first() {
        let mut p = Program::new();
        p.i64(OpCode::Size, 3).unwrap();
        p.i64(OpCode::Byte, 8).unwrap();
        p.i64(OpCode::Word, 1).unwrap();
        p.i64(OpCode::Size, 4).unwrap();
        p.i64(OpCode::Copy, 4).unwrap();
        p.i64(OpCode::Size, 3).unwrap();
        p.i64(OpCode::Seek, 4).unwrap();
        p.add(OpCode::Vstr).unwrap();
        p.i64(OpCode::Size, 1).unwrap();

        check!(optimize(&mut p) == 2);
        check!(p[0].iv() == 10);
        let ops: Vec<_> = p.iter().map(|i| i.op()).collect();
        check!(
            ops == [
                OpCode::Size,
                OpCode::Byte,
                OpCode::Word,
                OpCode::Copy,
                OpCode::Seek,
                OpCode::Vstr,
                OpCode::Size
            ]
        );
    }

    #[test]
    fn zero_seeks_are_dropped_and_branches_follow() {
        let mut p = Program::new();
        let j = p.pc();
        p.add(OpCode::Deref).unwrap();
        p.i64(OpCode::Seek, 0).unwrap();
        p.add(OpCode::Vstr).unwrap();
        p.patch(j);
        p.i64(OpCode::Seek, 0).unwrap();
        p.i64(OpCode::Byte, 0).unwrap();

        check!(optimize(&mut p) == 1);
        check!(p.len() == 4);
        check!(p[0].target() == 2);
        check!(p[2].op() == OpCode::Seek);
    }

    #[test]
    fn branch_targets_split_runs() {
        let types = TypeArena::new();
        let mut p = Program::new();
        p.i64(OpCode::Size, 1).unwrap();
        let j = p.pc();
        p.add(OpCode::IfNil).unwrap();
        p.patch(j);
        p.i64(OpCode::Size, 2).unwrap();
        p.i64(OpCode::Size, 2).unwrap();
        p.i64(OpCode::Seek, 0).unwrap();

        check!(optimize(&mut p) == 2);
        check!(
            p.disassemble(&types)
                == "\tsize              1\n\tif_nil            L_2\nL_2:\n\tsize              4\n\tend"
        );
    }

    #[test]
    fn dangling_branches_are_kept() {
        let mut p = Program::new();
        p.jmp(OpCode::Goto, 100).unwrap();
        p.i64(OpCode::Seek, 0).unwrap();

        check!(optimize(&mut p) == 1);
        check!(p.len() == 1);
        check!(p[0].target() == 100);
    }

    #[test]
    fn end_target_is_remapped() {
        let mut p = Program::new();
        let j = p.pc();
        p.add(OpCode::IfTrue).unwrap();
        p.i64(OpCode::Seek, 0).unwrap();
        p.i64(OpCode::Seek, 0).unwrap();
        p.patch(j);

        check!(optimize(&mut p) == 2);
        check!(p[0].target() == 1);
        check!(p.branch_targets() == [false, true]);
    }
}
