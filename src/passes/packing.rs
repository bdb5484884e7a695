//! Code-size reduction: tail merging and jump-chain collapsing.

use crate::instructions::*;
use crate::opcodes::*;

use std::cmp::Reverse;

/// Drops erased instructions, then replaces the tail of each routine with a
/// jump when it repeats a whole shorter routine of the same clause.
pub(crate) fn pack_instructions(routines: &mut [Routine]) {
    for routine in routines.iter_mut() {
        routine.instr.retain(|instr| instr.op != Opcode::Nop);
    }

    let mut order: Vec<RoutineId> = (0..routines.len()).collect();
    order.sort_by_key(|&r| Reverse(routines[r].len()));

    for (i, &r1) in order.iter().enumerate() {
        if routines[r1].is_empty() {
            continue;
        }

        for &r2 in &order[i + 1..] {
            if routines[r2].is_empty() || routines[r1].clause_id != routines[r2].clause_id {
                continue;
            }

            let Some(pos) = routines[r1].len().checked_sub(routines[r2].len()) else {
                continue;
            };

            if routines[r1].instr[pos..] == routines[r2].instr[..] {
                let instr = &mut routines[r1].instr;

                instr.truncate(pos + 1);
                instr[pos] = Instruction::jump(label!(r2));
                break;
            }
        }
    }
}

/// Points every reference to a routine that only jumps elsewhere at the
/// end of its jump chain, and empties the routines that were bypassed.
pub(crate) fn resolve_jump_chains(routines: &mut [Routine], entries: EntryPoints) {
    let n = routines.len();

    for r in 0..n {
        let mut lab = Some(r);
        let mut steps = 0;

        while let Some(l) = lab {
            if entries.is_entry(l) {
                break;
            }

            match routines[l].instr.first() {
                Some(instr) if instr.op == Opcode::Jump => {
                    lab = match instr.oper[0] {
                        Operand::Label(target) => Some(target),
                        Operand::Fail => None,
                        other => panic!("JUMP in R{l} to {other:?}"),
                    };
                }
                _ => break,
            }

            steps += 1;
            assert!(steps <= n, "jump cycle through R{r}");
        }

        routines[r].diverted = lab;
    }

    let diverted: Vec<Option<RoutineId>> = routines.iter().map(|r| r.diverted).collect();

    for (r, routine) in routines.iter_mut().enumerate() {
        if diverted[r] != Some(r) {
            routine.instr.clear();
            continue;
        }

        for instr in routine.instr.iter_mut() {
            if instr.op.is_branch() {
                instr.implicit = instr.implicit.and_then(|target| diverted[target]);
            }

            for oper in instr.oper.iter_mut() {
                if let Operand::Label(target) = *oper {
                    *oper = diverted[target].map_or(Operand::Fail, |d| label!(d));
                }
            }
        }
    }
}
