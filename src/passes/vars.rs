//! Frame variable compaction.
//!
//! Runs after [`track_refs`](super::track_refs): a variable that is only
//! touched within one reference group never outlives a routine boundary and
//! becomes a temporary. The variables that remain are renumbered densely.

use crate::forms::*;
use crate::instructions::*;
use crate::opcodes::*;

/// Returns the number of clauses that lost their whole frame.
pub(crate) fn optimize_vars(routines: &mut [Routine], clauses: &mut [Clause]) -> usize {
    let mut eliminated = 0;

    for (cnum, cl) in clauses.iter_mut().enumerate() {
        if cl.nvar == 0 {
            continue;
        }

        let mut seen_in: Vec<Option<RoutineId>> = vec![None; cl.nvar];
        let mut multi = vec![false; cl.nvar];

        for routine in routines.iter().filter(|r| r.clause_id == Some(cnum)) {
            // routines without a group were emptied by reference tracking
            let Some(group) = routine.reftrack else {
                continue;
            };

            for oper in routine.instr.iter().flat_map(|instr| instr.oper.iter()) {
                if let &Operand::Var(v) = oper {
                    match seen_in[v] {
                        None => seen_in[v] = Some(group),
                        Some(g) if g != group => multi[v] = true,
                        Some(_) => {}
                    }
                }
            }
        }

        let mut remap: Vec<Option<Operand>> = vec![None; cl.nvar];
        let mut nextvar = 0;
        let mut any = false;

        for v in 0..cl.nvar {
            if seen_in[v].is_none() {
                continue;
            }

            if multi[v] {
                any |= v != nextvar;
                remap[v] = Some(var!(nextvar));

                if v < cl.varnames.len() {
                    cl.varnames.swap(nextvar, v);
                }

                nextvar += 1;
            } else {
                any = true;
                remap[v] = Some(temp!(cl.next_temp));
                cl.next_temp += 1;
            }
        }

        if nextvar == 0 {
            eliminated += 1;
            tracing::debug!(target: "dialogc::passes", "clause {cnum} needs no frame");
        }

        if !any && nextvar == cl.nvar {
            continue;
        }

        for routine in routines.iter_mut().filter(|r| r.clause_id == Some(cnum)) {
            for instr in routine.instr.iter_mut() {
                if instr.op == Opcode::Allocate {
                    assert_eq!(instr.oper[0], num!(cl.nvar), "frame size out of date");
                    instr.oper[0] = num!(nextvar);
                }

                for oper in instr.oper.iter_mut() {
                    if let Operand::Var(v) = *oper {
                        *oper = remap[v]
                            .unwrap_or_else(|| panic!("V{v} has no group but is referenced"));
                    }
                }
            }
        }

        cl.just_var = cl.just_var.and_then(|v| match remap[v] {
            Some(Operand::Var(nv)) => Some(nv),
            _ => None,
        });
        cl.varnames.truncate(nextvar);
        cl.nvar = nextvar;
    }

    eliminated
}
