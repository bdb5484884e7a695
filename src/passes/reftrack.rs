//! Reference tracking.
//!
//! Partitions the routines into groups. A group leader is an entry point or
//! any routine whose address is taken by something other than a jump or an
//! index dispatch (a continuation, a choice alternative, a stop handler).
//! Every other routine belongs to the one group that reaches it through
//! jumps, branches and dispatches; a routine reached from two groups becomes
//! a leader itself. Routines that no group reaches are emptied.

use crate::instructions::*;
use crate::opcodes::*;

/// The routine reached from `instr` without its address escaping.
fn local_target(instr: &Instruction) -> Option<RoutineId> {
    if instr.op.is_branch() {
        instr.implicit
    } else {
        match instr.op {
            Opcode::CheckIndex | Opcode::CheckWordmap => instr.oper[1].label(),
            Opcode::Jump => instr.oper[0].label(),
            _ => None,
        }
    }
}

fn try_reftrack_from(routines: &mut [Routine], r: RoutineId, group: RoutineId, force: bool) -> bool {
    match routines[r].reftrack {
        None => routines[r].reftrack = Some(group),
        Some(owner) if owner == r || owner == group => {
            if !force {
                return true;
            }
        }
        Some(_) => {
            routines[r].reftrack = Some(r);
            return false;
        }
    }

    for i in 0..routines[r].instr.len() {
        let instr = routines[r].instr[i];

        if let Some(target) = local_target(&instr) {
            if !try_reftrack_from(routines, target, group, false) {
                return false;
            }
        }
    }

    true
}

pub(crate) fn track_refs(routines: &mut [Routine], entries: EntryPoints) {
    for routine in routines.iter_mut() {
        routine.reftrack = None;
    }

    for entry in entries.iter() {
        routines[entry].reftrack = Some(entry);
    }

    for r in 0..routines.len() {
        for i in 0..routines[r].instr.len() {
            let instr = routines[r].instr[i];

            if !matches!(instr.op, Opcode::CheckIndex | Opcode::CheckWordmap | Opcode::Jump) {
                for target in instr.oper.iter().filter_map(Operand::label) {
                    routines[target].reftrack = Some(target);
                }
            }
        }
    }

    'restart: loop {
        for r in 0..routines.len() {
            if routines[r].reftrack == Some(r) && !try_reftrack_from(routines, r, r, true) {
                // r's walk promoted a shared routine; regroup from scratch
                for (i, routine) in routines.iter_mut().enumerate() {
                    if routine.reftrack != Some(i) {
                        routine.reftrack = None;
                    }
                }

                continue 'restart;
            }
        }

        break;
    }

    let mut dead = 0;

    for routine in routines.iter_mut() {
        if routine.reftrack.is_none() && !routine.instr.is_empty() {
            routine.instr.clear();
            dead += 1;
        }
    }

    tracing::trace!(target: "dialogc::passes", "reference tracking emptied {dead} routine(s)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn entry(normal: RoutineId) -> EntryPoints {
        EntryPoints {
            normal,
            initial_value: None,
        }
    }

    #[test]
    fn jumps_and_branches_join_the_group() {
        let mut routines = vec![
            routine(
                None,
                vec![
                    branch(Opcode::IfNil, Some(1), &[arg!(0)]),
                    ins(Opcode::Jump, &[label!(2)]),
                ],
            ),
            routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])]),
            routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])]),
            routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])]),
        ];

        track_refs(&mut routines, entry(0));

        let groups: Vec<_> = routines.iter().map(|r| r.reftrack).collect();
        assert_eq!(groups, vec![Some(0), Some(0), Some(0), None]);
        assert!(routines[3].is_empty());
    }

    #[test]
    fn escaping_labels_lead_their_own_group() {
        let mut routines = vec![
            routine(
                None,
                vec![
                    ins(Opcode::PushChoice, &[num!(0), label!(1)]),
                    ins(Opcode::Jump, &[label!(2)]),
                ],
            ),
            routine(
                None,
                vec![ins(Opcode::PopChoice, &[num!(0)]), ins(Opcode::Jump, &[Operand::Fail])],
            ),
            routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])]),
        ];

        track_refs(&mut routines, entry(0));

        let groups: Vec<_> = routines.iter().map(|r| r.reftrack).collect();
        assert_eq!(groups, vec![Some(0), Some(1), Some(0)]);
    }

    #[test]
    fn shared_routines_are_promoted() {
        let mut routines = vec![
            routine(
                None,
                vec![
                    branch(Opcode::IfNil, Some(2), &[arg!(0)]),
                    ins(Opcode::SetCont, &[label!(1)]),
                    ins(Opcode::InvokeOnce, &[Operand::Pred(0)]),
                ],
            ),
            routine(None, vec![ins(Opcode::Jump, &[label!(2)])]),
            routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])]),
        ];

        track_refs(&mut routines, entry(0));

        let groups: Vec<_> = routines.iter().map(|r| r.reftrack).collect();
        assert_eq!(groups, vec![Some(0), Some(1), Some(2)]);
        assert!(routines.iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn initial_value_entry_is_a_root() {
        let mut routines = vec![
            routine(None, vec![ins(Opcode::Jump, &[Operand::Fail])]),
            routine(None, vec![ins(Opcode::Jump, &[label!(0)])]),
        ];

        track_refs(
            &mut routines,
            EntryPoints {
                normal: 1,
                initial_value: Some(0),
            },
        );

        assert_eq!(routines[0].reftrack, Some(0));
        assert_eq!(routines[1].reftrack, Some(1));
    }
}
