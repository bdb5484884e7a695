//! Choice-frame elimination.
//!
//! A PUSH_CHOICE whose protected code can neither fail nor create further
//! alternatives before reaching its matching POP_CHOICE (or the
//! RESTORE_CHOICE of a mark saved right before the push) is redundant: once
//! the choice point is gone, failing inside the region is the same as
//! jumping to the alternative directly.

use crate::instructions::*;
use crate::opcodes::*;

use bit_set::BitSet;

/// Position of an instruction, as (routine, index).
type Location = (RoutineId, usize);

struct ChoiceWalk<'r> {
    routines: &'r [Routine],
    restore_var: Operand,
    pop: Location,
    restore: Option<Location>,
    verdicts: Vec<Option<bool>>,
    /// Routines entered from the top by the walk.
    region: BitSet,
}

impl<'r> ChoiceWalk<'r> {
    fn new(routines: &'r [Routine], restore_var: Operand, pop: Location) -> Self {
        ChoiceWalk {
            routines,
            restore_var,
            pop,
            restore: None,
            verdicts: vec![None; routines.len()],
            region: BitSet::with_capacity(routines.len()),
        }
    }

    fn can_eliminate(&mut self, r: RoutineId, start: usize) -> bool {
        if start == 0 {
            if let Some(verdict) = self.verdicts[r] {
                return verdict;
            }

            // loops back into a routine under analysis add no new paths
            self.verdicts[r] = Some(true);
            self.region.insert(r);
        }

        let routines = self.routines;
        let mut verdict = true;

        'walk: for (i, instr) in routines[r].instr.iter().enumerate().skip(start) {
            match instr.op {
                Opcode::PopChoice => {
                    verdict = (r, i) == self.pop;
                    break;
                }
                Opcode::PushChoice
                | Opcode::SaveChoice
                | Opcode::CutChoice
                | Opcode::PushStop
                | Opcode::Allocate => {
                    verdict = false;
                    break;
                }
                op if op.is_invoke() => {
                    verdict = false;
                    break;
                }
                Opcode::Proceed => {
                    // returning from a simple invocation
                    verdict = instr.subop == 1;
                    break;
                }
                Opcode::RestoreChoice => {
                    verdict = instr.oper[0] == self.restore_var
                        && *self.restore.get_or_insert((r, i)) == (r, i);
                    break;
                }
                op if op != Opcode::Jump && (op.can_fail() || op.ends_routine()) => {
                    verdict = false;
                    break;
                }
                _ => {}
            }

            for target in instr.targets() {
                if !self.can_eliminate(target, 0) {
                    verdict = false;
                    break 'walk;
                }
            }
        }

        if start == 0 {
            self.verdicts[r] = Some(verdict);
        }

        verdict
    }
}

/// Index of the first POP_CHOICE or RESTORE_CHOICE at or after `start`,
/// which closes the region within `routine`, or its length.
fn region_end(routine: &Routine, start: usize) -> usize {
    routine.instr[start..]
        .iter()
        .position(|instr| matches!(instr.op, Opcode::PopChoice | Opcode::RestoreChoice))
        .map_or(routine.instr.len(), |n| start + n)
}

fn has_fail_exit(routine: &Routine) -> bool {
    routine.instr[..region_end(routine, 0)].iter().any(|instr| {
        (instr.op.is_branch() && instr.implicit.is_none()) || instr.oper.contains(&Operand::Fail)
    })
}

/// A failure exit may only be redirected when the routine holding it runs
/// under the choice point alone. Routines reachable from any instruction
/// outside the region, the alternative included, also run without it, and
/// there failing must still fail.
fn region_is_private(routines: &[Routine], region: &BitSet, (r, i): Location) -> bool {
    let redirected: BitSet = region.iter().filter(|&x| has_fail_exit(&routines[x])).collect();

    if redirected.is_empty() {
        return true;
    }

    let mut exposed = BitSet::with_capacity(routines.len());
    let mut pending = vec![];
    let push_end = region_end(&routines[r], i + 1);

    for (p, routine) in routines.iter().enumerate() {
        let end = region_end(routine, 0);

        for (j, instr) in routine.instr.iter().enumerate() {
            let inside = (region.contains(p) && j < end) || (p == r && j > i && j < push_end);

            if !inside {
                pending.extend(instr.targets().filter(|&t| exposed.insert(t)));
            }
        }
    }

    while let Some(x) = pending.pop() {
        let targets = routines[x].instr.iter().flat_map(Instruction::targets);
        pending.extend(targets.filter(|&t| exposed.insert(t)));
    }

    redirected.is_disjoint(&exposed)
}

/// Redirects every failure exit of the region starting at `r`/`start` to
/// `fail_lab`, stopping at the pop or restore that closes the region.
fn do_eliminate_choice(
    routines: &mut [Routine],
    r: RoutineId,
    start: usize,
    fail_lab: RoutineId,
    visited: &mut BitSet,
) {
    for i in start..routines[r].instr.len() {
        let mut follow = smallvec::SmallVec::<[RoutineId; 4]>::new();
        let instr = &mut routines[r].instr[i];

        if matches!(instr.op, Opcode::PopChoice | Opcode::RestoreChoice) {
            return;
        }

        if instr.op.is_branch() {
            match instr.implicit {
                None => instr.implicit = Some(fail_lab),
                Some(target) => {
                    if visited.insert(target) {
                        follow.push(target);
                    }
                }
            }
        }

        for oper in instr.oper.iter_mut() {
            match *oper {
                Operand::Fail => *oper = label!(fail_lab),
                Operand::Label(target) => {
                    if visited.insert(target) {
                        follow.push(target);
                    }
                }
                _ => {}
            }
        }

        for target in follow {
            do_eliminate_choice(routines, target, 0, fail_lab, visited);
        }
    }
}

fn try_eliminate_choice(routines: &mut [Routine], r: RoutineId, i: usize) -> bool {
    let push = routines[r].instr[i];

    debug_assert_eq!(push.op, Opcode::PushChoice);

    let Some(fail_lab) = push.oper[1].label() else {
        panic!("PUSH_CHOICE in R{r} has no alternative routine");
    };

    if routines[fail_lab].instr.first().map(|instr| instr.op) != Some(Opcode::PopChoice) {
        return false;
    }

    let saved_mark = i
        .checked_sub(1)
        .map(|prev| routines[r].instr[prev])
        .filter(|prev| prev.op == Opcode::SaveChoice)
        .filter(|prev| matches!(prev.oper[0], Operand::Var(_) | Operand::Temp(_)));

    let restore_var = saved_mark.map_or(Operand::None, |save| save.oper[0]);

    let mut walk = ChoiceWalk::new(routines, restore_var, (fail_lab, 0));

    if !walk.can_eliminate(r, i + 1) {
        return false;
    }

    if !region_is_private(routines, &walk.region, (r, i)) {
        return false;
    }

    let restore = walk.restore;

    do_eliminate_choice(routines, r, i + 1, fail_lab, &mut BitSet::new());

    if saved_mark.is_some() {
        routines[r].instr[i - 1].erase();
    } else {
        assert!(restore.is_none(), "RESTORE_CHOICE matched without a saved mark");
    }

    routines[r].instr[i].erase();
    routines[fail_lab].instr[0].erase();

    if let Some((rr, ri)) = restore {
        debug_assert_eq!(routines[rr].instr[ri].op, Opcode::RestoreChoice);
        routines[rr].instr[ri].erase();
    }

    tracing::debug!(target: "dialogc::passes", "eliminated choice frame at R{r}:{i}");
    true
}

/// Removes every redundant choice frame, scanning from the last routine
/// and the last instruction backwards so inner frames go first.
pub(crate) fn optimize_choice_frames(routines: &mut [Routine]) -> bool {
    let mut any = false;

    for r in (0..routines.len()).rev() {
        for i in (0..routines[r].instr.len()).rev() {
            if routines[r].instr[i].op == Opcode::PushChoice {
                any |= try_eliminate_choice(routines, r, i);
            }
        }
    }

    any
}
