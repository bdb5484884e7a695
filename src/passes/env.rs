//! Environment-frame elimination.
//!
//! An ALLOCATE of an empty frame is redundant when no path from it passes
//! through a continuation call or a second ALLOCATE before the matching
//! DEALLOCATE.

use crate::instructions::*;
use crate::opcodes::*;

struct EnvWalk<'r> {
    routines: &'r mut [Routine],
    edit: bool,
    verdicts: Vec<Option<bool>>,
}

impl EnvWalk<'_> {
    fn visit(&mut self, r: RoutineId, start: usize) -> bool {
        if start == 0 {
            if let Some(verdict) = self.verdicts[r] {
                return verdict;
            }
        }

        // stops the recursion on loops
        self.verdicts[r] = Some(false);

        if self.edit {
            // nothing clause specific is left, which lets packing merge
            // identical routines of different clauses
            self.routines[r].clause_id = None;
        }

        let mut verdict = true;

        'walk: for i in start..self.routines[r].instr.len() {
            let instr = self.routines[r].instr[i];

            match instr.op {
                Opcode::Deallocate => {
                    if self.edit {
                        self.routines[r].instr[i].erase();
                    }

                    break;
                }
                Opcode::Allocate | Opcode::InvokeOnce | Opcode::InvokeMulti => {
                    verdict = false;
                    break;
                }
                _ => {}
            }

            for target in instr.targets() {
                if !self.visit(target, 0) {
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

fn try_eliminate_env(routines: &mut [Routine], r: RoutineId, i: usize) -> bool {
    if routines[r].instr[i].oper[0] != num!(0) {
        return false;
    }

    let verdicts = vec![None; routines.len()];
    let mut walk = EnvWalk { routines, edit: false, verdicts };

    if !walk.visit(r, i + 1) {
        return false;
    }

    walk.routines[r].instr[i].erase();
    walk.edit = true;
    walk.verdicts.fill(None);
    walk.visit(r, i + 1);

    tracing::debug!(target: "dialogc::passes", "eliminated environment frame at R{r}:{i}");
    true
}

pub(crate) fn optimize_env_frames(routines: &mut [Routine], enabled: bool) -> bool {
    if !enabled {
        return false;
    }

    let mut any = false;

    for r in (0..routines.len()).rev() {
        for i in (0..routines[r].instr.len()).rev() {
            if routines[r].instr[i].op == Opcode::Allocate {
                any |= try_eliminate_env(routines, r, i);
            }
        }
    }

    any
}
