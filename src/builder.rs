//! Append-only construction of routines.

use crate::instructions::*;
use crate::opcodes::*;

/// Scratch state shared by every predicate compiled through one
/// [`Compiler`](crate::compile::Compiler). Reset before each predicate.
#[derive(Debug, Default)]
pub struct RoutineBuilder {
    routines: Vec<Routine>,
    buf: Vec<Instruction>,
    current: Option<RoutineId>,
}

impl RoutineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.routines.clear();
        self.buf.clear();
        self.current = None;
    }

    /// Reserves `n` contiguous routine ids and returns the first.
    pub fn new_routine_block(&mut self, n: usize) -> RoutineId {
        let first = self.routines.len();
        self.routines.resize_with(first + n, Routine::default);
        first
    }

    #[inline]
    pub fn new_routine(&mut self) -> RoutineId {
        self.new_routine_block(1)
    }

    /// Makes `r` the append target. A routine that was opened but never
    /// received an instruction is abandoned.
    pub fn begin_routine(&mut self, r: RoutineId) {
        assert!(
            self.buf.is_empty(),
            "R{r} opened while R{:?} has pending instructions",
            self.current
        );
        assert!(r < self.routines.len(), "R{r} was never allocated");

        self.current = Some(r);
    }

    pub fn append(&mut self, op: Opcode) -> &mut Instruction {
        assert!(self.current.is_some(), "{op} appended with no open routine");

        if let Some(last) = self.buf.last() {
            assert!(
                !last.op.ends_routine(),
                "{op} appended after terminator {}",
                last.op
            );
        }

        self.buf.push(Instruction::new(op));
        let last = self.buf.len() - 1;
        &mut self.buf[last]
    }

    /// The most recent instruction of the open routine, if any.
    #[inline]
    pub fn last_mut(&mut self) -> Option<&mut Instruction> {
        self.buf.last_mut()
    }

    pub fn end_routine(&mut self, clause_id: Option<usize>) {
        let Some(r) = self.current.take() else {
            panic!("end_routine called with no open routine");
        };

        match self.buf.last() {
            Some(last) if last.op.ends_routine() => {}
            Some(last) => panic!("R{r} ends with non-terminator {}", last.op),
            None => panic!("R{r} ended without instructions"),
        }

        let routine = &mut self.routines[r];

        routine.instr = std::mem::take(&mut self.buf);
        routine.clause_id = clause_id;
        routine.diverted = Some(r);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// Hands the finished routines over to the caller. Any routine still
    /// open at this point received no instructions and is left empty.
    pub fn take_routines(&mut self) -> Vec<Routine> {
        debug_assert!(self.buf.is_empty());

        self.current = None;
        std::mem::take(&mut self.routines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous() {
        let mut b = RoutineBuilder::new();

        assert_eq!(b.new_routine(), 0);
        assert_eq!(b.new_routine_block(3), 1);
        assert_eq!(b.new_routine(), 4);
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn end_routine_stores_instructions() {
        let mut b = RoutineBuilder::new();
        let r = b.new_routine();

        b.begin_routine(r);
        emit!(b, Assign, temp!(0), arg!(1));
        emit!(b, Jump, Operand::Fail);
        b.end_routine(Some(2));

        let routines = b.take_routines();

        assert_eq!(routines[r].len(), 2);
        assert_eq!(routines[r].clause_id, Some(2));
        assert_eq!(routines[r].diverted, Some(r));
        assert_eq!(routines[r].instr[0].oper[1], Operand::Arg(1));
    }

    #[test]
    #[should_panic(expected = "appended after terminator")]
    fn nothing_follows_a_terminator() {
        let mut b = RoutineBuilder::new();
        let r = b.new_routine();

        b.begin_routine(r);
        emit!(b, Jump, Operand::Fail);
        emit!(b, Nop);
    }

    #[test]
    #[should_panic(expected = "non-terminator")]
    fn routines_end_with_terminators() {
        let mut b = RoutineBuilder::new();
        let r = b.new_routine();

        b.begin_routine(r);
        emit!(b, MakeVar, temp!(0));
        b.end_routine(None);
    }

    #[test]
    #[should_panic(expected = "pending instructions")]
    fn one_open_routine_at_a_time() {
        let mut b = RoutineBuilder::new();
        let r = b.new_routine_block(2);

        b.begin_routine(r);
        emit!(b, MakeVar, temp!(0));
        b.begin_routine(r + 1);
    }
}
