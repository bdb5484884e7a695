use crate::opcodes::*;

use std::fmt;

/// Dense index of a routine inside the routine array of one predicate.
pub type RoutineId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Operand {
    #[default]
    None,
    // runtime values
    Integer(u32),
    Object(usize),
    Dict(usize),
    Nil,
    Raw(u32),
    // plain numbers: counts, line numbers, map indices
    Num(u32),
    // storage
    Arg(usize),
    Temp(usize),
    Var(usize),
    // control and references
    Label(RoutineId),
    Fail,
    File(usize),
    Pred(usize),
    GFlag(usize),
    GVar(usize),
    OFlag(usize),
    OVar(usize),
    Box(usize),
    Word(usize),
}

impl Operand {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }

    #[inline]
    pub fn label(&self) -> Option<RoutineId> {
        match self {
            &Operand::Label(r) => Some(r),
            _ => None,
        }
    }

    /// Constants usable as an index key.
    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Operand::Integer(_) | Operand::Object(_) | Operand::Dict(_) | Operand::Nil | Operand::Raw(_)
        )
    }
}

/// Sub-op of TRACEPOINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TraceKind {
    Enter = 0,
    Query = 1,
    MultiQuery = 2,
    QueryDone = 3,
    Line = 4,
    DetermineObject = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub op: Opcode,
    pub subop: u8,
    pub oper: [Operand; 3],
    /// Branch target of a conditional branch; `None` means failure.
    pub implicit: Option<RoutineId>,
}

impl Instruction {
    #[inline]
    pub fn new(op: Opcode) -> Self {
        Instruction {
            op,
            subop: 0,
            oper: [Operand::None; 3],
            implicit: None,
        }
    }

    #[inline]
    pub fn jump(target: Operand) -> Self {
        let mut instr = Instruction::new(Opcode::Jump);
        instr.oper[0] = target;
        instr
    }

    #[inline]
    pub fn set_subop(&mut self, subop: u8) -> &mut Self {
        self.subop = subop;
        self
    }

    #[inline]
    pub fn set_implicit(&mut self, target: RoutineId) -> &mut Self {
        self.implicit = Some(target);
        self
    }

    /// Turns the instruction into the erasure marker left behind by the
    /// optimisation passes.
    #[inline]
    pub fn erase(&mut self) {
        *self = Instruction::new(Opcode::Nop);
    }

    /// The implicit branch target followed by every label operand.
    pub fn targets(&self) -> impl Iterator<Item = RoutineId> + '_ {
        let implicit = if self.op.is_branch() {
            self.implicit
        } else {
            None
        };

        implicit
            .into_iter()
            .chain(self.oper.iter().filter_map(Operand::label))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.op.has_subop() {
            write!(f, "{} {}", self.op, self.subop)?;
        } else {
            write!(f, "{}", self.op)?;
        }

        for oper in self.oper.iter().take_while(|oper| !oper.is_none()) {
            write!(f, " {:?}", oper)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routine {
    pub instr: Vec<Instruction>,
    /// Clause the routine was generated for, `None` for shared code.
    pub clause_id: Option<usize>,
    pub reftrack: Option<RoutineId>,
    pub diverted: Option<RoutineId>,
}

impl Routine {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instr.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instr.len()
    }
}

/// The call entry of a predicate, plus the alternate entry that reads the
/// initial value of an assignable predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoints {
    pub normal: RoutineId,
    pub initial_value: Option<RoutineId>,
}

impl EntryPoints {
    #[inline]
    pub fn is_entry(&self, r: RoutineId) -> bool {
        r == self.normal || Some(r) == self.initial_value
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = RoutineId> {
        std::iter::once(self.normal).chain(self.initial_value)
    }
}
