use crate::forms::*;
use crate::instructions::*;
use crate::library::{library_arity, LIBRARY_BUILTINS};
use crate::opcodes::*;

pub(crate) fn routine(clause_id: Option<usize>, instr: Vec<Instruction>) -> Routine {
    Routine {
        instr,
        clause_id,
        reftrack: None,
        diverted: None,
    }
}

pub(crate) fn ins(op: Opcode, opers: &[Operand]) -> Instruction {
    let mut instr = Instruction::new(op);
    instr.oper[..opers.len()].copy_from_slice(opers);
    instr
}

pub(crate) fn ins_sub(op: Opcode, subop: u8, opers: &[Operand]) -> Instruction {
    let mut instr = ins(op, opers);
    instr.subop = subop;
    instr
}

/// A conditional branch to `implicit`, or to failure.
pub(crate) fn branch(op: Opcode, implicit: Option<RoutineId>, opers: &[Operand]) -> Instruction {
    debug_assert!(op.is_branch());

    let mut instr = ins(op, opers);
    instr.implicit = implicit;
    instr
}

pub(crate) fn call(pred: PredId, args: Vec<Term>) -> Call {
    Call {
        pred,
        args,
        unbound: 0,
        multi: false,
        pos: SourcePos::default(),
    }
}

pub(crate) fn goal(pred: PredId, args: Vec<Term>) -> Stmt {
    Stmt::Call(call(pred, args))
}

pub(crate) fn clause(params: Vec<Term>, body: Vec<Stmt>, nvar: usize) -> Clause {
    Clause {
        params,
        body,
        nvar,
        varnames: (0..nvar).map(|v| format!("V{v}")).collect(),
        ..Clause::default()
    }
}

pub(crate) fn user_pred(name: &str, arity: usize) -> Predicate {
    Predicate::new(name, arity)
}

pub(crate) fn builtin_pred(builtin: BuiltinId, name: &str, arity: usize) -> Predicate {
    let mut pred = Predicate::new(name, arity);
    pred.builtin = Some(builtin);
    pred
}

/// A program declaring the builtins the code generator and the library
/// templates refer to.
pub(crate) fn with_builtins() -> Program {
    let mut prg = Program::new();

    for builtin in LIBRARY_BUILTINS {
        let mut pred = builtin_pred(builtin, &format!("{builtin:?}"), library_arity(builtin));

        if builtin == BuiltinId::Fail {
            pred.flags = PredFlags::FAIL;
        }

        prg.add_predicate(pred);
    }

    let mut has_parent = builtin_pred(BuiltinId::HasParent, "$ has parent $", 2);
    has_parent.flags = PredFlags::DYNAMIC;
    has_parent.dyn_id = Some(0);
    let has_parent = prg.add_predicate(has_parent);
    prg.object_vars.push(has_parent);

    prg
}
