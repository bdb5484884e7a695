use dialogc::forms::*;
use dialogc::instructions::*;
use dialogc::library::{library_arity, LIBRARY_BUILTINS};
use dialogc::opcodes::Opcode;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Routes the compiler's log output through the test harness.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    });
}

pub(crate) fn story() -> Program {
    let mut prg = Program::new();

    for builtin in LIBRARY_BUILTINS {
        let mut pred = Predicate::new(format!("{builtin:?}"), library_arity(builtin));

        pred.builtin = Some(builtin);

        if builtin == BuiltinId::Fail {
            pred.flags = PredFlags::FAIL;
        }

        prg.add_predicate(pred);
    }

    prg.source_files.push("story.dg".into());
    prg
}

pub(crate) fn predicate(prg: &mut Program, name: &str, arity: usize) -> PredId {
    prg.add_predicate(Predicate::new(name, arity))
}

pub(crate) fn goal(pred: PredId, args: Vec<Term>, line: u32) -> Stmt {
    Stmt::Call(Call {
        pred,
        args,
        unbound: 0,
        multi: false,
        pos: SourcePos { file: 0, line },
    })
}

pub(crate) fn fact(prg: &mut Program, pred: PredId, params: Vec<Term>, body: Vec<Stmt>, nvar: usize) {
    prg.predicates[pred].clauses.push(Clause {
        params,
        body,
        nvar,
        varnames: (0..nvar).map(|v| format!("X{v}")).collect(),
        ..Clause::default()
    });
}

pub(crate) fn instructions(prg: &Program, pred: PredId) -> impl Iterator<Item = &Instruction> {
    prg.predicates[pred]
        .routines
        .iter()
        .flat_map(|routine| routine.instr.iter())
}

pub(crate) fn count(prg: &Program, pred: PredId, op: Opcode) -> usize {
    instructions(prg, pred).filter(|instr| instr.op == op).count()
}

pub(crate) fn entry(prg: &Program, pred: PredId) -> &Routine {
    let entries = prg.predicates[pred]
        .entries
        .unwrap_or_else(|| panic!("{} was not compiled", prg.predicates[pred].name));

    &prg.predicates[pred].routines[entries.normal]
}
