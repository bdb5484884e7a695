//! Hand-written routines: library builtins that are not compiled from
//! clauses, and the runtime-storage front ends of dynamic predicates.

use crate::builder::*;
use crate::forms::*;
use crate::instructions::*;

/// The builtins compiled by [`compile_builtins`](crate::compile::Compiler::compile_builtins),
/// in compilation order.
pub const LIBRARY_BUILTINS: [BuiltinId; 16] = [
    BuiltinId::IsOneOf,
    BuiltinId::Split,
    BuiltinId::Repeat,
    BuiltinId::GetInput,
    BuiltinId::GetRawInput,
    BuiltinId::GetKey,
    BuiltinId::Object,
    BuiltinId::Breakpoint,
    BuiltinId::BreakpointAgain,
    BuiltinId::BreakGetKey,
    BuiltinId::BreakFail,
    BuiltinId::Save,
    BuiltinId::SaveUndo,
    BuiltinId::Restore,
    BuiltinId::Undo,
    BuiltinId::Fail,
];

/// Number of parameters the front end declares for a library builtin.
pub fn library_arity(builtin: BuiltinId) -> usize {
    match builtin {
        BuiltinId::IsOneOf => 2,
        BuiltinId::Split => 4,
        BuiltinId::GetInput | BuiltinId::GetRawInput | BuiltinId::GetKey => 1,
        BuiltinId::Object | BuiltinId::BreakGetKey => 1,
        _ => 0,
    }
}

fn object_builtin(prg: &Program) -> Operand {
    let pred = prg
        .builtin(BuiltinId::Object)
        .unwrap_or_else(|| panic!("program lacks the (object $) builtin"));

    Operand::Pred(pred)
}

/// Emits the body of a library builtin, starting in the open entry routine.
pub(crate) fn comp_builtin_template(b: &mut RoutineBuilder, prg: &Program, builtin: BuiltinId) {
    match builtin {
        BuiltinId::IsOneOf => {
            // A0 value, A1 remaining candidates
            let lab = b.new_routine();

            emit!(b, Allocate, num!(0), num!(2)).set_subop(1);
            emit!(b, GetPairRr, arg!(1), temp!(0), arg!(1));
            emit!(b, PushChoice, num!(2), label!(lab));
            emit!(b, Unify, arg!(0), temp!(0));
            emit!(b, Deallocate).set_subop(1);
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);

            b.begin_routine(lab);
            emit!(b, PopChoice, num!(2));
            emit!(b, GetPairRr, arg!(1), temp!(0), arg!(1));
            emit!(b, PushChoice, num!(2), label!(lab));
            emit!(b, Unify, arg!(0), temp!(0));
            emit!(b, Deallocate).set_subop(1);
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);
        }
        BuiltinId::Split => comp_split_template(b),
        BuiltinId::Repeat => {
            let lab = b.new_routine();

            emit!(b, PushChoice, num!(0), label!(lab));
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);

            b.begin_routine(lab);
            emit!(b, PopChoice, num!(0));
            emit!(b, PushChoice, num!(0), label!(lab));
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);
        }
        // not inlined: the debugger may inject queries or suspend here
        BuiltinId::GetInput => {
            emit!(b, GetInput);
            b.end_routine(None);
        }
        BuiltinId::GetRawInput => {
            emit!(b, GetRawInput);
            b.end_routine(None);
        }
        BuiltinId::GetKey => {
            emit!(b, GetKey);
            b.end_routine(None);
        }
        BuiltinId::BreakGetKey => {
            let lab = b.new_routine();

            emit!(b, Allocate, num!(1), num!(1)).set_subop(1);
            emit!(b, Assign, var!(0), arg!(0));
            emit!(b, SetCont, label!(lab));
            emit!(b, Breakpoint).set_subop(0);
            b.end_routine(None);

            b.begin_routine(lab);
            emit!(b, Assign, arg!(0), var!(0));
            emit!(b, Deallocate).set_subop(0);
            emit!(b, GetKey);
            b.end_routine(None);
        }
        BuiltinId::Object => comp_object_template(b, prg),
        BuiltinId::Breakpoint | BuiltinId::BreakpointAgain => {
            emit!(b, Breakpoint).set_subop((builtin == BuiltinId::BreakpointAgain) as u8);
            b.end_routine(None);
        }
        BuiltinId::BreakFail => {
            let lab = b.new_routine();

            emit!(b, Allocate, num!(0), num!(0)).set_subop(1);
            emit!(b, SetCont, label!(lab));
            emit!(b, Tracepoint, Operand::File(0), num!(0)).set_subop(TraceKind::Line as u8);
            emit!(b, Breakpoint).set_subop(0);
            b.end_routine(None);

            b.begin_routine(lab);
            emit!(b, Jump, Operand::Fail);
            b.end_routine(None);
        }
        BuiltinId::Save => {
            emit!(b, Save);
            b.end_routine(None);
        }
        BuiltinId::SaveUndo => {
            emit!(b, SaveUndo);
            b.end_routine(None);
        }
        BuiltinId::Restore => {
            emit!(b, Restore);
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);
        }
        BuiltinId::Undo => {
            emit!(b, Undo);
            emit!(b, Proceed).set_subop(0);
            b.end_routine(None);
        }
        BuiltinId::Fail => {
            emit!(b, Jump, Operand::Fail);
            b.end_routine(None);
        }
        other => panic!("{other:?} has no library template"),
    }
}

/// `(split $ by $ into $ and $)` with a runtime keyword list.
fn comp_split_template(b: &mut RoutineBuilder) {
    // V0 input list, V1 keyword list, V2 left part, V3 right part,
    // V4 rest of the input, V5 input from the current element on
    let labnext = b.new_routine();
    let labloop = b.new_routine();
    let labcheck = b.new_routine();
    let labmatch = b.new_routine();

    emit!(b, IfBound, arg!(0)).set_subop(1);
    emit!(b, Allocate, num!(6), num!(4)).set_subop(1);

    for i in 0..4 {
        emit!(b, Assign, var!(i), arg!(i));
    }

    emit!(b, Assign, var!(4), arg!(0));
    emit!(b, IfBound, arg!(1)).set_implicit(labloop);
    emit!(b, Jump, Operand::Fail);
    b.end_routine(None);

    b.begin_routine(labnext);
    emit!(b, PopChoice, num!(0));
    emit!(b, Jump, label!(labloop));
    b.end_routine(None);

    b.begin_routine(labloop);
    emit!(b, Assign, var!(5), var!(4));
    emit!(b, GetPairRr, var!(4), temp!(1), var!(4));
    emit!(b, Assign, temp!(0), var!(1));
    emit!(b, Jump, label!(labcheck));
    b.end_routine(None);

    b.begin_routine(labcheck);
    emit!(b, IfNil, temp!(0)).set_implicit(labloop);
    emit!(b, GetPairRr, temp!(0), temp!(2), temp!(0));
    emit!(b, IfUnify, temp!(1), temp!(2)).set_implicit(labmatch);
    emit!(b, Jump, label!(labcheck));
    b.end_routine(None);

    b.begin_routine(labmatch);
    emit!(b, PushChoice, num!(0), label!(labnext));
    emit!(b, Unify, var!(4), var!(3));
    emit!(b, SplitList, var!(0), var!(5), var!(2));
    emit!(b, Deallocate).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);
}

/// Enumerates the world objects when the argument is unbound.
fn comp_object_template(b: &mut RoutineBuilder, prg: &Program) {
    if prg.objects.is_empty() {
        emit!(b, Jump, Operand::Fail);
        b.end_routine(None);
        return;
    }

    let labloop = b.new_routine();
    let lab = b.new_routine();

    emit!(b, IfObj, arg!(0)).set_implicit(lab);
    emit!(b, IfBound, arg!(0));
    emit!(b, NextObjPush, Operand::Object(0), label!(labloop));
    emit!(b, Unify, arg!(0), Operand::Object(0));
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(labloop);
    emit!(b, PopChoice, num!(2));
    emit!(b, Assign, temp!(0), arg!(1));
    emit!(b, NextObjPush, temp!(0), label!(labloop));
    emit!(b, Unify, arg!(0), temp!(0));
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);
}

fn dyn_id(pred: &Predicate) -> usize {
    pred.dyn_id
        .unwrap_or_else(|| panic!("dynamic predicate {} has no storage id", pred.name))
}

/// Per-object flag: enumerate the objects that have it when the argument is
/// unbound, test it otherwise. A fixed flag enumerates through the clauses
/// at `initial`.
pub(crate) fn comp_dyn_list(b: &mut RoutineBuilder, pred: &Predicate, initial: RoutineId) {
    let oflag = Operand::OFlag(dyn_id(pred));
    let lab1 = b.new_routine();
    let lab2 = b.new_routine();

    emit!(b, IfBound, arg!(0)).set_implicit(lab1);

    if pred.flags.contains(PredFlags::FIXED_FLAG) {
        emit!(b, Jump, label!(initial));
    } else {
        emit!(b, FirstOflag, oflag, temp!(0));
        emit!(b, NextOflagPush, oflag, temp!(0), label!(lab2));
        emit!(b, Unify, arg!(0), temp!(0));
        emit!(b, Proceed).set_subop(0);
    }

    b.end_routine(None);

    b.begin_routine(lab1);
    emit!(b, IfOflag, oflag, arg!(0)).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab2);
    emit!(b, PopChoice, num!(2));
    emit!(b, Assign, temp!(0), arg!(1));
    emit!(b, NextOflagPush, oflag, temp!(0), label!(lab2));
    emit!(b, Unify, arg!(0), temp!(0));
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);
}

/// Per-object variable: with an unbound object, enumerate the objects and
/// read the variable of each.
pub(crate) fn comp_dyn_var(b: &mut RoutineBuilder, prg: &Program, pred: &Predicate) {
    let ovar = Operand::OVar(dyn_id(pred));
    let lab1 = b.new_routine();
    let lab2 = b.new_routine();

    emit!(b, IfBound, arg!(0)).set_implicit(lab1);
    emit!(b, Allocate, num!(2), num!(2)).set_subop(1);
    emit!(b, Assign, var!(0), arg!(0));
    emit!(b, Assign, var!(1), arg!(1));
    emit!(b, SetCont, label!(lab2));
    emit!(b, InvokeMulti, object_builtin(prg));
    b.end_routine(None);

    b.begin_routine(lab2);
    emit!(b, GetOvarV, ovar, var!(0), var!(1));
    emit!(b, Deallocate).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab1);
    emit!(b, GetOvarV, ovar, arg!(0), arg!(1));
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);
}

/// `(has parent $ $)`: read the parent of a bound child, enumerate the
/// children of a bound parent, or enumerate every object.
pub(crate) fn comp_has_parent(b: &mut RoutineBuilder, prg: &Program, pred: &Predicate) {
    let ovar = Operand::OVar(dyn_id(pred));
    let lab1 = b.new_routine();
    let lab2 = b.new_routine();
    let lab3 = b.new_routine();
    let lab4 = b.new_routine();

    emit!(b, IfBound, arg!(0)).set_implicit(lab1);
    emit!(b, IfBound, arg!(1)).set_implicit(lab3);

    if prg.objects.is_empty() {
        emit!(b, Jump, Operand::Fail);
    } else {
        emit!(b, Allocate, num!(2), num!(2)).set_subop(1);
        emit!(b, Assign, var!(0), arg!(0));
        emit!(b, Assign, var!(1), arg!(1));
        emit!(b, SetCont, label!(lab4));
        emit!(b, InvokeMulti, object_builtin(prg));
    }

    b.end_routine(None);

    b.begin_routine(lab4);
    emit!(b, GetOvarV, ovar, var!(0), var!(1));
    emit!(b, Deallocate).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab3);
    emit!(b, Allocate, num!(0), num!(2)).set_subop(1);
    emit!(b, FirstChild, arg!(1), temp!(0));
    emit!(b, NextChildPush, temp!(0), label!(lab2));
    emit!(b, Unify, arg!(0), temp!(0));
    emit!(b, Deallocate).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab1);
    emit!(b, GetOvarV, ovar, arg!(0), arg!(1));
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);

    b.begin_routine(lab2);
    emit!(b, PopChoice, num!(2));
    emit!(b, Assign, temp!(0), arg!(1));
    emit!(b, NextChildPush, temp!(0), label!(lab2));
    emit!(b, Unify, arg!(0), temp!(0));
    emit!(b, Deallocate).set_subop(1);
    emit!(b, Proceed).set_subop(0);
    b.end_routine(None);
}
