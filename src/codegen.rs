use crate::builder::*;
use crate::compile_errors::*;
use crate::config::*;
use crate::forms::*;
use crate::indexing::*;
use crate::instructions::*;
use crate::opcodes::*;

/// Above this many objects a word-map entry is not enumerated; the lookup
/// gives up on narrowing and accepts every object.
const MAXWORDMAP: usize = 255;

/// Where control goes once a body has been compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tail {
    /// Fall through into whatever code follows.
    None,
    /// Return to the caller.
    Cont,
    /// Jump to a join routine.
    Jump(RoutineId),
}

#[derive(Debug, Clone, Copy)]
struct CalleeInfo {
    builtin: Option<BuiltinId>,
    flags: PredFlags,
    arity: usize,
    dyn_id: Option<usize>,
    dyn_var_id: Option<usize>,
}

impl CalleeInfo {
    #[inline]
    fn is_dynamic(&self) -> bool {
        self.flags.contains(PredFlags::DYNAMIC)
    }

    fn dyn_id(&self) -> usize {
        self.dyn_id
            .unwrap_or_else(|| panic!("dynamic predicate {:?} has no storage id", self.builtin))
    }

    fn dyn_var_id(&self) -> usize {
        self.dyn_var_id
            .unwrap_or_else(|| panic!("global variable {:?} has no storage id", self.builtin))
    }
}

enum Negated<'b> {
    Call(&'b Call),
    Block(&'b [Stmt]),
}

/// Translates the clauses of one predicate into routines.
///
/// The clauses are moved out of the predicate for the duration, so the
/// metadata of every callee (the predicate itself included) stays readable
/// through `prg`.
pub(crate) struct CodeGenerator<'a> {
    pub(crate) prg: &'a mut Program,
    pub(crate) diag: &'a mut dyn Diagnostics,
    pub(crate) settings: CompilerSettings,
    pub(crate) pred_id: PredId,
    pub(crate) clauses: &'a [Clause],
    pub(crate) b: &'a mut RoutineBuilder,
    pub(crate) next_temp: Vec<usize>,
    cur_clause: Option<usize>,
    seen: Vec<bool>,
    ntemp: usize,
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(
        prg: &'a mut Program,
        diag: &'a mut dyn Diagnostics,
        settings: CompilerSettings,
        pred_id: PredId,
        clauses: &'a [Clause],
        b: &'a mut RoutineBuilder,
    ) -> Self {
        let next_temp = clauses.iter().map(|cl| cl.next_temp).collect();

        CodeGenerator {
            prg,
            diag,
            settings,
            pred_id,
            clauses,
            b,
            next_temp,
            cur_clause: None,
            seen: vec![],
            ntemp: 0,
        }
    }

    #[inline]
    pub(crate) fn pred(&self) -> &Predicate {
        &self.prg.predicates[self.pred_id]
    }

    fn callee(&self, call: &Call) -> CalleeInfo {
        let pred = &self.prg.predicates[call.pred];

        CalleeInfo {
            builtin: pred.builtin,
            flags: pred.flags,
            arity: pred.arity,
            dyn_id: pred.dyn_id,
            dyn_var_id: pred.dyn_var_id,
        }
    }

    #[inline]
    fn end_routine(&mut self) {
        self.b.end_routine(self.cur_clause);
    }

    #[inline]
    fn new_temp(&mut self) -> Operand {
        self.ntemp += 1;
        temp!(self.ntemp - 1)
    }

    fn report(&mut self, pos: SourcePos, err: CompilationError) {
        self.diag.report(Level::Error, pos, err);
        self.prg.error_flag = true;
    }

    fn simple(term: &Term) -> Operand {
        term.simple_value()
            .unwrap_or_else(|| panic!("{term:?} is not an atomic constant"))
    }

    fn ensure_seen(&mut self, rest: &[Stmt]) {
        let mut vars = vec![];

        for stmt in rest {
            stmt.visit_vars(&mut |v| vars.push(v));
        }

        for v in vars {
            if !self.seen[v] {
                emit!(self.b, MakeVar, var!(v));
                self.seen[v] = true;
            }
        }
    }

    /// Operand for one half of a pair under construction, and whether the
    /// pair instruction has to create it.
    fn pair_component(&mut self, term: &Term) -> (Operand, bool) {
        match term {
            &Term::Var(v) => {
                let fresh = !self.seen[v];
                self.seen[v] = true;
                (var!(v), fresh)
            }
            Term::Anon => (self.new_temp(), true),
            _ => (self.comp_value(term), false),
        }
    }

    fn comp_value(&mut self, term: &Term) -> Operand {
        match term {
            &Term::Var(v) => {
                if !self.seen[v] {
                    emit!(self.b, MakeVar, var!(v));
                    self.seen[v] = true;
                }

                var!(v)
            }
            Term::Anon => {
                let t = self.new_temp();
                emit!(self.b, MakeVar, t);
                t
            }
            Term::Pair(head, tail) => {
                let (head, fresh_head) = self.pair_component(head);
                let (tail, fresh_tail) = self.pair_component(tail);
                let dest = self.new_temp();

                emit!(@dyn self.b, Opcode::make_pair(fresh_head, fresh_tail), dest, head, tail);
                dest
            }
            _ => Self::simple(term),
        }
    }

    fn comp_value_into(&mut self, term: &Term, dest: Operand) {
        match term {
            &Term::Var(v) => {
                if !self.seen[v] {
                    emit!(self.b, MakeVar, dest);
                    emit!(self.b, Assign, var!(v), dest);
                    self.seen[v] = true;
                } else {
                    emit!(self.b, Assign, dest, var!(v));
                }
            }
            Term::Anon => {
                emit!(self.b, MakeVar, dest);
            }
            Term::Pair(head, tail) => {
                let (head, fresh_head) = self.pair_component(head);

                // a list spine is built back to front in the destination
                let (tail, fresh_tail) = match (&**tail, dest) {
                    (Term::Pair(..), Operand::Temp(_) | Operand::Arg(_)) => {
                        self.comp_value_into(tail, dest);
                        (dest, false)
                    }
                    _ => self.pair_component(tail),
                };

                emit!(@dyn self.b, Opcode::make_pair(fresh_head, fresh_tail), dest, head, tail);
            }
            _ => {
                emit!(self.b, Assign, dest, Self::simple(term));
            }
        }
    }

    fn comp_param(&mut self, term: &Term, src: Operand, all_seen_are_bound: bool) {
        match term {
            &Term::Var(v) => {
                if self.seen[v] {
                    if all_seen_are_bound {
                        emit!(self.b, IfUnify, src, var!(v)).set_subop(1);
                    } else {
                        emit!(self.b, Unify, src, var!(v));
                    }
                } else {
                    emit!(self.b, Assign, var!(v), src);
                    self.seen[v] = true;
                }
            }
            Term::Anon => {}
            Term::Pair(head, tail) => {
                let mut sub = [(Operand::None, false); 2];

                for (i, child) in [&**head, &**tail].into_iter().enumerate() {
                    sub[i] = match child {
                        Term::Pair(..) | Term::Anon => (self.new_temp(), true),
                        &Term::Var(v) => {
                            let fresh = !self.seen[v];
                            self.seen[v] = true;
                            (var!(v), fresh)
                        }
                        _ => (Self::simple(child), false),
                    };
                }

                emit!(@dyn self.b, Opcode::get_pair(sub[0].1, sub[1].1), src, sub[0].0, sub[1].0);

                for (i, child) in [&**head, &**tail].into_iter().enumerate() {
                    if let Term::Pair(..) = child {
                        self.comp_param(child, sub[i].0, all_seen_are_bound);
                    }
                }
            }
            _ => {
                if all_seen_are_bound {
                    emit!(self.b, IfMatch, src, Self::simple(term)).set_subop(1);
                } else {
                    emit!(self.b, Unify, src, Self::simple(term));
                }
            }
        }
    }

    fn tracepoint(&mut self, kind: TraceKind, pos: SourcePos) -> &mut Instruction {
        emit!(self.b, Tracepoint, Operand::File(pos.file), num!(pos.line)).set_subop(kind as u8)
    }

    fn post_rule_trace(&mut self, call: &Call, callee: &CalleeInfo) {
        if self.settings.trace
            && !matches!(
                callee.builtin,
                Some(BuiltinId::Line | BuiltinId::Par | BuiltinId::InjectedQuery)
            )
        {
            self.tracepoint(TraceKind::QueryDone, call.pos).oper[2] = Operand::Pred(call.pred);
        }
    }

    /// Argument `i` as an operand. With tracing on, the arguments have
    /// already been loaded into the argument registers.
    fn arg_value(&mut self, call: &Call, i: usize, do_trace: bool) -> Operand {
        if do_trace {
            arg!(i)
        } else {
            self.comp_value(&call.args[i])
        }
    }

    /// Closes the routine after an instruction that never falls through.
    fn end_dead(&mut self, tail: Tail) -> bool {
        self.end_routine();

        if tail == Tail::None {
            // the rest of the body still needs somewhere to go
            let r = self.b.new_routine();
            self.b.begin_routine(r);
        }

        true
    }

    /// Returns true when the goal ended the routine in tail position.
    fn comp_rule(&mut self, call: &Call, tail: Tail, predflags: PredFlags) -> bool {
        let callee = self.callee(call);
        let mut do_trace = self.settings.trace;

        if self.pred().builtin == Some(BuiltinId::InjectedQuery) && tail != Tail::None {
            // keep the tail call, or the trace indentation keeps growing
            do_trace = false;
        }

        if do_trace {
            for (i, arg) in call.args.iter().enumerate() {
                self.comp_value_into(arg, arg!(i));
            }

            if !matches!(callee.builtin, Some(BuiltinId::Line | BuiltinId::Par)) {
                let kind = if call.multi {
                    TraceKind::MultiQuery
                } else {
                    TraceKind::Query
                };

                self.tracepoint(kind, call.pos).oper[2] = Operand::Pred(call.pred);
            }
        }

        if callee.flags.contains(PredFlags::FAIL) {
            emit!(self.b, Jump, Operand::Fail);
            return self.end_dead(tail);
        }

        match callee.builtin {
            Some(BuiltinId::Stop) => {
                emit!(self.b, Stop);
                return self.end_dead(tail);
            }
            Some(BuiltinId::Quit) => {
                emit!(self.b, Quit);
                return self.end_dead(tail);
            }
            Some(BuiltinId::Restart) => {
                emit!(self.b, Restart);
                return self.end_dead(tail);
            }
            Some(
                b @ (BuiltinId::Number | BuiltinId::Empty | BuiltinId::NonEmpty | BuiltinId::Word),
            ) => {
                let v1 = self.arg_value(call, 0, do_trace);
                let op = match b {
                    BuiltinId::Number => Opcode::IfNum,
                    BuiltinId::Empty => Opcode::IfNil,
                    BuiltinId::NonEmpty => Opcode::IfPair,
                    _ => Opcode::IfWord,
                };

                emit!(@dyn self.b, op, v1).set_subop(1);
            }
            Some(BuiltinId::Object) if call.is_bound(0) => {
                let v1 = self.arg_value(call, 0, do_trace);
                emit!(self.b, IfObj, v1).set_subop(1);
            }
            Some(BuiltinId::List) => {
                let lab = self.b.new_routine();
                let v1 = self.arg_value(call, 0, do_trace);

                emit!(self.b, IfNil, v1).set_implicit(lab);
                emit!(self.b, IfPair, v1).set_implicit(lab);
                emit!(self.b, Jump, Operand::Fail);
                self.end_routine();
                self.b.begin_routine(lab);
            }
            Some(BuiltinId::Bound) => {
                let v1 = self.arg_value(call, 0, do_trace);
                emit!(self.b, IfBound, v1).set_subop(1);
            }
            Some(BuiltinId::Unify) => {
                let v1 = self.arg_value(call, 0, do_trace);
                let v2 = self.arg_value(call, 1, do_trace);
                let (a, b) = (&call.args[0], &call.args[1]);

                if call.is_bound(0) && b.is_simple_constant() {
                    emit!(self.b, IfMatch, v1, v2).set_subop(1);
                } else if call.is_bound(1) && a.is_simple_constant() {
                    emit!(self.b, IfMatch, v2, v1).set_subop(1);
                } else if call.is_bound(0) && call.is_bound(1) {
                    emit!(self.b, IfUnify, v1, v2).set_subop(1);
                } else {
                    emit!(self.b, Unify, v1, v2);
                }
            }
            Some(BuiltinId::LessThan) => {
                let v1 = self.arg_value(call, 0, do_trace);
                let v2 = self.arg_value(call, 1, do_trace);
                emit!(self.b, IfGreater, v2, v1).set_subop(1);
            }
            Some(BuiltinId::GreaterThan) => {
                let v1 = self.arg_value(call, 0, do_trace);
                let v2 = self.arg_value(call, 1, do_trace);
                emit!(self.b, IfGreater, v1, v2).set_subop(1);
            }
            Some(
                b @ (BuiltinId::Plus
                | BuiltinId::Minus
                | BuiltinId::Times
                | BuiltinId::Divided
                | BuiltinId::Modulo
                | BuiltinId::Random),
            ) => {
                self.comp_compute(call, b, do_trace);
            }
            Some(BuiltinId::IsOneOf)
                if !call.multi && call.is_bound(0) && call.args[1].constant_list().is_some() =>
            {
                let lab = self.b.new_routine();
                let v1 = self.arg_value(call, 0, do_trace);

                emit!(self.b, PrepareIndex, v1);

                for item in call.args[1].constant_list().unwrap_or_default() {
                    emit!(self.b, CheckIndex, item, label!(lab));
                }

                emit!(self.b, Jump, Operand::Fail);
                self.end_routine();
                self.b.begin_routine(lab);
            }
            Some(BuiltinId::Split)
                if call.is_bound(0) && call.args[1].constant_list().is_some() =>
            {
                self.comp_split(call, do_trace);
            }
            Some(BuiltinId::HaveUndo) => {
                emit!(self.b, IfHaveUndo).set_subop(1);
            }
            Some(b @ (BuiltinId::ScriptOn | BuiltinId::ScriptOff)) => {
                emit!(self.b, Transcript).set_subop((b == BuiltinId::ScriptOn) as u8);
            }
            Some(
                BuiltinId::TraceOn
                | BuiltinId::TraceOff
                | BuiltinId::NoSpace
                | BuiltinId::Space
                | BuiltinId::Line
                | BuiltinId::Par
                | BuiltinId::Unstyle
                | BuiltinId::Roman
                | BuiltinId::Bold
                | BuiltinId::Italic
                | BuiltinId::Reverse
                | BuiltinId::Fixed
                | BuiltinId::Upper
                | BuiltinId::Clear
                | BuiltinId::ClearAll
                | BuiltinId::SerialNumber
                | BuiltinId::CompilerVersion
                | BuiltinId::MemStats,
            ) => {
                emit!(self.b, Builtin).oper[2] = Operand::Pred(call.pred);
            }
            Some(BuiltinId::SpaceN) => {
                let v1 = self.arg_value(call, 0, do_trace);
                emit!(self.b, Builtin, v1, Operand::None, Operand::Pred(call.pred));
            }
            Some(
                b @ (BuiltinId::WordRepReturn
                | BuiltinId::WordRepSpace
                | BuiltinId::WordRepBackspace
                | BuiltinId::WordRepUp
                | BuiltinId::WordRepDown
                | BuiltinId::WordRepLeft
                | BuiltinId::WordRepRight),
            ) => {
                self.comp_word_rep(call, b, do_trace);
            }
            Some(BuiltinId::ProgressBar) => {
                let v1 = self.arg_value(call, 0, do_trace);
                let v2 = self.arg_value(call, 1, do_trace);
                emit!(self.b, Builtin, v1, v2, Operand::Pred(call.pred));
            }
            Some(
                BuiltinId::Object
                | BuiltinId::IsOneOf
                | BuiltinId::Split
                | BuiltinId::InjectedQuery
                | BuiltinId::Query
                | BuiltinId::QueryArg
                | BuiltinId::HasParent
                | BuiltinId::Repeat
                | BuiltinId::GetInput
                | BuiltinId::GetRawInput
                | BuiltinId::GetKey
                | BuiltinId::Breakpoint
                | BuiltinId::BreakpointAgain
                | BuiltinId::BreakGetKey
                | BuiltinId::BreakFail
                | BuiltinId::Save
                | BuiltinId::SaveUndo
                | BuiltinId::Restore
                | BuiltinId::Undo
                | BuiltinId::Fail,
            )
            | None => {
                if !(callee.is_dynamic() && self.comp_dyn_query(call, &callee, do_trace)) {
                    return self.comp_invoke(call, tail, predflags, do_trace);
                }
            }
        }

        self.post_rule_trace(call, &callee);
        false
    }

    fn comp_compute(&mut self, call: &Call, builtin: BuiltinId, do_trace: bool) {
        if do_trace {
            emit!(self.b, ComputeV, arg!(0), arg!(1), arg!(2)).set_subop(builtin as u8);
            return;
        }

        let v1 = self.comp_value(&call.args[0]);
        let v2 = self.comp_value(&call.args[1]);

        let (op, v3) = match &call.args[2] {
            Term::Anon => (Opcode::ComputeR, Operand::None),
            &Term::Var(v) if self.seen[v] => (Opcode::ComputeV, var!(v)),
            &Term::Var(v) => {
                self.seen[v] = true;
                (Opcode::ComputeR, var!(v))
            }
            result => (Opcode::ComputeV, self.comp_value(result)),
        };

        emit!(@dyn self.b, op, v1, v2, v3).set_subop(builtin as u8);
    }

    /// Inline expansion of `(split $ by $ into $ and $)` over a constant
    /// keyword list.
    fn comp_split(&mut self, call: &Call, do_trace: bool) {
        // A0 input list, A1 iterator, A2 left part, A3 right part
        let want_left = !call.args[2].is_anon();

        if !do_trace {
            self.comp_value_into(&call.args[0], arg!(0));

            if want_left {
                self.comp_value_into(&call.args[2], arg!(2));
            }

            self.comp_value_into(&call.args[3], arg!(3));
        }

        let t1 = self.new_temp();
        let t2 = self.new_temp();
        let labloop = self.b.new_routine();
        let labmatch = self.b.new_routine();
        let lab = self.b.new_routine();

        emit!(self.b, Assign, arg!(1), arg!(0));
        emit!(self.b, Jump, label!(labloop));
        self.end_routine();

        self.b.begin_routine(labloop);
        emit!(self.b, Assign, t2, arg!(1));
        emit!(self.b, GetPairRr, t2, t1, arg!(1));
        emit!(self.b, PrepareIndex, t1);

        for keyword in call.args[1].constant_list().unwrap_or_default() {
            emit!(self.b, CheckIndex, keyword, label!(labmatch));
        }

        emit!(self.b, Jump, label!(labloop));
        self.end_routine();

        self.b.begin_routine(lab);
        emit!(self.b, PopChoice, num!(4));
        emit!(self.b, Jump, label!(labloop));
        self.end_routine();

        self.b.begin_routine(labmatch);
        emit!(self.b, PushChoice, num!(4), label!(lab));
        emit!(self.b, Unify, arg!(1), arg!(3));

        if do_trace || want_left {
            emit!(self.b, SplitList, arg!(0), t2, arg!(2));
        }

        if !call.multi {
            emit!(self.b, CutChoice);
        }
    }

    fn comp_word_rep(&mut self, call: &Call, builtin: BuiltinId, do_trace: bool) {
        let ch = builtin
            .word_rep_char()
            .unwrap_or_else(|| panic!("{builtin:?} is not a word representation"));
        let w = Operand::Dict(self.prg.ensure_dict_word(&ch.to_string()));

        match &call.args[0] {
            Term::Anon if !do_trace => {}
            &Term::Var(v) if !do_trace => {
                if self.seen[v] {
                    emit!(self.b, Unify, var!(v), w);
                } else {
                    emit!(self.b, Assign, var!(v), w);
                    self.seen[v] = true;
                }
            }
            _ => {
                let v1 = self.arg_value(call, 0, do_trace);
                emit!(self.b, Unify, v1, w);
            }
        }
    }

    /// Queries against runtime-modifiable storage. Returns false when the
    /// query has to go through the predicate itself.
    fn comp_dyn_query(&mut self, call: &Call, callee: &CalleeInfo, do_trace: bool) -> bool {
        match callee.arity {
            0 => {
                emit!(self.b, IfGflag, Operand::GFlag(callee.dyn_id())).set_subop(1);
            }
            1 if callee.flags.contains(PredFlags::GLOBAL_VAR) => {
                let gvar = Operand::GVar(callee.dyn_var_id());

                match &call.args[0] {
                    &Term::Var(v) if !do_trace && !self.seen[v] => {
                        emit!(self.b, GetGvarR, gvar, var!(v));
                        self.seen[v] = true;
                    }
                    value if value.is_simple_constant() => {
                        let v1 = self.comp_value(value);
                        emit!(self.b, IfGvarEq, gvar, v1).set_subop(1);
                    }
                    _ => {
                        let v1 = self.arg_value(call, 0, do_trace);
                        emit!(self.b, GetGvarV, gvar, v1);
                    }
                }
            }
            1 if call.is_bound(0) => {
                let v1 = self.arg_value(call, 0, do_trace);
                emit!(self.b, IfOflag, Operand::OFlag(callee.dyn_id()), v1).set_subop(1);
            }
            1 => return false,
            arity => {
                assert_eq!(arity, 2, "dynamic predicates take at most two arguments");

                if !call.is_bound(0) {
                    return false;
                }

                let ovar = Operand::OVar(callee.dyn_id());
                let v1 = self.comp_value(&call.args[0]);

                match &call.args[1] {
                    &Term::Var(v) if !self.seen[v] => {
                        emit!(self.b, GetOvarR, ovar, v1, var!(v));
                        self.seen[v] = true;
                    }
                    value if value.is_simple_constant() => {
                        let v2 = self.comp_value(value);
                        emit!(self.b, IfOvarEq, ovar, v1, v2).set_subop(1);
                    }
                    _ => {
                        let v2 = self.arg_value(call, 1, do_trace);
                        emit!(self.b, GetOvarV, ovar, v1, v2);
                    }
                }
            }
        }

        true
    }

    fn comp_invoke(&mut self, call: &Call, tail: Tail, predflags: PredFlags, do_trace: bool) -> bool {
        if !do_trace {
            for (i, arg) in call.args.iter().enumerate() {
                self.comp_value_into(arg, arg!(i));
            }
        }

        if self.settings.tail_calls && tail == Tail::Cont {
            let op = if call.multi {
                Opcode::InvokeTailMulti
            } else {
                Opcode::InvokeTailOnce
            };

            emit!(self.b, Deallocate);
            emit!(@dyn self.b, op, Operand::Pred(call.pred)).set_subop(predflags.invocation_subop());
            self.end_routine();

            return true;
        }

        let lab = self.b.new_routine();
        let op = if call.multi {
            Opcode::InvokeMulti
        } else {
            Opcode::InvokeOnce
        };

        emit!(self.b, SetCont, label!(lab));
        emit!(@dyn self.b, op, Operand::Pred(call.pred));
        self.end_routine();
        self.b.begin_routine(lab);

        let callee = self.callee(call);
        self.post_rule_trace(call, &callee);

        false
    }

    fn comp_now(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Call(call) => {
                self.now_tracepoint(call.pos);

                let callee = self.callee(call);

                if !callee.is_dynamic() {
                    self.report(call.pos, CompilationError::ModifyNonDynamic);
                    return;
                }

                match callee.arity {
                    0 => {
                        emit!(self.b, SetGflag, Operand::GFlag(callee.dyn_id())).set_subop(1);
                    }
                    1 if callee.flags.contains(PredFlags::GLOBAL_VAR) => {
                        let v1 = self.comp_value(&call.args[0]);
                        emit!(self.b, SetGvar, Operand::GVar(callee.dyn_var_id()), v1);
                    }
                    1 => {
                        let v1 = self.comp_value(&call.args[0]);
                        emit!(self.b, SetOflag, Operand::OFlag(callee.dyn_id()), v1).set_subop(1);
                    }
                    _ => {
                        let v1 = self.comp_value(&call.args[0]);
                        let v2 = self.comp_value(&call.args[1]);
                        emit!(self.b, SetOvar, Operand::OVar(callee.dyn_id()), v1, v2);
                    }
                }
            }
            Stmt::NegCall { call, .. } => {
                self.now_tracepoint(call.pos);

                let callee = self.callee(call);

                if !callee.is_dynamic() {
                    self.report(call.pos, CompilationError::ModifyNonDynamic);
                    return;
                }

                match callee.arity {
                    0 => {
                        emit!(self.b, SetGflag, Operand::GFlag(callee.dyn_id())).set_subop(0);
                    }
                    1 if callee.flags.contains(PredFlags::GLOBAL_VAR) => {
                        if call.args[0].is_anon() {
                            emit!(self.b, SetGvar, Operand::GVar(callee.dyn_var_id()));
                        } else {
                            self.report(call.pos, CompilationError::UnsetGlobalVarNotAnonymous);
                        }
                    }
                    1 => {
                        let oflag = Operand::OFlag(callee.dyn_id());

                        if call.args[0].is_anon() {
                            emit!(self.b, ClrallOflag, oflag);
                        } else {
                            let v1 = self.comp_value(&call.args[0]);
                            emit!(self.b, SetOflag, oflag, v1).set_subop(0);
                        }
                    }
                    _ => {
                        let ovar = Operand::OVar(callee.dyn_id());

                        if !call.args[1].is_anon() {
                            self.report(call.pos, CompilationError::UnsetObjectVarNotAnonymous);
                        } else if call.args[0].is_anon() {
                            emit!(self.b, ClrallOvar, ovar);
                        } else {
                            let v1 = self.comp_value(&call.args[0]);
                            emit!(self.b, SetOvar, ovar, v1);
                        }
                    }
                }
            }
            Stmt::Block(body) | Stmt::FirstResult { body, .. } => {
                for stmt in body {
                    self.comp_now(stmt);
                }
            }
            _ => panic!("{stmt:?} cannot appear in a (now) statement"),
        }
    }

    fn now_tracepoint(&mut self, pos: SourcePos) {
        if self.settings.trace {
            self.tracepoint(TraceKind::Line, pos);
        }
    }

    /// Negated type tests and flag checks that compile to a single branch.
    fn comp_negated_test(&mut self, call: &Call, callee: &CalleeInfo) -> bool {
        let test = match callee.builtin {
            Some(BuiltinId::Number) => Some(Opcode::IfNum),
            Some(BuiltinId::Empty) => Some(Opcode::IfNil),
            Some(BuiltinId::NonEmpty) => Some(Opcode::IfPair),
            Some(BuiltinId::Word) => Some(Opcode::IfWord),
            Some(BuiltinId::Object) if call.is_bound(0) => Some(Opcode::IfObj),
            _ => None,
        };

        if let Some(op) = test {
            let v1 = self.comp_value(&call.args[0]);
            emit!(@dyn self.b, op, v1);
        } else if callee.builtin == Some(BuiltinId::List) {
            let v1 = self.comp_value(&call.args[0]);
            emit!(self.b, IfNil, v1);
            emit!(self.b, IfPair, v1);
        } else if callee.is_dynamic() && callee.arity == 0 {
            emit!(self.b, IfGflag, Operand::GFlag(callee.dyn_id()));
        } else if callee.is_dynamic()
            && !callee.flags.contains(PredFlags::GLOBAL_VAR)
            && callee.arity == 1
            && call.is_bound(0)
        {
            let v1 = self.comp_value(&call.args[0]);
            emit!(self.b, IfOflag, Operand::OFlag(callee.dyn_id()), v1);
        } else {
            return false;
        }

        true
    }

    fn comp_negation(&mut self, rest: &[Stmt], mark: VarId, negated: Negated, predflags: PredFlags) {
        self.ensure_seen(rest);

        let endlab = self.b.new_routine();

        emit!(self.b, SaveChoice, var!(mark));
        emit!(self.b, PushChoice, num!(0), label!(endlab));

        match negated {
            Negated::Call(call) => {
                self.comp_rule(call, Tail::None, predflags);
            }
            Negated::Block(body) => {
                self.comp_body(body, Tail::None, predflags);
            }
        }

        emit!(self.b, RestoreChoice, var!(mark));
        emit!(self.b, Jump, Operand::Fail);
        self.end_routine();

        self.b.begin_routine(endlab);
        emit!(self.b, PopChoice, num!(0));
    }

    fn starts_with_failure(&self, body: &[Stmt]) -> bool {
        match body.first() {
            Some(Stmt::Call(call)) => self.prg.predicates[call.pred].fails(),
            _ => false,
        }
    }

    #[inline]
    fn join_label(&mut self, at_tail: bool, tail: Tail) -> Tail {
        if at_tail {
            tail
        } else {
            Tail::Jump(self.b.new_routine())
        }
    }

    fn begin_join(&mut self, endlab: Tail) {
        if let Tail::Jump(r) = endlab {
            self.b.begin_routine(r);
        }
    }

    fn comp_collect_loop(&mut self, body: &[Stmt], predflags: PredFlags) {
        let endlab = self.b.new_routine();

        emit!(self.b, PushChoice, num!(0), label!(endlab));
        self.comp_body(body, Tail::None, predflags);
        emit!(self.b, Jump, Operand::Fail);
        self.end_routine();

        self.b.begin_routine(endlab);
        emit!(self.b, PopChoice, num!(0));
    }

    fn comp_print_word(&mut self, word: usize, predflags: PredFlags) {
        let w = Operand::Word(word);
        let subop = predflags.contains(PredFlags::INVOKED_NORMALLY) as u8
            | (predflags.contains(PredFlags::INVOKED_FOR_WORDS) as u8) << 1;

        let free_slot = self
            .b
            .last_mut()
            .filter(|last| last.op == Opcode::PrintWords)
            .and_then(|last| last.oper.iter().position(Operand::is_none));

        match (free_slot, self.b.last_mut()) {
            (Some(slot), Some(last)) => {
                last.oper[slot] = w;
                last.set_subop(subop);
            }
            _ => {
                emit!(self.b, PrintWords, w).set_subop(subop);
            }
        }
    }

    pub(crate) fn comp_body(&mut self, body: &[Stmt], tail: Tail, predflags: PredFlags) {
        for (i, stmt) in body.iter().enumerate() {
            let at_tail = tail != Tail::None && i + 1 == body.len();
            let sub_tail = if at_tail { tail } else { Tail::None };

            match stmt {
                Stmt::Call(call) => {
                    if self.comp_rule(call, sub_tail, predflags) {
                        return;
                    }
                }
                Stmt::Block(inner) => {
                    self.comp_body(inner, sub_tail, predflags);

                    if at_tail {
                        return;
                    }
                }
                Stmt::Or(branches) => {
                    self.ensure_seen(&body[i..]);

                    let endlab = self.join_label(at_tail, tail);

                    for (j, branch) in branches.iter().enumerate() {
                        let next = if j + 1 < branches.len() {
                            let lab = self.b.new_routine();
                            emit!(self.b, PushChoice, num!(0), label!(lab));
                            Some(lab)
                        } else {
                            None
                        };

                        self.comp_body(branch, endlab, predflags);

                        if let Some(lab) = next {
                            self.b.begin_routine(lab);
                            emit!(self.b, PopChoice, num!(0));
                        }
                    }

                    if at_tail {
                        return;
                    }

                    self.begin_join(endlab);
                }
                Stmt::If { cond, then, els, mark } => {
                    let endlab = self.join_label(at_tail, tail);

                    if self.starts_with_failure(cond) {
                        self.comp_body(els, endlab, predflags);
                    } else if self.prg.body_succeeds(cond) {
                        emit!(self.b, SaveChoice, var!(*mark));
                        self.comp_body(cond, Tail::None, predflags);
                        emit!(self.b, RestoreChoice, var!(*mark));
                        self.comp_body(then, endlab, predflags);
                    } else {
                        self.ensure_seen(&body[i..]);

                        let lab = self.b.new_routine();

                        emit!(self.b, SaveChoice, var!(*mark));
                        emit!(self.b, PushChoice, num!(0), label!(lab));
                        self.comp_body(cond, Tail::None, predflags);
                        emit!(self.b, RestoreChoice, var!(*mark));
                        self.comp_body(then, endlab, predflags);

                        self.b.begin_routine(lab);
                        emit!(self.b, PopChoice, num!(0));
                        self.comp_body(els, endlab, predflags);
                    }

                    if at_tail {
                        return;
                    }

                    self.begin_join(endlab);
                }
                Stmt::NegCall { call, mark } => {
                    let callee = self.callee(call);

                    if callee.flags.contains(PredFlags::FAIL) || self.comp_negated_test(call, &callee) {
                        continue;
                    }

                    self.comp_negation(&body[i..], *mark, Negated::Call(call), predflags);
                }
                Stmt::NegBlock { body: inner, mark } => {
                    self.comp_negation(&body[i..], *mark, Negated::Block(inner), predflags);
                }
                Stmt::Exhaust(inner) => {
                    let trivial = self.starts_with_failure(inner)
                        || matches!(inner.first(), Some(Stmt::Block(block)) if self.starts_with_failure(block));

                    if !trivial {
                        self.ensure_seen(&body[i..]);
                        self.comp_collect_loop(inner, predflags);
                    }
                }
                Stmt::FirstResult { body: inner, mark } => {
                    emit!(self.b, SaveChoice, var!(*mark));
                    self.comp_body(inner, Tail::None, predflags);
                    emit!(self.b, RestoreChoice, var!(*mark));
                }
                Stmt::Select { alternatives, mode, site } => match alternatives.len() {
                    0 => {}
                    1 => {
                        self.comp_body(&alternatives[0], sub_tail, predflags);

                        if at_tail {
                            return;
                        }
                    }
                    n => {
                        self.ensure_seen(&body[i..]);

                        let endlab = self.join_label(at_tail, tail);
                        let block = self.b.new_routine_block(n - 1);
                        let select = emit!(self.b, Select, num!(n)).set_subop(*mode as u8);

                        if *mode != SelectMode::PurelyRandom {
                            select.oper[1] = num!(*site);
                        }

                        for j in 1..n {
                            emit!(self.b, CheckIndex, Operand::Raw(j as u32), label!(block + j - 1));
                        }

                        self.comp_body(&alternatives[0], endlab, predflags);

                        for (j, alternative) in alternatives.iter().enumerate().skip(1) {
                            self.b.begin_routine(block + j - 1);
                            self.comp_body(alternative, endlab, predflags);
                        }

                        if at_tail {
                            return;
                        }

                        self.begin_join(endlab);
                    }
                },
                Stmt::Just => {
                    let v = self
                        .cur_clause
                        .and_then(|cid| self.clauses[cid].just_var)
                        .unwrap_or_else(|| panic!("(just) in a clause without a just variable"));

                    assert!(self.seen[v], "just variable V{v} used before it was set");
                    emit!(self.b, RestoreChoice, var!(v));
                }
                Stmt::Collect { body: inner, value, into } => {
                    self.ensure_seen(&body[i..]);

                    let endlab = self.b.new_routine();

                    emit!(self.b, CollectBegin);
                    emit!(self.b, PushChoice, num!(0), label!(endlab));
                    self.comp_body(inner, Tail::None, predflags);

                    let v1 = self.comp_value(value);

                    emit!(self.b, CollectPush, v1);
                    emit!(self.b, Jump, Operand::Fail);
                    self.end_routine();

                    self.b.begin_routine(endlab);
                    emit!(self.b, PopChoice, num!(0));

                    let v2 = self.comp_value(into);
                    emit!(self.b, CollectEnd, v2);
                }
                Stmt::CollectWords { body: inner, into } => {
                    self.ensure_seen(&body[i..]);

                    emit!(self.b, CollectBegin);
                    emit!(self.b, ForWords).set_subop(1);
                    self.comp_collect_loop(inner, predflags | PredFlags::INVOKED_FOR_WORDS);
                    emit!(self.b, ForWords).set_subop(0);

                    let v1 = self.comp_value(into);
                    emit!(self.b, CollectEnd, v1);
                }
                Stmt::DetermineObject { obj, objgen, wordgen, words, wordmap, pos } => {
                    self.ensure_seen(&body[i..]);

                    let nwordmap = self.pred().wordmaps.len();

                    if let Some(map) = wordmap.filter(|&map| map < nwordmap) {
                        self.comp_value_into(obj, arg!(0));
                        self.comp_value_into(words, arg!(1));
                        self.comp_rev_lookup(map);

                        if self.settings.trace {
                            self.tracepoint(TraceKind::DetermineObject, *pos);
                        }
                    }

                    self.comp_body(objgen, Tail::None, predflags);

                    emit!(self.b, CollectBegin);
                    emit!(self.b, ForWords).set_subop(1);
                    self.comp_collect_loop(wordgen, predflags | PredFlags::INVOKED_FOR_WORDS);
                    emit!(self.b, ForWords).set_subop(0);

                    let v1 = self.comp_value(words);
                    emit!(self.b, CollectMatchAll, v1);
                }
                Stmt::Stoppable(inner) => {
                    self.ensure_seen(&body[i..]);

                    let endlab = self.b.new_routine();

                    emit!(self.b, PushStop, label!(endlab));
                    self.comp_body(inner, Tail::None, predflags);
                    emit!(self.b, Stop);
                    self.end_routine();

                    self.b.begin_routine(endlab);
                    emit!(self.b, PopChoice, num!(0));
                    emit!(self.b, PopStop);
                }
                Stmt::OutputBox { kind, class, body: inner, mark, pos } => {
                    self.ensure_seen(&body[i..]);
                    self.comp_output_box(*kind, class, inner, *mark, *pos, predflags);
                }
                Stmt::Now(stmts) => {
                    for stmt in stmts {
                        self.comp_now(stmt);
                    }
                }
                &Stmt::BareWord(word) => {
                    self.comp_print_word(word, predflags);
                }
                Stmt::Print(term) => {
                    let v1 = self.comp_value(term);
                    emit!(self.b, PrintVal, v1);
                }
            }
        }

        match tail {
            Tail::Cont => {
                emit!(self.b, Deallocate).set_subop(1);
                emit!(self.b, Proceed).set_subop(predflags.invocation_subop());
                self.end_routine();
            }
            Tail::Jump(r) => {
                emit!(self.b, Jump, label!(r));
                self.end_routine();
            }
            Tail::None => {}
        }
    }

    /// Output boxes have three exits, each of which closes the box once:
    /// normal completion, failure of the body, and a stop signal.
    fn comp_output_box(
        &mut self,
        kind: BoxKind,
        class: &Term,
        body: &[Stmt],
        mark: VarId,
        pos: SourcePos,
        predflags: PredFlags,
    ) {
        let lab = self.b.new_routine();
        let stoplab = self.b.new_routine();
        let endlab = self.b.new_routine();

        let boxclass = match class {
            &Term::DictWord(word) => Operand::Box(self.prg.find_boxclass(word)),
            _ => {
                let name = kind.name().to_owned();
                self.report(pos, CompilationError::BoxParameterNotDictWord(name));
                Operand::None
            }
        };

        emit!(self.b, BeginBox, boxclass).set_subop(kind as u8);
        emit!(self.b, PushStop, label!(stoplab));
        emit!(self.b, SaveChoice, var!(mark));
        emit!(self.b, PushChoice, num!(0), label!(lab));

        self.comp_body(body, Tail::None, predflags);

        emit!(self.b, RestoreChoice, var!(mark));
        emit!(self.b, CutChoice);
        emit!(self.b, PopStop);
        emit!(self.b, EndBox, boxclass).set_subop(kind as u8);
        emit!(self.b, Jump, label!(endlab));
        self.end_routine();

        self.b.begin_routine(lab);
        emit!(self.b, PopChoice, num!(0));
        emit!(self.b, CutChoice);
        emit!(self.b, PopStop);
        emit!(self.b, EndBox, boxclass).set_subop(kind as u8);
        emit!(self.b, Jump, Operand::Fail);
        self.end_routine();

        self.b.begin_routine(stoplab);
        emit!(self.b, PopChoice, num!(0));
        emit!(self.b, PopStop);
        emit!(self.b, EndBox, boxclass).set_subop(kind as u8);
        emit!(self.b, Stop);
        self.end_routine();

        self.b.begin_routine(endlab);
    }

    /// Narrows the object candidates of `(determine object $)` from the
    /// input words before the generators run.
    fn comp_rev_lookup(&mut self, mapnum: usize) {
        // A0 output value, A1 word iterator, V0 object iterator,
        // X0 current word, X1 current object
        let map = self.pred().wordmaps[mapnum].clone();
        let have_always = map.entries.last().is_some_and(|entry| entry.key.is_none());
        let nmap = map.entries.len() - have_always as usize;

        let labstart = self.b.new_routine();
        let labloop = self.b.new_routine();
        let labfound = self.b.new_routine();
        let labfoundloop = self.b.new_routine();
        let labnext = self.b.new_routine();
        let labcheck = self.b.new_routine();
        let labend = self.b.new_routine();
        let labend2 = self.b.new_routine();

        emit!(self.b, Jump, label!(labstart));
        self.end_routine();

        self.b.begin_routine(labstart);
        emit!(self.b, Allocate, num!(1), num!(2));
        emit!(self.b, Jump, label!(labloop));
        self.b.end_routine(None);

        self.b.begin_routine(labloop);
        emit!(self.b, IfNil, arg!(1)).set_implicit(labend);
        emit!(self.b, GetPairRr, arg!(1), temp!(0), arg!(1));
        emit!(self.b, CollectBegin);
        emit!(self.b, PrepareIndex, temp!(0));

        if nmap > 8 {
            emit!(
                self.b,
                CheckWordmap,
                num!(mapnum),
                label!(labfound),
                Operand::Pred(self.pred_id)
            );
            emit!(self.b, CollectEnd, Operand::Nil);
            emit!(self.b, Jump, label!(labloop));
            self.b.end_routine(None);
        } else {
            let block = self.b.new_routine_block(nmap);

            for (i, entry) in map.entries[..nmap].iter().enumerate() {
                let key = entry
                    .key
                    .map(|word| self.prg.resolve_value(Operand::Dict(word)))
                    .unwrap_or(Operand::None);

                emit!(self.b, CheckIndex, key, label!(block + i));
            }

            emit!(self.b, Jump, label!(labfound));
            self.b.end_routine(None);

            for (i, entry) in map.entries[..nmap].iter().enumerate() {
                self.b.begin_routine(block + i);

                if entry.objects.len() > MAXWORDMAP {
                    emit!(self.b, CollectEnd, Operand::Nil);
                    emit!(self.b, Jump, label!(labloop));
                } else {
                    for &obj in &entry.objects {
                        emit!(self.b, CollectPush, Operand::Object(obj));
                    }

                    emit!(self.b, Jump, label!(labfound));
                }

                self.b.end_routine(None);
            }
        }

        self.b.begin_routine(labfound);

        if have_always {
            for &obj in &map.entries[nmap].objects {
                emit!(self.b, CollectPush, Operand::Object(obj));
            }
        }

        emit!(self.b, IfBound, arg!(0)).set_implicit(labcheck);
        emit!(self.b, MakeVar, var!(0));
        emit!(self.b, CollectEnd, var!(0));
        emit!(self.b, Jump, label!(labfoundloop));
        self.b.end_routine(None);

        self.b.begin_routine(labfoundloop);
        emit!(self.b, GetPairRr, var!(0), temp!(1), var!(0));
        emit!(self.b, PushChoice, num!(2), label!(labnext));
        emit!(self.b, Unify, arg!(0), temp!(1));
        emit!(self.b, Jump, label!(labloop));
        self.b.end_routine(None);

        self.b.begin_routine(labnext);
        emit!(self.b, PopChoice, num!(2));
        emit!(self.b, Jump, label!(labfoundloop));
        self.b.end_routine(None);

        self.b.begin_routine(labcheck);
        // pops everything, fails unless A0 was collected
        emit!(self.b, CollectCheck, arg!(0));
        emit!(self.b, Jump, label!(labloop));
        self.b.end_routine(None);

        self.b.begin_routine(labend);
        emit!(self.b, Deallocate).set_subop(1);
        emit!(self.b, Jump, label!(labend2));
        self.b.end_routine(None);

        self.b.begin_routine(labend2);
    }

    /// Compiles one clause, starting in the open routine and ending every
    /// routine it opens.
    pub(crate) fn comp_clause(&mut self, entry: &IndexEntry, ignore_arg0: bool) {
        let clauses = self.clauses;
        let cl = &clauses[entry.clause_id];

        let (arity, flags, unbound_in, builtin) = {
            let pred = self.pred();
            (pred.arity, pred.flags, pred.unbound_in, pred.builtin)
        };

        self.cur_clause = Some(entry.clause_id);
        self.seen.clear();
        self.seen.resize(cl.nvar, false);
        self.ntemp = 0;

        emit!(self.b, Allocate, num!(cl.nvar), num!(arity)).set_subop(1);

        // not for initial value code
        let mut all_seen_are_bound = !flags.contains(PredFlags::DYNAMIC);

        for i in ignore_arg0 as usize..arity {
            let mut param = &cl.params[i];

            if i == 0 {
                for _ in 0..entry.n_drop_from_arg0 {
                    match param {
                        Term::Pair(_, tail) => param = tail,
                        _ => panic!("index entry drops through non-pair {param:?}"),
                    }
                }
            }

            if unbound_in & (1 << i) != 0 {
                all_seen_are_bound = false;
            }

            self.comp_param(param, arg!(i), all_seen_are_bound);
        }

        let body = &cl.body[entry.n_drop_from_body..];

        if flags.contains(PredFlags::CONTAINS_JUST) && contains_just(body) {
            let v = cl
                .just_var
                .unwrap_or_else(|| panic!("clause of {} has no just variable", self.pred().name));

            emit!(self.b, Assign, var!(v), arg!(arity));
            self.seen[v] = true;
        }

        if self.settings.trace && builtin != Some(BuiltinId::InjectedQuery) {
            self.tracepoint(TraceKind::Enter, cl.pos).oper[2] = Operand::Pred(self.pred_id);
        }

        self.comp_body(body, Tail::Cont, flags);

        let next_temp = &mut self.next_temp[entry.clause_id];
        *next_temp = (*next_temp).max(self.ntemp);
    }
}
