//! A small interpreter for the constant-only subset of the intermediate
//! code, used to check that rewrites keep the solutions of a predicate, the
//! output printed along the way and their order.

use crate::forms::*;
use crate::instructions::*;
use crate::opcodes::*;

const STEP_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Value {
    Unbound,
    Integer(u32),
    Object(usize),
    Dict(usize),
    Nil,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Word(usize),
    Value(Value),
    Solution(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    /// Heap reference; a cell referring to itself is unbound.
    Ref(usize),
    Const(Operand),
}

#[derive(Debug, Clone, Default)]
struct State {
    args: Vec<Cell>,
    temps: Vec<Cell>,
    frames: Vec<Vec<Cell>>,
    heap: Vec<Cell>,
    index: Option<Operand>,
    /// Choice stack heights of the open stop points.
    stops: Vec<usize>,
}

impl State {
    fn new_var(&mut self) -> Cell {
        let cell = Cell::Ref(self.heap.len());
        self.heap.push(cell);
        cell
    }

    fn deref(&self, mut cell: Cell) -> Cell {
        while let Cell::Ref(i) = cell {
            if self.heap[i] == cell {
                break;
            }

            cell = self.heap[i];
        }

        cell
    }

    fn read(&self, oper: Operand) -> Cell {
        match oper {
            Operand::Arg(i) => self.args[i],
            Operand::Temp(i) => *self.temps.get(i).unwrap_or_else(|| panic!("X{i} read before written")),
            Operand::Var(i) => self.frames.last().expect("no frame")[i],
            _ => {
                assert!(oper.is_constant(), "{oper:?} is not a value");
                Cell::Const(oper)
            }
        }
    }

    fn write(&mut self, oper: Operand, cell: Cell) {
        match oper {
            Operand::Arg(i) => self.args[i] = cell,
            Operand::Temp(i) => {
                if self.temps.len() <= i {
                    self.temps.resize(i + 1, Cell::Const(Operand::None));
                }

                self.temps[i] = cell;
            }
            Operand::Var(i) => self.frames.last_mut().expect("no frame")[i] = cell,
            _ => panic!("cannot write to {oper:?}"),
        }
    }

    fn unify(&mut self, a: Cell, b: Cell) -> bool {
        match (self.deref(a), self.deref(b)) {
            (Cell::Ref(i), other) | (other, Cell::Ref(i)) => {
                if other != Cell::Ref(i) {
                    self.heap[i] = other;
                }

                true
            }
            (x, y) => x == y,
        }
    }

    fn value(&self, cell: Cell) -> Value {
        match self.deref(cell) {
            Cell::Ref(_) => Value::Unbound,
            Cell::Const(Operand::Integer(n)) => Value::Integer(n),
            Cell::Const(Operand::Object(o)) => Value::Object(o),
            Cell::Const(Operand::Dict(d)) => Value::Dict(d),
            Cell::Const(Operand::Nil) => Value::Nil,
            Cell::Const(other) => panic!("{other:?} has no value form"),
        }
    }
}

/// Runs the normal entry of `pred_id` and collects the argument bindings of
/// every solution, in the order they are found.
pub(crate) fn run_all(prg: &Program, pred_id: PredId, args: &[Value]) -> Vec<Vec<Value>> {
    transcript(prg, pred_id, args)
        .into_iter()
        .filter_map(|event| match event {
            Event::Solution(values) => Some(values),
            _ => None,
        })
        .collect()
}

/// Runs the normal entry of `pred_id` until it runs out of alternatives,
/// recording output and solutions as they happen. A PROCEED for a simple
/// invocation hands its one solution back and ends the run.
pub(crate) fn transcript(prg: &Program, pred_id: PredId, args: &[Value]) -> Vec<Event> {
    let pred = &prg.predicates[pred_id];
    let routines = &pred.routines;
    let entries = pred.entries.expect("predicate was not compiled");

    let mut state = State::default();

    for &arg in args {
        let cell = match arg {
            Value::Unbound => state.new_var(),
            Value::Integer(n) => Cell::Const(Operand::Integer(n)),
            Value::Object(o) => Cell::Const(Operand::Object(o)),
            Value::Dict(d) => Cell::Const(prg.resolve_value(Operand::Dict(d))),
            Value::Nil => Cell::Const(Operand::Nil),
        };

        state.args.push(cell);
    }

    state.args.resize(pred.choice_args().max(args.len()) + 8, Cell::Const(Operand::None));

    let mut choices: Vec<(State, RoutineId)> = vec![];
    let mut events = vec![];
    let mut pc = (entries.normal, 0);

    for _ in 0..STEP_LIMIT {
        let instr = routines[pc.0].instr[pc.1];
        let mut goto = None;
        let mut failed = false;

        pc.1 += 1;

        match instr.op {
            Opcode::Nop | Opcode::NopDebug | Opcode::Tracepoint => {}
            Opcode::Allocate => {
                let Operand::Num(n) = instr.oper[0] else {
                    panic!("bad ALLOCATE {instr}");
                };

                state.frames.push(vec![Cell::Const(Operand::None); n as usize]);
            }
            Opcode::Deallocate => {
                state.frames.pop().expect("DEALLOCATE without frame");
            }
            Opcode::Assign => {
                let cell = state.read(instr.oper[1]);
                state.write(instr.oper[0], cell);
            }
            Opcode::MakeVar => {
                let cell = state.new_var();
                state.write(instr.oper[0], cell);
            }
            Opcode::Unify => {
                let (a, b) = (state.read(instr.oper[0]), state.read(instr.oper[1]));
                failed = !state.unify(a, b);
            }
            Opcode::PrepareIndex => {
                state.index = match state.deref(state.read(instr.oper[0])) {
                    Cell::Const(v) => Some(v),
                    Cell::Ref(_) => None,
                };
            }
            Opcode::CheckIndex => {
                if state.index == Some(instr.oper[0]) {
                    goto = instr.oper[1].label();
                }
            }
            Opcode::Jump => match instr.oper[0] {
                Operand::Label(r) => goto = Some(r),
                _ => failed = true,
            },
            Opcode::PushChoice => {
                let alt = instr.oper[1].label().expect("PUSH_CHOICE without alternative");
                choices.push((state.clone(), alt));
            }
            Opcode::PopChoice => {
                choices.pop().expect("POP_CHOICE without choice");
            }
            Opcode::SaveChoice => {
                state.write(instr.oper[0], Cell::Const(Operand::Num(choices.len() as u32)));
            }
            Opcode::RestoreChoice => {
                let Cell::Const(Operand::Num(height)) = state.read(instr.oper[0]) else {
                    panic!("RESTORE_CHOICE of a non-mark");
                };

                choices.truncate(height as usize);
            }
            Opcode::Proceed => {
                events.push(Event::Solution(
                    (0..args.len())
                        .map(|i| state.value(state.args[i]))
                        .collect(),
                ));

                if instr.subop == 1 {
                    return events;
                }

                failed = true;
            }
            Opcode::PrintWords => {
                let words = instr.oper.iter().filter_map(|oper| match *oper {
                    Operand::Word(w) => Some(Event::Word(w)),
                    _ => None,
                });

                events.extend(words);
            }
            Opcode::PrintVal => {
                events.push(Event::Value(state.value(state.read(instr.oper[0]))));
            }
            Opcode::PushStop => {
                let alt = instr.oper[0].label().expect("PUSH_STOP without target");

                state.stops.push(choices.len());
                choices.push((state.clone(), alt));
            }
            Opcode::PopStop => {
                state.stops.pop().expect("POP_STOP without stop point");
            }
            Opcode::Stop => {
                // without a stop point the whole query ends
                let Some(&height) = state.stops.last() else {
                    return events;
                };

                choices.truncate(height + 1);
                failed = true;
            }
            op if op.is_branch() => {
                let v = state.deref(state.read(instr.oper[0]));
                let holds = match op {
                    Opcode::IfBound => matches!(v, Cell::Const(_)),
                    Opcode::IfMatch => v == Cell::Const(instr.oper[1]),
                    Opcode::IfNil => v == Cell::Const(Operand::Nil),
                    Opcode::IfNum => matches!(v, Cell::Const(Operand::Integer(_))),
                    Opcode::IfObj => matches!(v, Cell::Const(Operand::Object(_))),
                    _ => panic!("{op} is not supported by the test machine"),
                };

                if holds != (instr.subop == 1) {
                    match instr.implicit {
                        Some(r) => goto = Some(r),
                        None => failed = true,
                    }
                }
            }
            op => panic!("{op} is not supported by the test machine"),
        }

        if failed {
            let Some((saved, alt)) = choices.last() else {
                return events;
            };

            state = saved.clone();
            pc = (*alt, 0);
        } else if let Some(r) = goto {
            pc = (r, 0);
        }
    }

    panic!("{} did not finish within {STEP_LIMIT} steps", pred.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn program(routines: Vec<Routine>, arity: usize) -> (Program, PredId) {
        let mut prg = Program::new();
        let mut pred = user_pred("p", arity);

        pred.routines = routines;
        pred.entries = Some(EntryPoints {
            normal: 0,
            initial_value: None,
        });

        let id = prg.add_predicate(pred);
        (prg, id)
    }

    #[test]
    fn alternatives_run_in_order() {
        let (prg, p) = program(
            vec![
                routine(
                    None,
                    vec![
                        ins(Opcode::PushChoice, &[num!(1), label!(1)]),
                        ins(Opcode::Unify, &[arg!(0), Operand::Integer(1)]),
                        ins_sub(Opcode::Proceed, 0, &[]),
                    ],
                ),
                routine(
                    None,
                    vec![
                        ins(Opcode::PopChoice, &[num!(1)]),
                        ins(Opcode::Unify, &[arg!(0), Operand::Integer(2)]),
                        ins_sub(Opcode::Proceed, 0, &[]),
                    ],
                ),
            ],
            1,
        );

        assert_eq!(
            run_all(&prg, p, &[Value::Unbound]),
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]
        );
        assert_eq!(run_all(&prg, p, &[Value::Integer(2)]), vec![vec![Value::Integer(2)]]);
    }

    #[test]
    fn negated_branch_to_failure() {
        let (prg, p) = program(
            vec![routine(
                None,
                vec![
                    ins_sub(Opcode::IfMatch, 1, &[arg!(0), Operand::Nil]),
                    ins_sub(Opcode::Proceed, 0, &[]),
                ],
            )],
            1,
        );

        assert_eq!(run_all(&prg, p, &[Value::Nil]), vec![vec![Value::Nil]]);
        assert!(run_all(&prg, p, &[Value::Integer(0)]).is_empty());
    }
}
