//! Human-readable listing of compiled routines.

use crate::forms::*;
use crate::instructions::*;

use std::fmt::{self, Write};

/// Operand text is cut to this many characters.
const OPERAND_WIDTH: usize = 12;

fn dict_word(prg: &Program, d: usize) -> &str {
    prg.dictionary.get_index(d).map_or("?", String::as_str)
}

fn dyn_pred_name<'p>(prg: &'p Program, table: &[PredId], id: usize) -> &'p str {
    table
        .get(id)
        .map_or("?", |&pred| prg.predicates[pred].name.as_str())
}

fn operand_text(prg: &Program, cl: Option<&Clause>, oper: Operand) -> String {
    match oper {
        Operand::Num(n) | Operand::Integer(n) => n.to_string(),
        Operand::Object(o) => format!("#{}", prg.objects.get(o).map_or("?", String::as_str)),
        Operand::Dict(d) => format!("@{}", dict_word(prg, d)),
        Operand::Nil => "[]".to_string(),
        Operand::Raw(n) => format!("0x{n:04x}"),
        Operand::Arg(n) => format!("A{n}"),
        Operand::Temp(n) => format!("X{n}"),
        Operand::Var(n) => match cl.and_then(|cl| cl.varnames.get(n)) {
            Some(name) => format!("V{n}/${name}"),
            None => format!("V{n}"),
        },
        Operand::Label(r) => format!("R{r}"),
        Operand::Fail => "<FAIL>".to_string(),
        Operand::GFlag(n) => format!("GF{n}"),
        Operand::GVar(n) => format!("GV{n}"),
        Operand::OFlag(n) => format!("OF{n}"),
        Operand::OVar(n) => format!("OV{n}"),
        Operand::Box(b) => {
            let class = prg
                .boxclasses
                .get_index(b)
                .map_or("?", |&d| dict_word(prg, d));

            format!("B{b}/@{class}")
        }
        Operand::Word(w) => format!("\"{}\"", prg.words.get(w).map_or("?", String::as_str)),
        Operand::None => "-".to_string(),
        // printed in full by the caller
        Operand::Pred(_) | Operand::File(_) => unreachable!(),
    }
}

/// Writes one instruction line to `out`.
pub fn write_instruction<W: fmt::Write>(
    out: &mut W,
    prg: &Program,
    cl: Option<&Clause>,
    instr: &Instruction,
) -> fmt::Result {
    let name = if instr.op.has_subop() {
        format!("{} {}", instr.op.name(), instr.subop)
    } else {
        instr.op.name().to_string()
    };

    write!(out, "\t{name:<19}")?;

    if instr.op.is_branch() {
        out.write_char(if instr.subop != 0 { '~' } else { ' ' })?;

        match instr.implicit {
            Some(r) => write!(out, "R{r:<3} ")?,
            None => out.write_str("FAIL ")?,
        }
    } else {
        out.write_str("      ")?;
    }

    for (j, &oper) in instr.oper.iter().enumerate() {
        match oper {
            Operand::Pred(p) => {
                write!(out, " {}", prg.predicates[p].name)?;
                break;
            }
            Operand::File(f) => {
                let file = prg.source_files.get(f).map_or("?", String::as_str);
                let line = match instr.oper.get(j + 1) {
                    Some(&Operand::Num(line)) => line,
                    _ => 0,
                };

                write!(out, " {file}:{line}")?;
                break;
            }
            _ => {
                let text: String = operand_text(prg, cl, oper).chars().take(OPERAND_WIDTH).collect();
                write!(out, " {text:<OPERAND_WIDTH$}")?;
            }
        }
    }

    let dyn_name = match instr.oper[0] {
        Operand::GFlag(n) => Some(dyn_pred_name(prg, &prg.global_flags, n)),
        Operand::GVar(n) => Some(dyn_pred_name(prg, &prg.global_vars, n)),
        Operand::OFlag(n) => Some(dyn_pred_name(prg, &prg.object_flags, n)),
        Operand::OVar(n) => Some(dyn_pred_name(prg, &prg.object_vars, n)),
        _ => None,
    };

    if let Some(name) = dyn_name {
        write!(out, " {name}")?;
    }

    out.write_char('\n')
}

fn write_label<W: fmt::Write>(out: &mut W, routine: &Routine, r: RoutineId) -> fmt::Result {
    match routine.reftrack {
        Some(group) if group == r => writeln!(out, "R{r}: (group leader)"),
        Some(group) => writeln!(out, "R{r}: (part of group R{group})"),
        None => writeln!(out, "R{r}: (unreachable)"),
    }
}

fn write_routines<W: fmt::Write>(
    out: &mut W,
    prg: &Program,
    pred: &Predicate,
    with_clauses: bool,
) -> fmt::Result {
    for (r, routine) in pred.routines.iter().enumerate() {
        let cl = routine
            .clause_id
            .filter(|_| with_clauses)
            .and_then(|c| pred.clauses.get(c));

        write_label(out, routine, r)?;

        for instr in &routine.instr {
            write_instruction(out, prg, cl, instr)?;
        }
    }

    Ok(())
}

/// Listing of a compiled predicate, headed by its entry points.
pub struct PredicateListing<'a> {
    pub prg: &'a Program,
    pub pred_id: PredId,
}

impl fmt::Display for PredicateListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pred = &self.prg.predicates[self.pred_id];

        match pred.entries {
            Some(entries) => {
                write!(f, "Intermediate code for {}: {} ", pred.name, entries.normal)?;

                match entries.initial_value {
                    Some(r) => writeln!(f, "{r}")?,
                    None => writeln!(f, "-")?,
                }
            }
            None => writeln!(f, "Intermediate code for {}: - -", pred.name)?,
        }

        write_routines(f, self.prg, pred, true)
    }
}

/// Listing of a library builtin.
pub struct BuiltinListing<'a> {
    pub prg: &'a Program,
    pub pred_id: PredId,
}

impl fmt::Display for BuiltinListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pred = &self.prg.predicates[self.pred_id];
        let builtin = pred.builtin.map_or(-1, |b| b as u8 as i32);

        writeln!(f, "Intermediate code for builtin {builtin}, {}:", pred.name)?;
        write_routines(f, self.prg, pred, false)
    }
}

/// [`PredicateListing`] as a string.
pub fn dump_predicate(prg: &Program, pred_id: PredId) -> String {
    PredicateListing { prg, pred_id }.to_string()
}

pub fn dump_builtin(prg: &Program, pred_id: PredId) -> String {
    BuiltinListing { prg, pred_id }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::*;
    use crate::test_utils::*;

    fn line(prg: &Program, cl: Option<&Clause>, instr: Instruction) -> String {
        let mut out = String::new();
        write_instruction(&mut out, prg, cl, &instr).unwrap();
        out
    }

    #[test]
    fn branch_columns() {
        let mut prg = Program::new();
        let bob = prg.ensure_dict_word("bob");

        assert_eq!(
            line(&prg, None, branch(Opcode::IfMatch, Some(3), &[arg!(0), Operand::Dict(bob)])),
            format!("\t{:<19} R3    {:<12} {:<12} {:<12}\n", "IF_MATCH", "A0", "@bob", "-")
        );

        let mut negated = branch(Opcode::IfBound, None, &[arg!(1)]);
        negated.subop = 1;

        assert!(line(&prg, None, negated).starts_with(&format!("\t{:<19}~FAIL  A1", "IF_BOUND")));
    }

    #[test]
    fn long_operands_are_cut() {
        let mut prg = Program::new();
        prg.objects.push("brass_lantern_of_doom".into());

        let text = line(&prg, None, ins(Opcode::Assign, &[temp!(0), Operand::Object(0)]));

        assert!(text.contains(" #brass_lante "));
        assert!(!text.contains("doom"));
    }

    #[test]
    fn variables_show_their_names() {
        let prg = Program::new();
        let cl = Clause {
            nvar: 1,
            varnames: vec!["Obj".into()],
            ..Clause::default()
        };

        let text = line(&prg, Some(&cl), ins(Opcode::MakeVar, &[var!(0)]));
        assert!(text.contains(" V0/$Obj "));

        let text = line(&prg, None, ins(Opcode::MakeVar, &[var!(0)]));
        assert!(text.contains(" V0 "));
    }

    #[test]
    fn predicate_references_end_the_line() {
        let mut prg = Program::new();
        let p = prg.add_predicate(user_pred("look", 0));

        let text = line(&prg, None, ins(Opcode::InvokeOnce, &[Operand::Pred(p)]));
        assert!(text.ends_with(" look\n"));

        prg.source_files.push("story.dg".into());
        let text = line(
            &prg,
            None,
            ins_sub(Opcode::Tracepoint, 4, &[Operand::File(0), num!(12)]),
        );
        assert!(text.ends_with(" story.dg:12\n"));
    }

    #[test]
    fn dynamic_operands_name_their_predicate() {
        let mut prg = Program::new();
        let lit = prg.add_predicate(user_pred("$ is lit", 1));
        prg.object_flags.push(lit);

        let text = line(&prg, None, ins_sub(Opcode::SetOflag, 1, &[Operand::OFlag(0), arg!(0)]));
        assert!(text.ends_with(" $ is lit\n"));
    }

    #[test]
    fn headers_and_labels() {
        let mut prg = Program::new();
        let mut pred = user_pred("look", 0);

        pred.entries = Some(EntryPoints {
            normal: 0,
            initial_value: None,
        });
        pred.routines = vec![
            Routine {
                reftrack: Some(0),
                ..routine(None, vec![ins(Opcode::Jump, &[label!(1)])])
            },
            Routine {
                reftrack: Some(0),
                ..routine(None, vec![ins_sub(Opcode::Proceed, 0, &[])])
            },
            routine(None, vec![]),
        ];
        let look = prg.add_predicate(pred);

        let text = dump_predicate(&prg, look);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Intermediate code for look: 0 -");
        assert_eq!(lines[1], "R0: (group leader)");
        assert_eq!(lines[3], "R1: (part of group R0)");
        assert_eq!(lines[5], "R2: (unreachable)");
    }

    #[test]
    fn listings_format_without_a_buffer() {
        let mut prg = Program::new();
        let look = prg.add_predicate(user_pred("look", 0));

        assert_eq!(
            format!("{}", PredicateListing { prg: &prg, pred_id: look }),
            "Intermediate code for look: - -\n"
        );
        assert_eq!(dump_predicate(&prg, look), "Intermediate code for look: - -\n");
    }
}
