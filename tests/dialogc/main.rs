mod helper;

use helper::*;

use dialogc::forms::*;
use dialogc::instructions::*;
use dialogc::opcodes::Opcode;
use dialogc::*;

use maplit::btreemap;

use std::collections::BTreeMap;

fn compile(prg: &mut Program, settings: CompilerSettings) -> CollectDiagnostics {
    init_tracing();

    let mut diag = CollectDiagnostics::new();
    compile_program(prg, &mut diag, settings).unwrap();
    diag
}

/// Index key of every CHECK_INDEX in the entry routine, with the routine it
/// dispatches to.
fn dispatch(prg: &Program, pred: PredId) -> BTreeMap<Operand, RoutineId> {
    entry(prg, pred)
        .instr
        .iter()
        .filter(|instr| instr.op == Opcode::CheckIndex)
        .map(|instr| match instr.oper[1] {
            Operand::Label(r) => (instr.oper[0], r),
            other => panic!("CHECK_INDEX to {other:?}"),
        })
        .collect()
}

#[test]
fn greet_dispatches_on_its_argument() {
    let mut prg = story();
    let bob = prg.ensure_dict_word("bob");
    let alice = prg.ensure_dict_word("alice");
    prg.words.extend(["Hello,".to_string(), "Hi.".to_string()]);

    let greet = predicate(&mut prg, "greet $", 1);
    fact(&mut prg, greet, vec![Term::DictWord(bob)], vec![Stmt::BareWord(0)], 0);
    fact(&mut prg, greet, vec![Term::DictWord(alice)], vec![Stmt::BareWord(1)], 0);

    compile(&mut prg, CompilerSettings::quiet());

    assert_eq!(entry(&prg, greet).instr[0].op, Opcode::PrepareIndex);
    assert_eq!(count(&prg, greet, Opcode::PushChoice), 0);
    assert_eq!(count(&prg, greet, Opcode::Allocate), 0);

    let printed: BTreeMap<Operand, Operand> = dispatch(&prg, greet)
        .into_iter()
        .map(|(key, r)| (key, prg.predicates[greet].routines[r].instr[0].oper[0]))
        .collect();

    assert_eq!(
        printed,
        btreemap! {
            Operand::Dict(bob) => Operand::Word(0),
            Operand::Dict(alice) => Operand::Word(1),
        }
    );
}

#[test]
fn constant_clause_falls_back_to_the_general_one() {
    let mut prg = story();
    let bob = prg.ensure_dict_word("bob");
    prg.words.extend(["hi bob".to_string(), "hi".to_string()]);

    let greet = predicate(&mut prg, "greet $", 1);
    prg.predicates[greet].flags = PredFlags::INVOKED_SIMPLE;
    fact(&mut prg, greet, vec![Term::DictWord(bob)], vec![Stmt::BareWord(0)], 0);
    fact(
        &mut prg,
        greet,
        vec![Term::Var(0)],
        vec![Stmt::BareWord(1), Stmt::Print(Term::Var(0))],
        1,
    );

    compile(&mut prg, CompilerSettings::quiet());

    // callers want one solution, so the alternative needs no choice point
    assert_eq!(count(&prg, greet, Opcode::PushChoice), 0);

    let check = entry(&prg, greet).instr[0];
    assert_eq!(check.op, Opcode::IfMatch);
    assert_eq!(check.oper[..2], [Operand::Arg(0), Operand::Dict(bob)]);

    let fallback = &prg.predicates[greet].routines[check.implicit.unwrap_or_else(|| panic!("no fallback"))];
    assert!(fallback
        .instr
        .iter()
        .any(|instr| instr.op == Opcode::PrintWords && instr.oper[0] == Operand::Word(1)));
    assert!(fallback.instr.iter().any(|instr| instr.op == Opcode::PrintVal));
}

#[test]
fn one_of_clauses_keep_source_order_within_a_key() {
    let mut prg = story();
    let a = prg.ensure_dict_word("a");
    let b = prg.ensure_dict_word("b");
    let is_one_of = prg
        .builtin(BuiltinId::IsOneOf)
        .unwrap_or_else(|| panic!("no (is $ one of $)"));

    let item = predicate(&mut prg, "item $", 1);
    let restrict = goal(
        is_one_of,
        vec![Term::Var(0), Term::list([Term::DictWord(a), Term::DictWord(b)])],
        3,
    );
    fact(&mut prg, item, vec![Term::Var(0)], vec![restrict], 1);
    fact(&mut prg, item, vec![Term::DictWord(a)], vec![], 0);

    compile(&mut prg, CompilerSettings::quiet());

    let targets = dispatch(&prg, item);
    let routines = &prg.predicates[item].routines;

    assert_eq!(targets.len(), 2);

    // both clauses match @a: the first is tried with the second as its
    // alternative
    let on_a = &routines[targets[&Operand::Dict(a)]];
    assert_eq!(on_a.instr[0].op, Opcode::PushChoice);

    let on_b = &routines[targets[&Operand::Dict(b)]];
    assert!(on_b.instr.iter().all(|instr| instr.op != Opcode::PushChoice));

    // the restriction was consumed by the index
    assert!(instructions(&prg, item).all(|instr| instr.oper[0] != Operand::Pred(is_one_of)));
}

#[test]
fn disjunction_leaves_two_alternatives() {
    let mut prg = story();
    let p = predicate(&mut prg, "p", 0);
    let q = predicate(&mut prg, "q", 0);
    let r = predicate(&mut prg, "r", 0);
    let main = predicate(&mut prg, "main", 0);

    let or = Stmt::Or(vec![vec![goal(p, vec![], 1)], vec![goal(q, vec![], 2)], vec![goal(r, vec![], 3)]]);
    fact(&mut prg, main, vec![], vec![or], 0);

    compile(&mut prg, CompilerSettings::quiet().with_choice_frames(false));

    assert_eq!(count(&prg, main, Opcode::PushChoice), 2);
    assert_eq!(count(&prg, main, Opcode::PopChoice), 2);
}

#[test]
fn user_errors_are_reported_and_compilation_continues() {
    let mut prg = story();

    let mut score = Predicate::new("score $", 1);
    score.flags = PredFlags::DYNAMIC | PredFlags::GLOBAL_VAR;
    score.dyn_var_id = Some(0);
    let score = prg.add_predicate(score);
    prg.global_vars.push(score);

    let reset = predicate(&mut prg, "reset", 0);
    let later = predicate(&mut prg, "later", 0);

    let unset = Stmt::NegCall {
        call: Call {
            pred: score,
            args: vec![Term::Integer(5)],
            unbound: 0,
            multi: false,
            pos: SourcePos { file: 0, line: 7 },
        },
        mark: 0,
    };
    fact(&mut prg, reset, vec![], vec![Stmt::Now(vec![unset])], 1);
    fact(&mut prg, later, vec![], vec![Stmt::BareWord(0)], 0);
    prg.words.push("done".into());

    init_tracing();

    let mut diag = CollectDiagnostics::new();
    let result = compile_program(&mut prg, &mut diag, CompilerSettings::quiet());

    assert_eq!(result, Err(CompileFailure { errors: 1 }));
    assert_eq!(
        diag.reports,
        vec![(
            Level::Error,
            SourcePos { file: 0, line: 7 },
            CompilationError::UnsetGlobalVarNotAnonymous
        )]
    );
    assert!(prg.error_flag);
    assert!(prg.predicates[later].entries.is_some());
}

#[test]
fn object_variables_read_their_initial_value_through_clauses() {
    let mut prg = story();
    prg.objects.extend(["lamp".to_string(), "table".to_string()]);

    let mut location = Predicate::new("$ is in $", 2);
    location.flags = PredFlags::DYNAMIC;
    location.dyn_id = Some(0);
    let location = prg.add_predicate(location);
    prg.object_vars.push(location);

    fact(&mut prg, location, vec![Term::Object(0), Term::Object(1)], vec![], 0);

    compile(&mut prg, CompilerSettings::quiet());

    let entries = prg.predicates[location]
        .entries
        .unwrap_or_else(|| panic!("not compiled"));
    let initial = entries.initial_value.unwrap_or_else(|| panic!("no initial value entry"));

    assert_ne!(entries.normal, initial);
    assert_eq!(entry(&prg, location).instr[0].op, Opcode::IfBound);
    assert_eq!(count(&prg, location, Opcode::GetOvarV), 2);

    let dump = dump_predicate(&prg, location);
    let header = format!("Intermediate code for $ is in $: {} {}", entries.normal, initial);

    assert_eq!(dump.lines().next(), Some(header.as_str()));
    assert!(dump.contains(" $ is in $\n"));
}

#[test]
fn traced_dumps() {
    let mut prg = story();
    let look = predicate(&mut prg, "look", 0);
    let describe = predicate(&mut prg, "describe", 0);

    fact(&mut prg, look, vec![], vec![goal(describe, vec![], 12)], 0);
    fact(&mut prg, describe, vec![], vec![Stmt::BareWord(0)], 0);
    prg.words.push("Dark.".into());

    compile(&mut prg, CompilerSettings::default().with_verbose(4));

    let dump = dump_predicate(&prg, look);

    assert!(dump.starts_with("Intermediate code for look: "));
    assert!(dump.contains("R0: (group leader)"));
    assert!(dump.contains(" story.dg:12"));
    assert!(dump.contains(" describe"));

    let repeat = prg
        .builtin(BuiltinId::Repeat)
        .unwrap_or_else(|| panic!("no (repeat forever)"));
    let dump = dump_builtin(&prg, repeat);

    assert!(dump.starts_with(&format!("Intermediate code for builtin {}, Repeat:\n", BuiltinId::Repeat as u8)));
    assert!(dump.contains("PUSH_CHOICE"));
}
