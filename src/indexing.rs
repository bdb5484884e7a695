use crate::codegen::*;
use crate::forms::*;
use crate::instructions::*;

use smallvec::SmallVec;

/// One way into a clause: which clause, and how much of its first
/// parameter and body an index dispatch has already consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// The dispatch key, once the entry has been expanded for an index.
    pub(crate) key: Operand,
    pub(crate) clause_id: usize,
    pub(crate) n_drop_from_arg0: usize,
    pub(crate) n_drop_from_body: usize,
}

impl IndexEntry {
    #[inline]
    pub(crate) fn new(clause_id: usize) -> Self {
        IndexEntry {
            key: Operand::None,
            clause_id,
            n_drop_from_arg0: 0,
            n_drop_from_body: 0,
        }
    }

    #[inline]
    fn same_target(&self, other: &IndexEntry) -> bool {
        self.clause_id == other.clause_id
            && self.n_drop_from_arg0 == other.n_drop_from_arg0
            && self.n_drop_from_body == other.n_drop_from_body
    }
}

type IndexEntries = SmallVec<[IndexEntry; 8]>;

/// The first parameter and the body of a clause, as seen from an entry.
fn parse_index_entry<'c>(clauses: &'c [Clause], entry: &IndexEntry) -> (&'c Term, &'c [Stmt]) {
    let cl = &clauses[entry.clause_id];
    let mut param = &cl.params[0];

    for _ in 0..entry.n_drop_from_arg0 {
        match param {
            Term::Pair(_, tail) => param = tail,
            _ => panic!("index entry drops through non-pair {param:?}"),
        }
    }

    (param, &cl.body[entry.n_drop_from_body..])
}

/// The `(is $ one of $)` goal that opens `body` and restricts `var` to a
/// list of constants, if there is one and `var` is not used anywhere else.
fn one_of_restriction<'c>(prg: &Program, var: VarId, body: &'c [Stmt]) -> Option<&'c Term> {
    let call = body.first()?.as_call()?;

    if prg.predicates[call.pred].builtin != Some(BuiltinId::IsOneOf)
        || call.args[0] != Term::Var(var)
        || mentions(&body[1..], var)
    {
        return None;
    }

    call.args[1].constant_list().map(|_| &call.args[1])
}

/// How many index keys a parameter contributes, or `None` if the clause
/// cannot take part in an index.
fn indexable_values(prg: &Program, param: &Term, body: &[Stmt]) -> Option<usize> {
    match param {
        Term::Pair(..) | Term::Anon => None,
        &Term::Var(v) => one_of_restriction(prg, v, body)
            .and_then(Term::constant_list)
            .map(|items| items.len()),
        _ => Some(1),
    }
}

fn expand_entry(prg: &Program, clauses: &[Clause], src: &IndexEntry, indirect: bool, dest: &mut IndexEntries) {
    let (mut param, body) = parse_index_entry(clauses, src);
    let n_drop_from_arg0 = src.n_drop_from_arg0 + indirect as usize;

    if indirect {
        match param {
            Term::Pair(head, _) => param = head,
            _ => panic!("indirect index entry for non-pair {param:?}"),
        }
    }

    match param {
        &Term::Var(v) => {
            let items = one_of_restriction(prg, v, body)
                .and_then(Term::constant_list)
                .unwrap_or_else(|| panic!("V{v} is not restricted to a list of constants"));

            dest.extend(items.into_iter().map(|item| IndexEntry {
                key: prg.resolve_value(item),
                clause_id: src.clause_id,
                n_drop_from_arg0,
                n_drop_from_body: src.n_drop_from_body + 1,
            }));
        }
        _ => {
            let key = param
                .simple_value()
                .unwrap_or_else(|| panic!("{param:?} cannot be an index key"));

            dest.push(IndexEntry {
                key: prg.resolve_value(key),
                clause_id: src.clause_id,
                n_drop_from_arg0,
                n_drop_from_body: src.n_drop_from_body,
            });
        }
    }
}

enum Chunk {
    Direct,
    Indirect,
    Linear,
}

impl CodeGenerator<'_> {
    fn can_be_directly_indexed(&self, entry: &IndexEntry) -> Option<usize> {
        if self.pred().arity == 0 {
            return None;
        }

        let (param, body) = parse_index_entry(self.clauses, entry);
        indexable_values(self.prg, param, body)
    }

    fn can_be_indirectly_indexed(&self, entry: &IndexEntry) -> Option<usize> {
        if self.pred().arity == 0 {
            return None;
        }

        match parse_index_entry(self.clauses, entry) {
            (Term::Pair(head, _), body) => indexable_values(self.prg, head, body),
            _ => None,
        }
    }

    /// Length of the run of entries starting at `entries[0]` that can share
    /// an index of the given kind, and the number of keys in that run.
    fn chunk(&self, entries: &[IndexEntry]) -> (Chunk, usize, usize) {
        let run = |test: &dyn Fn(&IndexEntry) -> Option<usize>| {
            let mut count = 0;
            let mut nval = 0;

            for entry in entries {
                match test(entry) {
                    Some(n) => {
                        count += 1;
                        nval += n;
                    }
                    None => break,
                }
            }

            (count, nval)
        };

        if !self.pred().flags.contains(PredFlags::FIXED_FLAG) {
            let (count, nval) = run(&|entry| self.can_be_directly_indexed(entry));

            if count > 0 {
                return (Chunk::Direct, count, nval);
            }
        }

        let (count, nval) = run(&|entry| self.can_be_indirectly_indexed(entry));

        if count > 0 {
            (Chunk::Indirect, count, nval)
        } else {
            (Chunk::Linear, 1, 0)
        }
    }

    /// Tries each entry in turn, leaving a choice point in front of all but
    /// the last.
    pub(crate) fn comp_clause_chain_unbound(&mut self, entries: &[IndexEntry], ignore_arg0: bool) {
        assert!(!entries.is_empty());

        let narg = self.pred().choice_args();

        for (i, entry) in entries.iter().enumerate() {
            let next = self.push_alternative(narg, i + 1 == entries.len());

            self.comp_clause(entry, ignore_arg0);
            self.pop_alternative(narg, next);
        }
    }

    fn push_alternative(&mut self, narg: usize, last: bool) -> Option<RoutineId> {
        if last {
            return None;
        }

        let next = self.b.new_routine();
        emit!(self.b, PushChoice, num!(narg), label!(next));
        Some(next)
    }

    fn pop_alternative(&mut self, narg: usize, next: Option<RoutineId>) {
        if let Some(next) = next {
            self.b.begin_routine(next);
            emit!(self.b, PopChoice, num!(narg));
        }
    }

    /// Compiles a sequence of clauses, indexing runs of clauses on the first
    /// argument (direct) or on the head of a first argument list (indirect).
    pub(crate) fn comp_clause_chain(&mut self, entries: &[IndexEntry]) {
        assert!(!entries.is_empty());

        let (narg, unbound_in, flags) = {
            let pred = self.pred();
            (pred.choice_args(), pred.unbound_in, pred.flags)
        };
        let may_be_unbound = unbound_in & 1 != 0 || flags.contains(PredFlags::DYNAMIC);

        let mut i = 0;

        while i < entries.len() {
            let (kind, count, nval) = self.chunk(&entries[i..]);
            let chunk = &entries[i..i + count];
            let next = self.push_alternative(narg, i + count == entries.len());

            match kind {
                Chunk::Direct if count > 1 => {
                    if may_be_unbound {
                        let lab = self.b.new_routine();

                        emit!(self.b, IfBound, arg!(0)).set_subop(1).set_implicit(lab);
                        self.comp_direct_index_block(chunk, nval);
                        self.b.begin_routine(lab);
                        self.comp_clause_chain_unbound(chunk, false);
                    } else {
                        self.comp_direct_index_block(chunk, nval);
                    }
                }
                Chunk::Indirect if count > 1 => {
                    emit!(self.b, GetPairRr, arg!(0), temp!(0), temp!(1));

                    if may_be_unbound {
                        let lab = self.b.new_routine();

                        emit!(self.b, IfBound, temp!(0)).set_subop(1).set_implicit(lab);
                        self.comp_indirect_index_block(chunk, nval);
                        self.b.begin_routine(lab);
                        self.comp_clause_chain_unbound(chunk, false);
                    } else {
                        self.comp_indirect_index_block(chunk, nval);
                    }
                }
                _ => {
                    self.comp_clause(&chunk[0], false);
                }
            }

            self.pop_alternative(narg, next);
            i += count;
        }
    }

    fn expand_entries(&self, incoming: &[IndexEntry], nval: usize, indirect: bool) -> IndexEntries {
        let mut entries = IndexEntries::with_capacity(nval);

        for src in incoming {
            expand_entry(self.prg, self.clauses, src, indirect, &mut entries);
        }

        assert_eq!(entries.len(), nval);

        // stable with respect to clause order within a key
        entries.sort_by(|a, b| a.key.cmp(&b.key).then(a.clause_id.cmp(&b.clause_id)));
        entries
    }

    fn comp_direct_index_block(&mut self, incoming: &[IndexEntry], nval: usize) {
        let entries = self.expand_entries(incoming, nval, false);

        tracing::trace!(target: "dialogc::indexing", clauses = incoming.len(), keys = nval, "direct index");

        emit!(self.b, PrepareIndex, arg!(0));
        self.comp_index_check_and_go(&entries, false);
    }

    fn comp_indirect_index_block(&mut self, incoming: &[IndexEntry], nval: usize) {
        emit!(self.b, Assign, arg!(0), temp!(1));

        let entries = self.expand_entries(incoming, nval, true);

        tracing::trace!(target: "dialogc::indexing", clauses = incoming.len(), keys = nval, "indirect index");

        emit!(self.b, PrepareIndex, temp!(0));
        self.comp_index_check_and_go(&entries, true);
    }

    /// Emits one CHECK_INDEX per distinct key, sharing the target routine
    /// between keys that lead to the same sequence of entries.
    fn comp_index_check_and_go(&mut self, entries: &[IndexEntry], indirect: bool) {
        let mut forks: Vec<(Operand, usize)> = vec![];
        let mut targets: Vec<(&[IndexEntry], RoutineId)> = vec![];
        let mut j = 0;

        while j < entries.len() {
            let key = entries[j].key;
            let n = entries[j..].iter().take_while(|entry| entry.key == key).count();
            let group = &entries[j..j + n];

            assert!(key.is_constant(), "index key {key:?} is not a constant");

            let existing = targets.iter().position(|(seq, _)| {
                seq.len() == group.len() && seq.iter().zip(group).all(|(a, b)| a.same_target(b))
            });

            let t = match existing {
                Some(t) => t,
                None => {
                    targets.push((group, self.b.new_routine()));
                    targets.len() - 1
                }
            };

            forks.push((key, t));
            j += n;
        }

        for &(key, t) in &forks {
            emit!(self.b, CheckIndex, key, label!(targets[t].1));
        }

        emit!(self.b, Jump, Operand::Fail);
        self.b.end_routine(None);

        for (group, lab) in targets {
            self.b.begin_routine(lab);

            if !indirect {
                self.comp_clause_chain_unbound(group, true);
            } else if group.len() == 1 {
                self.comp_clause(&group[0], false);
            } else {
                self.comp_clause_chain(group);
            }
        }
    }
}
