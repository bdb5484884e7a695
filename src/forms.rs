//! The resolved program handed over by the front end.
//!
//! Everything here is read-only input to code generation except for the
//! bookkeeping written back onto clauses (`next_temp`, frame layout) and the
//! finished routines stored on each predicate.

use crate::instructions::*;

use derive_more::{BitAnd, BitOr, BitOrAssign};
use fxhash::FxBuildHasher;
use indexmap::IndexSet;

pub type VarId = usize;
pub type PredId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePos {
    pub file: usize,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(VarId),
    /// The anonymous variable `$`.
    Anon,
    Object(usize),
    Integer(u32),
    DictWord(usize),
    EmptyList,
    Pair(Box<Term>, Box<Term>),
}

impl Term {
    #[inline]
    pub fn pair(head: Term, tail: Term) -> Term {
        Term::Pair(Box::new(head), Box::new(tail))
    }

    pub fn list<I>(items: I) -> Term
    where
        I: IntoIterator<Item = Term>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Term::EmptyList, |tail, head| Term::pair(head, tail))
    }

    #[inline]
    pub fn is_anon(&self) -> bool {
        matches!(self, Term::Anon)
    }

    #[inline]
    pub fn named_var(&self) -> Option<VarId> {
        match self {
            &Term::Var(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_simple_constant(&self) -> bool {
        self.simple_value().is_some()
    }

    /// The operand of an atomic constant, before dictionary remapping.
    pub fn simple_value(&self) -> Option<Operand> {
        match self {
            &Term::Object(o) => Some(Operand::Object(o)),
            &Term::Integer(n) => Some(Operand::Integer(n)),
            &Term::DictWord(d) => Some(Operand::Dict(d)),
            Term::EmptyList => Some(Operand::Nil),
            _ => None,
        }
    }

    /// The elements of a proper list of atomic constants.
    pub fn constant_list(&self) -> Option<Vec<Operand>> {
        let mut items = vec![];
        let mut term = self;

        while let Term::Pair(head, tail) = term {
            items.push(head.simple_value()?);
            term = tail;
        }

        match term {
            Term::EmptyList => Some(items),
            _ => None,
        }
    }

    pub fn visit_vars(&self, f: &mut impl FnMut(VarId)) {
        match self {
            &Term::Var(v) => f(v),
            Term::Pair(head, tail) => {
                head.visit_vars(f);
                tail.visit_vars(f);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub pred: PredId,
    pub args: Vec<Term>,
    /// Bit `i` is set when argument `i` may be unbound when the call is made.
    pub unbound: u32,
    /// Called in a context that may want more than one solution.
    pub multi: bool,
    pub pos: SourcePos,
}

impl Call {
    #[inline]
    pub fn is_bound(&self, i: usize) -> bool {
        self.unbound & (1 << i) == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectMode {
    Stopping = 0,
    Random,
    PurelyRandom,
    ThenRandom,
    ThenPurelyRandom,
    Cycling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BoxKind {
    Div = 0,
    Span,
}

impl BoxKind {
    pub fn name(self) -> &'static str {
        match self {
            BoxKind::Div => "(div $)",
            BoxKind::Span => "(span $)",
        }
    }
}

/// Body statements. `mark` fields name the hidden frame variable that holds
/// a saved choice-point height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Call(Call),
    NegCall {
        call: Call,
        mark: VarId,
    },
    Block(Vec<Stmt>),
    Or(Vec<Vec<Stmt>>),
    If {
        cond: Vec<Stmt>,
        then: Vec<Stmt>,
        els: Vec<Stmt>,
        mark: VarId,
    },
    NegBlock {
        body: Vec<Stmt>,
        mark: VarId,
    },
    Exhaust(Vec<Stmt>),
    FirstResult {
        body: Vec<Stmt>,
        mark: VarId,
    },
    Select {
        alternatives: Vec<Vec<Stmt>>,
        mode: SelectMode,
        site: u32,
    },
    Just,
    Collect {
        body: Vec<Stmt>,
        value: Term,
        into: Term,
    },
    CollectWords {
        body: Vec<Stmt>,
        into: Term,
    },
    DetermineObject {
        obj: Term,
        objgen: Vec<Stmt>,
        wordgen: Vec<Stmt>,
        words: Term,
        wordmap: Option<usize>,
        pos: SourcePos,
    },
    Stoppable(Vec<Stmt>),
    OutputBox {
        kind: BoxKind,
        class: Term,
        body: Vec<Stmt>,
        mark: VarId,
        pos: SourcePos,
    },
    Now(Vec<Stmt>),
    BareWord(usize),
    Print(Term),
}

impl Stmt {
    /// Every named variable occurring in the statement, nested bodies
    /// included. Hidden choice marks are not part of the source text and
    /// are skipped.
    pub fn visit_vars(&self, f: &mut impl FnMut(VarId)) {
        fn visit_body(body: &[Stmt], f: &mut impl FnMut(VarId)) {
            for stmt in body {
                stmt.visit_vars(f);
            }
        }

        match self {
            Stmt::Call(call) | Stmt::NegCall { call, .. } => {
                for arg in &call.args {
                    arg.visit_vars(f);
                }
            }
            Stmt::Block(body)
            | Stmt::NegBlock { body, .. }
            | Stmt::Exhaust(body)
            | Stmt::FirstResult { body, .. }
            | Stmt::Stoppable(body)
            | Stmt::Now(body) => visit_body(body, f),
            Stmt::Or(branches) | Stmt::Select { alternatives: branches, .. } => {
                for branch in branches {
                    visit_body(branch, f);
                }
            }
            Stmt::If { cond, then, els, .. } => {
                visit_body(cond, f);
                visit_body(then, f);
                visit_body(els, f);
            }
            Stmt::Collect { body, value, into } => {
                visit_body(body, f);
                value.visit_vars(f);
                into.visit_vars(f);
            }
            Stmt::CollectWords { body, into } => {
                visit_body(body, f);
                into.visit_vars(f);
            }
            Stmt::DetermineObject { obj, objgen, wordgen, words, .. } => {
                obj.visit_vars(f);
                visit_body(objgen, f);
                visit_body(wordgen, f);
                words.visit_vars(f);
            }
            Stmt::OutputBox { class, body, .. } => {
                class.visit_vars(f);
                visit_body(body, f);
            }
            Stmt::Print(term) => term.visit_vars(f),
            Stmt::Just | Stmt::BareWord(_) => {}
        }
    }

    /// The call of a plain goal statement.
    #[inline]
    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Stmt::Call(call) => Some(call),
            _ => None,
        }
    }
}

pub fn mentions(body: &[Stmt], var: VarId) -> bool {
    let mut found = false;

    for stmt in body {
        stmt.visit_vars(&mut |v| found |= v == var);
    }

    found
}

pub fn contains_just(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Just => true,
        Stmt::Block(body)
        | Stmt::NegBlock { body, .. }
        | Stmt::Exhaust(body)
        | Stmt::FirstResult { body, .. }
        | Stmt::Stoppable(body)
        | Stmt::Collect { body, .. }
        | Stmt::CollectWords { body, .. }
        | Stmt::OutputBox { body, .. } => contains_just(body),
        Stmt::Or(branches) | Stmt::Select { alternatives: branches, .. } => {
            branches.iter().any(|branch| contains_just(branch))
        }
        Stmt::If { cond, then, els, .. } => {
            contains_just(cond) || contains_just(then) || contains_just(els)
        }
        Stmt::DetermineObject { objgen, wordgen, .. } => {
            contains_just(objgen) || contains_just(wordgen)
        }
        _ => false,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    pub params: Vec<Term>,
    pub body: Vec<Stmt>,
    /// Size of the variable frame.
    pub nvar: usize,
    pub varnames: Vec<String>,
    /// First temporary index not used by the generated code.
    pub next_temp: usize,
    pub pos: SourcePos,
    /// The hidden variable holding the choice height for `(just)`.
    pub just_var: Option<VarId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BitOr, BitOrAssign, BitAnd)]
pub struct PredFlags(u32);

impl PredFlags {
    pub const NONE: PredFlags = PredFlags(0);
    /// Updated at runtime with `(now)`.
    pub const DYNAMIC: PredFlags = PredFlags(0x0001);
    /// Never succeeds.
    pub const FAIL: PredFlags = PredFlags(0x0002);
    pub const MACRO: PredFlags = PredFlags(0x0004);
    pub const CONTAINS_JUST: PredFlags = PredFlags(0x0008);
    /// Per-object flag stored as a fixed attribute rather than a list.
    pub const FIXED_FLAG: PredFlags = PredFlags(0x0010);
    pub const GLOBAL_VAR: PredFlags = PredFlags(0x0020);
    pub const INVOKED_SIMPLE: PredFlags = PredFlags(0x0040);
    pub const INVOKED_MULTI: PredFlags = PredFlags(0x0080);
    pub const INVOKED_NORMALLY: PredFlags = PredFlags(0x0100);
    pub const INVOKED_FOR_WORDS: PredFlags = PredFlags(0x0200);
    /// Always succeeds at least once.
    pub const SUCCEEDS: PredFlags = PredFlags(0x0400);

    #[inline]
    pub fn contains(self, other: PredFlags) -> bool {
        self & other == other
    }

    /// Sub-op of PROCEED and the tail invokes: 1 for callers that only
    /// want one solution, 2 for callers that only backtrack.
    pub fn invocation_subop(self) -> u8 {
        let simple = self.contains(PredFlags::INVOKED_SIMPLE);
        let multi = self.contains(PredFlags::INVOKED_MULTI);

        match (simple, multi) {
            (true, false) => 1,
            (false, true) => 2,
            _ => 0,
        }
    }
}

/// Builtin predicates known to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BuiltinId {
    InjectedQuery,
    Query,
    QueryArg,
    HasParent,
    Stop,
    Quit,
    Restart,
    Number,
    Empty,
    NonEmpty,
    Object,
    Word,
    List,
    Bound,
    Unify,
    LessThan,
    GreaterThan,
    Plus,
    Minus,
    Times,
    Divided,
    Modulo,
    Random,
    IsOneOf,
    Split,
    HaveUndo,
    ScriptOn,
    ScriptOff,
    TraceOn,
    TraceOff,
    NoSpace,
    Space,
    SpaceN,
    Line,
    Par,
    Unstyle,
    Roman,
    Bold,
    Italic,
    Reverse,
    Fixed,
    Upper,
    Clear,
    ClearAll,
    SerialNumber,
    CompilerVersion,
    MemStats,
    ProgressBar,
    WordRepReturn,
    WordRepSpace,
    WordRepBackspace,
    WordRepUp,
    WordRepDown,
    WordRepLeft,
    WordRepRight,
    Repeat,
    GetInput,
    GetRawInput,
    GetKey,
    Breakpoint,
    BreakpointAgain,
    BreakGetKey,
    BreakFail,
    Save,
    SaveUndo,
    Restore,
    Undo,
    Fail,
}

impl BuiltinId {
    /// The character a word-representation builtin stands for.
    pub fn word_rep_char(self) -> Option<char> {
        let code: u8 = match self {
            BuiltinId::WordRepReturn => 13,
            BuiltinId::WordRepSpace => 32,
            BuiltinId::WordRepBackspace => 8,
            BuiltinId::WordRepUp => 16,
            BuiltinId::WordRepDown => 17,
            BuiltinId::WordRepLeft => 18,
            BuiltinId::WordRepRight => 19,
            _ => return None,
        };

        Some(char::from(code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordMapEntry {
    /// Dictionary word, or `None` for objects that match any word.
    pub key: Option<usize>,
    pub objects: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordMap {
    pub entries: Vec<WordMapEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct Predicate {
    pub name: String,
    pub arity: usize,
    pub builtin: Option<BuiltinId>,
    pub flags: PredFlags,
    /// Global flag, per-object flag or per-object variable id.
    pub dyn_id: Option<usize>,
    /// Global variable id.
    pub dyn_var_id: Option<usize>,
    /// Bit `i` is set when argument `i` may be unbound on entry.
    pub unbound_in: u32,
    pub clauses: Vec<Clause>,
    pub wordmaps: Vec<WordMap>,
    pub special: bool,
    pub definable_builtin: bool,
    pub entries: Option<EntryPoints>,
    pub routines: Vec<Routine>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Predicate {
            name: name.into(),
            arity,
            ..Predicate::default()
        }
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(PredFlags::DYNAMIC)
    }

    #[inline]
    pub fn fails(&self) -> bool {
        self.flags.contains(PredFlags::FAIL)
    }

    /// Number of argument registers a choice point must save.
    #[inline]
    pub fn choice_args(&self) -> usize {
        self.arity + self.flags.contains(PredFlags::CONTAINS_JUST) as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub predicates: Vec<Predicate>,
    pub dictionary: IndexSet<String, FxBuildHasher>,
    /// Words printed by bare-word statements.
    pub words: Vec<String>,
    pub objects: Vec<String>,
    /// Output box classes, as dictionary word ids.
    pub boxclasses: IndexSet<usize, FxBuildHasher>,
    /// Encoded value of every dictionary word, once the back end has
    /// assigned them.
    pub dictmap: Option<Vec<u32>>,
    pub source_files: Vec<String>,
    pub global_flags: Vec<PredId>,
    pub global_vars: Vec<PredId>,
    pub object_flags: Vec<PredId>,
    pub object_vars: Vec<PredId>,
    pub error_flag: bool,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_predicate(&mut self, pred: Predicate) -> PredId {
        self.predicates.push(pred);
        self.predicates.len() - 1
    }

    pub fn builtin(&self, id: BuiltinId) -> Option<PredId> {
        self.predicates
            .iter()
            .position(|pred| pred.builtin == Some(id))
    }

    pub fn ensure_dict_word(&mut self, word: &str) -> usize {
        match self.dictionary.get_index_of(word) {
            Some(idx) => idx,
            None => self.dictionary.insert_full(word.to_owned()).0,
        }
    }

    pub fn find_boxclass(&mut self, dict_word: usize) -> usize {
        self.boxclasses.insert_full(dict_word).0
    }

    /// Applies the back end's dictionary encoding to a constant.
    pub fn resolve_value(&self, v: Operand) -> Operand {
        match (v, &self.dictmap) {
            (Operand::Dict(d), Some(map)) => Operand::Raw(map[d]),
            _ => v,
        }
    }

    /// Whether a body is known to succeed without touching the choice
    /// stack.
    pub fn body_succeeds(&self, body: &[Stmt]) -> bool {
        body.iter().all(|stmt| match stmt {
            Stmt::Call(call) => {
                let callee = &self.predicates[call.pred];
                callee.flags.contains(PredFlags::SUCCEEDS) && !callee.fails()
            }
            Stmt::Block(body) | Stmt::FirstResult { body, .. } => self.body_succeeds(body),
            Stmt::Now(_) | Stmt::BareWord(_) | Stmt::Print(_) => true,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_lists() {
        let list = Term::list([Term::Integer(1), Term::DictWord(0), Term::EmptyList]);

        assert_eq!(
            list.constant_list(),
            Some(vec![Operand::Integer(1), Operand::Dict(0), Operand::Nil])
        );

        let open = Term::pair(Term::Integer(1), Term::Var(0));
        assert_eq!(open.constant_list(), None);

        let nested = Term::list([Term::list([Term::Integer(1)])]);
        assert_eq!(nested.constant_list(), None);
    }

    #[test]
    fn invocation_subops() {
        assert_eq!(PredFlags::INVOKED_SIMPLE.invocation_subop(), 1);
        assert_eq!(PredFlags::INVOKED_MULTI.invocation_subop(), 2);
        assert_eq!(
            (PredFlags::INVOKED_SIMPLE | PredFlags::INVOKED_MULTI).invocation_subop(),
            0
        );
        assert_eq!(PredFlags::NONE.invocation_subop(), 0);
    }

    #[test]
    fn just_is_found_in_nested_bodies() {
        let body = vec![Stmt::Or(vec![vec![], vec![Stmt::Block(vec![Stmt::Just])]])];

        assert!(contains_just(&body));
        assert!(!contains_just(&[Stmt::BareWord(0)]));
    }

    #[test]
    fn dictionary_remapping() {
        let mut prg = Program::new();
        let w = prg.ensure_dict_word("lamp");

        assert_eq!(prg.ensure_dict_word("lamp"), w);
        assert_eq!(prg.resolve_value(Operand::Dict(w)), Operand::Dict(w));

        prg.dictmap = Some(vec![0x3e01]);
        assert_eq!(prg.resolve_value(Operand::Dict(w)), Operand::Raw(0x3e01));
        assert_eq!(prg.resolve_value(Operand::Integer(4)), Operand::Integer(4));
    }
}
