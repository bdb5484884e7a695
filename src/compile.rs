//! Per-predicate driver: code generation, specialised entry points and the
//! optimisation fixpoint.

use crate::builder::*;
use crate::codegen::*;
use crate::compile_errors::*;
use crate::config::*;
use crate::dump::*;
use crate::forms::*;
use crate::indexing::*;
use crate::instructions::*;
use crate::library::*;
use crate::passes::*;

/// Counts the errors passing through to the caller's sink.
struct CountingDiagnostics<'d> {
    inner: &'d mut dyn Diagnostics,
    errors: usize,
}

impl Diagnostics for CountingDiagnostics<'_> {
    fn report(&mut self, level: Level, pos: SourcePos, err: CompilationError) {
        if level == Level::Error {
            self.errors += 1;
        }

        self.inner.report(level, pos, err);
    }
}

/// Compiles predicates one at a time. The routine scratch space is reused
/// across predicates; finished routines are moved onto the predicate.
#[derive(Debug, Default)]
pub struct Compiler {
    builder: RoutineBuilder,
    settings: CompilerSettings,
}

impl Compiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Compiler {
            builder: RoutineBuilder::new(),
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Compiles the clauses of `pred_id`, adds the front end of dynamic
    /// predicates and optimises the result.
    pub fn compile_predicate(&mut self, prg: &mut Program, diag: &mut dyn Diagnostics, pred_id: PredId) {
        self.builder.reset();

        let mut clauses = std::mem::take(&mut prg.predicates[pred_id].clauses);
        let (arity, flags, builtin) = {
            let pred = &prg.predicates[pred_id];
            (pred.arity, pred.flags, pred.builtin)
        };

        let normal = self.builder.new_routine();
        let mut entries = EntryPoints {
            normal,
            initial_value: None,
        };

        self.builder.begin_routine(normal);

        if clauses.is_empty() {
            emit!(self.builder, Jump, Operand::Fail);
            self.builder.end_routine(None);
        } else {
            if flags.contains(PredFlags::CONTAINS_JUST) {
                emit!(self.builder, SaveChoice, arg!(arity));
            }

            let chain: Vec<IndexEntry> = (0..clauses.len()).map(IndexEntry::new).collect();
            let next_temp = {
                let mut gen =
                    CodeGenerator::new(prg, diag, self.settings, pred_id, &clauses, &mut self.builder);

                gen.comp_clause_chain(&chain);
                std::mem::take(&mut gen.next_temp)
            };

            for (cl, n) in clauses.iter_mut().zip(next_temp) {
                cl.next_temp = n;
            }
        }

        let pred = &prg.predicates[pred_id];
        let is_dynamic = flags.contains(PredFlags::DYNAMIC);

        if builtin == Some(BuiltinId::HasParent) {
            entries = self.specialise(normal);
            comp_has_parent(&mut self.builder, prg, pred);
        } else if is_dynamic && arity == 2 {
            entries = self.specialise(normal);
            comp_dyn_var(&mut self.builder, prg, pred);
        } else if is_dynamic && arity == 1 && !flags.contains(PredFlags::GLOBAL_VAR) {
            entries = self.specialise(normal);
            comp_dyn_list(&mut self.builder, pred, normal);
        }

        let mut routines = self.builder.take_routines();
        let iterations = self.optimize(&mut routines, &mut clauses, entries, &pred.name);

        tracing::debug!(
            target: "dialogc::compile",
            pred = %pred.name,
            routines = routines.len(),
            iterations,
            "compiled predicate"
        );

        let pred = &mut prg.predicates[pred_id];

        pred.clauses = clauses;
        pred.routines = routines;
        pred.entries = Some(entries);

        if self.settings.verbose >= 4 {
            tracing::trace!(target: "dialogc::compile", "{}", PredicateListing { prg, pred_id });
        }
    }

    /// Demotes the clause code to the initial-value entry and opens a fresh
    /// normal entry.
    fn specialise(&mut self, clause_entry: RoutineId) -> EntryPoints {
        let normal = self.builder.new_routine();

        self.builder.begin_routine(normal);

        EntryPoints {
            normal,
            initial_value: Some(clause_entry),
        }
    }

    /// Runs the rewriting passes until they agree there is nothing left to
    /// do, then packs the routines. Returns the number of rounds.
    fn optimize(
        &self,
        routines: &mut [Routine],
        clauses: &mut [Clause],
        entries: EntryPoints,
        name: &str,
    ) -> usize {
        let mut iterations = 0;

        loop {
            let mut any = optimize_env_frames(routines, self.settings.env_frames);

            if self.settings.choice_frames {
                any |= optimize_choice_frames(routines);
            }

            track_refs(routines, entries);

            let frameless = optimize_vars(routines, clauses);
            any |= frameless > 0;
            iterations += 1;

            tracing::trace!(target: "dialogc::compile", pred = name, round = iterations, frameless, changed = any);

            if !any {
                break;
            }

            assert!(
                iterations < self.settings.max_fixpoint_iterations,
                "optimisation of {name} did not settle after {iterations} rounds"
            );
        }

        pack_instructions(routines);
        resolve_jump_chains(routines, entries);
        track_refs(routines, entries);

        iterations
    }

    /// Compiles the library builtins that have hand-written routines.
    /// Builtins the program does not declare are skipped.
    pub fn compile_builtins(&mut self, prg: &mut Program) {
        for builtin in LIBRARY_BUILTINS {
            let Some(pred_id) = prg.builtin(builtin) else {
                continue;
            };

            self.builder.reset();

            let normal = self.builder.new_routine();
            let entries = EntryPoints {
                normal,
                initial_value: None,
            };

            self.builder.begin_routine(normal);
            comp_builtin_template(&mut self.builder, prg, builtin);

            let mut routines = self.builder.take_routines();
            track_refs(&mut routines, entries);

            tracing::debug!(
                target: "dialogc::compile",
                builtin = ?builtin,
                routines = routines.len(),
                "compiled library builtin"
            );

            let pred = &mut prg.predicates[pred_id];

            pred.routines = routines;
            pred.entries = Some(entries);

            if self.settings.verbose >= 4 {
                tracing::trace!(target: "dialogc::compile", "{}", BuiltinListing { prg, pred_id });
            }
        }
    }
}

/// Whether `compile_program` generates code from the clauses of `pred`.
pub fn compiles_from_clauses(pred: &Predicate) -> bool {
    let eligible = match pred.builtin {
        None | Some(BuiltinId::HasParent | BuiltinId::Query | BuiltinId::QueryArg) => true,
        Some(_) => pred.definable_builtin,
    };

    eligible && !pred.special && !pred.flags.contains(PredFlags::MACRO)
}

/// Compiles the library builtins and every predicate defined by clauses.
///
/// User errors go to `diag` as they are found and compilation carries on;
/// the result reports whether any were found.
pub fn compile_program(
    prg: &mut Program,
    diag: &mut dyn Diagnostics,
    settings: CompilerSettings,
) -> Result<(), CompileFailure> {
    let mut compiler = Compiler::new(settings);
    let mut diag = CountingDiagnostics { inner: diag, errors: 0 };

    compiler.compile_builtins(prg);

    for pred_id in 0..prg.predicates.len() {
        if compiles_from_clauses(&prg.predicates[pred_id]) {
            compiler.compile_predicate(prg, &mut diag, pred_id);
        }
    }

    tracing::debug!(
        target: "dialogc::compile",
        predicates = prg.predicates.len(),
        errors = diag.errors,
        "program compiled"
    );

    if prg.error_flag {
        Err(CompileFailure {
            errors: diag.errors.max(1),
        })
    } else {
        Ok(())
    }
}
