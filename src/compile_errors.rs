use crate::forms::SourcePos;

use thiserror::Error;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// Errors in the source program that are found while generating code.
/// Generation continues after reporting one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("Cannot modify non-dynamic predicate.")]
    ModifyNonDynamic,
    #[error("When unsetting a global variable, the argument must be anonymous ($).")]
    UnsetGlobalVarNotAnonymous,
    #[error("When unsetting a per-object variable, the second argument must be anonymous ($).")]
    UnsetObjectVarNotAnonymous,
    #[error("The parameter of {0} must be a dictionary word.")]
    BoxParameterNotDictWord(String),
}

/// Channel through which the compiler hands user errors to its caller.
pub trait Diagnostics {
    fn report(&mut self, level: Level, pos: SourcePos, err: CompilationError);
}

/// Keeps every report, in order.
#[derive(Debug, Default)]
pub struct CollectDiagnostics {
    pub reports: Vec<(Level, SourcePos, CompilationError)>,
}

impl CollectDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = &CompilationError> {
        self.reports
            .iter()
            .filter(|(level, ..)| *level == Level::Error)
            .map(|(_, _, err)| err)
    }
}

impl Diagnostics for CollectDiagnostics {
    fn report(&mut self, level: Level, pos: SourcePos, err: CompilationError) {
        self.reports.push((level, pos, err));
    }
}

/// Forwards reports to the `tracing` subscriber of the host application.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&mut self, level: Level, pos: SourcePos, err: CompilationError) {
        match level {
            Level::Error => tracing::error!(
                target: "dialogc::compile",
                file = pos.file,
                line = pos.line,
                "{err}"
            ),
            Level::Warning => tracing::warn!(
                target: "dialogc::compile",
                file = pos.file,
                line = pos.line,
                "{err}"
            ),
        }
    }
}

/// Returned by [`compile_program`](crate::compile::compile_program) once any
/// user error was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("compilation failed with {errors} error(s)")]
pub struct CompileFailure {
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            CompilationError::ModifyNonDynamic.to_string(),
            "Cannot modify non-dynamic predicate."
        );
        assert_eq!(
            CompilationError::BoxParameterNotDictWord("(div $)".into()).to_string(),
            "The parameter of (div $) must be a dictionary word."
        );
    }

    #[test]
    fn collect_keeps_order() {
        let mut diag = CollectDiagnostics::new();
        let pos = SourcePos { file: 0, line: 3 };

        diag.report(Level::Warning, pos, CompilationError::ModifyNonDynamic);
        diag.report(Level::Error, pos, CompilationError::UnsetObjectVarNotAnonymous);

        assert_eq!(diag.reports.len(), 2);
        assert_eq!(
            diag.errors().collect::<Vec<_>>(),
            vec![&CompilationError::UnsetObjectVarNotAnonymous]
        );
    }
}
