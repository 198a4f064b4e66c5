//! Located diagnostics and the shared reporter.
//!
//! Every stage appends; nothing is thrown across stage boundaries. Display
//! order is sorted by position, not by the order passes happened to visit.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Produced by the lexer, accepted as-is.
    LexicalError,
    /// Produced by the parser, accepted as-is.
    SyntaxError,
    Redefinition,
    Redeclaration,
    UnresolvedReference,
    UseBeforeDefinition,
    UndefinedVariable,
    UndefinedField,
    TypeMismatch,
    AccessViolation,
    OutOfBounds,
    AssignmentToConst,
}

impl ErrorKind {
    /// The fixed display prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            ErrorKind::LexicalError => "Lexical error",
            ErrorKind::SyntaxError => "Syntax error",
            ErrorKind::Redefinition => "Redefinition",
            ErrorKind::Redeclaration => "Duplicate definition",
            ErrorKind::UnresolvedReference => "Unresolved reference",
            ErrorKind::UseBeforeDefinition => "Usage before definition",
            ErrorKind::UndefinedVariable => "Undefined variable",
            ErrorKind::UndefinedField => "Undefined field",
            ErrorKind::TypeMismatch => "Type mismatch",
            ErrorKind::AccessViolation => "Access violation",
            ErrorKind::OutOfBounds => "Out of bounds",
            ErrorKind::AssignmentToConst => "Assignment to const",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Line {}:{} - {}: {}",
            self.line,
            self.column,
            self.kind.prefix(),
            self.message
        )
    }
}

/// Append-only sink shared by every compilation stage.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: ErrorKind, line: u32, column: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            kind,
            line,
            column,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics sorted by (line, column); reporting order breaks ties.
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut sorted = self.diagnostics.clone();
        sorted.sort_by_key(|d| (d.line, d.column));
        sorted
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_fixed_prefixes() {
        let diag = Diagnostic {
            kind: ErrorKind::TypeMismatch,
            line: 3,
            column: 7,
            message: "expected int but got string".to_string(),
        };
        assert_eq!(
            diag.to_string(),
            "Line 3:7 - Type mismatch: expected int but got string"
        );
    }

    #[test]
    fn sorted_orders_by_position() {
        let mut reporter = ErrorReporter::new();
        reporter.report(ErrorKind::TypeMismatch, 5, 0, "later");
        reporter.report(ErrorKind::UndefinedVariable, 2, 4, "earlier");
        reporter.report(ErrorKind::Redefinition, 2, 1, "earliest on line 2");

        let sorted = reporter.sorted();
        assert_eq!(sorted[0].message, "earliest on line 2");
        assert_eq!(sorted[1].message, "earlier");
        assert_eq!(sorted[2].message, "later");
    }

    #[test]
    fn has_errors_reflects_appends() {
        let mut reporter = ErrorReporter::new();
        assert!(!reporter.has_errors());
        reporter.report(ErrorKind::OutOfBounds, 1, 1, "tuple index 4");
        assert!(reporter.has_errors());
    }
}
