//! Error reporting and diagnostics for the MIL toolchain.
//!
//! This crate provides structured diagnostics with source location tracking.
//! Diagnostics are created by other crates (for example, `mil-syntax` during
//! scope analysis and `mil-ir` during verification) and rendered here for
//! display.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Source text does not lex or parse as the MIL dialect.
    Syntax,
    /// Undefined block, primitive, constructor, or temporary.
    UndefinedName,
    /// The same name is defined more than once in one scope.
    DuplicateName,
    /// A call or bind has the wrong number of arguments or results.
    ArityMismatch,
    /// A temporary is used outside the spine that binds it.
    ScopeViolation,
    /// A bitdata layout is malformed (overlapping or straddling fields).
    BadLayout,
    /// An invariant of the IR or a pass was broken. Always a compiler bug.
    Internal,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Syntax,
        Category::UndefinedName,
        Category::DuplicateName,
        Category::ArityMismatch,
        Category::ScopeViolation,
        Category::BadLayout,
        Category::Internal,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Syntax => "syntax",
            Category::UndefinedName => "undefined_name",
            Category::DuplicateName => "duplicate_name",
            Category::ArityMismatch => "arity_mismatch",
            Category::ScopeViolation => "scope_violation",
            Category::BadLayout => "bad_layout",
            Category::Internal => "internal",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::Syntax => "E0001",
            Category::UndefinedName => "E0002",
            Category::DuplicateName => "E0003",
            Category::ArityMismatch => "E0004",
            Category::ScopeViolation => "E0005",
            Category::BadLayout => "E0006",
            Category::Internal => "E0900",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::Syntax => "Source text does not parse as the MIL dialect.",
            Category::UndefinedName => {
                "A referenced block, primitive, constructor, or variable is undefined."
            }
            Category::DuplicateName => "A name is defined more than once in the same scope.",
            Category::ArityMismatch => {
                "A call, bind, or constructor has the wrong number of arguments or results."
            }
            Category::ScopeViolation => "A temporary is used outside of its binding spine.",
            Category::BadLayout => "A bitdata layout has overlapping or word-straddling fields.",
            Category::Internal => "An internal invariant of the compiler was violated.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations
// ---------------------------------------------------------------------------

/// A source location for diagnostics, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0001).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong, when the producer has a location.
    pub location: Option<SourceLocation>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Warning,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    /// An internal-error diagnostic. Passes use this for invariant breaks;
    /// the driver treats any of these as fatal rather than pressing on.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::error(Category::Internal, message)
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 10,
            end: 20,
        };
        let diag = Diagnostic::error(Category::UndefinedName, "block `b12` is not defined")
            .at(loc)
            .with_help("declare the block before its first call");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E0002"));
        assert_eq!(diag.category, Category::UndefinedName);
        assert!(diag.message.contains("b12"));
        assert!(diag.help.unwrap().contains("declare"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::ArityMismatch, "`add` expects 2 arguments, got 3");
        let s = format!("{diag}");
        assert!(s.starts_with("error[E0004]: `add` expects 2 arguments"));
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }
}
