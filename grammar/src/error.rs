//! Error records which are accumulated while a document travels through the pipeline.
//!
//! Ordinary grammar mismatches are never represented here; these records describe problems
//! with the *document* (or with the grammar, when it is first used) which should be reported to
//! the user.  Every record carries the byte offset at which it occurred, and can be located
//! (i.e. given a line and column) once the source text is known.

use std::fmt::{Display, Formatter};

/// How severe an [`Error`] is.  Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational; the result is still fully usable
    Warning,
    /// A defect which prevents a fully valid result for some subtree, but not for the whole run
    Error,
    /// The run must not produce a usable result at all
    Fatal,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        })
    }
}

/// A numeric error code.  Codes below `1000` are warnings by default, codes in `1000..10000` are
/// errors and codes of `10000` and above are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    /* WARNINGS */
    pub const WARNING: Self = Self(1);
    pub const LEFT_RECURSION_LIMIT: Self = Self(310);
    pub const CAPTURE_STACK_NOT_EMPTY_WARNING: Self = Self(350);

    /* ERRORS */
    pub const ERROR: Self = Self(1000);
    pub const MANDATORY_CONTINUATION: Self = Self(1010);
    pub const PARSER_DID_NOT_MATCH: Self = Self(1020);
    pub const PARSER_STOPPED_BEFORE_END: Self = Self(1040);
    pub const CAPTURE_STACK_NOT_EMPTY: Self = Self(1050);
    pub const ASSERTION_FAILED: Self = Self(1100);
    pub const COMPILER_ERROR: Self = Self(1200);

    /* FATAL ERRORS */
    pub const FATAL: Self = Self(10000);
    pub const CAPTURE_STACK_UNDERFLOW: Self = Self(10010);
    pub const RECURSION_LIMIT: Self = Self(10020);
    pub const UNKNOWN_START_RULE: Self = Self(10030);

    /// The [`Severity`] which records with this code get unless stated otherwise
    pub fn default_severity(self) -> Severity {
        match self.0 {
            0..=999 => Severity::Warning,
            1000..=9999 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single problem found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Byte offset into the source text
    pub pos: usize,
    /// 1-based line number, filled in by [`Error::locate`]
    pub line: Option<usize>,
    /// 1-based column (counted in `char`s), filled in by [`Error::locate`]
    pub column: Option<usize>,
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    /// Creates an `Error` whose severity is derived from its `code`
    pub fn new(pos: usize, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            pos,
            line: None,
            column: None,
            severity: code.default_severity(),
            code,
            message: message.into(),
        }
    }

    pub fn warning(pos: usize, message: impl Into<String>) -> Self {
        Self::new(pos, ErrorCode::WARNING, message)
    }

    pub fn error(pos: usize, message: impl Into<String>) -> Self {
        Self::new(pos, ErrorCode::ERROR, message)
    }

    pub fn fatal(pos: usize, message: impl Into<String>) -> Self {
        Self::new(pos, ErrorCode::FATAL, message)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Returns `true` for both [`Severity::Error`] and [`Severity::Fatal`]
    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    /// Fill in `line` and `column` from the source text this error refers to
    pub fn locate(&mut self, source: &str) {
        let (line, column) = line_col(source, self.pos);
        self.line = Some(line);
        self.column = Some(column);
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{}: ", line, column)?,
            _ => write!(f, "{}: ", self.pos)?,
        }
        write!(f, "{} ({}): {}", self.severity, self.code, self.message)
    }
}

/// Converts a byte offset into a 1-based `(line, column)` pair.  Offsets past the end of
/// `source` are clamped to the end.
pub fn line_col(source: &str, pos: usize) -> (usize, usize) {
    let mut pos = pos.min(source.len());
    while !source.is_char_boundary(pos) {
        pos -= 1;
    }
    let before = &source[..pos];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |idx| idx + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

/// Returns `true` if any of the `errors` is at least as severe as [`Severity::Error`]
pub fn has_errors<'e>(errors: impl IntoIterator<Item = &'e Error>) -> bool {
    errors.into_iter().any(Error::is_error)
}

/// Returns `true` if any of the `errors` is [`Severity::Fatal`]
pub fn has_fatal<'e>(errors: impl IntoIterator<Item = &'e Error>) -> bool {
    errors.into_iter().any(Error::is_fatal)
}

/// Sorts errors by their position, keeping the relative order of errors at the same position
pub fn sort_errors(errors: &mut [Error]) {
    errors.sort_by_key(|e| e.pos);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_from_code() {
        assert_eq!(ErrorCode::LEFT_RECURSION_LIMIT.default_severity(), Severity::Warning);
        assert_eq!(ErrorCode::MANDATORY_CONTINUATION.default_severity(), Severity::Error);
        assert_eq!(ErrorCode::RECURSION_LIMIT.default_severity(), Severity::Fatal);
        // Explicit severities override the code's default
        let e = Error::new(3, ErrorCode::ERROR, "x").with_severity(Severity::Warning);
        assert!(!e.is_error());
    }

    #[test]
    fn line_and_column() {
        let src = "ab\ncdé\nf";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 2), (1, 3));
        assert_eq!(line_col(src, 3), (2, 1));
        // `é` is two bytes long, but only one column wide
        assert_eq!(line_col(src, 7), (2, 4));
        assert_eq!(line_col(src, 100), (3, 2));
    }

    #[test]
    fn display_located() {
        let mut e = Error::new(3, ErrorCode::MANDATORY_CONTINUATION, "expected '}'");
        assert_eq!(e.to_string(), "3: Error (1010): expected '}'");
        e.locate("{\n  x");
        assert_eq!(e.to_string(), "2:2: Error (1010): expected '}'");
    }
}
