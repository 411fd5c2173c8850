//! Error types, diagnostics, and the error-handler funnel.
//!
//! Two families of conditions exist side by side:
//!
//! - **Structural violations** raised by tree mutators (`DomException`):
//!   hierarchy, wrong-document, invalid-character and friends, carrying the
//!   standard DOM numeric codes. These propagate as plain `Result::Err` and
//!   are never suppressible.
//! - **Processing conditions** raised by the parser, normalizer, and
//!   serializer (`DomError`): each carries a severity and is routed through
//!   [`handle_error`], which consults an optional user handler before
//!   deciding whether processing continues.
//!
//! The parser additionally supports **recovery mode**: recoverable
//! conditions are collected into a `Vec<ParseDiagnostic>` while a (possibly
//! partial) tree is still produced.

use std::fmt;
use std::sync::Arc;

/// Severity level for a processing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// A non-fatal issue; processing continues unless a handler objects.
    Warning,
    /// A recoverable error; processing stops unless a handler allows it on.
    Error,
    /// An unrecoverable error; processing always stops.
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Source location within an XML document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (in characters, not bytes).
    pub column: u32,
    /// 0-based byte offset from the start of the input.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single diagnostic emitted during parsing, normalization, or
/// serialization.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    /// The severity of this diagnostic.
    pub severity: ErrorSeverity,
    /// Human-readable message.
    pub message: String,
    /// Where in the source this condition occurred.
    pub location: SourceLocation,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}",
            self.severity, self.message, self.location
        )
    }
}

/// The error type returned when parsing fails.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// The primary error message.
    pub message: String,
    /// Where in the source the fatal error occurred.
    pub location: SourceLocation,
    /// All diagnostics collected before the fatal error (in recovery mode,
    /// this includes warnings and recovered errors).
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.location, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Standard DOM exception codes for structural API misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DomExceptionCode {
    /// An index is out of range.
    IndexSize = 1,
    /// A node was inserted where its kind is not permitted, or the
    /// insertion would make a node its own ancestor.
    HierarchyRequest = 3,
    /// A node from one document was used in another without adoption.
    WrongDocument = 4,
    /// A name contains a character forbidden by the XML name productions.
    InvalidCharacter = 5,
    /// The target of an operation is read-only.
    NoModificationAllowed = 7,
    /// A referenced node does not exist in the given context.
    NotFound = 8,
    /// The requested operation or parameter value is not supported.
    NotSupported = 9,
    /// An attribute already in use on another element was attached again.
    InuseAttribute = 10,
    /// The object is in an invalid state for the operation.
    InvalidState = 11,
    /// A string value is syntactically invalid.
    Syntax = 12,
    /// The modification would produce an invalid node.
    InvalidModification = 13,
    /// A qualified name or namespace binding is inconsistent.
    Namespace = 14,
    /// A parameter or operation is not supported by this object.
    InvalidAccess = 15,
}

impl DomExceptionCode {
    /// The canonical DOM constant name for this code.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IndexSize => "INDEX_SIZE_ERR",
            Self::HierarchyRequest => "HIERARCHY_REQUEST_ERR",
            Self::WrongDocument => "WRONG_DOCUMENT_ERR",
            Self::InvalidCharacter => "INVALID_CHARACTER_ERR",
            Self::NoModificationAllowed => "NO_MODIFICATION_ALLOWED_ERR",
            Self::NotFound => "NOT_FOUND_ERR",
            Self::NotSupported => "NOT_SUPPORTED_ERR",
            Self::InuseAttribute => "INUSE_ATTRIBUTE_ERR",
            Self::InvalidState => "INVALID_STATE_ERR",
            Self::Syntax => "SYNTAX_ERR",
            Self::InvalidModification => "INVALID_MODIFICATION_ERR",
            Self::Namespace => "NAMESPACE_ERR",
            Self::InvalidAccess => "INVALID_ACCESS_ERR",
        }
    }
}

/// A structural violation raised by the tree-mutation API.
///
/// These always propagate to the caller; the error-handler hook never sees
/// them and cannot suppress them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomException {
    /// The standard DOM numeric code.
    pub code: DomExceptionCode,
    /// Human-readable message.
    pub message: String,
}

impl DomException {
    /// Creates a new exception with the given code and message.
    #[must_use]
    pub fn new(code: DomExceptionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DomException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for DomException {}

/// A processing condition routed through the error handler.
#[derive(Debug, Clone)]
pub struct DomError {
    /// Severity of the condition.
    pub severity: ErrorSeverity,
    /// Short stable type tag (e.g. `"wf-invalid-character"`,
    /// `"unbound-namespace"`, `"cdata-sections-splitted"`).
    pub type_tag: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Source location, when the condition arose while scanning input.
    pub location: Option<SourceLocation>,
}

impl DomError {
    /// Creates a new processing condition.
    #[must_use]
    pub fn new(
        severity: ErrorSeverity,
        type_tag: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            type_tag,
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a source location.
    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Converts this condition into a collectible diagnostic.
    #[must_use]
    pub fn to_diagnostic(&self) -> ParseDiagnostic {
        ParseDiagnostic {
            severity: self.severity,
            message: format!("[{}] {}", self.type_tag, self.message),
            location: self.location.unwrap_or_default(),
        }
    }
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.type_tag, self.message)
    }
}

impl std::error::Error for DomError {}

/// User-supplied error handler hook.
///
/// Called with each recoverable condition; returns `Some(true)` to continue
/// processing, `Some(false)` to stop, or `None` to use the severity default.
pub type ErrorHandler = Arc<dyn Fn(&DomError) -> Option<bool> + Send + Sync>;

/// Routes a processing condition through the optional handler and decides
/// whether processing continues.
///
/// Defaults: warnings continue, errors stop, fatal errors always stop. The
/// handler may override the decision for warnings and errors only.
#[must_use]
pub fn handle_error(handler: Option<&ErrorHandler>, error: &DomError) -> bool {
    let advisory = handler.and_then(|h| h(error));
    match error.severity {
        ErrorSeverity::Fatal => false,
        ErrorSeverity::Warning => advisory.unwrap_or(true),
        ErrorSeverity::Error => advisory.unwrap_or(false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation {
            line: 10,
            column: 5,
            byte_offset: 42,
        };
        assert_eq!(loc.to_string(), "10:5");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: "unexpected end of input".to_string(),
            location: SourceLocation {
                line: 1,
                column: 15,
                byte_offset: 14,
            },
            diagnostics: vec![],
        };
        assert_eq!(
            err.to_string(),
            "parse error at 1:15: unexpected end of input"
        );
    }

    #[test]
    fn test_dom_exception_display() {
        let err = DomException::new(
            DomExceptionCode::HierarchyRequest,
            "document may hold only one element child",
        );
        assert_eq!(
            err.to_string(),
            "HIERARCHY_REQUEST_ERR: document may hold only one element child"
        );
    }

    #[test]
    fn test_exception_codes_are_standard() {
        assert_eq!(DomExceptionCode::HierarchyRequest as u16, 3);
        assert_eq!(DomExceptionCode::WrongDocument as u16, 4);
        assert_eq!(DomExceptionCode::NotSupported as u16, 9);
        assert_eq!(DomExceptionCode::Namespace as u16, 14);
    }

    #[test]
    fn test_handle_error_defaults() {
        let warn = DomError::new(ErrorSeverity::Warning, "unbound-entity", "no decl for &x;");
        let err = DomError::new(ErrorSeverity::Error, "unbound-namespace", "prefix p unbound");
        let fatal = DomError::new(ErrorSeverity::Fatal, "wf-syntax", "mismatched end tag");

        assert!(handle_error(None, &warn));
        assert!(!handle_error(None, &err));
        assert!(!handle_error(None, &fatal));
    }

    #[test]
    fn test_handler_overrides_error_but_not_fatal() {
        let always_continue: ErrorHandler = Arc::new(|_| Some(true));
        let err = DomError::new(ErrorSeverity::Error, "unbound-namespace", "prefix p unbound");
        let fatal = DomError::new(ErrorSeverity::Fatal, "wf-syntax", "mismatched end tag");

        assert!(handle_error(Some(&always_continue), &err));
        assert!(!handle_error(Some(&always_continue), &fatal));
    }

    #[test]
    fn test_handler_can_stop_on_warning() {
        let always_stop: ErrorHandler = Arc::new(|_| Some(false));
        let warn = DomError::new(ErrorSeverity::Warning, "unbound-entity", "no decl");
        assert!(!handle_error(Some(&always_stop), &warn));
    }

    #[test]
    fn test_to_diagnostic_carries_tag() {
        let err = DomError::new(ErrorSeverity::Warning, "unbound-entity", "no decl for &x;")
            .at(SourceLocation {
                line: 2,
                column: 7,
                byte_offset: 30,
            });
        let diag = err.to_diagnostic();
        assert_eq!(diag.severity, ErrorSeverity::Warning);
        assert!(diag.message.contains("unbound-entity"));
        assert_eq!(diag.location.line, 2);
    }

    #[test]
    fn test_error_types_implement_error_trait() {
        let _: &dyn std::error::Error = &ParseError {
            message: "x".to_string(),
            location: SourceLocation::default(),
            diagnostics: vec![],
        };
        let _: &dyn std::error::Error =
            &DomException::new(DomExceptionCode::NotFound, "missing");
        let _: &dyn std::error::Error =
            &DomError::new(ErrorSeverity::Error, "io", "unreadable");
    }
}
