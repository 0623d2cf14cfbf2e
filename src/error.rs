//! Typed failures surfaced by the public API.
//!
//! Every operation that can produce native-layer diagnostics attaches a
//! snapshot of its [`ErrorLog`] to the failure it raises, so callers can
//! inspect the full record after the fact. The `Display` text of a failure
//! summarizes the most severe log entry.

use crate::errorlog::ErrorLog;
use thiserror::Error;

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned when parsing fails.
///
/// Carries the position of the fatal error and a snapshot of every
/// diagnostic collected before it (warnings included).
#[derive(Debug, Clone, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    /// The primary error message.
    pub message: String,
    /// 1-based line of the fatal error, or 0 if unknown.
    pub line: u32,
    /// 1-based column of the fatal error, or 0 if unknown.
    pub column: u32,
    /// Snapshot of the diagnostics collected during the parse.
    pub log: ErrorLog,
}

impl ParseError {
    /// Returns the attached log snapshot.
    #[must_use]
    pub fn error_log(&self) -> &ErrorLog {
        &self.log
    }
}

/// The error type returned when XInclude processing fails.
///
/// The tree is left in whatever partially-substituted state processing
/// reached; the attached log enumerates which includes failed and why.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct XIncludeFailure {
    /// Summary of the most severe log entry.
    pub message: String,
    /// Snapshot of the diagnostics collected during processing.
    pub log: ErrorLog,
}

impl XIncludeFailure {
    /// Builds a failure summarizing the most severe entry of `log`.
    #[must_use]
    pub fn from_log(log: ErrorLog) -> XIncludeFailure {
        let message = log
            .most_severe()
            .map_or_else(|| "xinclude processing failed".to_string(), |e| e.message.clone());
        XIncludeFailure { message, log }
    }

    /// Returns the attached log snapshot.
    #[must_use]
    pub fn error_log(&self) -> &ErrorLog {
        &self.log
    }
}

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The input could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// XInclude processing reported at least one error.
    #[error(transparent)]
    XInclude(#[from] XIncludeFailure),

    /// The handle's node has been freed from its document. Recover by
    /// re-navigating from a still-valid handle; the reference itself is
    /// permanently dead.
    #[error("stale node reference: the node has been freed from its document")]
    StaleReference,

    /// An operation combined nodes from two documents where a single
    /// document was required.
    #[error("node belongs to a different document")]
    WrongDocument,

    /// A structural mutation would corrupt the tree (for example, moving
    /// a node into its own subtree).
    #[error("invalid structural operation: {0}")]
    InvalidStructure(String),

    /// A byte stream could not be decoded to text.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// An I/O error from reading a source file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the log snapshot attached to this failure, if it carries one.
    #[must_use]
    pub fn error_log(&self) -> Option<&ErrorLog> {
        match self {
            Self::Parse(e) => Some(&e.log),
            Self::XInclude(e) => Some(&e.log),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errorlog::{ErrorCode, ErrorDomain, ErrorLevel, ErrorLogEntry};

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: "unexpected end of input".to_string(),
            line: 1,
            column: 15,
            log: ErrorLog::new(),
        };
        assert_eq!(err.to_string(), "parse error at 1:15: unexpected end of input");
    }

    #[test]
    fn test_error_log_accessor() {
        let mut log = ErrorLog::new();
        log.push(ErrorLogEntry {
            domain: ErrorDomain::XInclude,
            code: ErrorCode::XIncludeResourceError,
            level: ErrorLevel::Error,
            message: "missing".to_string(),
            filename: Some("a.xml".to_string()),
            line: 0,
            column: 0,
        });
        let err = Error::from(XIncludeFailure {
            message: "xinclude failed".to_string(),
            log,
        });
        assert_eq!(err.error_log().map(ErrorLog::len), Some(1));
        assert!(Error::StaleReference.error_log().is_none());
    }
}
