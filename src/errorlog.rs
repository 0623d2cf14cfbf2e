//! Structured error logs and the bridge that collects them.
//!
//! Every fallible engine operation reports diagnostics as structured
//! [`ErrorLogEntry`] values rather than bare strings: each entry carries a
//! domain, an error code, a severity level, a message, and a source
//! position. Entries accumulate in
//! an [`ErrorLog`], which is ordered, append-only during an operation, and
//! filterable afterwards.
//!
//! The [`ErrorBridge`] is the collection point. It is an explicit context
//! object handed down the call stack — never process-global state — and it
//! keeps a *stack* of logs: [`connect`](ErrorBridge::connect) pushes a fresh
//! log, reports append to the innermost one, and
//! [`disconnect`](ErrorBridge::disconnect) pops it, restoring the enclosing
//! log. Nested operations (an XInclude pass parsing an included document,
//! say) connect around their inner call and decide afterwards whether to
//! absorb the inner entries into their own log.

use std::fmt;

/// Severity of a diagnostic.
///
/// Ordered: `Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorLevel {
    /// A non-fatal issue; the operation continued unaffected.
    Warning,
    /// A recoverable error; the operation continued but its result is
    /// incomplete or malformed.
    Error,
    /// An unrecoverable error; the operation stopped.
    Fatal,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// The subsystem a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// The XML parser.
    Parser,
    /// Tree construction and structural mutation.
    Tree,
    /// XInclude processing.
    XInclude,
    /// Resource loading and encoding.
    Io,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parser => write!(f, "parser"),
            Self::Tree => write!(f, "tree"),
            Self::XInclude => write!(f, "xinclude"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Fine-grained error codes, flat across domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The input is not well-formed XML.
    NotWellFormed,
    /// The input ended inside a construct.
    UnexpectedEof,
    /// An attribute appeared twice on one element.
    DuplicateAttribute,
    /// Content found outside the single root element.
    ExtraContent,
    /// The byte stream could not be decoded to text.
    InvalidEncoding,
    /// A general entity reference has no definition.
    UndefinedEntity,
    /// An `xi:include` element has no `href` attribute.
    XIncludeMissingHref,
    /// An `xi:include` element has a `parse` value other than `xml`/`text`.
    XIncludeInvalidParse,
    /// An included resource could not be loaded.
    XIncludeResourceError,
    /// An inclusion chain referenced a resource already being included.
    XIncludeRecursion,
    /// The inclusion nesting depth limit was exceeded.
    XIncludeDepthLimit,
    /// An included resource was loaded but failed to parse as XML.
    XIncludeParseFailure,
}

/// One structured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLogEntry {
    /// The subsystem that reported this entry.
    pub domain: ErrorDomain,
    /// The fine-grained error code.
    pub code: ErrorCode,
    /// Severity of the entry.
    pub level: ErrorLevel,
    /// Human-readable message.
    pub message: String,
    /// The resource the entry refers to (an href or file name), if known.
    pub filename: Option<String>,
    /// 1-based line in the source, or 0 if not applicable.
    pub line: u32,
    /// 1-based column in the source, or 0 if not applicable.
    pub column: u32,
}

impl fmt::Display for ErrorLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(name) => write!(
                f,
                "{}:{}:{}: {} ({}): {}",
                name, self.line, self.column, self.level, self.domain, self.message
            ),
            None => write!(
                f,
                "{}:{}: {} ({}): {}",
                self.line, self.column, self.level, self.domain, self.message
            ),
        }
    }
}

/// An ordered collection of diagnostics from one operation.
///
/// Logs are append-only while an operation runs. Afterwards they can be
/// filtered by level and domain, and snapshotted into an independent copy
/// for attaching to a raised failure.
///
/// # Examples
///
/// ```
/// use xmltether::{Document, ErrorLevel};
///
/// let err = Document::parse_str("<a><b></a>").unwrap_err();
/// assert!(err.log.filter_level(ErrorLevel::Fatal).next().is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    entries: Vec<ErrorLogEntry>,
}

impl ErrorLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entries in the order they were reported.
    #[must_use]
    pub fn entries(&self) -> &[ErrorLogEntry] {
        &self.entries
    }

    /// Appends an entry. Only reachable during the operation that owns
    /// the log; client code sees logs after they stop changing.
    pub(crate) fn push(&mut self, entry: ErrorLogEntry) {
        self.entries.push(entry);
    }

    /// Appends every entry of `other`, preserving order.
    pub(crate) fn absorb(&mut self, other: ErrorLog) {
        self.entries.extend(other.entries);
    }

    /// Returns the entries with exactly the given level, in original order.
    pub fn filter_level(&self, level: ErrorLevel) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter().filter(move |e| e.level == level)
    }

    /// Returns the entries with at least the given level, in original order.
    pub fn filter_from_level(&self, min: ErrorLevel) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter().filter(move |e| e.level >= min)
    }

    /// Returns the entries from the given domain, in original order.
    pub fn filter_domain(&self, domain: ErrorDomain) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter().filter(move |e| e.domain == domain)
    }

    /// Returns the entries matching both filters, in original order. `None`
    /// leaves that dimension unfiltered.
    pub fn filter(
        &self,
        level: Option<ErrorLevel>,
        domain: Option<ErrorDomain>,
    ) -> impl Iterator<Item = &ErrorLogEntry> {
        self.entries.iter().filter(move |e| {
            level.is_none_or(|l| e.level == l) && domain.is_none_or(|d| e.domain == d)
        })
    }

    /// Returns `true` if any entry is `Error` or `Fatal`.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.level >= ErrorLevel::Error)
    }

    /// Returns the primary diagnostic: the most recent entry of the highest
    /// level present.
    #[must_use]
    pub fn most_severe(&self) -> Option<&ErrorLogEntry> {
        let top = self.entries.iter().map(|e| e.level).max()?;
        self.entries.iter().rev().find(|e| e.level == top)
    }

    /// Returns an independent copy of the log. Later activity on the live
    /// log does not affect the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ErrorLog {
        self.clone()
    }
}

impl<'a> IntoIterator for &'a ErrorLog {
    type Item = &'a ErrorLogEntry;
    type IntoIter = std::slice::Iter<'a, ErrorLogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// The collection point for structured diagnostics.
///
/// A bridge is created per entry point and passed down the call stack.
/// `connect` / `disconnect` follow stack discipline, so nested bridged
/// operations restore the immediately enclosing log, never a fixed
/// global state.
#[derive(Debug, Default)]
pub struct ErrorBridge {
    stack: Vec<ErrorLog>,
}

impl ErrorBridge {
    /// Creates a bridge with no connected log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a fresh log; subsequent reports land in it.
    pub fn connect(&mut self) {
        self.stack.push(ErrorLog::new());
    }

    /// Pops the innermost log and returns it, restoring the enclosing one.
    ///
    /// Disconnecting a bridge with no connected log returns an empty log.
    pub fn disconnect(&mut self) -> ErrorLog {
        debug_assert!(!self.stack.is_empty(), "disconnect without connect");
        self.stack.pop().unwrap_or_default()
    }

    /// Returns the number of connected logs.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Appends an entry to the innermost connected log.
    ///
    /// Reports on a disconnected bridge are dropped; every engine entry
    /// point connects before calling in, so this only happens on misuse.
    pub(crate) fn report(&mut self, entry: ErrorLogEntry) {
        debug_assert!(!self.stack.is_empty(), "report without connect");
        if let Some(log) = self.stack.last_mut() {
            log.push(entry);
        }
    }

    /// Merges a finished nested log into the innermost connected log.
    pub(crate) fn absorb(&mut self, log: ErrorLog) {
        if let Some(top) = self.stack.last_mut() {
            top.absorb(log);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: ErrorLevel, domain: ErrorDomain, message: &str) -> ErrorLogEntry {
        ErrorLogEntry {
            domain,
            code: ErrorCode::NotWellFormed,
            level,
            message: message.to_string(),
            filename: None,
            line: 0,
            column: 0,
        }
    }

    #[test]
    fn test_filter_level_exact_preserves_order() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Warning, ErrorDomain::Parser, "w"));
        log.push(entry(ErrorLevel::Fatal, ErrorDomain::Parser, "f"));

        let fatal: Vec<_> = log.filter_level(ErrorLevel::Fatal).collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].message, "f");

        let warnings: Vec<_> = log.filter_level(ErrorLevel::Warning).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "w");
    }

    #[test]
    fn test_filter_from_level_is_minimum() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Warning, ErrorDomain::Parser, "w"));
        log.push(entry(ErrorLevel::Error, ErrorDomain::XInclude, "e"));
        log.push(entry(ErrorLevel::Fatal, ErrorDomain::Parser, "f"));

        let at_least_error: Vec<_> = log.filter_from_level(ErrorLevel::Error).collect();
        assert_eq!(at_least_error.len(), 2);
        assert_eq!(at_least_error[0].message, "e");
        assert_eq!(at_least_error[1].message, "f");
    }

    #[test]
    fn test_filter_both_dimensions() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Error, ErrorDomain::Parser, "pe"));
        log.push(entry(ErrorLevel::Error, ErrorDomain::XInclude, "xe"));
        log.push(entry(ErrorLevel::Warning, ErrorDomain::XInclude, "xw"));

        let hits: Vec<_> = log
            .filter(Some(ErrorLevel::Error), Some(ErrorDomain::XInclude))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message, "xe");

        let unfiltered: Vec<_> = log.filter(None, None).collect();
        assert_eq!(unfiltered.len(), 3);
    }

    #[test]
    fn test_most_severe_prefers_latest_of_top_level() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Error, ErrorDomain::Parser, "first"));
        log.push(entry(ErrorLevel::Warning, ErrorDomain::Parser, "noise"));
        log.push(entry(ErrorLevel::Error, ErrorDomain::Parser, "second"));

        assert_eq!(log.most_severe().map(|e| e.message.as_str()), Some("second"));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Warning, ErrorDomain::Parser, "w"));
        let snap = log.snapshot();
        log.push(entry(ErrorLevel::Fatal, ErrorDomain::Parser, "f"));

        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_bridge_stack_discipline() {
        let mut bridge = ErrorBridge::new();
        bridge.connect();
        bridge.report(entry(ErrorLevel::Warning, ErrorDomain::Parser, "outer"));

        bridge.connect();
        bridge.report(entry(ErrorLevel::Error, ErrorDomain::Parser, "inner"));
        let inner = bridge.disconnect();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner.entries()[0].message, "inner");

        // The enclosing log is restored, not reset.
        bridge.report(entry(ErrorLevel::Warning, ErrorDomain::Parser, "outer2"));
        let outer = bridge.disconnect();
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.entries()[0].message, "outer");
        assert_eq!(outer.entries()[1].message, "outer2");
    }

    #[test]
    fn test_bridge_absorb_merges_into_top() {
        let mut bridge = ErrorBridge::new();
        bridge.connect();

        bridge.connect();
        bridge.report(entry(ErrorLevel::Warning, ErrorDomain::Parser, "nested"));
        let nested = bridge.disconnect();
        bridge.absorb(nested);

        let top = bridge.disconnect();
        assert_eq!(top.len(), 1);
        assert_eq!(top.entries()[0].message, "nested");
    }

    #[test]
    fn test_has_errors_ignores_warnings() {
        let mut log = ErrorLog::new();
        log.push(entry(ErrorLevel::Warning, ErrorDomain::Parser, "w"));
        assert!(!log.has_errors());
        log.push(entry(ErrorLevel::Error, ErrorDomain::Parser, "e"));
        assert!(log.has_errors());
    }

    #[test]
    fn test_entry_display_with_filename() {
        let mut e = entry(ErrorLevel::Error, ErrorDomain::XInclude, "not found");
        e.filename = Some("part.xml".to_string());
        e.line = 3;
        e.column = 7;
        assert_eq!(
            e.to_string(),
            "part.xml:3:7: error (xinclude): not found"
        );
    }
}
