//! XInclude processing over live documents.
//!
//! [`XIncludeProcessor`] wires a [`ResourceLoader`] to a document and runs
//! the substitution pass under the document's mutation lock, so concurrent
//! passes over the same document serialize instead of interleaving.
//! Substitution is best-effort: directives that fail stay in the tree,
//! everything that resolved is kept, and the run's full error log stays
//! inspectable on the processor afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::engine::xinclude as engine;
use crate::error::{Error, Result, XIncludeFailure};
use crate::errorlog::{ErrorBridge, ErrorLog};
use crate::node::Node;

pub use crate::engine::xinclude::{ResourceLoader, XIncludeOptions, XINCLUDE_NS};

/// Loads include targets from the filesystem, relative to a base
/// directory.
#[derive(Debug, Clone)]
pub struct FileLoader {
    base: PathBuf,
}

impl FileLoader {
    pub fn new<P: AsRef<Path>>(base: P) -> FileLoader {
        FileLoader {
            base: base.as_ref().to_path_buf(),
        }
    }
}

impl ResourceLoader for FileLoader {
    fn load(&self, href: &str) -> io::Result<String> {
        fs::read_to_string(self.base.join(href))
    }
}

/// The lifecycle of a processor run.
///
/// A call to [`XIncludeProcessor::process`] walks
/// `Idle -> Connected -> Processing -> Disconnected -> Idle`, winding
/// down whether the pass succeeds or fails; between calls the processor
/// always reads `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No run is in progress.
    Idle,
    /// A run has opened its error log but not yet taken the locks.
    Connected,
    /// The pass is running under the document's mutation lock.
    Processing,
    /// The pass is done and its log has been detached.
    Disconnected,
}

/// Runs XInclude substitution passes against documents.
pub struct XIncludeProcessor<L: ResourceLoader> {
    loader: L,
    options: XIncludeOptions,
    state: ProcessorState,
    last_log: ErrorLog,
}

impl<L: ResourceLoader> XIncludeProcessor<L> {
    pub fn new(loader: L) -> XIncludeProcessor<L> {
        XIncludeProcessor::with_options(loader, XIncludeOptions::default())
    }

    pub fn with_options(loader: L, options: XIncludeOptions) -> XIncludeProcessor<L> {
        XIncludeProcessor {
            loader,
            options,
            state: ProcessorState::Idle,
            last_log: ErrorLog::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// The full error log of the most recent run.
    #[must_use]
    pub fn error_log(&self) -> &ErrorLog {
        &self.last_log
    }

    /// Expands every directive in the subtree rooted at `node`, returning
    /// the number of substitutions performed.
    ///
    /// The pass holds the owning document's mutation lock for its whole
    /// duration. When any directive fails, the error is returned after
    /// the pass completes; successful substitutions are not rolled back.
    pub fn process(&mut self, node: &Node) -> Result<usize> {
        self.last_log = ErrorLog::new();

        // Stale handles fail before the pass opens anything.
        let binding = node.binding();
        if !node.is_valid() {
            return Err(Error::StaleReference);
        }

        let mut bridge = ErrorBridge::new();
        bridge.connect();
        self.state = ProcessorState::Connected;

        let count = {
            let _pass = binding.entry.mutation_lock();
            self.state = ProcessorState::Processing;
            let mut tree = binding.entry.tree_mut();
            if tree.validate(binding.id, binding.stamp) {
                Ok(engine::process_subtree(
                    &mut tree,
                    binding.id,
                    &self.loader,
                    &mut bridge,
                    &self.options,
                ))
            } else {
                // The node was freed between the early check and taking
                // the write lock.
                Err(Error::StaleReference)
            }
        };
        self.last_log = bridge.disconnect();
        self.state = ProcessorState::Disconnected;

        let result = match count {
            Err(e) => Err(e),
            Ok(_) if self.last_log.has_errors() => {
                Err(XIncludeFailure::from_log(self.last_log.snapshot()).into())
            }
            Ok(n) => Ok(n),
        };
        self.state = ProcessorState::Idle;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errorlog::ErrorCode;
    use crate::Document;
    use std::collections::HashMap;

    struct MapLoader(HashMap<&'static str, &'static str>);

    impl ResourceLoader for MapLoader {
        fn load(&self, href: &str) -> io::Result<String> {
            self.0
                .get(href)
                .map(|s| (*s).to_string())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such resource"))
        }
    }

    const DOC: &str = r#"<doc xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="part.xml"/></doc>"#;

    #[test]
    fn test_successful_run() {
        let d = Document::parse_str(DOC).unwrap();
        let mut proc = XIncludeProcessor::new(MapLoader(HashMap::from([(
            "part.xml",
            "<part>hi</part>",
        )])));
        let root = d.root_element().unwrap();
        assert_eq!(proc.state(), ProcessorState::Idle);
        assert_eq!(proc.process(&root).unwrap(), 1);
        assert_eq!(proc.state(), ProcessorState::Idle);
        assert!(proc.error_log().is_empty());
        let xml = d.to_xml();
        assert!(xml.contains("<part>hi</part>"));
        assert!(!xml.contains("xi:include"));
    }

    #[test]
    fn test_failed_run_keeps_log_and_tree() {
        let d = Document::parse_str(DOC).unwrap();
        let mut proc = XIncludeProcessor::new(MapLoader(HashMap::new()));
        let root = d.root_element().unwrap();
        let err = proc.process(&root).unwrap_err();
        let log = err.error_log().unwrap();
        assert_eq!(log.entries()[0].code, ErrorCode::XIncludeResourceError);
        assert_eq!(proc.error_log().len(), 1);
        assert!(d.to_xml().contains("include"));
    }

    #[test]
    fn test_partial_substitution_survives_failure() {
        let input = r#"<d xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="ok.xml"/><xi:include href="gone.xml"/></d>"#;
        let d = Document::parse_str(input).unwrap();
        let mut proc =
            XIncludeProcessor::new(MapLoader(HashMap::from([("ok.xml", "<ok/>")])));
        let root = d.root_element().unwrap();
        assert!(proc.process(&root).is_err());
        let xml = d.to_xml();
        assert!(xml.contains("<ok/>"));
        assert!(xml.contains("gone.xml"));
    }

    #[test]
    fn test_stale_node_rejected() {
        let d = Document::parse_str(DOC).unwrap();
        let root = d.root_element().unwrap();
        let directive = root.first_child().unwrap().unwrap();
        directive.remove().unwrap();
        let mut proc = XIncludeProcessor::new(MapLoader(HashMap::new()));
        assert!(matches!(
            proc.process(&directive),
            Err(Error::StaleReference)
        ));
    }

    #[test]
    fn test_log_resets_between_runs() {
        let d = Document::parse_str(DOC).unwrap();
        let mut proc = XIncludeProcessor::new(MapLoader(HashMap::new()));
        let root = d.root_element().unwrap();
        assert!(proc.process(&root).is_err());
        assert_eq!(proc.error_log().len(), 1);

        let clean = Document::parse_str("<none/>").unwrap();
        let clean_root = clean.root_element().unwrap();
        assert_eq!(proc.process(&clean_root).unwrap(), 0);
        assert!(proc.error_log().is_empty());
    }

    #[test]
    fn test_subtree_scope() {
        let input = r#"<d xmlns:xi="http://www.w3.org/2001/XInclude"><keep><xi:include href="p.xml"/></keep><skip><xi:include href="p.xml"/></skip></d>"#;
        let d = Document::parse_str(input).unwrap();
        let keep = d.root_element().unwrap().first_child().unwrap().unwrap();
        let mut proc =
            XIncludeProcessor::new(MapLoader(HashMap::from([("p.xml", "<sub/>")])));
        assert_eq!(proc.process(&keep).unwrap(), 1);
        let xml = d.to_xml();
        assert!(xml.contains("<keep><sub/></keep>"));
        assert!(xml.contains("<skip><xi:include"));
    }
}
