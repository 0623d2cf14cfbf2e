//! Shared XML documents with revalidating node handles.
//!
//! `xmltether` parses XML into a native arena tree and hands out two kinds
//! of handle onto it: [`Document`], a strong handle onto the whole tree,
//! and [`Node`], an identity-mapped proxy onto a single node. Handles of
//! either kind keep the tree alive; the tree is freed when the last one is
//! dropped. A node proxy never dangles: if its node is removed from the
//! tree, every later access reports [`Error::StaleReference`] instead of
//! reaching into freed storage.
//!
//! ```
//! use xmltether::Document;
//!
//! let doc = Document::parse_str("<inventory><item sku=\"a1\">bolt</item></inventory>")?;
//! let item = doc.root_element().unwrap().first_child()?.unwrap();
//! assert_eq!(item.attribute("sku")?.as_deref(), Some("a1"));
//!
//! item.remove()?;
//! assert!(item.text_content().is_err());
//! # Ok::<(), xmltether::Error>(())
//! ```
//!
//! XInclude substitution runs through [`xinclude::XIncludeProcessor`] (or
//! [`Document::xinclude`] for the common case), diagnostics are collected
//! in [`ErrorLog`]s rather than global state, and [`writer::XmlWriter`]
//! streams XML out without building a tree.

mod engine;
mod registry;

pub mod document;
pub mod error;
pub mod errorlog;
pub mod node;
pub mod writer;
pub mod xinclude;

pub use document::Document;
pub use engine::node::Attribute;
pub use error::{Error, ParseError, Result, XIncludeFailure};
pub use errorlog::{ErrorCode, ErrorDomain, ErrorLevel, ErrorLog, ErrorLogEntry};
pub use node::{Node, NodeType};
pub use writer::XmlWriter;
pub use xinclude::{FileLoader, ResourceLoader, XIncludeOptions, XIncludeProcessor};
