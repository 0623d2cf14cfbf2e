//! Incremental XML writing.
//!
//! [`XmlWriter`] emits a document straight to an output stream, element by
//! element, without building a tree first. The writer tracks the open
//! element stack and closes anything still open on [`finish`].
//!
//! ```
//! use xmltether::writer::XmlWriter;
//!
//! let mut out = Vec::new();
//! let mut w = XmlWriter::new(&mut out);
//! w.start_element("log").unwrap();
//! w.start_element("entry").unwrap();
//! w.attribute("n", "1").unwrap();
//! w.text("boot").unwrap();
//! w.end_element().unwrap();
//! w.finish().unwrap();
//! assert_eq!(out, br#"<log><entry n="1">boot</entry></log>"#);
//! ```

use std::io::Write;

use thiserror::Error;

use crate::engine::serialize::{escape_attr, escape_text};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// `end_element` or `attribute` was called with no element open.
    #[error("no element is open")]
    NoOpenElement,

    /// Attributes must be written before any child content.
    #[error("attribute written after element content")]
    AttributeAfterContent,

    /// The writer was used after `finish`.
    #[error("writer is finished")]
    Finished,
}

/// A forward-only XML writer over any `io::Write` sink.
pub struct XmlWriter<W: Write> {
    sink: W,
    open: Vec<String>,
    /// The most recent start tag still awaits its closing `>`.
    tag_open: bool,
    finished: bool,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(sink: W) -> XmlWriter<W> {
        XmlWriter {
            sink,
            open: Vec::new(),
            tag_open: false,
            finished: false,
        }
    }

    /// Writes an XML declaration. Call before any content.
    pub fn declaration(&mut self, version: &str, encoding: Option<&str>) -> Result<(), WriterError> {
        self.check_active()?;
        write!(self.sink, "<?xml version=\"{version}\"")?;
        if let Some(enc) = encoding {
            write!(self.sink, " encoding=\"{enc}\"")?;
        }
        write!(self.sink, "?>")?;
        Ok(())
    }

    pub fn start_element(&mut self, name: &str) -> Result<(), WriterError> {
        self.check_active()?;
        self.seal_tag()?;
        write!(self.sink, "<{name}")?;
        self.open.push(name.to_string());
        self.tag_open = true;
        Ok(())
    }

    /// Adds an attribute to the currently open start tag.
    pub fn attribute(&mut self, name: &str, value: &str) -> Result<(), WriterError> {
        self.check_active()?;
        if self.open.is_empty() {
            return Err(WriterError::NoOpenElement);
        }
        if !self.tag_open {
            return Err(WriterError::AttributeAfterContent);
        }
        write!(self.sink, " {name}=\"{}\"", escape_attr(value))?;
        Ok(())
    }

    pub fn text(&mut self, content: &str) -> Result<(), WriterError> {
        self.check_active()?;
        self.seal_tag()?;
        self.sink.write_all(escape_text(content).as_bytes())?;
        Ok(())
    }

    pub fn comment(&mut self, content: &str) -> Result<(), WriterError> {
        self.check_active()?;
        self.seal_tag()?;
        write!(self.sink, "<!--{content}-->")?;
        Ok(())
    }

    pub fn pi(&mut self, target: &str, data: Option<&str>) -> Result<(), WriterError> {
        self.check_active()?;
        self.seal_tag()?;
        match data {
            Some(d) => write!(self.sink, "<?{target} {d}?>")?,
            None => write!(self.sink, "<?{target}?>")?,
        }
        Ok(())
    }

    pub fn end_element(&mut self) -> Result<(), WriterError> {
        self.check_active()?;
        let name = self.open.pop().ok_or(WriterError::NoOpenElement)?;
        if self.tag_open {
            write!(self.sink, "/>")?;
            self.tag_open = false;
        } else {
            write!(self.sink, "</{name}>")?;
        }
        Ok(())
    }

    /// Closes every element still open and flushes the sink. The writer
    /// cannot be used afterwards.
    pub fn finish(&mut self) -> Result<(), WriterError> {
        self.check_active()?;
        while !self.open.is_empty() {
            self.end_element()?;
        }
        self.sink.flush()?;
        self.finished = true;
        Ok(())
    }

    fn check_active(&self) -> Result<(), WriterError> {
        if self.finished {
            return Err(WriterError::Finished);
        }
        Ok(())
    }

    fn seal_tag(&mut self) -> Result<(), WriterError> {
        if self.tag_open {
            write!(self.sink, ">")?;
            self.tag_open = false;
        }
        Ok(())
    }
}
