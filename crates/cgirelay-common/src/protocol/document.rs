//! Framed documents returned by workers.
//!
//! This module defines the document a worker writes back for `Submit` and the
//! status-style queries.

/// A response document: a header block, a blank line, then the body.
///
/// # Wire Format
///
/// ```text
/// Content-Type: text/html
/// Content-Length: 13
///
/// <p>hello</p>
/// ```
///
/// `Content-Length` is always emitted by [`Document::to_bytes`] so the
/// dispatcher can stop reading without waiting for the connection to close.
///
/// # Example
///
/// ```
/// use cgirelay_common::protocol::Document;
///
/// let doc = Document::html("<p>hello</p>");
/// let bytes = doc.to_bytes();
/// assert!(bytes.starts_with(b"Content-Type: text/html"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// Header lines in emission order, without `Content-Length`
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Document {
    /// Creates a document with no headers.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Document {
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Creates an HTML document.
    pub fn html(body: impl Into<String>) -> Self {
        Document::new(body.into()).with_header("Content-Type", "text/html")
    }

    /// Creates a plain text document.
    pub fn text(body: impl Into<String>) -> Self {
        Document::new(body.into()).with_header("Content-Type", "text/plain")
    }

    /// Adds a header line.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serializes headers, `Content-Length`, the blank separator line and the body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(format!("Content-Length: {}\n\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}
