//! cgirelay Transport Layer
//!
//! This module provides the pieces used to move protocol messages and
//! responses over local sockets.
//!
//! # Architecture
//!
//! - **Addressing**: logical port names resolved to Unix socket paths
//! - **Requests**: one JSON message per line, newline terminated
//! - **Responses**: a header block, a blank line, then a body whose length is
//!   given by `Content-Length` (or the rest of the stream)
//!
//! # Components
//!
//! - **[`LineCodec`]**: Encode/decode protocol messages as lines
//! - **[`forward_framed`]**: Copy one framed response between streams
//! - **[`NameResolver`]** / **[`SocketDirResolver`]**: Port name to socket path
//!
//! # Message Size Limits
//!
//! Message lines and header lines are limited to [`MAX_LINE_SIZE`] bytes to
//! prevent memory exhaustion.

pub mod codec;
pub mod framing;
pub mod resolver;

pub use codec::{read_bounded_line, LineCodec, MAX_LINE_SIZE};
pub use framing::{forward_framed, forward_framed_from, parse_content_length, read_framed, split_framed};
pub use resolver::{sanitize_port_name, NameResolver, SocketDirResolver, LOCALITY_SUFFIX};

#[cfg(test)]
mod tests;
