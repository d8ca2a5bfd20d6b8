//! cgirelay Common Types and Transport
//!
//! This crate provides the worker protocol, the local-socket transport pieces
//! and the helpers shared by every cgirelay component.
//!
//! # Overview
//!
//! cgirelay lets a short-lived CGI-style front end hand each request to a
//! long-lived, stateful worker process and route later requests of the same
//! session back to it. This crate contains the shared infrastructure:
//!
//! - **Protocol Layer**: worker messages, load answers, documents, session keys
//!   and the error type
//! - **Transport Layer**: line codec, response framing and name resolution
//! - **Forms**: urlencoded form decoding
//! - **Configuration**: runtime directory and registry location
//!
//! # Architecture
//!
//! - **Transport**: Unix sockets named after logical port names
//! - **Requests**: one JSON object per line
//! - **Responses**: header block, blank line, `Content-Length` bytes of body
//!
//! # Example
//!
//! ```
//! use cgirelay_common::{SessionKey, WorkerMessage};
//! use cgirelay_common::transport::LineCodec;
//!
//! let key = SessionKey::fresh();
//! assert!(key.port_for("shop").starts_with("shop."));
//!
//! let line = LineCodec::encode(&WorkerMessage::GetLoad).unwrap();
//! assert_eq!(line, b"{\"type\":\"get_load\"}\n".to_vec());
//! ```

pub mod config;
pub mod form;
pub mod protocol;
pub mod transport;

pub use config::RelayConfig;
pub use protocol::*;
