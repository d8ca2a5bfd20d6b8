pub mod document;
pub mod error;
pub mod messages;
pub mod session;

#[cfg(test)]
mod tests;

pub use document::Document;
pub use error::{RelayError, Result};
pub use messages::{Env, Load, WorkerMessage};
pub use session::{SessionKey, SESSION_KEY_FIELD};
