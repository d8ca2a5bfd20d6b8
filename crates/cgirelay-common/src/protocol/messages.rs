//! Worker protocol messages.
//!
//! A dispatcher opens one connection per exchange and sends exactly one
//! [`WorkerMessage`]. What comes back depends on the variant:
//!
//! | Variant | Response |
//! |---|---|
//! | `Submit` | framed document |
//! | `GetLoad` | one line, `busy` or `idle` |
//! | `SketchStatus`, `ShowStatus`, `SketchHandlers`, `CleanServer` | framed document |
//! | `StopCgiServer` | nothing, the worker closes the connection |

use serde::{Deserialize, Serialize};

/// Ordered key/value pairs (environment or form fields).
pub type Env = Vec<(String, String)>;

/// A request sent from a dispatcher or the fleet admin to a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Forward a form submission together with the allow-listed CGI environment
    Submit { server_env: Env, form_env: Env },
    /// Ask whether the worker is currently serving another request
    GetLoad,
    /// Short summary of worker state
    SketchStatus,
    /// Full worker state
    ShowStatus,
    /// Summary of the registered event handlers
    SketchHandlers,
    /// Purge expired state and terminate when idle past the expiration
    CleanServer,
    /// Shut down and unregister
    StopCgiServer,
}

impl WorkerMessage {
    pub fn submit(server_env: Env, form_env: Env) -> Self {
        WorkerMessage::Submit {
            server_env,
            form_env,
        }
    }

    /// Short name used in logs and fleet reports.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerMessage::Submit { .. } => "submit",
            WorkerMessage::GetLoad => "getload",
            WorkerMessage::SketchStatus => "sketchstatus",
            WorkerMessage::ShowStatus => "showstatus",
            WorkerMessage::SketchHandlers => "sketchhandlers",
            WorkerMessage::CleanServer => "cleanserver",
            WorkerMessage::StopCgiServer => "stopcgiserver",
        }
    }

    /// Whether the worker answers with a framed document.
    pub fn expects_document(&self) -> bool {
        !matches!(self, WorkerMessage::GetLoad | WorkerMessage::StopCgiServer)
    }
}

/// Answer to [`WorkerMessage::GetLoad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Load {
    Busy,
    Idle,
}

impl Load {
    /// Parses a load line. Anything that does not start with `busy` is idle.
    pub fn from_line(line: &str) -> Self {
        if line.trim_start().starts_with("busy") {
            Load::Busy
        } else {
            Load::Idle
        }
    }

    /// Newline-terminated wire form.
    pub fn as_line(&self) -> &'static str {
        match self {
            Load::Busy => "busy\n",
            Load::Idle => "idle\n",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Load::Busy)
    }
}
