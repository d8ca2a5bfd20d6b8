//! Worker command line.
//!
//! Dispatchers start workers as `program [server_args] -port <port> -scriptkey <key>`.
//! The options use a single dash, so they are read here rather than through a
//! derive-based parser; anything unrecognised is kept for the application.

use cgirelay_common::{RelayError, Result, SessionKey};

/// Options every worker understands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerArgs {
    /// Port name to bind (`-port`)
    pub port: String,
    /// Session key the dispatcher assigned (`-scriptkey`), canonical if absent
    pub script_key: SessionKey,
    /// Idle timeout override in milliseconds (`-servertimeout`)
    pub server_timeout_ms: Option<u64>,
    /// Arguments not consumed above, in order
    pub rest: Vec<String>,
}

impl WorkerArgs {
    /// Parses the current process arguments (without the program name).
    pub fn from_env() -> Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parses an argument list. `-port` is required.
    ///
    /// Both `-name value` and `--name value` are accepted.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = WorkerArgs::default();
        let mut port = None;
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            let option = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'));
            match option {
                Some("port") => port = Some(value_of(&mut args, "port")?),
                Some("scriptkey") => {
                    parsed.script_key = SessionKey::parse(&value_of(&mut args, "scriptkey")?)?;
                }
                Some("servertimeout") => {
                    let value = value_of(&mut args, "servertimeout")?;
                    let ms = value.parse().map_err(|_| {
                        RelayError::Config(format!("-servertimeout expects milliseconds, got '{}'", value))
                    })?;
                    parsed.server_timeout_ms = Some(ms);
                }
                _ => parsed.rest.push(arg),
            }
        }

        parsed.port = port
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RelayError::Config("missing -port".to_string()))?;
        Ok(parsed)
    }

    /// Argument list that reproduces these options.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.rest.clone();
        if let Some(ms) = self.server_timeout_ms {
            args.push("-servertimeout".to_string());
            args.push(ms.to_string());
        }
        args.push("-port".to_string());
        args.push(self.port.clone());
        args.push("-scriptkey".to_string());
        args.push(self.script_key.to_string());
        args
    }
}

fn value_of<I: Iterator<Item = String>>(args: &mut I, name: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| RelayError::Config(format!("-{} requires a value", name)))
}
