use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use super::error::{RelayError, Result};

/// Hidden form field carrying the session key between requests.
pub const SESSION_KEY_FIELD: &str = "SCRIPTKEY";

/// Separates the base port name from the session key in an instance port name.
const PORT_SEPARATOR: char = '.';

/// Separates the segments of a chained session key.
const SEGMENT_SEPARATOR: char = '-';

static SEGMENT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Session key as an accumulating path of segments.
///
/// The empty path is the canonical instance of a program. Every load
/// balancing hop appends one freshly generated segment, so a key's depth is
/// the number of hops it took to find a free instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionKey {
    segments: Vec<String>,
}

impl SessionKey {
    /// The key of the canonical (unsuffixed) instance.
    pub fn canonical() -> Self {
        Self::default()
    }

    /// A single fresh segment.
    pub fn fresh() -> Self {
        SessionKey {
            segments: vec![generate_segment()],
        }
    }

    /// This key with one fresh segment appended.
    pub fn extend(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.push(generate_segment());
        SessionKey { segments }
    }

    pub fn is_canonical(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments (load balancing hops).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Parses the wire form. The empty string is the canonical key.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::canonical());
        }

        let segments: Vec<String> = s.split(SEGMENT_SEPARATOR).map(str::to_string).collect();
        for segment in &segments {
            if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(RelayError::Protocol(format!("Malformed session key '{}'", s)));
            }
        }

        Ok(SessionKey { segments })
    }

    /// Port name of the instance this key designates under `base`.
    pub fn port_for(&self, base: &str) -> String {
        if self.is_canonical() {
            base.to_string()
        } else {
            format!("{}{}{}", base, PORT_SEPARATOR, self)
        }
    }

    /// Recovers the key of an instance port name, if it belongs to `base`.
    pub fn from_port(base: &str, port: &str) -> Option<Self> {
        if port == base {
            return Some(Self::canonical());
        }
        let suffix = port.strip_prefix(base)?.strip_prefix(PORT_SEPARATOR)?;
        Self::parse(suffix).ok()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, "{}", SEGMENT_SEPARATOR)?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

/// Timestamp in milliseconds, process id and a per-process counter, in hex.
fn generate_segment() -> String {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let counter = SEGMENT_COUNTER.fetch_add(1, Ordering::SeqCst);

    format!("{:x}{:06x}{:04x}", millis, std::process::id(), counter & 0xffff)
}
