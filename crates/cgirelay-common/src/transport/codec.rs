use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{RelayError, Result};
use crate::protocol::WorkerMessage;

/// Longest message line accepted (16 MiB).
pub const MAX_LINE_SIZE: u64 = 16 * 1024 * 1024;

/// Line codec for worker protocol messages.
///
/// Each message is one JSON object followed by `\n`. JSON string escaping
/// guarantees the encoded object itself never contains a raw newline, so a
/// line is always exactly one message.
///
/// # Example
///
/// ```
/// use cgirelay_common::transport::LineCodec;
/// use cgirelay_common::protocol::WorkerMessage;
///
/// let encoded = LineCodec::encode(&WorkerMessage::GetLoad).unwrap();
/// assert_eq!(encoded.last(), Some(&b'\n'));
///
/// let decoded = LineCodec::decode(&encoded).unwrap();
/// assert_eq!(decoded, WorkerMessage::GetLoad);
/// ```
pub struct LineCodec;

impl LineCodec {
    /// Encode a message as one newline-terminated line
    pub fn encode(message: &WorkerMessage) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line (trailing `\r\n` or `\n` allowed)
    ///
    /// Anything that is not exactly one known variant is rejected.
    pub fn decode(line: &[u8]) -> Result<WorkerMessage> {
        let line = trim_line_end(line);
        if line.is_empty() {
            return Err(RelayError::Protocol("Empty message line".to_string()));
        }

        serde_json::from_slice(line).map_err(|e| {
            RelayError::Protocol(format!(
                "Unrecognized message '{}': {}",
                String::from_utf8_lossy(&line[..line.len().min(80)]),
                e
            ))
        })
    }

    /// Write one message and flush
    pub async fn write_message<W>(writer: &mut W, message: &WorkerMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let line = Self::encode(message)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one message
    ///
    /// Returns `Ok(None)` if the peer closed the stream before sending anything.
    pub async fn read_message<R>(reader: &mut R) -> Result<Option<WorkerMessage>>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = read_bounded_line(reader).await?;
        if line.is_empty() {
            return Ok(None);
        }
        Self::decode(&line).map(Some)
    }
}

/// Reads up to and including the next `\n`, refusing lines over [`MAX_LINE_SIZE`].
pub async fn read_bounded_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_LINE_SIZE + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if line.len() as u64 > MAX_LINE_SIZE {
        return Err(RelayError::Protocol(format!(
            "Message line too large (max {} bytes)",
            MAX_LINE_SIZE
        )));
    }

    Ok(line)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
