//! Response framing.
//!
//! A framed response is a header block terminated by a blank line. If the
//! header block carries `Content-Length`, exactly that many body bytes follow;
//! otherwise the body runs to end of stream. Some transports do not signal end
//! of stream promptly, so the explicit length lets a reader stop on time.

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::Result;
use crate::transport::codec::read_bounded_line;

/// Copies one framed response from `reader` to `writer`.
///
/// The header block and the blank separator are copied unchanged. Returns the
/// total number of bytes written.
pub async fn forward_framed<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let first_line = read_bounded_line(reader).await?;
    forward_framed_from(first_line, reader, writer).await
}

/// Like [`forward_framed`], when the first header line was already read from `reader`.
///
/// An empty `first_line` means the stream ended before the response started.
pub async fn forward_framed_from<R, W>(first_line: Vec<u8>, reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut content_length = None;
    let mut line = first_line;

    loop {
        if line.is_empty() {
            // Stream ended inside the header block
            writer.flush().await?;
            return Ok(written);
        }

        writer.write_all(&line).await?;
        written += line.len() as u64;

        if is_blank_line(&line) {
            break;
        }
        if let Some(len) = parse_content_length(&line) {
            content_length = Some(len);
        }
        line = read_bounded_line(reader).await?;
    }

    let copied = match content_length {
        Some(len) => {
            let copied = tokio::io::copy(&mut (&mut *reader).take(len), writer).await?;
            if copied < len {
                tracing::warn!(
                    "Response body ended early: expected {} bytes, got {}",
                    len,
                    copied
                );
            }
            copied
        }
        None => tokio::io::copy(reader, writer).await?,
    };

    writer.flush().await?;
    Ok(written + copied)
}

/// Reads one framed response fully into memory.
pub async fn read_framed<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut out = Vec::new();
    forward_framed(reader, &mut out).await?;
    Ok(out)
}

/// Splits a buffered framed response into header block and body.
///
/// The header block excludes the blank separator line.
pub fn split_framed(data: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < data.len() {
        let end = data[pos..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| pos + i + 1)
            .unwrap_or(data.len());
        if is_blank_line(&data[pos..end]) {
            return (&data[..pos], &data[end..]);
        }
        pos = end;
    }
    (data, &[])
}

/// Parses a `Content-Length:` header line (name matched case-insensitively).
pub fn parse_content_length(line: &[u8]) -> Option<u64> {
    let line = std::str::from_utf8(line).ok()?;
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

fn is_blank_line(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length(b"Content-Length: 42\n"), Some(42));
        assert_eq!(parse_content_length(b"content-length:7\r\n"), Some(7));
        assert_eq!(parse_content_length(b"CONTENT-LENGTH:   0\n"), Some(0));
        assert_eq!(parse_content_length(b"Content-Type: text/html\n"), None);
        assert_eq!(parse_content_length(b"Content-Length: many\n"), None);
        assert_eq!(parse_content_length(b"X-Content-Length: 3\n"), None);
    }

    #[tokio::test]
    async fn test_forward_stops_at_content_length() {
        let input = b"Content-Type: text/plain\nContent-Length: 5\n\nhelloTRAILING GARBAGE";
        let mut reader = BufReader::new(&input[..]);
        let mut out = Vec::new();

        let n = forward_framed(&mut reader, &mut out).await.unwrap();

        assert_eq!(out, b"Content-Type: text/plain\nContent-Length: 5\n\nhello".to_vec());
        assert_eq!(n, out.len() as u64);
    }

    #[tokio::test]
    async fn test_forward_without_length_reads_to_eof() {
        let input = b"Content-Type: text/html\r\n\r\n<p>one</p>\n<p>two</p>\n";
        let mut reader = BufReader::new(&input[..]);
        let mut out = Vec::new();

        forward_framed(&mut reader, &mut out).await.unwrap();

        assert_eq!(out, input.to_vec());
    }

    #[tokio::test]
    async fn test_forward_truncated_headers() {
        let input = b"Content-Type: text/html\n";
        let mut reader = BufReader::new(&input[..]);
        let out = read_framed(&mut reader).await.unwrap();
        assert_eq!(out, input.to_vec());
    }

    #[tokio::test]
    async fn test_forward_short_body() {
        let input = b"Content-Length: 10\n\nabc";
        let mut reader = BufReader::new(&input[..]);
        let out = read_framed(&mut reader).await.unwrap();
        assert_eq!(out, input.to_vec());
    }

    #[tokio::test]
    async fn test_body_bytes_copied_verbatim() {
        let mut input = b"Content-Length: 4\n\n".to_vec();
        input.extend_from_slice(&[0xff, 0x00, b'\n', 0xe9]);
        let mut reader = BufReader::new(&input[..]);
        let out = read_framed(&mut reader).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_forward_from_prefetched_line() {
        let input = b"Content-Length: 2\n\nokEXTRA";
        let mut reader = BufReader::new(&input[..]);
        let first = read_bounded_line(&mut reader).await.unwrap();
        assert_eq!(first, b"Content-Length: 2\n".to_vec());

        let mut out = Vec::new();
        let n = forward_framed_from(first, &mut reader, &mut out).await.unwrap();

        assert_eq!(out, b"Content-Length: 2\n\nok".to_vec());
        assert_eq!(n, out.len() as u64);
    }

    #[tokio::test]
    async fn test_forward_from_empty_first_line_writes_nothing() {
        let mut reader = BufReader::new(&b""[..]);
        let mut out = Vec::new();
        let n = forward_framed_from(Vec::new(), &mut reader, &mut out).await.unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_split_framed() {
        let (head, body) = split_framed(b"A: 1\nB: 2\n\nbody\n\nmore");
        assert_eq!(head, b"A: 1\nB: 2\n");
        assert_eq!(body, b"body\n\nmore");

        let (head, body) = split_framed(b"A: 1\n");
        assert_eq!(head, b"A: 1\n");
        assert!(body.is_empty());
    }
}
