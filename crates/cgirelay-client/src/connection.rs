use cgirelay_common::protocol::error::Result;
use cgirelay_common::transport::{
    forward_framed, forward_framed_from, read_bounded_line, read_framed, LineCodec,
};
use cgirelay_common::{Load, WorkerMessage};
use tokio::io::{AsyncWrite, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// An open connection to one worker.
///
/// Workers handle exactly one message per connection, so a connection is
/// used for a single exchange and then dropped.
pub struct WorkerConnection {
    port: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl WorkerConnection {
    pub(crate) fn new(port: &str, stream: UnixStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            port: port.to_string(),
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Port name this connection was opened for.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Sends one message.
    pub async fn send(&mut self, message: &WorkerMessage) -> Result<()> {
        tracing::trace!("-> {} {}", self.port, message.name());
        LineCodec::write_message(&mut self.writer, message).await
    }

    /// Copies the framed response to `writer`. Returns the number of bytes copied.
    pub async fn forward_document<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        forward_framed(&mut self.reader, writer).await
    }

    /// Waits for the first line of the response.
    ///
    /// Empty if the worker closed the connection without answering.
    pub async fn read_reply_line(&mut self) -> Result<Vec<u8>> {
        read_bounded_line(&mut self.reader).await
    }

    /// Copies the rest of a response whose first line was read with
    /// [`read_reply_line`](Self::read_reply_line).
    pub async fn forward_reply<W>(&mut self, first_line: Vec<u8>, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        forward_framed_from(first_line, &mut self.reader, writer).await
    }

    /// Reads the framed response into memory.
    pub async fn read_document(&mut self) -> Result<Vec<u8>> {
        read_framed(&mut self.reader).await
    }

    /// Sends `message` and reads the framed response.
    pub async fn request_document(mut self, message: &WorkerMessage) -> Result<Vec<u8>> {
        self.send(message).await?;
        self.read_document().await
    }

    /// Asks whether the worker is serving another request.
    pub async fn get_load(mut self) -> Result<Load> {
        self.send(&WorkerMessage::GetLoad).await?;
        let line = read_bounded_line(&mut self.reader).await?;
        Ok(Load::from_line(&String::from_utf8_lossy(&line)))
    }

    /// Tells the worker to shut down. Nothing is read back.
    pub async fn stop(mut self) -> Result<()> {
        self.send(&WorkerMessage::StopCgiServer).await
    }
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("port", &self.port)
            .finish()
    }
}
