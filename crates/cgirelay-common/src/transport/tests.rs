//! Integration tests for the transport layer
//!
//! These tests drive a message and its framed response through a real Unix
//! socket pair.

#[cfg(test)]
mod tests {
    use crate::protocol::{Document, WorkerMessage};
    use crate::transport::{forward_framed, LineCodec, NameResolver, SocketDirResolver};
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};

    #[tokio::test]
    async fn test_message_and_document_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SocketDirResolver::new(dir.path());
        let path = resolver.resolve("echo").unwrap();
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            let message = LineCodec::read_message(&mut reader).await.unwrap().unwrap();
            let body = match message {
                WorkerMessage::Submit { form_env, .. } => form_env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.name().to_string(),
            };

            write_half
                .write_all(&Document::text(body).to_bytes())
                .await
                .unwrap();
            write_half.flush().await.unwrap();
            // Hold the connection open; the reader must stop on Content-Length.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();

        let message = WorkerMessage::submit(
            vec![],
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
        );
        LineCodec::write_message(&mut write_half, &message).await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut out = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_millis(150),
            forward_framed(&mut reader, &mut out),
        )
        .await
        .expect("framed read should not wait for EOF")
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Content-Type: text/plain\nContent-Length: 7\n\na=1,b=2"
        );

        server.await.unwrap();
    }
}
