//! Connector tests against fake workers listening on temporary sockets.

use cgirelay_client::{ConnectConfig, Connector};
use cgirelay_common::transport::{LineCodec, NameResolver, SocketDirResolver};
use cgirelay_common::{Document, Load, WorkerMessage};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

fn connector(dir: &tempfile::TempDir, timeout_ms: u64) -> Connector {
    Connector::new(
        SocketDirResolver::new(dir.path()),
        ConnectConfig::default().with_timeout_ms(timeout_ms),
    )
}

/// Accepts one connection, reads one message and answers with `reply(message)`.
async fn serve_once<F>(listener: UnixListener, reply: F) -> Option<WorkerMessage>
where
    F: FnOnce(&WorkerMessage) -> Vec<u8>,
{
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let message = LineCodec::read_message(&mut reader).await.unwrap()?;
    write_half.write_all(&reply(&message)).await.unwrap();
    write_half.shutdown().await.unwrap();
    Some(message)
}

#[tokio::test]
async fn test_absent_worker_returns_none_within_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let connector = connector(&dir, 200);

    let start = Instant::now();
    let conn = connector.connect("nobody").await;

    assert!(conn.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_stale_socket_file_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("stale").unwrap();
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    assert!(connector(&dir, 100).connect("stale").await.is_none());
}

#[tokio::test]
async fn test_connect_retries_until_worker_binds() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("late").unwrap();

    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = UnixListener::bind(&path).unwrap();
        serve_once(listener, |_| Load::Idle.as_line().as_bytes().to_vec()).await
    });

    let conn = connector(&dir, 2000).connect("late").await.expect("worker should appear");
    assert_eq!(conn.port(), "late");
    assert_eq!(conn.get_load().await.unwrap(), Load::Idle);

    assert_eq!(server.await.unwrap(), Some(WorkerMessage::GetLoad));
}

#[tokio::test]
async fn test_get_load_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("busy").unwrap();
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, |_| b"busy serving /cart\n".to_vec()));

    let conn = connector(&dir, 500).connect("busy").await.unwrap();
    assert!(conn.get_load().await.unwrap().is_busy());
    server.await.unwrap();
}

#[tokio::test]
async fn test_request_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("status").unwrap();
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, |message| {
        Document::text(format!("got {}", message.name())).to_bytes()
    }));

    let conn = connector(&dir, 500).connect("status").await.unwrap();
    let doc = conn.request_document(&WorkerMessage::ShowStatus).await.unwrap();

    assert_eq!(
        String::from_utf8(doc).unwrap(),
        "Content-Type: text/plain\nContent-Length: 14\n\ngot showstatus"
    );
    server.await.unwrap();
}

#[tokio::test]
async fn test_forward_document_after_submit() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("form").unwrap();
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, |message| match message {
        WorkerMessage::Submit { form_env, .. } => Document::html(format!("<p>{}</p>", form_env.len())).to_bytes(),
        _ => Vec::new(),
    }));

    let mut conn = connector(&dir, 500).connect("form").await.unwrap();
    conn.send(&WorkerMessage::submit(
        vec![],
        vec![("a".to_string(), "1".to_string())],
    ))
    .await
    .unwrap();

    let mut out = Vec::new();
    let n = conn.forward_document(&mut out).await.unwrap();

    assert_eq!(n as usize, out.len());
    assert!(out.ends_with(b"\n\n<p>1</p>"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_reply_line_empty_when_worker_hangs_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("mute").unwrap();
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, |_| Vec::new()));

    let mut conn = connector(&dir, 500).connect("mute").await.unwrap();
    conn.send(&WorkerMessage::submit(vec![], vec![])).await.unwrap();

    assert!(conn.read_reply_line().await.unwrap().is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_forward_reply_after_first_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = SocketDirResolver::new(dir.path()).resolve("page").unwrap();
    let listener = UnixListener::bind(&path).unwrap();
    let server = tokio::spawn(serve_once(listener, |_| Document::html("<p>hi</p>").to_bytes()));

    let mut conn = connector(&dir, 500).connect("page").await.unwrap();
    conn.send(&WorkerMessage::submit(vec![], vec![])).await.unwrap();

    let first = conn.read_reply_line().await.unwrap();
    assert_eq!(first, b"Content-Type: text/html\n".to_vec());

    let mut out = Vec::new();
    conn.forward_reply(first, &mut out).await.unwrap();
    assert_eq!(out, Document::html("<p>hi</p>").to_bytes());
    server.await.unwrap();
}
