//! Collector flow against a local websocket stub.

use std::time::Duration;

use danmaku::{ChatCollector, CollectorConfig};
use douyu::stt;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

#[tokio::test]
async fn collector_writes_one_entry_for_one_chat_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Room join handshake: loginreq then joingroup.
        let login = ws.next().await.unwrap().unwrap();
        let join = ws.next().await.unwrap().unwrap();
        let login_payloads: Vec<_> = match &login {
            Message::Binary(data) => stt::iter_payloads(data).collect(),
            other => panic!("expected binary login frame, got {other:?}"),
        };
        assert!(login_payloads[0].contains("type@=loginreq"));
        assert!(login_payloads[0].contains("roomid@=1234"));
        let join_payloads: Vec<_> = match &join {
            Message::Binary(data) => stt::iter_payloads(data).collect(),
            other => panic!("expected binary join frame, got {other:?}"),
        };
        assert!(join_payloads[0].contains("type@=joingroup"));

        ws.send(Message::Binary(stt::pack(
            "type@=chatmsg/nn@=u1/txt@=hello/",
        )))
        .await
        .unwrap();
        let _ = ws.close(None).await;
    });

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("chat.xml.part");

    let collector = ChatCollector::new(CollectorConfig {
        ws_url: format!("ws://{addr}/"),
        heartbeat: Duration::from_secs(30),
    });

    let count = collector
        .collect("1234", &path, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(count, 1);

    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(content.contains(">hello</d>"));
    assert!(content.ends_with("</i>\n"));

    server.await.unwrap();
}

#[tokio::test]
async fn collector_ignores_non_chat_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        let _ = ws.next().await;

        // Keepalive and a user-enter event, then one real message in a
        // concatenated frame.
        let mut buf = stt::pack("type@=mrkl/").to_vec();
        buf.extend_from_slice(&stt::pack("type@=uenter/nn@=lurker/"));
        buf.extend_from_slice(&stt::pack("type@=chatmsg/nn@=u2/txt@=only this/"));
        ws.send(Message::Binary(buf.into())).await.unwrap();
        let _ = ws.close(None).await;
    });

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("chat.xml.part");

    let collector = ChatCollector::new(CollectorConfig {
        ws_url: format!("ws://{addr}/"),
        heartbeat: Duration::from_secs(30),
    });

    let count = collector
        .collect("1234", &path, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(count, 1);
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(content.contains(">only this</d>"));
    assert!(!content.contains("lurker"));

    server.await.unwrap();
}
