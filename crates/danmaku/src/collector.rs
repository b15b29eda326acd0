//! Duration-bounded chat collection over a single websocket.
//!
//! The collector joins the room, keeps the connection alive with periodic
//! `mrkl` heartbeats and writes every `chatmsg` payload into the transcript.
//! The wall-clock budget is enforced with a per-receive timeout equal to the
//! remaining time; socket errors end the run cleanly with whatever was
//! written so far.

use std::path::Path;
use std::time::Duration;

use douyu::stt;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async, connect_async_tls_with_config,
};
use tracing::{debug, warn};

use crate::error::{DanmakuError, Result};
use crate::writer::{ChatEntry, ChatXmlWriter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Chat group joined for the room-wide firehose.
const DEFAULT_GROUP_ID: i64 = -9999;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub ws_url: String,
    pub heartbeat: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://danmuproxy.douyu.com:8506/".to_string(),
            heartbeat: Duration::from_secs(30),
        }
    }
}

pub struct ChatCollector {
    config: CollectorConfig,
}

impl ChatCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// Collect chat for `duration`, writing the transcript to `output_path`.
    ///
    /// Returns the number of entries written. A zero duration is a no-op and
    /// creates no file.
    pub async fn collect(
        &self,
        room_id: &str,
        output_path: &Path,
        duration: Duration,
    ) -> Result<u64> {
        if duration.is_zero() {
            return Ok(0);
        }

        let mut ws = self.connect().await?;

        // Join the room before anything else arrives.
        ws.send(Message::Binary(stt::pack(&format!(
            "type@=loginreq/roomid@={room_id}/"
        ))))
        .await?;
        ws.send(Message::Binary(stt::pack(&format!(
            "type@=joingroup/rid@={room_id}/gid@={DEFAULT_GROUP_ID}/"
        ))))
        .await?;

        let (sink, mut stream) = ws.split();
        let (stop_tx, stop_rx) = oneshot::channel();
        let heartbeat = tokio::spawn(heartbeat_loop(sink, self.config.heartbeat, stop_rx));

        let mut writer = ChatXmlWriter::create(output_path).await?;
        let start = Instant::now();
        let deadline = start + duration;

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            if remaining.is_zero() {
                break;
            }

            let received = match tokio::time::timeout(remaining, stream.next()).await {
                Err(_) => break,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!(room_id, error = %e, "chat socket error, ending collection");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match received {
                Message::Binary(data) => {
                    for payload in stt::iter_payloads(&data) {
                        let kv = stt::parse_kv(&payload);
                        if kv.get("type").map(String::as_str) != Some("chatmsg") {
                            continue;
                        }
                        let Some(text) = kv.get("txt").filter(|t| !t.is_empty()) else {
                            continue;
                        };
                        let offset = start.elapsed().as_secs_f64();
                        writer.write_entry(&ChatEntry::new(offset, text.clone())).await?;
                    }
                }
                Message::Close(frame) => {
                    debug!(room_id, ?frame, "chat socket closed by peer");
                    break;
                }
                _ => {}
            }
        }

        // The heartbeat task must always be stopped and awaited, even on the
        // error paths above.
        let _ = stop_tx.send(());
        let _ = heartbeat.await;

        writer.finalize().await?;
        Ok(writer.entry_count())
    }

    /// Connect, retrying once with a legacy TLS 1.2 context when the default
    /// handshake is rejected (the chat endpoint still negotiates weak DH).
    async fn connect(&self) -> Result<WsStream> {
        match connect_async(&self.config.ws_url).await {
            Ok((ws, _)) => Ok(ws),
            Err(e) if is_tls_handshake_error(&e) => {
                warn!(error = %e, "TLS handshake rejected, retrying with TLS 1.2 context");
                let connector = legacy_tls_connector()?;
                let (ws, _) = connect_async_tls_with_config(
                    self.config.ws_url.as_str(),
                    None,
                    false,
                    Some(Connector::NativeTls(connector)),
                )
                .await?;
                Ok(ws)
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn heartbeat_loop(mut sink: WsSink, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the handshake already announced us.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Binary(stt::pack("type@=mrkl/"))).await {
                    debug!(error = %e, "heartbeat send failed, stopping");
                    break;
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

fn is_tls_handshake_error(error: &WsError) -> bool {
    match error {
        WsError::Tls(_) => true,
        WsError::Io(e) => e.to_string().contains("handshake"),
        _ => false,
    }
}

fn legacy_tls_connector() -> std::result::Result<native_tls::TlsConnector, DanmakuError> {
    native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .max_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(DanmakuError::from)
}
