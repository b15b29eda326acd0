use thiserror::Error;

pub type Result<T> = std::result::Result<T, DanmakuError>;

#[derive(Debug, Error)]
pub enum DanmakuError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("connection error: {0}")]
    Connection(String),
}

impl DanmakuError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}
