use thiserror::Error;

use crate::wire::{FrameError, MethodError};

/// The broker (or client) closed the connection with a Close method where
/// the handshake state machine was expecting something else. Carried as a
/// distinct variant so callers can forward the peer's reply verbatim
/// instead of synthesizing a generic error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("peer sent Close(reply_code={reply_code}, reply_text={reply_text:?}) during handshake (expected class {class_id}, method {method_id})")]
pub struct CloseError {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("method decode error: {0}")]
    Method(#[from] MethodError),

    #[error("bad protocol preamble")]
    BadPreamble,

    #[error(transparent)]
    PeerClosed(#[from] CloseError),

    #[error("no route for vhost {0:?}")]
    NoRoute(String),

    #[error("authentication denied: {0}")]
    AuthDenied(String),

    #[error("handshake timed out in state {0}")]
    HandshakeTimeout(String),

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// The AMQP reply code this error should be reported to the client as,
    /// per the reply-code table the proxy synthesizes Close methods from.
    pub fn reply_code(&self) -> u16 {
        use crate::wire::constants::reply_code;
        match self {
            CoreError::Frame(_) | CoreError::Method(_) | CoreError::BadPreamble => {
                reply_code::FRAME_ERROR
            }
            CoreError::NoRoute(_) | CoreError::AuthDenied(_) => reply_code::NOT_ALLOWED,
            CoreError::PeerClosed(close) => close.reply_code,
            _ => reply_code::INTERNAL_ERROR,
        }
    }
}
