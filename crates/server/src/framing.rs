//! Small async helpers layered over `amqpprox_core::wire`: read one frame
//! (and, for method frames, decode the `Method`) off a socket, buffering
//! partial reads the way the handshake state machine needs.

use amqpprox_core::wire::{constants, frame, Decoded, Method};
use amqpprox_core::{CloseError, CoreError};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub struct RawFrame {
    pub frame_type: u8,
    pub channel: u16,
    pub payload: Vec<u8>,
}

/// Read one complete frame off `stream`, growing `buf` as needed and
/// leaving any bytes past the frame for the next call.
pub async fn read_frame<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_frame_size: u32,
) -> Result<RawFrame, CoreError>
where
    S: AsyncRead + Unpin,
{
    loop {
        match frame::decode(&buf[..], max_frame_size)? {
            Decoded::Frame(f, consumed) => {
                let raw = RawFrame {
                    frame_type: f.frame_type,
                    channel: f.channel,
                    payload: f.payload.to_vec(),
                };
                let _ = buf.split_to(consumed);
                return Ok(raw);
            }
            Decoded::Incomplete => {
                let n = stream.read_buf(buf).await?;
                if n == 0 {
                    return Err(CoreError::Other("peer closed mid-frame".to_string()));
                }
            }
        }
    }
}

/// Read frames until a connection-class method frame arrives, skipping
/// heartbeats; non-connection-class method/header/body frames outside the
/// handshake are a protocol violation (the splice path is the only place
/// those are expected).
pub async fn read_method<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_frame_size: u32,
) -> Result<Method, CoreError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let raw = read_frame(stream, buf, max_frame_size).await?;
        match raw.frame_type {
            constants::frame_type::HEARTBEAT => continue,
            constants::frame_type::METHOD => return Ok(Method::decode(&raw.payload)?),
            other => {
                return Err(CoreError::Other(format!(
                    "unexpected frame type {other} during handshake"
                )))
            }
        }
    }
}

/// Read a method frame, surfacing an unexpected `Close` as a distinguished
/// [`CoreError::PeerClosed`] instead of a generic decode mismatch.
pub async fn expect_method<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_frame_size: u32,
) -> Result<Method, CoreError>
where
    S: AsyncRead + Unpin,
{
    let method = read_method(stream, buf, max_frame_size).await?;
    if let Method::Close(close) = &method {
        return Err(CoreError::PeerClosed(CloseError {
            reply_code: close.reply_code,
            reply_text: close.reply_text.clone(),
            class_id: close.class_id,
            method_id: close.method_id,
        }));
    }
    Ok(method)
}

pub async fn write_method<S>(stream: &mut S, channel: u16, method: &Method) -> Result<(), CoreError>
where
    S: AsyncWrite + Unpin,
{
    let body = method.encode_to_vec();
    let mut out = BytesMut::new();
    frame::encode(&mut out, constants::frame_type::METHOD, channel, &body);
    stream.write_all(&out).await?;
    Ok(())
}
