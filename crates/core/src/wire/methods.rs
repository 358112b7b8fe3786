//! The narrow set of AMQP connection-class methods the proxy inspects and
//! synthesizes. Everything else (channel, exchange, queue, basic, ...) is
//! treated as opaque payload and spliced through untouched.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::constants::class_method;
use super::field_table::{self, FieldTableError, FieldValue};

#[derive(Debug, Error, PartialEq)]
pub enum MethodError {
    #[error("method body truncated")]
    Truncated,
    #[error("field table error: {0}")]
    FieldTable(#[from] FieldTableError),
    #[error("unsupported class/method ({0}, {1})")]
    Unsupported(u16, u16),
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, MethodError> {
    if buf.is_empty() {
        return Err(MethodError::Truncated);
    }
    let v = buf[0];
    buf.advance(1);
    Ok(v)
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, MethodError> {
    if buf.len() < 2 {
        return Err(MethodError::Truncated);
    }
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    buf.advance(2);
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, MethodError> {
    if buf.len() < 4 {
        return Err(MethodError::Truncated);
    }
    let v = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    buf.advance(4);
    Ok(v)
}

fn read_shortstr(buf: &mut &[u8]) -> Result<String, MethodError> {
    if buf.is_empty() {
        return Err(MethodError::Truncated);
    }
    let len = buf[0] as usize;
    if buf.len() < 1 + len {
        return Err(MethodError::Truncated);
    }
    let s = String::from_utf8_lossy(&buf[1..1 + len]).into_owned();
    buf.advance(1 + len);
    Ok(s)
}

fn write_shortstr(out: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    out.put_u8(len as u8);
    out.put_slice(&bytes[..len]);
}

fn read_longstr(buf: &mut &[u8]) -> Result<String, MethodError> {
    if buf.len() < 4 {
        return Err(MethodError::Truncated);
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    buf.advance(4);
    if buf.len() < len {
        return Err(MethodError::Truncated);
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(s)
}

fn write_longstr(out: &mut BytesMut, s: &str) {
    out.put_u32(s.len() as u32);
    out.put_slice(s.as_bytes());
}

/// Write the (classId, methodId) pair every method frame body starts with.
fn write_header(out: &mut BytesMut, class_id: u16, method_id: u16) {
    out.put_u16(class_id);
    out.put_u16(method_id);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: Vec<(String, FieldValue)>,
    pub mechanisms: String,
    pub locales: String,
}

impl Start {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        let version_major = read_u8(&mut buf)?;
        let version_minor = read_u8(&mut buf)?;
        let server_properties = field_table::decode_framed(&mut buf)?;
        let mechanisms = read_longstr(&mut buf)?;
        let locales = read_longstr(&mut buf)?;
        Ok(Start {
            version_major,
            version_minor,
            server_properties,
            mechanisms,
            locales,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::START);
        out.put_u8(self.version_major);
        out.put_u8(self.version_minor);
        field_table::encode_framed(out, &self.server_properties);
        write_longstr(out, &self.mechanisms);
        write_longstr(out, &self.locales);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartOk {
    pub client_properties: Vec<(String, FieldValue)>,
    pub mechanism: String,
    pub response: String,
    pub locale: String,
}

impl StartOk {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        let client_properties = field_table::decode_framed(&mut buf)?;
        let mechanism = read_shortstr(&mut buf)?;
        let response = read_longstr(&mut buf)?;
        let locale = read_shortstr(&mut buf)?;
        Ok(StartOk {
            client_properties,
            mechanism,
            response,
            locale,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::START_OK);
        field_table::encode_framed(out, &self.client_properties);
        write_shortstr(out, &self.mechanism);
        write_longstr(out, &self.response);
        write_shortstr(out, &self.locale);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Secure {
    pub challenge: String,
}

impl Secure {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        Ok(Secure {
            challenge: read_longstr(&mut buf)?,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::SECURE);
        write_longstr(out, &self.challenge);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecureOk {
    pub response: String,
}

impl SecureOk {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        Ok(SecureOk {
            response: read_longstr(&mut buf)?,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::SECURE_OK);
        write_longstr(out, &self.response);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat_interval: u16,
}

impl Tune {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        let channel_max = read_u16(&mut buf)?;
        let frame_max = read_u32(&mut buf)?;
        let heartbeat_interval = read_u16(&mut buf)?;
        Ok(Tune {
            channel_max,
            frame_max,
            heartbeat_interval,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::TUNE);
        out.put_u16(self.channel_max);
        out.put_u32(self.frame_max);
        out.put_u16(self.heartbeat_interval);
    }

    /// The effective negotiated value for each parameter is the minimum of
    /// what the proxy offered and what the peer asked for, with a non-zero
    /// value always winning over a zero ("no limit") value on either side.
    pub fn negotiate(offered: Tune, requested: Tune) -> Tune {
        fn min_nonzero(a: u32, b: u32) -> u32 {
            match (a, b) {
                (0, x) | (x, 0) => x,
                (a, b) => a.min(b),
            }
        }
        Tune {
            channel_max: min_nonzero(offered.channel_max as u32, requested.channel_max as u32)
                as u16,
            frame_max: min_nonzero(offered.frame_max, requested.frame_max),
            heartbeat_interval: min_nonzero(
                offered.heartbeat_interval as u32,
                requested.heartbeat_interval as u32,
            ) as u16,
        }
    }
}

pub type TuneOk = Tune;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Open {
    pub virtual_host: String,
}

impl Open {
    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        let virtual_host = read_shortstr(&mut buf)?;
        Ok(Open { virtual_host })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::OPEN);
        write_shortstr(out, &self.virtual_host);
        write_shortstr(out, "");
        out.put_u8(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOk;

impl OpenOk {
    pub fn decode(_buf: &[u8]) -> Result<Self, MethodError> {
        Ok(OpenOk)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::OPEN_OK);
        write_shortstr(out, "");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Close {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl Close {
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Close {
            reply_code,
            reply_text: reply_text.into(),
            class_id: 0,
            method_id: 0,
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, MethodError> {
        let reply_code = read_u16(&mut buf)?;
        let reply_text = read_shortstr(&mut buf)?;
        let class_id = read_u16(&mut buf)?;
        let method_id = read_u16(&mut buf)?;
        Ok(Close {
            reply_code,
            reply_text,
            class_id,
            method_id,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::CLOSE);
        out.put_u16(self.reply_code);
        write_shortstr(out, &self.reply_text);
        out.put_u16(self.class_id);
        out.put_u16(self.method_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseOk;

impl CloseOk {
    pub fn decode(_buf: &[u8]) -> Result<Self, MethodError> {
        Ok(CloseOk)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        write_header(out, class_method::CONNECTION, class_method::CLOSE_OK);
    }
}

/// Dispatches a decoded method-frame payload to one of the known connection
/// methods; anything outside the narrow set the proxy understands decodes
/// to `Other` and is left for the splice path to forward untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Start(Start),
    StartOk(StartOk),
    Secure(Secure),
    SecureOk(SecureOk),
    Tune(Tune),
    TuneOk(TuneOk),
    Open(Open),
    OpenOk(OpenOk),
    Close(Close),
    CloseOk(CloseOk),
    Other { class_id: u16, method_id: u16 },
}

impl Method {
    /// `body` is the method-frame payload, i.e. everything after the 7-byte
    /// frame header and before the sentinel, which begins with the 4-byte
    /// (classId, methodId) pair.
    pub fn decode(body: &[u8]) -> Result<Method, MethodError> {
        if body.len() < 4 {
            return Err(MethodError::Truncated);
        }
        let class_id = u16::from_be_bytes([body[0], body[1]]);
        let method_id = u16::from_be_bytes([body[2], body[3]]);
        let rest = &body[4..];

        if class_id != class_method::CONNECTION {
            return Ok(Method::Other {
                class_id,
                method_id,
            });
        }

        Ok(match method_id {
            class_method::START => Method::Start(Start::decode(rest)?),
            class_method::START_OK => Method::StartOk(StartOk::decode(rest)?),
            class_method::SECURE => Method::Secure(Secure::decode(rest)?),
            class_method::SECURE_OK => Method::SecureOk(SecureOk::decode(rest)?),
            class_method::TUNE => Method::Tune(Tune::decode(rest)?),
            class_method::TUNE_OK => Method::TuneOk(TuneOk::decode(rest)?),
            class_method::OPEN => Method::Open(Open::decode(rest)?),
            class_method::OPEN_OK => Method::OpenOk(OpenOk::decode(rest)?),
            class_method::CLOSE => Method::Close(Close::decode(rest)?),
            class_method::CLOSE_OK => Method::CloseOk(CloseOk::decode(rest)?),
            _ => Method::Other {
                class_id,
                method_id,
            },
        })
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        match self {
            Method::Start(m) => m.encode(&mut out),
            Method::StartOk(m) => m.encode(&mut out),
            Method::Secure(m) => m.encode(&mut out),
            Method::SecureOk(m) => m.encode(&mut out),
            Method::Tune(m) => m.encode(&mut out),
            Method::TuneOk(m) => m.encode(&mut out),
            Method::Open(m) => m.encode(&mut out),
            Method::OpenOk(m) => m.encode(&mut out),
            Method::Close(m) => m.encode(&mut out),
            Method::CloseOk(m) => m.encode(&mut out),
            Method::Other {
                class_id,
                method_id,
            } => write_header(&mut out, *class_id, *method_id),
        }
        out.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_round_trip() {
        let start = Start {
            version_major: 0,
            version_minor: 9,
            server_properties: vec![("product".into(), FieldValue::LongStr("amqpprox".into()))],
            mechanisms: "PLAIN".into(),
            locales: "en_US".into(),
        };
        let encoded = start.encode_as_method();
        match Method::decode(&encoded).unwrap() {
            Method::Start(decoded) => assert_eq!(decoded, start),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn start_ok_round_trip() {
        let start_ok = StartOk {
            client_properties: vec![("platform".into(), FieldValue::LongStr("rust".into()))],
            mechanism: "PLAIN".into(),
            response: "\0guest\0guest".into(),
            locale: "en_US".into(),
        };
        let encoded = start_ok.encode_as_method();
        match Method::decode(&encoded).unwrap() {
            Method::StartOk(decoded) => assert_eq!(decoded, start_ok),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tune_round_trip() {
        let tune = Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat_interval: 60,
        };
        let encoded = tune.encode_as_method();
        match Method::decode(&encoded).unwrap() {
            Method::Tune(decoded) => assert_eq!(decoded, tune),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tune_negotiate_takes_minimum_but_prefers_nonzero() {
        let offered = Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat_interval: 60,
        };
        let requested = Tune {
            channel_max: 0,
            frame_max: 65_536,
            heartbeat_interval: 30,
        };
        let negotiated = Tune::negotiate(offered, requested);
        assert_eq!(negotiated.channel_max, 2047);
        assert_eq!(negotiated.frame_max, 65_536);
        assert_eq!(negotiated.heartbeat_interval, 30);
    }

    #[test]
    fn open_round_trip() {
        let open = Open {
            virtual_host: "/".into(),
        };
        let encoded = open.encode_as_method();
        match Method::decode(&encoded).unwrap() {
            Method::Open(decoded) => assert_eq!(decoded, open),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_round_trip() {
        let close = Close::new(530, "ACCESS_REFUSED");
        let encoded = close.encode_as_method();
        match Method::decode(&encoded).unwrap() {
            Method::Close(decoded) => assert_eq!(decoded, close),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_ok_round_trip() {
        let encoded = CloseOk.encode_as_method();
        assert!(matches!(Method::decode(&encoded).unwrap(), Method::CloseOk(_)));
    }

    #[test]
    fn non_connection_class_is_other() {
        let mut body = BytesMut::new();
        write_header(&mut body, 60, 40); // basic.publish
        body.put_slice(b"whatever");
        match Method::decode(&body).unwrap() {
            Method::Other {
                class_id,
                method_id,
            } => {
                assert_eq!(class_id, 60);
                assert_eq!(method_id, 40);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_body_is_an_error() {
        assert_eq!(Method::decode(&[0, 10, 0]).unwrap_err(), MethodError::Truncated);
    }

    trait EncodeAsMethod {
        fn encode_as_method(&self) -> Vec<u8>;
    }

    impl EncodeAsMethod for Start {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::Start(self.clone()).encode_to_vec()
        }
    }
    impl EncodeAsMethod for StartOk {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::StartOk(self.clone()).encode_to_vec()
        }
    }
    impl EncodeAsMethod for Tune {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::Tune(*self).encode_to_vec()
        }
    }
    impl EncodeAsMethod for Open {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::Open(self.clone()).encode_to_vec()
        }
    }
    impl EncodeAsMethod for Close {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::Close(self.clone()).encode_to_vec()
        }
    }
    impl EncodeAsMethod for CloseOk {
        fn encode_as_method(&self) -> Vec<u8> {
            Method::CloseOk(*self).encode_to_vec()
        }
    }
}
