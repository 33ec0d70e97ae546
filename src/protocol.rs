//! Wire format between the driver and an out-of-process worker
//!
//! Every message is a tagged envelope:
//! - 1 byte: opcode
//! - 4 bytes: body length (big-endian u32)
//! - N bytes: body
//!
//! Bodies:
//! - Init: UTF-8 JSON worker settings
//! - Frame: 8 bytes timestamp (ms, big-endian u64) + raw payload
//! - Stop: empty
//! - Result: 1 byte motion flag + 8 bytes timestamp (big-endian u64) + compressed payload
//! - Ready: empty
//!
//! In-process workers exchange [`Request`] and [`Response`] values directly;
//! this encoding only exists at the process boundary.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::settings::WorkerSettings;
use crate::{Frame, ProcessedFrame};

pub const OP_INIT: u8 = 0x01;
pub const OP_FRAME: u8 = 0x02;
pub const OP_STOP: u8 = 0x03;
pub const OP_RESULT: u8 = 0x81;
pub const OP_READY: u8 = 0x82;

pub const ENVELOPE_HEADER_SIZE: usize = 5;
pub const FRAME_HEADER_SIZE: usize = 8;
pub const RESULT_HEADER_SIZE: usize = 9;
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Driver to worker
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Init(Box<WorkerSettings>),
    Frame(Frame),
    Stop,
}

/// Worker to driver
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ready,
    Processed(ProcessedFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub opcode: u8,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(opcode: u8, body: Bytes) -> Self {
        Self { opcode, body }
    }

    /// Header + body as one contiguous buffer
    pub fn to_bytes(&self) -> Result<Bytes> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::Oversized(self.body.len()));
        }
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.body.len());
        buf.put_u8(self.opcode);
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }
}

pub fn encode_request(request: &Request) -> Result<Envelope> {
    Ok(match request {
        Request::Init(settings) => {
            Envelope::new(OP_INIT, Bytes::from(serde_json::to_vec(settings)?))
        }
        Request::Frame(frame) => Envelope::new(OP_FRAME, frame_body(frame)),
        Request::Stop => Envelope::new(OP_STOP, Bytes::new()),
    })
}

pub fn decode_request(envelope: Envelope) -> Result<Request> {
    match envelope.opcode {
        OP_INIT => Ok(Request::Init(Box::new(serde_json::from_slice(
            &envelope.body,
        )?))),
        OP_FRAME => {
            let mut body = envelope.body;
            check_len("frame", &body, FRAME_HEADER_SIZE)?;
            let timestamp = body.get_u64();
            Ok(Request::Frame(Frame {
                timestamp,
                payload: body,
            }))
        }
        OP_STOP => Ok(Request::Stop),
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}

pub fn encode_response(response: &Response) -> Envelope {
    match response {
        Response::Ready => Envelope::new(OP_READY, Bytes::new()),
        Response::Processed(frame) => Envelope::new(OP_RESULT, result_body(frame)),
    }
}

pub fn decode_response(envelope: Envelope) -> Result<Response> {
    match envelope.opcode {
        OP_READY => Ok(Response::Ready),
        OP_RESULT => {
            let mut body = envelope.body;
            check_len("result", &body, RESULT_HEADER_SIZE)?;
            let motion = body.get_u8() == 1;
            let timestamp = body.get_u64();
            Ok(Response::Processed(ProcessedFrame {
                timestamp,
                compressed: body,
                motion,
            }))
        }
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}

fn frame_body(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
    buf.put_u64(frame.timestamp);
    buf.put_slice(&frame.payload);
    buf.freeze()
}

fn result_body(frame: &ProcessedFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(RESULT_HEADER_SIZE + frame.compressed.len());
    buf.put_u8(u8::from(frame.motion));
    buf.put_u64(frame.timestamp);
    buf.put_slice(&frame.compressed);
    buf.freeze()
}

fn check_len(kind: &'static str, body: &Bytes, min: usize) -> Result<()> {
    if body.len() < min {
        return Err(ProtocolError::Truncated {
            kind,
            len: body.len(),
            min,
        });
    }
    Ok(())
}

fn parse_header(header: [u8; ENVELOPE_HEADER_SIZE]) -> Result<(u8, usize)> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_BODY_SIZE {
        return Err(ProtocolError::Oversized(len));
    }
    Ok((header[0], len))
}

fn short_header(filled: usize) -> ProtocolError {
    ProtocolError::Truncated {
        kind: "header",
        len: filled,
        min: ENVELOPE_HEADER_SIZE,
    }
}

/// Read one envelope; `Ok(None)` on a clean end of stream between envelopes
///
/// A stream that ends part way through a header is an error.
pub fn read_envelope<R: Read>(reader: &mut R) -> Result<Option<Envelope>> {
    let mut header = [0u8; ENVELOPE_HEADER_SIZE];
    let mut filled = 0;
    while filled < ENVELOPE_HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(short_header(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let (opcode, len) = parse_header(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(Envelope::new(opcode, Bytes::from(body))))
}

pub fn write_envelope<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    writer.write_all(&envelope.to_bytes()?)?;
    writer.flush()?;
    Ok(())
}

/// Async counterpart of [`read_envelope`]
pub async fn read_envelope_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Envelope>> {
    let mut header = [0u8; ENVELOPE_HEADER_SIZE];
    let mut filled = 0;
    while filled < ENVELOPE_HEADER_SIZE {
        match reader.read(&mut header[filled..]).await {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(short_header(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let (opcode, len) = parse_header(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Envelope::new(opcode, Bytes::from(body))))
}

pub async fn write_envelope_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    writer.write_all(&envelope.to_bytes()?).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_body_is_big_endian_timestamp_then_payload() {
        let frame = Frame::new(0x0102_0304_0506_0708, &b"jpeg"[..]);
        let bytes = encode_request(&Request::Frame(frame)).unwrap().to_bytes().unwrap();

        assert_eq!(
            &bytes[..],
            &[
                OP_FRAME, 0, 0, 0, 12, //
                1, 2, 3, 4, 5, 6, 7, 8, //
                b'j', b'p', b'e', b'g'
            ]
        );
    }

    #[test]
    fn result_body_is_motion_flag_timestamp_payload() {
        let processed = ProcessedFrame {
            timestamp: 1_700_000_000_123,
            compressed: Bytes::from_static(b"xyz"),
            motion: true,
        };
        let envelope = encode_response(&Response::Processed(processed.clone()));

        assert_eq!(envelope.opcode, OP_RESULT);
        assert_eq!(envelope.body[0], 1);
        assert_eq!(&envelope.body[1..9], &1_700_000_000_123u64.to_be_bytes());
        assert_eq!(&envelope.body[9..], b"xyz");
        assert_eq!(
            decode_response(envelope).unwrap(),
            Response::Processed(processed)
        );
    }

    #[test]
    fn stop_marker_payload_is_an_ordinary_frame() {
        let frame = Frame::new(7, vec![0xFF, 0x00, 0xFF]);
        let envelope = encode_request(&Request::Frame(frame.clone())).unwrap();

        assert_eq!(decode_request(envelope).unwrap(), Request::Frame(frame));

        let stop = encode_request(&Request::Stop).unwrap();
        assert!(stop.body.is_empty());
        assert_eq!(decode_request(stop).unwrap(), Request::Stop);
    }

    #[test]
    fn truncated_frame_body_is_rejected() {
        let envelope = Envelope::new(OP_FRAME, Bytes::from_static(&[0, 0, 1]));
        assert!(matches!(
            decode_request(envelope),
            Err(ProtocolError::Truncated { len: 3, min: 8, .. })
        ));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let envelope = Envelope::new(0x42, Bytes::new());
        assert!(matches!(
            decode_response(envelope),
            Err(ProtocolError::UnknownOpcode(0x42))
        ));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let mut stream: &[u8] = &[OP_FRAME, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            read_envelope(&mut stream),
            Err(ProtocolError::Oversized(_))
        ));
    }

    #[test]
    fn stream_ending_inside_a_header_is_an_error() {
        let mut empty: &[u8] = &[];
        assert!(read_envelope(&mut empty).unwrap().is_none());

        let mut stream: &[u8] = &[OP_RESULT, 0, 0];
        assert!(matches!(
            read_envelope(&mut stream),
            Err(ProtocolError::Truncated {
                kind: "header",
                len: 3,
                min: 5
            })
        ));
    }

    #[tokio::test]
    async fn async_stream_ending_inside_a_header_is_an_error() {
        let mut stream: &[u8] = &[OP_RESULT, 0, 0];
        assert!(matches!(
            read_envelope_async(&mut stream).await,
            Err(ProtocolError::Truncated {
                kind: "header",
                len: 3,
                min: 5
            })
        ));
    }

    #[test]
    fn stream_of_envelopes_reads_back_in_order() {
        let settings = WorkerSettings::simple("garage");
        let mut wire = Vec::new();
        for request in [
            Request::Init(Box::new(settings.clone())),
            Request::Frame(Frame::new(1, &b"a"[..])),
            Request::Stop,
        ] {
            write_envelope(&mut wire, &encode_request(&request).unwrap()).unwrap();
        }

        let mut reader = &wire[..];
        let mut decoded = Vec::new();
        while let Some(envelope) = read_envelope(&mut reader).unwrap() {
            decoded.push(decode_request(envelope).unwrap());
        }

        assert_eq!(
            decoded,
            vec![
                Request::Init(Box::new(settings)),
                Request::Frame(Frame::new(1, &b"a"[..])),
                Request::Stop,
            ]
        );
    }

    #[tokio::test]
    async fn async_reader_handles_split_writes() {
        let (mut tx, mut rx) = tokio::io::duplex(4);
        let envelope = encode_response(&Response::Processed(ProcessedFrame {
            timestamp: 99,
            compressed: Bytes::from(vec![0xAB; 32]),
            motion: false,
        }));

        let expected = envelope.clone();
        let writer = tokio::spawn(async move {
            write_envelope_async(&mut tx, &envelope).await.unwrap();
        });

        let read = read_envelope_async(&mut rx).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(read, expected);
        assert!(read_envelope_async(&mut rx).await.unwrap().is_none());
    }
}
