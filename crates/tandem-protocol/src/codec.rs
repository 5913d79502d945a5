//! Length-prefixed binary framing for [`RpcMessage`].
//!
//! Frame format: `[length:4][type:1][body:N]`
//!
//! - **length**: size of type byte + body (little-endian u32)
//! - **type**: [`MessageType`] discriminant
//! - **body**: empty for keep-alives, otherwise
//!   `service method id:16 fault (args | payload)`
//!
//! Strings carry a 7-bit base-128 length prefix followed by UTF-8 bytes.
//! Argument counts and buffer lengths are little-endian `i32`. Optional
//! sections start with a flag byte where `1` means absent.

use crate::error::{FramingError, Result};
use crate::message::{MessageId, MessageType, RemoteFault, Request, Response, RpcMessage};

/// Size of the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for a single frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const ABSENT: u8 = 1;
const PRESENT: u8 = 0;

/// Encode one message as a complete frame.
pub fn encode(message: &RpcMessage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len_hint(message));
    encode_into(message, &mut out)?;
    Ok(out)
}

/// Append one complete frame to `out`.
///
/// On error `out` is left as it was before the call.
pub fn encode_into(message: &RpcMessage, out: &mut Vec<u8>) -> Result<()> {
    let frame_start = out.len();
    out.extend_from_slice(&[0; LENGTH_PREFIX_LEN]);
    out.push(message.message_type().as_u8());

    let written = match message {
        RpcMessage::KeepAlive => Ok(()),
        RpcMessage::Request(request) => write_request(out, request),
        RpcMessage::Response(response) => write_response(out, response),
    };
    if let Err(e) = written {
        out.truncate(frame_start);
        return Err(e);
    }

    let body_len = out.len() - frame_start - LENGTH_PREFIX_LEN;
    let Ok(prefix) = u32::try_from(body_len) else {
        out.truncate(frame_start);
        return Err(FramingError::FrameTooLarge {
            len: body_len,
            max: u32::MAX as usize,
        });
    };
    out[frame_start..frame_start + LENGTH_PREFIX_LEN].copy_from_slice(&prefix.to_le_bytes());
    Ok(())
}

/// Decode a buffer that holds exactly one frame.
///
/// Fails with [`FramingError::Incomplete`] if the declared length exceeds the
/// buffer and with [`FramingError::TrailingBytes`] if bytes remain after it.
pub fn decode(bytes: &[u8]) -> Result<RpcMessage> {
    let total = frame_len(bytes, DEFAULT_MAX_FRAME_LEN)?.ok_or(FramingError::Incomplete {
        needed: LENGTH_PREFIX_LEN,
        available: bytes.len(),
    })?;
    if bytes.len() < total {
        return Err(FramingError::Incomplete {
            needed: total,
            available: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(FramingError::TrailingBytes {
            count: bytes.len() - total,
        });
    }
    decode_body(&bytes[LENGTH_PREFIX_LEN..])
}

/// Peel every complete frame off the front of `buffer`.
///
/// Returns the decoded messages in order and the unconsumed tail, which may
/// be a partial frame or a partial length prefix.
pub fn try_decode_frames(buffer: &[u8]) -> Result<(Vec<RpcMessage>, &[u8])> {
    let mut messages = Vec::new();
    let mut rest = buffer;
    while let Some((message, consumed)) = peel_frame(rest, DEFAULT_MAX_FRAME_LEN)? {
        messages.push(message);
        rest = &rest[consumed..];
    }
    Ok((messages, rest))
}

/// Rolling receive buffer for a byte stream.
///
/// Bytes from successive socket reads are appended with [`extend`], and
/// complete frames are peeled off the front with [`next_message`]. The
/// unconsumed remainder stays buffered for the next read.
///
/// [`extend`]: FrameDecoder::extend
/// [`next_message`]: FrameDecoder::next_message
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    start: usize,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            max_frame_len,
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        // Reclaim consumed space before growing.
        if self.start > 0 && self.start >= self.buf.len() / 2 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<RpcMessage>> {
        match peel_frame(&self.buf[self.start..], self.max_frame_len)? {
            Some((message, consumed)) => {
                self.start += consumed;
                if self.start == self.buf.len() {
                    self.buf.clear();
                    self.start = 0;
                }
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Decode every complete frame currently buffered.
    pub fn drain_messages(&mut self) -> Result<Vec<RpcMessage>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Total frame size (prefix included) if the prefix is buffered.
fn frame_len(buf: &[u8], max_frame_len: usize) -> Result<Option<usize>> {
    let Some(prefix) = buf.get(..LENGTH_PREFIX_LEN) else {
        return Ok(None);
    };
    let body_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if body_len == 0 {
        return Err(FramingError::EmptyFrame);
    }
    if body_len > max_frame_len {
        return Err(FramingError::FrameTooLarge {
            len: body_len,
            max: max_frame_len,
        });
    }
    Ok(Some(LENGTH_PREFIX_LEN + body_len))
}

fn peel_frame(buf: &[u8], max_frame_len: usize) -> Result<Option<(RpcMessage, usize)>> {
    let Some(total) = frame_len(buf, max_frame_len)? else {
        return Ok(None);
    };
    if buf.len() < total {
        return Ok(None);
    }
    let message = decode_body(&buf[LENGTH_PREFIX_LEN..total])?;
    Ok(Some((message, total)))
}

fn decode_body(body: &[u8]) -> Result<RpcMessage> {
    let mut reader = BodyReader::new(body);
    let type_byte = reader.read_u8("message type")?;
    let message_type =
        MessageType::try_from(type_byte).map_err(FramingError::UnknownMessageType)?;

    let message = match message_type {
        MessageType::KeepAlive => RpcMessage::KeepAlive,
        MessageType::Request => {
            let (service_name, method_name, message_id, fault) = reader.read_header()?;
            if fault.is_some() {
                return Err(FramingError::UnexpectedFault);
            }
            let count = reader.read_len("argument count")?;
            let mut args = Vec::with_capacity(count.min(reader.remaining()));
            for _ in 0..count {
                let len = reader.read_len("argument length")?;
                args.push(reader.read_bytes(len, "argument")?.to_vec());
            }
            RpcMessage::Request(Request {
                service_name,
                method_name,
                message_id,
                args,
            })
        }
        MessageType::Response => {
            let (service_name, method_name, message_id, fault) = reader.read_header()?;
            let payload = if reader.read_flag("payload")? {
                let len = reader.read_len("payload length")?;
                Some(reader.read_bytes(len, "payload")?.to_vec())
            } else {
                None
            };
            RpcMessage::Response(Response {
                service_name,
                method_name,
                message_id,
                payload,
                fault,
            })
        }
    };

    if reader.remaining() != 0 {
        return Err(FramingError::BodyLengthMismatch {
            declared: body.len(),
            consumed: reader.pos,
        });
    }
    Ok(message)
}

fn write_header(
    out: &mut Vec<u8>,
    service_name: &str,
    method_name: &str,
    message_id: MessageId,
    fault: Option<&RemoteFault>,
) -> Result<()> {
    write_str(out, service_name)?;
    write_str(out, method_name)?;
    out.extend_from_slice(&message_id.to_wire_bytes());
    match fault {
        Some(fault) => {
            out.push(PRESENT);
            write_str(out, &fault.error_text)?;
        }
        None => out.push(ABSENT),
    }
    Ok(())
}

fn write_request(out: &mut Vec<u8>, request: &Request) -> Result<()> {
    write_header(
        out,
        &request.service_name,
        &request.method_name,
        request.message_id,
        None,
    )?;
    write_len(out, request.args.len())?;
    for arg in &request.args {
        write_len(out, arg.len())?;
        out.extend_from_slice(arg);
    }
    Ok(())
}

fn write_response(out: &mut Vec<u8>, response: &Response) -> Result<()> {
    write_header(
        out,
        &response.service_name,
        &response.method_name,
        response.message_id,
        response.fault.as_ref(),
    )?;
    match &response.payload {
        Some(payload) => {
            out.push(PRESENT);
            write_len(out, payload.len())?;
            out.extend_from_slice(payload);
        }
        None => out.push(ABSENT),
    }
    Ok(())
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let value = i32::try_from(len).map_err(|_| FramingError::FrameTooLarge {
        len,
        max: i32::MAX as usize,
    })?;
    out.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

fn write_str(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = value.len();
    if len > i32::MAX as usize {
        return Err(FramingError::FrameTooLarge {
            len,
            max: i32::MAX as usize,
        });
    }
    let mut remaining = len as u32;
    while remaining >= 0x80 {
        out.push((remaining as u8) | 0x80);
        remaining >>= 7;
    }
    out.push(remaining as u8);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn encoded_len_hint(message: &RpcMessage) -> usize {
    const FIXED: usize = LENGTH_PREFIX_LEN + 1 + 16 + 1 + 10;
    match message {
        RpcMessage::KeepAlive => LENGTH_PREFIX_LEN + 1,
        RpcMessage::Request(r) => {
            FIXED
                + r.service_name.len()
                + r.method_name.len()
                + 4
                + r.args.iter().map(|a| a.len() + 4).sum::<usize>()
        }
        RpcMessage::Response(r) => {
            FIXED
                + r.service_name.len()
                + r.method_name.len()
                + r.fault.as_ref().map_or(0, |f| f.error_text.len() + 5)
                + r.payload.as_ref().map_or(1, |p| p.len() + 5)
        }
    }
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(FramingError::Truncated { field });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.read_bytes(1, field)?[0])
    }

    /// Reads a null flag; returns true when the section is present.
    fn read_flag(&mut self, field: &'static str) -> Result<bool> {
        match self.read_u8(field)? {
            PRESENT => Ok(true),
            ABSENT => Ok(false),
            value => Err(FramingError::InvalidFlag { field, value }),
        }
    }

    fn read_len(&mut self, field: &'static str) -> Result<usize> {
        let bytes = self.read_bytes(4, field)?;
        let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        usize::try_from(value).map_err(|_| FramingError::NegativeLength { field, value })
    }

    fn read_varint(&mut self, field: &'static str) -> Result<usize> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8(field)?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return usize::try_from(value as i32)
                    .map_err(|_| FramingError::MalformedVarint { field });
            }
        }
        Err(FramingError::MalformedVarint { field })
    }

    fn read_str(&mut self, field: &'static str) -> Result<String> {
        let len = self.read_varint(field)?;
        let bytes = self.read_bytes(len, field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| FramingError::InvalidUtf8 { field })
    }

    fn read_message_id(&mut self) -> Result<MessageId> {
        let bytes = self.read_bytes(16, "message id")?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(MessageId::from_wire_bytes(raw))
    }

    fn read_header(&mut self) -> Result<(String, String, MessageId, Option<RemoteFault>)> {
        let service_name = self.read_str("service name")?;
        let method_name = self.read_str("method name")?;
        let message_id = self.read_message_id()?;
        let fault = if self.read_flag("remote fault")? {
            Some(RemoteFault::new(self.read_str("error text")?))
        } else {
            None
        };
        Ok((service_name, method_name, message_id, fault))
    }
}
