//! Frame layout and byte-cursor primitives for the wire codec
//!
//! Every packet is a 6-byte little-endian frame (`msg_type u16 | seq u16 |
//! content_length u16`) followed by `content_length` body bytes. The
//! reader/writer cursors here are the only place raw byte order lives.

use thiserror::Error;

/// Bytes in a packet frame
pub const FRAME_LEN: usize = 6;

/// Errors produced while decoding a message body
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("body ended early")]
    UnexpectedEof,
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),
    #[error("invalid entity kind {0}")]
    InvalidEntityKind(u16),
    #[error("length prefix {0} exceeds remaining bytes")]
    LengthOverrun(u32),
    #[error("string is not valid UTF-8")]
    InvalidString,
}

/// Parsed packet frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u16,
    pub seq: u16,
    pub content_length: u16,
}

impl Frame {
    /// Reads a frame from the first `FRAME_LEN` bytes, or None when fewer
    /// are available.
    pub fn parse(raw: &[u8]) -> Option<Frame> {
        if raw.len() < FRAME_LEN {
            return None;
        }
        Some(Frame {
            msg_type: u16::from_le_bytes([raw[0], raw[1]]),
            seq: u16::from_le_bytes([raw[2], raw[3]]),
            content_length: u16::from_le_bytes([raw[4], raw[5]]),
        })
    }

    /// Frame plus body length.
    pub fn packet_len(&self) -> usize {
        FRAME_LEN + self.content_length as usize
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.msg_type.to_le_bytes());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.content_length.to_le_bytes());
    }
}

/// Append-only little-endian body writer
pub struct BodyWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> BodyWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    /// u32 length prefix followed by UTF-8 bytes.
    pub fn write_string(&mut self, v: &str) {
        self.write_u32(v.len() as u32);
        self.out.extend_from_slice(v.as_bytes());
    }

    /// u32 length prefix followed by raw bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_u32(v.len() as u32);
        self.out.extend_from_slice(v);
    }
}

/// Little-endian body reader over a borrowed slice
pub struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.data.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a u32 length prefix, rejecting prefixes that overrun the body.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_u32()?;
        if len as usize > self.data.len() - self.pos {
            return Err(DecodeError::LengthOverrun(len));
        }
        Ok(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
