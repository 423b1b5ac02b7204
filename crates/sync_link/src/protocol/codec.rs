//! Wire envelope and primitive encoding.
//!
//! Every frame is `[u16 length][u16 type][payload]`, little-endian, where
//! `length` counts the whole frame including the four header bytes.
//! Strings are a `u16` byte length followed by UTF-8.

use crate::error::LinkError;

/// Length plus type tag.
pub const HEADER_LEN: usize = 4;

/// Largest frame the length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Builds one frame.
#[derive(Debug)]
pub struct PacketWriter {
    buf: Vec<u8>,
    overflow: bool,
}

impl PacketWriter {
    pub fn new(message_type: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&message_type.to_le_bytes());
        Self {
            buf,
            overflow: false,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_str(&mut self, value: &str) -> &mut Self {
        match u16::try_from(value.len()) {
            Ok(len) => {
                self.write_u16(len);
                self.buf.extend_from_slice(value.as_bytes());
            }
            Err(_) => self.overflow = true,
        }
        self
    }

    /// Writes a collection length.
    pub fn write_count(&mut self, count: usize) -> &mut Self {
        match u16::try_from(count) {
            Ok(count) => self.write_u16(count),
            Err(_) => {
                self.overflow = true;
                self
            }
        }
    }

    /// Patches the length field and returns the frame.
    pub fn finish(mut self) -> Result<Vec<u8>, LinkError> {
        if self.overflow || self.buf.len() > MAX_FRAME_LEN {
            return Err(LinkError::Decode(format!(
                "frame exceeds {} bytes",
                MAX_FRAME_LEN
            )));
        }
        let len = self.buf.len() as u16;
        self.buf[..2].copy_from_slice(&len.to_le_bytes());
        Ok(self.buf)
    }
}

/// Reads primitives out of a frame payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { data: payload, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LinkError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(LinkError::Decode(format!(
                "payload truncated: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len()
            )));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], LinkError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, LinkError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, LinkError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, LinkError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, LinkError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, LinkError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, LinkError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn read_str(&mut self) -> Result<String, LinkError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| LinkError::Decode(format!("invalid UTF-8 string: {e}")))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Validates the envelope and splits it into type tag and payload.
pub fn split_frame(frame: &[u8]) -> Result<(u16, &[u8]), LinkError> {
    if frame.len() < HEADER_LEN {
        return Err(LinkError::Decode(format!("frame of {} bytes has no header", frame.len())));
    }
    let len = u16::from_le_bytes([frame[0], frame[1]]) as usize;
    if len != frame.len() {
        return Err(LinkError::Decode(format!(
            "length field says {} bytes, frame has {}",
            len,
            frame.len()
        )));
    }
    let message_type = u16::from_le_bytes([frame[2], frame[3]]);
    Ok((message_type, &frame[HEADER_LEN..]))
}

/// Reassembles frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if len < HEADER_LEN {
            return Err(LinkError::Decode(format!("impossible frame length {len}")));
        }
        if self.buf.len() < len {
            return Ok(None);
        }
        Ok(Some(self.buf.drain(..len).collect()))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
