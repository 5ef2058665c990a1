//! A bounds-checked little-endian reader over a byte slice.

use scroll::Pread;

use crate::error::{Error, ErrorKind};

/// A forward-only reader over `data`.
///
/// All reads are bounds-checked against the end of the slice and fail with
/// [`ErrorKind::UnexpectedEof`] on truncation. Positions are byte offsets
/// from the start of the slice, so callers that hand in a whole section get
/// section-relative offsets back for free.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor<'data> {
    data: &'data [u8],
    pos: usize,
}

impl<'data> Cursor<'data> {
    pub(crate) fn new(data: &'data [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    /// Creates a cursor positioned at `pos`. The position may point past
    /// the end of the slice, in which case the next read reports EOF.
    pub(crate) fn at(data: &'data [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.data.gread_with(&mut self.pos, scroll::LE)?)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(self.data.gread_with(&mut self.pos, scroll::LE)?)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(self.data.gread_with(&mut self.pos, scroll::LE)?)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(self.data.gread_with(&mut self.pos, scroll::LE)?)
    }

    /// Reads an unsigned LEB128 value of at most 64 bits.
    pub(crate) fn read_uleb128(&mut self) -> Result<u64, Error> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(ErrorKind::UnexpectedEof)?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(ErrorKind::Overflow.into());
            }
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// Consumes one LEB128 value without decoding it.
    pub(crate) fn skip_leb128(&mut self) -> Result<(), Error> {
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(ErrorKind::UnexpectedEof)?;
            self.pos += 1;
            if byte & 0x80 == 0 {
                return Ok(());
            }
        }
    }

    /// Advances by `count` bytes.
    pub(crate) fn skip(&mut self, count: usize) -> Result<(), Error> {
        let end = self.pos.checked_add(count).ok_or(ErrorKind::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        self.pos = end;
        Ok(())
    }

    /// Advances past a NUL-terminated string, including the terminator.
    pub(crate) fn skip_cstr(&mut self) -> Result<(), Error> {
        let rest = self
            .data
            .get(self.pos..)
            .filter(|rest| !rest.is_empty())
            .ok_or(ErrorKind::UnexpectedEof)?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ErrorKind::UnexpectedEof)?;
        self.pos += nul + 1;
        Ok(())
    }
}
