//! A minimal walker for Named Binary Tag values.
//!
//! Chunk-data packets carry one named heightmaps NBT value between the chunk position and the data
//! section. The tunnel never needs its content, only its extent, so this module skips a value
//! in-place instead of decoding it. The walker only advances an offset and never allocates.

use crate::Error;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

/// The deepest nesting of lists and compounds the walker follows before giving up.
const MAX_DEPTH: usize = 64;

/// Skips one complete named NBT value at the start of `data`.
///
/// Returns the number of bytes the value occupies so the caller can resume parsing right after
/// it.
///
/// # Errors
///
/// Will return [`Error::TruncatedNbt`] if the value ends early, [`Error::UnknownNbtTag`] for tag
/// types outside 0-12 and [`Error::NbtTooDeep`] for pathological nesting.
pub fn skip_named(data: &[u8]) -> Result<usize, Error> {
    let mut walker = Walker { data, offset: 0 };

    let tag = walker.read_tag()?;
    if tag == TAG_END {
        return Ok(walker.offset);
    }

    walker.skip_name()?;
    walker.skip_payload(tag, 0)?;

    Ok(walker.offset)
}

struct Walker<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Walker<'_> {
    fn advance(&mut self, count: usize) -> Result<(), Error> {
        if self.data.len() - self.offset < count {
            return Err(Error::TruncatedNbt);
        }
        self.offset += count;
        Ok(())
    }

    fn read_tag(&mut self) -> Result<u8, Error> {
        let Some(&tag) = self.data.get(self.offset) else {
            return Err(Error::TruncatedNbt);
        };
        if tag > TAG_LONG_ARRAY {
            return Err(Error::UnknownNbtTag { tag });
        }
        self.offset += 1;
        Ok(tag)
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let Some(bytes) = self.data.get(self.offset..self.offset + 2) else {
            return Err(Error::TruncatedNbt);
        };
        self.offset += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Result<i32, Error> {
        let Some(bytes) = self.data.get(self.offset..self.offset + 4) else {
            return Err(Error::TruncatedNbt);
        };
        self.offset += 4;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_length(&mut self) -> Result<usize, Error> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(Error::TruncatedNbt);
        }
        Ok(length as usize)
    }

    fn skip_name(&mut self) -> Result<(), Error> {
        let length = self.read_u16()? as usize;
        self.advance(length)
    }

    fn skip_payload(&mut self, tag: u8, depth: usize) -> Result<(), Error> {
        if depth > MAX_DEPTH {
            return Err(Error::NbtTooDeep);
        }

        match tag {
            TAG_END => Ok(()),
            TAG_BYTE => self.advance(1),
            TAG_SHORT => self.advance(2),
            TAG_INT | TAG_FLOAT => self.advance(4),
            TAG_LONG | TAG_DOUBLE => self.advance(8),
            TAG_BYTE_ARRAY => {
                let length = self.read_length()?;
                self.advance(length)
            }
            TAG_STRING => {
                let length = self.read_u16()? as usize;
                self.advance(length)
            }
            TAG_LIST => {
                let subtype = self.read_tag()?;
                let length = self.read_length()?;
                for _ in 0..length {
                    self.skip_payload(subtype, depth + 1)?;
                }
                Ok(())
            }
            TAG_COMPOUND => {
                loop {
                    let entry = self.read_tag()?;
                    if entry == TAG_END {
                        return Ok(());
                    }
                    self.skip_name()?;
                    self.skip_payload(entry, depth + 1)?;
                }
            }
            TAG_INT_ARRAY => {
                let length = self.read_length()?;
                self.advance(length.checked_mul(4).ok_or(Error::TruncatedNbt)?)
            }
            TAG_LONG_ARRAY => {
                let length = self.read_length()?;
                self.advance(length.checked_mul(8).ok_or(Error::TruncatedNbt)?)
            }
            _ => Err(Error::UnknownNbtTag { tag }),
        }
    }
}
