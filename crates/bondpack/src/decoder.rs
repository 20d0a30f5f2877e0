//! Zero-copy, bounds-checked reader.

use crate::Error;
use crate::Result;
use crate::Tag;

/// A cursor over a byte slice.
///
/// Reading advances the cursor. Container reads return new `Decoder`s
/// restricted to the container's body, so a malformed inner length can never
/// read past its parent.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect_tag(expected)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Skips the next item and everything nested inside it.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        let len = match tag.fixed_len() {
            Some(len) => len,
            None => self.take_len()?,
        };
        self.take(len)?;
        Ok(())
    }

    /// Decodes u32 (LE).
    pub fn u32(&mut self) -> Result<u32> {
        self.expect_tag(Tag::U32)?;
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Decodes u64 (LE).
    pub fn u64(&mut self) -> Result<u64> {
        self.expect_tag(Tag::U64)?;
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Decodes Unit `()`.
    pub fn unit(&mut self) -> Result<()> {
        self.expect_tag(Tag::Unit)
    }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::String)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a byte slice.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take(len)
    }

    /// Decodes a Map into an iterator over its entries.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes an Option.
    ///
    /// Returns `Some(Decoder)` for the payload if present, or `None`.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::OptionNone => {
                self.take(1)?;
                Ok(None)
            }
            Tag::OptionSome => Ok(Some(self.enter(Tag::OptionSome)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::OptionSome, found }),
        }
    }

    /// Decodes a Variant, returning `(Name, PayloadDecoder)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }

    /// Decodes a variant whose payload is unit and returns its name.
    pub fn unit_variant(&mut self) -> Result<&'a str> {
        let (name, mut body) = self.variant()?;
        body.unit()?;
        Ok(name)
    }
}

/// Iterator for Key-Value pairs (Variants) within a Map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(Key, ValueDecoder)` for the next entry, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
