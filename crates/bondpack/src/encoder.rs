//! Scope-checked writer with back-patched container lengths.

use crate::Error;
use crate::Result;
use crate::Scope;
use crate::Tag;

/// Bytes reserved for a length header.
const LEN_BYTES: usize = 4;

/// An open container on the encoder stack.
struct Frame {
    /// Offset of the first body byte.
    start: usize,
    scope: Scope,
    count: usize,
}

/// A state-machine driven encoder.
///
/// Every write is validated against the innermost open scope:
///
/// 1.  **Map**: only `variant_begin()` may be written.
/// 2.  **Option, Variant**: exactly one item must be written before closing.
/// 3.  **Root**: the encoder must be back at the root to finalize bytes.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Creates a new encoder with a small default buffer.
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    /// Creates an encoder whose buffer will hold `capacity` bytes without
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Bytes written so far, including unfinished scopes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the final byte vector.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if a container was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn frame(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.frame();
        match frame.scope {
            Scope::Root => Ok(()),
            Scope::Map if tag != Tag::Variant => Err(Error::InvalidMapEntry),
            Scope::Map => Ok(()),
            Scope::Option | Scope::Variant if frame.count >= 1 => {
                Err(Error::TooManyItems(frame.scope))
            }
            Scope::Option | Scope::Variant => Ok(()),
        }
    }

    fn write_scalar(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(body);
        self.frame().count += 1;
        Ok(())
    }

    fn write_blob(&mut self, tag: Tag, body: &[u8]) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| Error::BlobTooLarge(body.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(body);
        self.frame().count += 1;
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0; LEN_BYTES]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }

        let frame = self.frame();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if matches!(frame.scope, Scope::Option | Scope::Variant) && frame.count == 0 {
            return Err(Error::EmptyAdt(frame.scope));
        }
        let start = frame.start;

        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[start - LEN_BYTES..start].copy_from_slice(&len.to_le_bytes());

        self.stack.pop();
        self.frame().count += 1;
        Ok(())
    }

    /// Encodes an unsigned 32-bit integer (LE).
    pub fn u32(&mut self, v: u32) -> Result<()> {
        self.write_scalar(Tag::U32, &v.to_le_bytes())
    }

    /// Encodes an unsigned 64-bit integer (LE).
    pub fn u64(&mut self, v: u64) -> Result<()> {
        self.write_scalar(Tag::U64, &v.to_le_bytes())
    }

    /// Encodes Unit `()`.
    pub fn unit(&mut self) -> Result<()> {
        self.write_scalar(Tag::Unit, &[])
    }

    /// Encodes `Option::None`.
    pub fn option_none(&mut self) -> Result<()> {
        self.write_scalar(Tag::OptionNone, &[])
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.write_blob(Tag::String, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.write_blob(Tag::Bytes, v)
    }

    /// Begins a Map container. Only variants may be written inside.
    pub fn map_begin(&mut self) -> Result<()> {
        self.begin_scope(Tag::Map, Scope::Map)
    }

    /// Ends a Map container.
    pub fn map_end(&mut self) -> Result<()> {
        self.end_scope(Scope::Map)
    }

    /// Begins an `Option::Some` container holding exactly one item.
    pub fn option_some_begin(&mut self) -> Result<()> {
        self.begin_scope(Tag::OptionSome, Scope::Option)
    }

    /// Ends an `Option::Some` container.
    pub fn option_some_end(&mut self) -> Result<()> {
        self.end_scope(Scope::Option)
    }

    /// Begins a named Variant. Exactly one payload item must follow.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // The name is metadata; the payload still has to be written.
        self.frame().count = 0;
        Ok(())
    }

    /// Ends a Variant.
    pub fn variant_end(&mut self) -> Result<()> {
        self.end_scope(Scope::Variant)
    }

    /// Writes `name => u32` as a single map entry.
    pub fn entry_u32(&mut self, name: &str, v: u32) -> Result<()> {
        self.variant_begin(name)?;
        self.u32(v)?;
        self.variant_end()
    }

    /// Writes `name => u64` as a single map entry.
    pub fn entry_u64(&mut self, name: &str, v: u64) -> Result<()> {
        self.variant_begin(name)?;
        self.u64(v)?;
        self.variant_end()
    }

    /// Writes a variant whose payload is unit.
    pub fn unit_variant(&mut self, name: &str) -> Result<()> {
        self.variant_begin(name)?;
        self.unit()?;
        self.variant_end()
    }
}
