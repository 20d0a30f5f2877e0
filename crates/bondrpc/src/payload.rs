//! # Typed Payloads
//!
//! Every frame type implements `Payload`, which gives it an exact encoded
//! size (so buffers are allocated once), an encoder, and a decoder that
//! rejects trailing garbage.

use bondpack::Decoder;
use bondpack::Encoder;

use crate::error::Error;
use crate::error::Result;

/// A value with a fixed Bondpack representation.
pub trait Payload: Sized {
    /// Exact number of bytes `encode` will write.
    fn prepare_size(&self) -> usize;

    /// Writes this value as a single item.
    fn encode(&self, enc: &mut Encoder) -> Result<()>;

    /// Reads a single item.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Encodes this value into a freshly sized buffer.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::with_capacity(self.prepare_size());
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    /// Decodes a value that must span the whole buffer.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let value = Self::decode(&mut dec)?;
        if dec.remaining() != 0 {
            return Err(Error::ProtocolViolation(format!(
                "{} trailing bytes after payload",
                dec.remaining()
            )));
        }
        Ok(value)
    }
}

/// Per-endpoint serialization state.
///
/// Remembers the largest payload it has produced and starts every later
/// encoder at least that large, so a proxy that keeps sending the same shapes
/// never regrows its buffers.
#[derive(Debug, Default)]
pub struct SerializationContext {
    high_water: usize,
}

impl SerializationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The largest payload serialized through this context so far.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Encodes `value` into its own buffer.
    pub fn serialize<T: Payload>(&mut self, value: &T) -> Result<Vec<u8>> {
        let capacity = value.prepare_size().max(self.high_water);
        let mut enc = Encoder::with_capacity(capacity);
        value.encode(&mut enc)?;
        let bytes = enc.into_bytes()?;
        self.high_water = self.high_water.max(bytes.len());
        Ok(bytes)
    }

    /// Decodes a `T` that must span all of `bytes`.
    pub fn deserialize<T: Payload>(&self, bytes: &[u8]) -> Result<T> {
        T::from_bytes(bytes)
    }
}

// Encoded sizes, mirroring the Bondpack layout.

/// Tag plus u32 length.
pub(crate) const HEADER: usize = 5;
pub(crate) const UNIT: usize = 1;
pub(crate) const U32: usize = 5;
pub(crate) const U64: usize = 9;

pub(crate) const fn blob(len: usize) -> usize {
    HEADER + len
}

/// A variant named `name` around a payload of `inner` bytes.
pub(crate) const fn variant(name: &str, inner: usize) -> usize {
    HEADER + blob(name.len()) + inner
}

/// A map around entries totalling `inner` bytes.
pub(crate) const fn map(inner: usize) -> usize {
    HEADER + inner
}

/// Reads a map whose only interesting entry is `key`, skipping the rest.
pub(crate) fn single_entry<'a>(dec: &mut Decoder<'a>, key: &'static str) -> Result<Decoder<'a>> {
    let mut entries = dec.map()?;
    let mut found = None;
    while let Some((name, mut val)) = entries.next()? {
        if name == key && found.is_none() {
            found = Some(val);
        } else {
            val.skip()?;
        }
    }
    found.ok_or(Error::MissingField(key))
}
