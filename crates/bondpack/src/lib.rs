//! # Bondpack
//!
//! The byte format every bond channel frame is written in.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are Little-Endian. Every container carries its body length, so
//! a reader can step over fields it does not understand without knowing their
//! shape. That is what lets either peer add header fields without breaking the
//! other.

mod decoder;
mod encoder;

#[cfg(test)]
mod tests;

pub use decoder::Decoder;
pub use decoder::MapIter;
pub use encoder::Encoder;

/// Bondpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A valid tag was found where a different one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Closing a scope that does not match the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the Root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// More than one item written into an Option or Variant scope.
    TooManyItems(Scope),
    /// An Option or Variant scope was closed without its payload.
    EmptyAdt(Scope),
    /// A non-Variant item was written directly into a Map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::ScopeUnderflow => write!(f, "no open scope to close"),
            Error::ScopeStillOpen => write!(f, "buffer finalized with open scopes"),
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::BlobTooLarge(len) => write!(f, "blob of {} bytes exceeds u32 length", len),
            Error::TooManyItems(s) => write!(f, "too many items in {:?}; expected exactly 1", s),
            Error::EmptyAdt(s) => write!(f, "empty {:?}; expected exactly 1 item", s),
            Error::InvalidMapEntry => write!(f, "map entries must be variants"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Bondpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    U32 = 0x05,
    U64 = 0x06,
    Unit = 0x0E,
    OptionNone = 0x0F,

    // Blobs (Tag + u32 Len + Bytes)
    String = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    Map = 0x21,
    OptionSome = 0x30,
    Variant = 0x33,
}

impl Tag {
    /// Returns the Tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x05 => Some(Tag::U32),
            0x06 => Some(Tag::U64),
            0x0E => Some(Tag::Unit),
            0x0F => Some(Tag::OptionNone),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x21 => Some(Tag::Map),
            0x30 => Some(Tag::OptionSome),
            0x33 => Some(Tag::Variant),
            _ => None,
        }
    }

    /// Size of the fixed body following the tag byte, if the tag has one.
    fn fixed_len(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::OptionNone => Some(0),
            Tag::U32 => Some(4),
            Tag::U64 => Some(8),
            Tag::String | Tag::Bytes | Tag::Map | Tag::OptionSome | Tag::Variant => None,
        }
    }
}

/// Open scope kinds tracked by the `Encoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any item.
    Root,
    /// Key-Value container; only `Tag::Variant` items.
    Map,
    /// Exactly one item.
    Option,
    /// Exactly one item (the payload) after the name.
    Variant,
}
