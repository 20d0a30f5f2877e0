//! # Handshake Frames
//!
//! Before any `Message` crosses a channel, the initiator sends `Hello` and
//! the acceptor answers `Welcome`. Both carry the framing protocol revision;
//! a mismatch fails the handshake on whichever side notices it first.

use bondpack::Decoder;
use bondpack::Encoder;

use crate::error::Error;
use crate::error::Result;
use crate::payload;
use crate::payload::Payload;

/// Revision of the envelope format spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Initiator -> acceptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub protocol: u32,
}

/// Acceptor -> initiator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Welcome {
    pub protocol: u32,
}

impl Hello {
    pub fn current() -> Self {
        Self { protocol: PROTOCOL_VERSION }
    }
}

impl Welcome {
    pub fn current() -> Self {
        Self { protocol: PROTOCOL_VERSION }
    }
}

fn size(tag: &str) -> usize {
    payload::variant(tag, payload::map(payload::variant("protocol", payload::U32)))
}

fn encode(enc: &mut Encoder, tag: &str, protocol: u32) -> Result<()> {
    enc.variant_begin(tag)?;
    enc.map_begin()?;
    enc.entry_u32("protocol", protocol)?;
    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode(dec: &mut Decoder<'_>, expected: &str) -> Result<u32> {
    let (tag, mut body) = dec.variant()?;
    if tag != expected {
        return Err(Error::ProtocolViolation(format!(
            "expected {} during handshake, got {}",
            expected, tag
        )));
    }
    let protocol = payload::single_entry(&mut body, "protocol")?.u32()?;
    if protocol != PROTOCOL_VERSION {
        return Err(Error::ProtocolViolation(format!(
            "peer speaks protocol {}, expected {}",
            protocol, PROTOCOL_VERSION
        )));
    }
    Ok(protocol)
}

impl Payload for Hello {
    fn prepare_size(&self) -> usize {
        size("Hello")
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        encode(enc, "Hello", self.protocol)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self { protocol: decode(dec, "Hello")? })
    }
}

impl Payload for Welcome {
    fn prepare_size(&self) -> usize {
        size("Welcome")
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        encode(enc, "Welcome", self.protocol)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self { protocol: decode(dec, "Welcome")? })
    }
}
