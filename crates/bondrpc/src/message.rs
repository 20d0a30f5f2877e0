//! # Message Envelope
//!
//! One transport frame carries exactly one `Message`: a small header that
//! says which associated interface it addresses and what it is, followed by
//! an opaque payload.
//!
//! ## Id namespace
//!
//! Message ids with the high bit set belong to the control sub-protocol and
//! are never handed out to application interfaces. Both peers agree on this
//! split up front, so no negotiation is needed before control traffic flows.

use bondpack::Decoder;
use bondpack::Encoder;

use crate::error::Error;
use crate::error::Result;
use crate::payload;
use crate::payload::Payload;

/// Identifies what a message means to the interface that receives it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageId(u32);

impl MessageId {
    /// Ids with this bit set are reserved for control messages.
    pub const RESERVED_MASK: u32 = 0x8000_0000;
    /// Two-way control request (`RunMessageParams` / `RunResponseParams`).
    pub const RUN: MessageId = MessageId(0xFFFF_FFFF);
    /// One-way control assertion (`RunOrClosePipeParams`).
    pub const RUN_OR_CLOSE_PIPE: MessageId = MessageId(0xFFFF_FFFE);

    /// Creates an application message id.
    ///
    /// Returns `Error::ReservedMessageId` if `id` lies in the control space.
    pub fn application(id: u32) -> Result<Self> {
        if id & Self::RESERVED_MASK != 0 {
            return Err(Error::ReservedMessageId(id));
        }
        Ok(Self(id))
    }

    /// Reinterprets a raw id read off the wire.
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this id lives in the reserved control namespace.
    pub fn is_control(self) -> bool {
        self.0 & Self::RESERVED_MASK != 0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::RUN => write!(f, "run"),
            Self::RUN_OR_CLOSE_PIPE => write!(f, "run-or-close-pipe"),
            Self(id) => write!(f, "msg-{:#x}", id),
        }
    }
}

/// Identifies one associated interface multiplexed over a channel.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct InterfaceId(pub u32);

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "iface-{}", self.0)
    }
}

/// Header bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The sender registered a responder and waits for an answer.
    pub const EXPECTS_RESPONSE: Flags = Flags(1 << 0);
    /// This message answers an earlier request with the same request id.
    pub const IS_RESPONSE: Flags = Flags(1 << 1);

    const KNOWN: u32 = Self::EXPECTS_RESPONSE.0 | Self::IS_RESPONSE.0;

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Routing information carried in front of every payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub interface_id: InterfaceId,
    pub name: MessageId,
    pub flags: Flags,
    /// Correlates a response with its request. Zero for one-way messages.
    pub request_id: u64,
}

/// A single frame on a bond channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a one-way message. The interface id is filled in by the
    /// endpoint that sends it.
    pub fn new(name: MessageId, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                interface_id: InterfaceId(0),
                name,
                flags: Flags::NONE,
                request_id: 0,
            },
            payload,
        }
    }

    /// Creates a message that expects a response.
    pub fn request(name: MessageId, payload: Vec<u8>) -> Self {
        let mut message = Self::new(name, payload);
        message.header.flags = Flags::EXPECTS_RESPONSE;
        message
    }

    /// Creates the response to `request`, addressed back along the same
    /// interface and correlated by request id.
    pub fn response_to(request: &Header, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                interface_id: request.interface_id,
                name: request.name,
                flags: Flags::IS_RESPONSE,
                request_id: request.request_id,
            },
            payload,
        }
    }

    pub fn name(&self) -> MessageId {
        self.header.name
    }

    pub fn expects_response(&self) -> bool {
        self.header.flags.contains(Flags::EXPECTS_RESPONSE)
    }

    pub fn is_response(&self) -> bool {
        self.header.flags.contains(Flags::IS_RESPONSE)
    }
}

const TAG: &str = "Msg";

impl Payload for Message {
    fn prepare_size(&self) -> usize {
        let entries = payload::variant("iface", payload::U32)
            + payload::variant("name", payload::U32)
            + payload::variant("flags", payload::U32)
            + payload::variant("req", payload::U64)
            + payload::variant("payload", payload::blob(self.payload.len()));
        payload::variant(TAG, payload::map(entries))
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(TAG)?;
        enc.map_begin()?;
        enc.entry_u32("iface", self.header.interface_id.0)?;
        enc.entry_u32("name", self.header.name.raw())?;
        enc.entry_u32("flags", self.header.flags.bits())?;
        enc.entry_u64("req", self.header.request_id)?;
        enc.variant_begin("payload")?;
        enc.bytes(&self.payload)?;
        enc.variant_end()?;
        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let (tag, mut body) = dec.variant()?;
        if tag != TAG {
            return Err(Error::UnknownVariant(format!("frame: {}", tag)));
        }

        let mut interface_id = None;
        let mut name = None;
        let mut flags = None;
        let mut request_id = None;
        let mut payload = None;

        let mut entries = body.map()?;
        while let Some((key, mut val)) = entries.next()? {
            match key {
                "iface" => interface_id = Some(InterfaceId(val.u32()?)),
                "name" => name = Some(MessageId::from_raw(val.u32()?)),
                "flags" => flags = Some(val.u32()?),
                "req" => request_id = Some(val.u64()?),
                "payload" => payload = Some(val.bytes()?.to_vec()),
                _ => val.skip()?,
            }
        }

        let flags = flags.ok_or(Error::MissingField("flags"))?;
        if flags & !Flags::KNOWN != 0 {
            return Err(Error::ProtocolViolation(format!("unknown flag bits {:#x}", flags)));
        }
        let flags = Flags(flags);
        if flags.contains(Flags::EXPECTS_RESPONSE | Flags::IS_RESPONSE) {
            return Err(Error::ProtocolViolation(
                "message is both a request and a response".into(),
            ));
        }

        Ok(Message {
            header: Header {
                interface_id: interface_id.ok_or(Error::MissingField("iface"))?,
                name: name.ok_or(Error::MissingField("name"))?,
                flags,
                request_id: request_id.ok_or(Error::MissingField("req"))?,
            },
            payload: payload.ok_or(Error::MissingField("payload"))?,
        })
    }
}
