//! # Interface Control Payloads
//!
//! The control sub-protocol rides on the reserved ids `MessageId::RUN` and
//! `MessageId::RUN_OR_CLOSE_PIPE`.
//!
//! - `Run` is two-way: `RunMessageParams` out, `RunResponseParams` back.
//! - `RunOrClosePipe` is one-way: the receiver either accepts the assertion
//!   or closes the channel. There is no negative reply.
//!
//! ## Forward compatibility
//!
//! An unknown *output* variant decodes to `output: None`, which callers read
//! as "version 0". An unknown *input* variant is an error, because the
//! receiver cannot act on a request it does not understand.

use bondpack::Decoder;
use bondpack::Encoder;

use crate::error::Error;
use crate::error::Result;
use crate::payload;
use crate::payload::Payload;

/// Input of a two-way `Run` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunInput {
    /// Ask the peer which interface version it implements.
    QueryVersion,
    /// Assert a minimum version inside a two-way exchange.
    RequireVersion { version: u32 },
}

/// Output of a `Run` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutput {
    QueryVersionResult { version: u32 },
}

/// Input of a one-way `RunOrClosePipe` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOrClosePipeInput {
    RequireVersion { version: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunMessageParams {
    pub input: RunInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResponseParams {
    pub output: Option<RunOutput>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOrClosePipeParams {
    pub input: RunOrClosePipeInput,
}

impl RunResponseParams {
    /// The reported version, or 0 when the output is absent or of another kind.
    pub fn queried_version(&self) -> u32 {
        match self.output {
            Some(RunOutput::QueryVersionResult { version }) => version,
            None => 0,
        }
    }
}

// Helpers shared by the variant encodings below.

fn version_record_size(name: &str) -> usize {
    payload::variant(name, payload::map(payload::variant("version", payload::U32)))
}

fn encode_version_record(enc: &mut Encoder, name: &str, version: u32) -> Result<()> {
    enc.variant_begin(name)?;
    enc.map_begin()?;
    enc.entry_u32("version", version)?;
    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_version_record(mut body: Decoder<'_>) -> Result<u32> {
    Ok(payload::single_entry(&mut body, "version")?.u32()?)
}

impl RunInput {
    fn size(&self) -> usize {
        match self {
            Self::QueryVersion => payload::variant("QueryVersion", payload::UNIT),
            Self::RequireVersion { .. } => version_record_size("RequireVersion"),
        }
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Self::QueryVersion => Ok(enc.unit_variant("QueryVersion")?),
            Self::RequireVersion { version } => {
                encode_version_record(enc, "RequireVersion", *version)
            }
        }
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let (name, mut body) = dec.variant()?;
        match name {
            "QueryVersion" => {
                body.unit()?;
                Ok(Self::QueryVersion)
            }
            "RequireVersion" => Ok(Self::RequireVersion { version: decode_version_record(body)? }),
            other => Err(Error::UnknownVariant(format!("run input: {}", other))),
        }
    }
}

impl RunOrClosePipeInput {
    fn size(&self) -> usize {
        match self {
            Self::RequireVersion { .. } => version_record_size("RequireVersion"),
        }
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Self::RequireVersion { version } => {
                encode_version_record(enc, "RequireVersion", *version)
            }
        }
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let (name, body) = dec.variant()?;
        match name {
            "RequireVersion" => Ok(Self::RequireVersion { version: decode_version_record(body)? }),
            other => Err(Error::UnknownVariant(format!("run-or-close-pipe input: {}", other))),
        }
    }
}

impl Payload for RunMessageParams {
    fn prepare_size(&self) -> usize {
        payload::map(payload::variant("input", self.input.size()))
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.variant_begin("input")?;
        self.input.encode(enc)?;
        enc.variant_end()?;
        enc.map_end()?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut input = payload::single_entry(dec, "input")?;
        Ok(Self { input: RunInput::decode(&mut input)? })
    }
}

impl Payload for RunResponseParams {
    fn prepare_size(&self) -> usize {
        let output = match self.output {
            Some(RunOutput::QueryVersionResult { .. }) => {
                payload::HEADER + version_record_size("QueryVersionResult")
            }
            None => payload::UNIT,
        };
        payload::map(payload::variant("output", output))
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.variant_begin("output")?;
        match self.output {
            Some(RunOutput::QueryVersionResult { version }) => {
                enc.option_some_begin()?;
                encode_version_record(enc, "QueryVersionResult", version)?;
                enc.option_some_end()?;
            }
            None => enc.option_none()?,
        }
        enc.variant_end()?;
        enc.map_end()?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut field = payload::single_entry(dec, "output")?;
        let Some(mut some) = field.option()? else {
            return Ok(Self { output: None });
        };
        let (name, body) = some.variant()?;
        let output = match name {
            "QueryVersionResult" => {
                Some(RunOutput::QueryVersionResult { version: decode_version_record(body)? })
            }
            _ => None,
        };
        Ok(Self { output })
    }
}

impl Payload for RunOrClosePipeParams {
    fn prepare_size(&self) -> usize {
        payload::map(payload::variant("input", self.input.size()))
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.map_begin()?;
        enc.variant_begin("input")?;
        self.input.encode(enc)?;
        enc.variant_end()?;
        enc.map_end()?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut input = payload::single_entry(dec, "input")?;
        Ok(Self { input: RunOrClosePipeInput::decode(&mut input)? })
    }
}
