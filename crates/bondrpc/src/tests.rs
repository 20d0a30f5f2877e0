use bondpack::Decoder;
use bondpack::Encoder;

use crate::*;

fn assert_size_exact<T: Payload>(value: &T) {
    let bytes = value.to_bytes().expect("encode");
    assert_eq!(value.prepare_size(), bytes.len());
}

#[test]
fn test_application_ids_stay_out_of_reserved_space() {
    assert_eq!(MessageId::application(7).unwrap().raw(), 7);
    assert_eq!(
        MessageId::application(0x8000_0001),
        Err(Error::ReservedMessageId(0x8000_0001))
    );
    assert!(MessageId::RUN.is_control());
    assert!(MessageId::RUN_OR_CLOSE_PIPE.is_control());
    assert!(!MessageId::application(0x7FFF_FFFF).unwrap().is_control());
}

#[test]
fn test_message_envelope_reads_back() -> anyhow::Result<()> {
    let mut message = Message::request(MessageId::application(3)?, b"abc".to_vec());
    message.header.interface_id = InterfaceId(2);
    message.header.request_id = 41;

    let bytes = message.to_bytes()?;
    let decoded = Message::from_bytes(&bytes)?;
    assert_eq!(decoded, message);
    assert!(decoded.expects_response());
    assert!(!decoded.is_response());
    Ok(())
}

#[test]
fn test_response_mirrors_request_header() -> anyhow::Result<()> {
    let mut request = Message::request(MessageId::RUN, Vec::new());
    request.header.interface_id = InterfaceId(1);
    request.header.request_id = 9;

    let response = Message::response_to(&request.header, vec![1]);
    assert!(response.is_response());
    assert_eq!(response.header.request_id, 9);
    assert_eq!(response.header.interface_id, InterfaceId(1));
    assert_eq!(response.name(), MessageId::RUN);
    Ok(())
}

#[test]
fn test_message_rejects_contradictory_flags() -> anyhow::Result<()> {
    let mut message = Message::new(MessageId::application(1)?, Vec::new());
    message.header.flags = Flags::EXPECTS_RESPONSE | Flags::IS_RESPONSE;
    let bytes = message.to_bytes()?;
    assert!(matches!(Message::from_bytes(&bytes), Err(Error::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_message_skips_unknown_header_fields() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Msg")?;
    enc.map_begin()?;
    enc.entry_u32("iface", 1)?;
    enc.entry_u64("trace", 123)?;
    enc.entry_u32("name", 5)?;
    enc.entry_u32("flags", 0)?;
    enc.entry_u64("req", 0)?;
    enc.variant_begin("payload")?;
    enc.bytes(&[])?;
    enc.variant_end()?;
    enc.map_end()?;
    enc.variant_end()?;

    let message = Message::from_bytes(&enc.into_bytes()?)?;
    assert_eq!(message.name().raw(), 5);
    Ok(())
}

#[test]
fn test_message_missing_field() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Msg")?;
    enc.map_begin()?;
    enc.entry_u32("iface", 1)?;
    enc.entry_u32("flags", 0)?;
    enc.map_end()?;
    enc.variant_end()?;

    let err = Message::from_bytes(&enc.into_bytes()?).unwrap_err();
    assert!(matches!(err, Error::MissingField(_)));
    Ok(())
}

#[test]
fn test_trailing_bytes_are_a_violation() -> anyhow::Result<()> {
    let mut bytes = Hello::current().to_bytes()?;
    bytes.push(0x0E);
    assert!(matches!(Hello::from_bytes(&bytes), Err(Error::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_prepare_size_is_exact() -> anyhow::Result<()> {
    assert_size_exact(&RunMessageParams { input: RunInput::QueryVersion });
    assert_size_exact(&RunMessageParams { input: RunInput::RequireVersion { version: 4 } });
    assert_size_exact(&RunResponseParams { output: None });
    assert_size_exact(&RunResponseParams {
        output: Some(RunOutput::QueryVersionResult { version: 3 }),
    });
    assert_size_exact(&RunOrClosePipeParams {
        input: RunOrClosePipeInput::RequireVersion { version: 5 },
    });
    assert_size_exact(&Hello::current());
    assert_size_exact(&Welcome::current());
    assert_size_exact(&Message::new(MessageId::application(1)?, vec![0; 300]));
    Ok(())
}

#[test]
fn test_query_version_result_reads_back() -> anyhow::Result<()> {
    let mut ctx = SerializationContext::new();
    let response = RunResponseParams {
        output: Some(RunOutput::QueryVersionResult { version: 3 }),
    };
    let bytes = ctx.serialize(&response)?;
    let decoded: RunResponseParams = ctx.deserialize(&bytes)?;
    assert_eq!(decoded.queried_version(), 3);
    Ok(())
}

#[test]
fn test_absent_output_means_version_zero() -> anyhow::Result<()> {
    let bytes = RunResponseParams { output: None }.to_bytes()?;
    assert_eq!(RunResponseParams::from_bytes(&bytes)?.queried_version(), 0);
    Ok(())
}

#[test]
fn test_unknown_output_variant_means_version_zero() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.variant_begin("output")?;
    enc.option_some_begin()?;
    enc.unit_variant("FlushForTestingResult")?;
    enc.option_some_end()?;
    enc.variant_end()?;
    enc.map_end()?;

    let decoded = RunResponseParams::from_bytes(&enc.into_bytes()?)?;
    assert_eq!(decoded.output, None);
    assert_eq!(decoded.queried_version(), 0);
    Ok(())
}

#[test]
fn test_malformed_response_is_an_error() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.u32(3)?;
    assert!(RunResponseParams::from_bytes(&enc.into_bytes()?).is_err());

    // Right shape, wrong scalar type.
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.variant_begin("output")?;
    enc.option_some_begin()?;
    enc.variant_begin("QueryVersionResult")?;
    enc.map_begin()?;
    enc.entry_u64("version", 3)?;
    enc.map_end()?;
    enc.variant_end()?;
    enc.option_some_end()?;
    enc.variant_end()?;
    enc.map_end()?;
    assert!(matches!(
        RunResponseParams::from_bytes(&enc.into_bytes()?),
        Err(Error::Serialization(_))
    ));
    Ok(())
}

#[test]
fn test_unknown_input_variant_is_an_error() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.variant_begin("input")?;
    enc.unit_variant("FlushForTesting")?;
    enc.variant_end()?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert!(matches!(RunMessageParams::from_bytes(&bytes), Err(Error::UnknownVariant(_))));
    assert!(matches!(RunOrClosePipeParams::from_bytes(&bytes), Err(Error::UnknownVariant(_))));
    Ok(())
}

#[test]
fn test_require_version_reads_back() -> anyhow::Result<()> {
    let params = RunOrClosePipeParams {
        input: RunOrClosePipeInput::RequireVersion { version: 5 },
    };
    let bytes = params.to_bytes()?;
    let mut dec = Decoder::new(&bytes);
    assert_eq!(RunOrClosePipeParams::decode(&mut dec)?, params);
    Ok(())
}

#[test]
fn test_handshake_protocol_mismatch() -> anyhow::Result<()> {
    let bytes = Hello { protocol: PROTOCOL_VERSION + 1 }.to_bytes()?;
    assert!(matches!(Hello::from_bytes(&bytes), Err(Error::ProtocolViolation(_))));

    let welcome = Welcome::current().to_bytes()?;
    assert!(matches!(Hello::from_bytes(&welcome), Err(Error::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_context_tracks_high_water() -> anyhow::Result<()> {
    let mut ctx = SerializationContext::new();
    let big = Message::new(MessageId::application(1)?, vec![0; 64]);
    let small = RunMessageParams { input: RunInput::QueryVersion };

    let big_len = ctx.serialize(&big)?.len();
    ctx.serialize(&small)?;
    assert_eq!(ctx.high_water(), big_len);
    Ok(())
}
