use crate::*;

fn header_bytes() -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.variant_begin("Hdr").unwrap();
    enc.map_begin().unwrap();
    enc.entry_u32("iface", 2).unwrap();
    enc.entry_u64("req", 77).unwrap();
    enc.variant_begin("body").unwrap();
    enc.bytes(b"payload").unwrap();
    enc.variant_end().unwrap();
    enc.map_end().unwrap();
    enc.variant_end().unwrap();
    enc.into_bytes().unwrap()
}

#[test]
fn test_scalar_layout_is_little_endian() {
    let mut enc = Encoder::new();
    enc.u32(0x0102_0304).unwrap();
    let bytes = enc.into_bytes().unwrap();
    assert_eq!(bytes, vec![Tag::U32 as u8, 0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_container_length_is_back_patched() {
    let mut enc = Encoder::new();
    enc.option_some_begin().unwrap();
    enc.u64(9).unwrap();
    enc.option_some_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    assert_eq!(bytes[0], Tag::OptionSome as u8);
    assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 9);
    assert_eq!(bytes.len(), 1 + 4 + 9);
}

#[test]
fn test_nested_map_reads_back() {
    let bytes = header_bytes();
    let mut dec = Decoder::new(&bytes);
    let (name, mut body) = dec.variant().unwrap();
    assert_eq!(name, "Hdr");

    let mut map = body.map().unwrap();
    let mut seen = Vec::new();
    while let Some((key, mut val)) = map.next().unwrap() {
        match key {
            "iface" => assert_eq!(val.u32().unwrap(), 2),
            "req" => assert_eq!(val.u64().unwrap(), 77),
            "body" => assert_eq!(val.bytes().unwrap(), b"payload"),
            other => panic!("unexpected key {other}"),
        }
        seen.push(key);
    }
    assert_eq!(seen, vec!["iface", "req", "body"]);
    assert_eq!(dec.remaining(), 0);
}

#[test]
fn test_skip_steps_over_whole_container() {
    let mut bytes = header_bytes();
    let mut tail = Encoder::new();
    tail.u32(5).unwrap();
    bytes.extend(tail.into_bytes().unwrap());

    let mut dec = Decoder::new(&bytes);
    dec.skip().unwrap();
    assert_eq!(dec.u32().unwrap(), 5);
}

#[test]
fn test_option_none_and_some() {
    let mut enc = Encoder::new();
    enc.option_none().unwrap();
    enc.option_some_begin().unwrap();
    enc.unit().unwrap();
    enc.option_some_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    let mut dec = Decoder::new(&bytes);
    assert!(dec.option().unwrap().is_none());
    let mut inner = dec.option().unwrap().expect("some");
    inner.unit().unwrap();
}

#[test]
fn test_map_rejects_bare_scalars() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert_eq!(enc.u32(1), Err(Error::InvalidMapEntry));
}

#[test]
fn test_variant_requires_exactly_one_payload() {
    let mut enc = Encoder::new();
    enc.variant_begin("v").unwrap();
    assert_eq!(enc.variant_end(), Err(Error::EmptyAdt(Scope::Variant)));

    let mut enc = Encoder::new();
    enc.variant_begin("v").unwrap();
    enc.unit().unwrap();
    assert_eq!(enc.unit(), Err(Error::TooManyItems(Scope::Variant)));
}

#[test]
fn test_open_scope_blocks_finalize() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert!(matches!(enc.into_bytes(), Err(Error::ScopeStillOpen)));
}

#[test]
fn test_mismatched_close() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert_eq!(
        enc.option_some_end(),
        Err(Error::ScopeMismatch { expected: Scope::Option, actual: Scope::Map })
    );
    let mut enc = Encoder::new();
    assert_eq!(enc.map_end(), Err(Error::ScopeUnderflow));
}

#[test]
fn test_truncated_input_is_rejected() {
    let bytes = header_bytes();
    for cut in 0..bytes.len() {
        let mut dec = Decoder::new(&bytes[..cut]);
        assert!(dec.variant().is_err(), "prefix of {cut} bytes decoded");
    }
}

#[test]
fn test_invalid_tag_and_wrong_tag() {
    let mut dec = Decoder::new(&[0xEE]);
    assert_eq!(dec.peek_tag(), Err(Error::InvalidTag(0xEE)));

    let mut enc = Encoder::new();
    enc.u64(1).unwrap();
    let bytes = enc.into_bytes().unwrap();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.u32(), Err(Error::UnexpectedTag { expected: Tag::U32, found: Tag::U64 }));
}

#[test]
fn test_bad_utf8() {
    let bytes = [Tag::String as u8, 2, 0, 0, 0, 0xFF, 0xFE];
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::InvalidUtf8));
}
