use serde_json::json;

use super::*;

fn envelope(body: &[u8]) -> Vec<u8> {
	let mut out = vec![0xd8, 0x18, 0x5a];
	out.extend_from_slice(&(body.len() as u32).to_be_bytes());
	out.extend_from_slice(body);
	out
}

#[test]
fn test_envelope_header_layout() {
	let bytes = encode_value(&json!({})).unwrap();
	// tag 24, 32-bit byte string header, length 1, empty map
	assert_eq!(bytes, vec![0xd8, 0x18, 0x5a, 0, 0, 0, 1, 0xa0]);
	assert!(is_binary(&bytes));
}

#[test]
fn test_command_round_trip_preserves_key_order() {
	let text = br#"{"id":5,"method":"Runtime.evaluate","params":{"expression":"1+1","returnByValue":true,"contextId":-3,"timeout":2.5,"args":[null,"x",false]},"sessionId":"child-1"}"#;
	let binary = to_binary(text).unwrap();
	let back = to_structured(&binary).unwrap();
	assert_eq!(back, text.to_vec());
}

#[test]
fn test_integer_heads_use_shortest_form() {
	let bytes = encode_value(&json!([23, 24, 255, 256, 65536, 4294967296u64, -1, -25])).unwrap();
	let body = &bytes[7..];
	assert_eq!(
		body,
		&[
			0x88, // array(8)
			0x17, // 23
			0x18, 24, // 24
			0x18, 0xff, // 255
			0x19, 0x01, 0x00, // 256
			0x1a, 0x00, 0x01, 0x00, 0x00, // 65536
			0x1b, 0, 0, 0, 1, 0, 0, 0, 0, // 2^32
			0x20, // -1
			0x38, 24, // -25
		][..]
	);
}

#[test]
fn test_extreme_integers_survive() {
	let value = json!({"max": u64::MAX, "min": i64::MIN});
	assert_eq!(decode_value(&encode_value(&value).unwrap()).unwrap(), value);
}

#[test]
fn test_decodes_indefinite_containers() {
	// {"a": [1, 2]} with indefinite map and array
	let body = [0xbf, 0x61, b'a', 0x9f, 0x01, 0x02, 0xff, 0xff];
	let value = decode_value(&envelope(&body)).unwrap();
	assert_eq!(value, json!({"a": [1, 2]}));
}

#[test]
fn test_decodes_nested_envelope() {
	let inner = envelope(&[0xa1, 0x61, b'x', 0xf5]);
	let mut body = vec![0xa1, 0x66];
	body.extend_from_slice(b"params");
	body.extend_from_slice(&inner);
	let value = decode_value(&envelope(&body)).unwrap();
	assert_eq!(value, json!({"params": {"x": true}}));
}

#[test]
fn test_byte_string_decodes_as_base64() {
	let body = [0xa1, 0x64, b'd', b'a', b't', b'a', 0x43, 1, 2, 3];
	let value = decode_value(&envelope(&body)).unwrap();
	assert_eq!(value, json!({"data": "AQID"}));
}

#[test]
fn test_float32_is_widened() {
	let mut body = vec![0xfa];
	body.extend_from_slice(&1.5f32.to_be_bytes());
	assert_eq!(decode_value(&envelope(&body)).unwrap(), json!(1.5));
}

#[test]
fn test_missing_envelope_is_rejected() {
	assert_eq!(decode_value(&[0xa0]), Err(CodecError::MissingEnvelope));
	assert_eq!(to_structured(b"{}"), Err(CodecError::MissingEnvelope));
}

#[test]
fn test_truncated_input_is_rejected() {
	let bytes = encode_value(&json!({"method": "Page.enable"})).unwrap();
	let err = decode_value(&bytes[..bytes.len() - 3]).unwrap_err();
	assert!(matches!(err, CodecError::UnexpectedEof(_)), "got {err:?}");
}

#[test]
fn test_trailing_bytes_are_rejected() {
	let mut bytes = encode_value(&json!({})).unwrap();
	bytes.push(0xf6);
	assert_eq!(decode_value(&bytes), Err(CodecError::TrailingBytes(1)));
}

#[test]
fn test_envelope_length_mismatch() {
	// declares 3 bytes but holds a single-byte value followed by two more items
	let bytes = [0xd8, 0x18, 0x5a, 0, 0, 0, 3, 0xf6, 0xf6, 0xf6];
	assert_eq!(
		decode_value(&bytes),
		Err(CodecError::EnvelopeLength {
			declared: 3,
			actual: 1
		})
	);
}

#[test]
fn test_non_string_key_is_rejected() {
	let body = [0xa1, 0x01, 0x02];
	assert_eq!(decode_value(&envelope(&body)), Err(CodecError::NonStringKey(8)));
}

#[test]
fn test_invalid_utf8_is_rejected() {
	let body = [0x62, 0xc3, 0x28];
	assert_eq!(decode_value(&envelope(&body)), Err(CodecError::InvalidUtf8(7)));
}

#[test]
fn test_nesting_limit() {
	let body: Vec<u8> = std::iter::repeat_n(0x81, MAX_DEPTH + 1)
		.chain(std::iter::once(0xf6))
		.collect();
	assert_eq!(decode_value(&envelope(&body)), Err(CodecError::TooDeep(MAX_DEPTH)));
}

#[test]
fn test_to_binary_requires_object() {
	assert_eq!(to_binary(b"[1,2]"), Err(CodecError::NotAnObject));
	assert!(matches!(to_binary(b"{not json"), Err(CodecError::Json(_))));
}

#[test]
fn test_wire_format_strategy() {
	let message = json!({"id": 1, "result": {"ok": true}});
	for format in [WireFormat::Json, WireFormat::Binary] {
		let bytes = format.encode(&message).unwrap();
		assert_eq!(WireFormat::detect(&bytes), format);
		assert_eq!(format.decode(&bytes).unwrap(), message);
	}
	assert_eq!("cbor".parse::<WireFormat>(), Ok(WireFormat::Binary));
	assert!("xml".parse::<WireFormat>().is_err());
}
