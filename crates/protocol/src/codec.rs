//! Wire codec: JSON text <-> compact binary.
//!
//! The binary form is a CBOR subset. A top-level message is wrapped in an
//! envelope so a receiver can size and skip it without decoding the body:
//!
//! ```text
//! 0xd8 0x18            tag 24 ("encoded CBOR data item")
//! 0x5a <u32 BE len>    byte string header, 32-bit length
//! <value>              the message itself (normally a map)
//! ```
//!
//! Values use shortest-form integer heads, definite-length text strings,
//! arrays and maps, `0xfb` doubles, and `0xf4`/`0xf5`/`0xf6` for
//! false/true/null. The decoder is more lenient than the encoder: it also
//! accepts indefinite-length arrays and maps, nested envelopes, single
//! precision floats, and byte strings (surfaced as base64 text).
//!
//! Map key order is preserved in both directions, so converting a message
//! to binary and back yields the same JSON.

#[cfg(test)]
mod tests;

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::CodecError;

const ENVELOPE_TAG: [u8; 2] = [0xd8, 0x18];
const ENVELOPE_BYTE_STRING: u8 = 0x5a;
const ENVELOPE_HEADER_LEN: usize = 7;

/// Maximum nesting of arrays, maps, and envelopes accepted by the decoder.
pub const MAX_DEPTH: usize = 300;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const INFO_1_BYTE: u8 = 24;
const INFO_2_BYTES: u8 = 25;
const INFO_4_BYTES: u8 = 26;
const INFO_8_BYTES: u8 = 27;
const INFO_INDEFINITE: u8 = 31;

const ENCODED_CBOR_TAG: u8 = 24;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const FLOAT32: u8 = 0xfa;
const FLOAT64: u8 = 0xfb;
const BREAK: u8 = 0xff;

/// Encoding negotiated once per client connection.
///
/// The router holds one of these per client and uses it for every message
/// crossing that client's boundary, instead of checking a flag per send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
	/// JSON text
	#[default]
	Json,
	/// Enveloped binary
	Binary,
}

impl WireFormat {
	/// Serializes a structured message for the wire.
	pub fn encode(self, message: &Value) -> Result<Vec<u8>, CodecError> {
		match self {
			WireFormat::Json => Ok(serde_json::to_vec(message)?),
			WireFormat::Binary => encode_value(message),
		}
	}

	/// Parses wire bytes into a structured message.
	pub fn decode(self, bytes: &[u8]) -> Result<Value, CodecError> {
		match self {
			WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
			WireFormat::Binary => decode_value(bytes),
		}
	}

	/// Guesses the format of a message from its first bytes.
	pub fn detect(bytes: &[u8]) -> Self {
		if is_binary(bytes) {
			WireFormat::Binary
		} else {
			WireFormat::Json
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			WireFormat::Json => "json",
			WireFormat::Binary => "binary",
		}
	}
}

impl FromStr for WireFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"json" => Ok(WireFormat::Json),
			"binary" | "cbor" => Ok(WireFormat::Binary),
			other => Err(format!("unknown wire format '{other}' (expected json or binary)")),
		}
	}
}

impl std::fmt::Display for WireFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Returns true if the bytes start with a binary envelope.
pub fn is_binary(bytes: &[u8]) -> bool {
	bytes.starts_with(&ENVELOPE_TAG)
}

/// Converts a JSON text message into binary form.
pub fn to_binary(json: &[u8]) -> Result<Vec<u8>, CodecError> {
	let value: Value = serde_json::from_slice(json)?;
	if !value.is_object() {
		return Err(CodecError::NotAnObject);
	}
	encode_value(&value)
}

/// Converts a binary message into JSON text.
pub fn to_structured(binary: &[u8]) -> Result<Vec<u8>, CodecError> {
	let value = decode_value(binary)?;
	if !value.is_object() {
		return Err(CodecError::NotAnObject);
	}
	Ok(serde_json::to_vec(&value)?)
}

/// Encodes a value as an enveloped binary message.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, CodecError> {
	let mut body = Vec::with_capacity(128);
	write_value(&mut body, value);
	let len = u32::try_from(body.len()).map_err(|_| CodecError::TooLarge(body.len()))?;

	let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len());
	out.extend_from_slice(&ENVELOPE_TAG);
	out.push(ENVELOPE_BYTE_STRING);
	out.extend_from_slice(&len.to_be_bytes());
	out.extend_from_slice(&body);
	Ok(out)
}

/// Decodes an enveloped binary message.
pub fn decode_value(bytes: &[u8]) -> Result<Value, CodecError> {
	if !is_binary(bytes) {
		return Err(CodecError::MissingEnvelope);
	}
	let mut reader = Reader {
		bytes,
		pos: 0,
		depth: 0,
	};
	let value = reader.read_value()?;
	if reader.pos != bytes.len() {
		return Err(CodecError::TrailingBytes(bytes.len() - reader.pos));
	}
	Ok(value)
}

fn write_head(out: &mut Vec<u8>, major: u8, argument: u64) {
	let major = major << 5;
	if argument < u64::from(INFO_1_BYTE) {
		out.push(major | argument as u8);
	} else if let Ok(v) = u8::try_from(argument) {
		out.push(major | INFO_1_BYTE);
		out.push(v);
	} else if let Ok(v) = u16::try_from(argument) {
		out.push(major | INFO_2_BYTES);
		out.extend_from_slice(&v.to_be_bytes());
	} else if let Ok(v) = u32::try_from(argument) {
		out.push(major | INFO_4_BYTES);
		out.extend_from_slice(&v.to_be_bytes());
	} else {
		out.push(major | INFO_8_BYTES);
		out.extend_from_slice(&argument.to_be_bytes());
	}
}

fn write_text(out: &mut Vec<u8>, text: &str) {
	write_head(out, MAJOR_TEXT, text.len() as u64);
	out.extend_from_slice(text.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
	match value {
		Value::Null => out.push(NULL),
		Value::Bool(b) => out.push(if *b { TRUE } else { FALSE }),
		Value::Number(n) => write_number(out, n),
		Value::String(s) => write_text(out, s),
		Value::Array(items) => {
			write_head(out, MAJOR_ARRAY, items.len() as u64);
			for item in items {
				write_value(out, item);
			}
		}
		Value::Object(map) => {
			write_head(out, MAJOR_MAP, map.len() as u64);
			for (key, item) in map {
				write_text(out, key);
				write_value(out, item);
			}
		}
	}
}

fn write_number(out: &mut Vec<u8>, n: &Number) {
	if let Some(u) = n.as_u64() {
		write_head(out, MAJOR_UNSIGNED, u);
	} else if let Some(i) = n.as_i64() {
		// Negative integers encode -1 - n; cannot overflow for any i64 < 0.
		write_head(out, MAJOR_NEGATIVE, (-1 - i) as u64);
	} else {
		out.push(FLOAT64);
		out.extend_from_slice(&n.as_f64().unwrap_or_default().to_be_bytes());
	}
}

struct Reader<'a> {
	bytes: &'a [u8],
	pos: usize,
	depth: usize,
}

impl<'a> Reader<'a> {
	fn byte(&mut self) -> Result<u8, CodecError> {
		let b = *self
			.bytes
			.get(self.pos)
			.ok_or(CodecError::UnexpectedEof(self.pos))?;
		self.pos += 1;
		Ok(b)
	}

	fn peek(&self) -> Option<u8> {
		self.bytes.get(self.pos).copied()
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
		let end = self
			.pos
			.checked_add(n)
			.filter(|end| *end <= self.bytes.len())
			.ok_or(CodecError::UnexpectedEof(self.pos))?;
		let slice = &self.bytes[self.pos..end];
		self.pos = end;
		Ok(slice)
	}

	fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
		let mut buf = [0u8; N];
		buf.copy_from_slice(self.take(N)?);
		Ok(buf)
	}

	fn argument(&mut self, initial: u8, offset: usize) -> Result<u64, CodecError> {
		match initial & 0x1f {
			info @ 0..=23 => Ok(u64::from(info)),
			INFO_1_BYTE => Ok(u64::from(self.byte()?)),
			INFO_2_BYTES => Ok(u64::from(u16::from_be_bytes(self.take_array()?))),
			INFO_4_BYTES => Ok(u64::from(u32::from_be_bytes(self.take_array()?))),
			INFO_8_BYTES => Ok(u64::from_be_bytes(self.take_array()?)),
			_ => Err(CodecError::Unsupported { initial, offset }),
		}
	}

	/// Reads a length argument that must fit in the remaining input.
	fn length(&mut self, initial: u8, offset: usize) -> Result<usize, CodecError> {
		let len = self.argument(initial, offset)?;
		usize::try_from(len)
			.ok()
			.filter(|len| *len <= self.bytes.len() - self.pos)
			.ok_or(CodecError::UnexpectedEof(self.pos))
	}

	fn enter(&mut self) -> Result<(), CodecError> {
		self.depth += 1;
		if self.depth > MAX_DEPTH {
			return Err(CodecError::TooDeep(MAX_DEPTH));
		}
		Ok(())
	}

	fn leave(&mut self) {
		self.depth -= 1;
	}

	fn read_value(&mut self) -> Result<Value, CodecError> {
		let offset = self.pos;
		let initial = self.byte()?;
		match initial >> 5 {
			MAJOR_UNSIGNED => Ok(Value::from(self.argument(initial, offset)?)),
			MAJOR_NEGATIVE => {
				let n = self.argument(initial, offset)?;
				let n = i64::try_from(n).map_err(|_| CodecError::IntegerOverflow(offset))?;
				Ok(Value::from(-1 - n))
			}
			MAJOR_BYTES => {
				let len = self.length(initial, offset)?;
				Ok(Value::String(STANDARD.encode(self.take(len)?)))
			}
			MAJOR_TEXT => self.read_text_body(initial, offset).map(Value::String),
			MAJOR_ARRAY => self.read_array(initial, offset),
			MAJOR_MAP => self.read_map(initial, offset),
			MAJOR_TAG => self.read_envelope(initial, offset),
			MAJOR_SIMPLE => self.read_simple(initial, offset),
			_ => Err(CodecError::Unsupported { initial, offset }),
		}
	}

	fn read_text_body(&mut self, initial: u8, offset: usize) -> Result<String, CodecError> {
		let len = self.length(initial, offset)?;
		let data = self.take(len)?;
		std::str::from_utf8(data)
			.map(str::to_owned)
			.map_err(|_| CodecError::InvalidUtf8(offset))
	}

	fn read_array(&mut self, initial: u8, offset: usize) -> Result<Value, CodecError> {
		self.enter()?;
		let mut items = Vec::new();
		if initial & 0x1f == INFO_INDEFINITE {
			while self.peek() != Some(BREAK) {
				items.push(self.read_value()?);
			}
			self.pos += 1;
		} else {
			let count = self.length(initial, offset)?;
			items.reserve(count);
			for _ in 0..count {
				items.push(self.read_value()?);
			}
		}
		self.leave();
		Ok(Value::Array(items))
	}

	fn read_map(&mut self, initial: u8, offset: usize) -> Result<Value, CodecError> {
		self.enter()?;
		let mut map = Map::new();
		if initial & 0x1f == INFO_INDEFINITE {
			while self.peek() != Some(BREAK) {
				let (key, value) = self.read_entry()?;
				map.insert(key, value);
			}
			self.pos += 1;
		} else {
			let count = self.length(initial, offset)?;
			for _ in 0..count {
				let (key, value) = self.read_entry()?;
				map.insert(key, value);
			}
		}
		self.leave();
		Ok(Value::Object(map))
	}

	fn read_entry(&mut self) -> Result<(String, Value), CodecError> {
		let offset = self.pos;
		let initial = self.byte()?;
		if initial >> 5 != MAJOR_TEXT {
			return Err(CodecError::NonStringKey(offset));
		}
		let key = self.read_text_body(initial, offset)?;
		let value = self.read_value()?;
		Ok((key, value))
	}

	fn read_envelope(&mut self, initial: u8, offset: usize) -> Result<Value, CodecError> {
		if initial != ENVELOPE_TAG[0] || self.byte()? != ENCODED_CBOR_TAG {
			return Err(CodecError::Unsupported { initial, offset });
		}
		let header_offset = self.pos;
		if self.byte()? != ENVELOPE_BYTE_STRING {
			return Err(CodecError::MissingEnvelope);
		}
		let declared = self.length(ENVELOPE_BYTE_STRING, header_offset)?;

		self.enter()?;
		let start = self.pos;
		let value = self.read_value()?;
		self.leave();

		let actual = self.pos - start;
		if actual != declared {
			return Err(CodecError::EnvelopeLength { declared, actual });
		}
		Ok(value)
	}

	fn read_simple(&mut self, initial: u8, offset: usize) -> Result<Value, CodecError> {
		match initial {
			FALSE => Ok(Value::Bool(false)),
			TRUE => Ok(Value::Bool(true)),
			NULL => Ok(Value::Null),
			FLOAT32 => {
				let f = f32::from_be_bytes(self.take_array()?);
				float(f64::from(f), offset)
			}
			FLOAT64 => {
				let f = f64::from_be_bytes(self.take_array()?);
				float(f, offset)
			}
			_ => Err(CodecError::Unsupported { initial, offset }),
		}
	}
}

fn float(f: f64, offset: usize) -> Result<Value, CodecError> {
	Number::from_f64(f)
		.map(Value::Number)
		.ok_or(CodecError::NonFiniteFloat(offset))
}
