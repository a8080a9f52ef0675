//! Owned byte buffers and the small codecs every other module leans on.

use std::fmt;

use base64::Engine;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
	#[error("invalid hex character")]
	InvalidCharacter,
	#[error("odd number of hex digits")]
	OddLength,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Base64Error {
	#[error("invalid base64 character")]
	InvalidCharacter,
	#[error("truncated or badly padded base64")]
	InvalidEnding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes {
	bytes: Vec<u8>,
}

impl Bytes {
	pub fn from_vec(bytes: Vec<u8>) -> Self {
		Self { bytes }
	}

	/// Whitespace and an optional `0x` prefix are ignored, so pasted dumps work as-is.
	pub fn from_hex(hstr: &str) -> Result<Self, HexError> {
		let stripped: String = hstr.chars().filter(|c| !c.is_whitespace()).collect();
		let digits = stripped.strip_prefix("0x").unwrap_or(stripped.as_str());
		hex::decode(digits).map_err(|err| match err {
			hex::FromHexError::InvalidHexCharacter { .. } => HexError::InvalidCharacter,
			hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => HexError::OddLength,
		}).map(Self::from_vec)
	}

	pub fn from_base64(estr: &str) -> Result<Self, Base64Error> {
		let stripped: String = estr.chars().filter(|c| !c.is_whitespace()).collect();
		base64::engine::general_purpose::STANDARD.decode(&stripped).map_err(|err| match err {
			base64::DecodeError::InvalidByte(_, _) => Base64Error::InvalidCharacter,
			base64::DecodeError::InvalidLength |
			base64::DecodeError::InvalidLastSymbol { .. } |
			base64::DecodeError::InvalidPadding => Base64Error::InvalidEnding,
		}).map(Self::from_vec)
	}

	pub fn from_text(s: &str) -> Self {
		Self::from_vec(s.as_bytes().to_vec())
	}

	pub fn to_hex(&self) -> String {
		hex::encode(&self.bytes)
	}

	pub fn to_base64(&self) -> String {
		base64::engine::general_purpose::STANDARD.encode(&self.bytes)
	}

	pub fn to_lossy_string(&self) -> String {
		String::from_utf8_lossy(&self.bytes).into_owned()
	}

	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.bytes
	}
}

impl AsRef<[u8]> for Bytes {
	fn as_ref(&self) -> &[u8] {
		&self.bytes
	}
}

impl From<Vec<u8>> for Bytes {
	fn from(bytes: Vec<u8>) -> Self {
		Self::from_vec(bytes)
	}
}

impl From<&[u8]> for Bytes {
	fn from(bytes: &[u8]) -> Self {
		Self::from_vec(bytes.to_vec())
	}
}

impl fmt::Display for Bytes {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

/// XOR `text` against `key`, wrapping the key when it is shorter.
/// The output always has the length of `text`. An empty key leaves `text` unchanged.
pub fn xor_cyclic<T: AsRef<[u8]>, U: AsRef<[u8]>>(text: T, key: U) -> Vec<u8> {
	let (text, key) = (text.as_ref(), key.as_ref());
	if key.is_empty() {
		return text.to_vec();
	}
	text.iter()
		.zip(key.iter().cycle())
		.map(|(t, k)| t ^ k)
		.collect()
}

/// Renders a possibly-binary buffer on one line, escaping everything outside printable ASCII.
pub fn escape_ascii(bytes: &[u8]) -> String {
	bytes.iter().flat_map(|b| std::ascii::escape_default(*b)).map(char::from).collect()
}
