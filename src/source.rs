//! Source Material: the named byte buffers every candidate is derived from.
//!
//! Loading is the only place the harness touches files or the network. It
//! happens once, before any candidate is generated, and any failure aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;

use crate::bytes::Bytes;
use crate::error::SourceError;

/// How a file's contents are turned into bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
	#[default]
	Raw,
	Hex,
	Base64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
	Hex(String),
	Base64(String),
	Text(String),
	File {
		path: PathBuf,
		#[serde(default)]
		encoding: Encoding,
	},
	Url {
		url: String,
		#[serde(default)]
		encoding: Encoding,
	},
}

/// One entry of the plan's `sources` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceSpec {
	#[serde(flatten)]
	pub origin: Origin,
	#[serde(default)]
	pub expect_len: Option<usize>,
}

impl SourceSpec {
	pub fn new(origin: Origin) -> Self {
		Self { origin, expect_len: None }
	}
}

/// Read-only, insertion-ordered set of named buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMaterial {
	buffers: IndexMap<String, Bytes>,
}

impl SourceMaterial {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
		self.buffers.insert(name.into(), bytes.into());
		self
	}

	/// Loads every spec in order. Relative file paths resolve against `base_dir`.
	pub fn load(specs: &IndexMap<String, SourceSpec>, base_dir: &Path) -> Result<Self, SourceError> {
		let mut buffers = IndexMap::with_capacity(specs.len());
		for (name, spec) in specs {
			let bytes = load_one(name, spec, base_dir)?;
			if let Some(expected) = spec.expect_len {
				if bytes.len() != expected {
					return Err(SourceError::Length { name: name.clone(), expected, actual: bytes.len() });
				}
			}
			debug!("source `{}`: {} bytes", name, bytes.len());
			buffers.insert(name.clone(), bytes);
		}
		info!("loaded {} source buffer(s)", buffers.len());
		Ok(Self { buffers })
	}

	pub fn get(&self, name: &str) -> Option<&[u8]> {
		self.buffers.get(name).map(|b| b.as_ref())
	}

	pub fn require(&self, name: &str) -> Result<&[u8], SourceError> {
		self.get(name).ok_or_else(|| SourceError::Missing(name.to_string()))
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.buffers.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.buffers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buffers.is_empty()
	}
}

fn load_one(name: &str, spec: &SourceSpec, base_dir: &Path) -> Result<Bytes, SourceError> {
	match &spec.origin {
		Origin::Hex(s) => decode_hex(name, s),
		Origin::Base64(s) => decode_base64(name, s),
		Origin::Text(s) => Ok(Bytes::from_text(s)),
		Origin::File { path, encoding } => {
			let path = if path.is_absolute() { path.clone() } else { base_dir.join(path) };
			let raw = fs::read(&path).map_err(|source| SourceError::Io {
				name: name.to_string(),
				path: path.clone(),
				source,
			})?;
			decode(name, raw, *encoding)
		}
		Origin::Url { url, encoding } => {
			info!("fetching source `{}` from {}", name, url);
			let raw = fetch(url).map_err(|source| SourceError::Http {
				name: name.to_string(),
				url: url.clone(),
				source: Box::new(source),
			})?;
			decode(name, raw, *encoding)
		}
	}
}

fn fetch(url: &str) -> Result<Vec<u8>, ureq::Error> {
	let mut response = ureq::get(url).call()?;
	response.body_mut().read_to_vec()
}

fn decode(name: &str, raw: Vec<u8>, encoding: Encoding) -> Result<Bytes, SourceError> {
	match encoding {
		Encoding::Raw => Ok(Bytes::from_vec(raw)),
		Encoding::Hex => decode_hex(name, &String::from_utf8_lossy(&raw)),
		Encoding::Base64 => decode_base64(name, &String::from_utf8_lossy(&raw)),
	}
}

fn decode_hex(name: &str, s: &str) -> Result<Bytes, SourceError> {
	Bytes::from_hex(s).map_err(|source| SourceError::Hex { name: name.to_string(), source })
}

fn decode_base64(name: &str, s: &str) -> Result<Bytes, SourceError> {
	Bytes::from_base64(s).map_err(|source| SourceError::Base64 { name: name.to_string(), source })
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn specs(json: &str) -> IndexMap<String, SourceSpec> {
		serde_json::from_str(json).unwrap()
	}

	#[test]
	fn loads_inline_sources_in_order() {
		let specs = specs(r#"{
			"uid": {"hex": "5a928ebd3f5729b548b77e73", "expect_len": 12},
			"word": {"text": "SAINT"},
			"blob": {"base64": "AAEC"}
		}"#);
		let material = SourceMaterial::load(&specs, Path::new(".")).unwrap();
		assert_eq!(material.names().collect::<Vec<_>>(), ["uid", "word", "blob"]);
		assert_eq!(material.get("word"), Some(&b"SAINT"[..]));
		assert_eq!(material.get("blob"), Some(&[0u8, 1, 2][..]));
	}

	#[test]
	fn reads_files_relative_to_base_dir() {
		let tmp = TempDir::new().unwrap();
		let dir = tmp.path();
		fs::write(dir.join("otp.hex"), "00112233\n").unwrap();
		let specs = specs(r#"{"otp": {"file": {"path": "otp.hex", "encoding": "hex"}}}"#);
		let material = SourceMaterial::load(&specs, dir).unwrap();
		assert_eq!(material.get("otp"), Some(&[0x00u8, 0x11, 0x22, 0x33][..]));
	}

	#[test]
	fn wrong_length_is_fatal() {
		let specs = specs(r#"{"uid": {"hex": "0011", "expect_len": 12}}"#);
		let err = SourceMaterial::load(&specs, Path::new(".")).unwrap_err();
		assert!(matches!(err, SourceError::Length { expected: 12, actual: 2, .. }));
	}

	#[test]
	fn missing_file_is_fatal() {
		let specs = specs(r#"{"otp": {"file": {"path": "/nonexistent/otp_dump.bin"}}}"#);
		let err = SourceMaterial::load(&specs, Path::new(".")).unwrap_err();
		assert!(matches!(err, SourceError::Io { .. }));
	}

	#[test]
	fn malformed_hex_is_fatal() {
		let specs = specs(r#"{"uid": {"hex": "xyz"}}"#);
		assert!(matches!(SourceMaterial::load(&specs, Path::new(".")), Err(SourceError::Hex { .. })));
	}
}
