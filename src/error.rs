//! Error taxonomy.
//!
//! Only [`HarnessError`] ever reaches the caller. [`DerivationError`] and
//! [`CipherError`] are per-candidate failures: the generator and driver record
//! them and move on to the next candidate.

use std::path::PathBuf;

use thiserror::Error;

use crate::bytes::{Base64Error, HexError};

/// A generation rule could not produce a well-formed candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule `{rule}`: {kind}")]
pub struct DerivationError {
	pub rule: String,
	pub kind: DerivationErrorKind,
}

impl DerivationError {
	pub fn new(rule: impl Into<String>, kind: DerivationErrorKind) -> Self {
		Self { rule: rule.into(), kind }
	}
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationErrorKind {
	#[error("unknown source `{0}`")]
	UnknownSource(String),

	#[error("needs bytes {start}..{end} but only {available} are available")]
	OutOfRange { start: usize, end: usize, available: usize },

	#[error("{0} operand is empty")]
	EmptyOperand(&'static str),

	#[error("{what}: length {len} is not a multiple of {multiple}")]
	Misaligned { what: &'static str, len: usize, multiple: usize },

	#[error("invalid parameter: {0}")]
	InvalidParameter(String),

	#[error("rule references the sweep variable but has no sweep")]
	UnboundSweep,

	#[error("derived {what} is {actual} bytes, cipher needs {expected}")]
	WrongLength { what: &'static str, expected: usize, actual: usize },

	#[error("cipher needs an iv and the rule supplies none")]
	MissingIv,

	#[error("invalid literal: {0}")]
	Literal(#[from] HexError),

	#[error("key derivation failed: {0}")]
	Kdf(String),
}

/// The decryption primitive rejected a candidate or the ciphertext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
	#[error("invalid key length: expected {expected}, got {actual}")]
	InvalidKeyLength { expected: usize, actual: usize },

	#[error("invalid iv length: expected {expected}, got {actual}")]
	InvalidIvLength { expected: usize, actual: usize },

	#[error("cipher requires an iv")]
	MissingIv,

	#[error("cipher takes no iv")]
	UnexpectedIv,

	#[error("ciphertext length {len} is not a multiple of the {block}-byte block")]
	UnalignedCiphertext { len: usize, block: usize },

	#[error("empty input")]
	EmptyInput,
}

/// Missing or malformed Source Material. Always fatal, raised before generation starts.
#[derive(Error, Debug)]
pub enum SourceError {
	#[error("source `{0}` is not defined")]
	Missing(String),

	#[error("source `{name}`: invalid hex: {source}")]
	Hex { name: String, source: HexError },

	#[error("source `{name}`: invalid base64: {source}")]
	Base64 { name: String, source: Base64Error },

	#[error("source `{name}`: expected {expected} bytes, found {actual}")]
	Length { name: String, expected: usize, actual: usize },

	#[error("source `{name}`: cannot read {}: {source}", path.display())]
	Io { name: String, path: PathBuf, source: std::io::Error },

	#[error("source `{name}`: fetching {url} failed: {source}")]
	Http { name: String, url: String, source: Box<ureq::Error> },

	#[error("ciphertext framing `{label}`: {source}")]
	Framing { label: String, source: DerivationError },
}

/// Top-level error for everything that aborts a run.
#[derive(Error, Debug)]
pub enum HarnessError {
	#[error(transparent)]
	Source(#[from] SourceError),

	#[error("invalid plan: {0}")]
	Plan(String),

	#[error("cannot read plan {}: {source}", path.display())]
	PlanIo { path: PathBuf, source: std::io::Error },

	#[error("invalid argument: {0}")]
	Argument(String),

	#[error("cannot parse plan: {0}")]
	Json(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("cipher error: {0}")]
	Cipher(#[from] CipherError),

	#[error("cannot start worker pool: {0}")]
	ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
