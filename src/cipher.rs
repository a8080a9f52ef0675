//! Decryption primitives.
//!
//! Every cipher validates key and iv shape itself and reports a [`CipherError`]
//! instead of padding or truncating; the driver turns that into a REJECT.

use std::fmt;
use std::str::FromStr;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256, Block};
use serde::Deserialize;

use crate::bytes::xor_cyclic;
use crate::error::{CipherError, HarnessError};

pub const AES_BLOCK: usize = 16;

pub trait Cipher: Send + Sync {
	fn name(&self) -> &'static str;

	/// Exact key length in bytes.
	fn key_len(&self) -> usize;

	/// Exact iv length in bytes, or `None` when the cipher takes no iv.
	fn iv_len(&self) -> Option<usize>;

	fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;

	fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

	fn check_shape(&self, key: &[u8], iv: Option<&[u8]>) -> Result<(), CipherError> {
		if key.len() != self.key_len() {
			return Err(CipherError::InvalidKeyLength { expected: self.key_len(), actual: key.len() });
		}
		match (self.iv_len(), iv) {
			(Some(expected), Some(iv)) if iv.len() != expected => {
				Err(CipherError::InvalidIvLength { expected, actual: iv.len() })
			}
			(Some(_), None) => Err(CipherError::MissingIv),
			(None, Some(_)) => Err(CipherError::UnexpectedIv),
			_ => Ok(()),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "usize")]
pub enum KeySize {
	Aes128,
	Aes192,
	Aes256,
}

impl KeySize {
	pub fn bytes(self) -> usize {
		match self {
			KeySize::Aes128 => 16,
			KeySize::Aes192 => 24,
			KeySize::Aes256 => 32,
		}
	}
}

impl TryFrom<usize> for KeySize {
	type Error = String;

	fn try_from(n: usize) -> Result<Self, Self::Error> {
		match n {
			16 => Ok(KeySize::Aes128),
			24 => Ok(KeySize::Aes192),
			32 => Ok(KeySize::Aes256),
			_ => Err(format!("AES key size must be 16, 24 or 32 bytes, not {}", n)),
		}
	}
}

enum AesCore {
	A128(Aes128),
	A192(Aes192),
	A256(Aes256),
}

impl AesCore {
	fn new(size: KeySize, key: &[u8]) -> Result<Self, CipherError> {
		let invalid = |_| CipherError::InvalidKeyLength { expected: size.bytes(), actual: key.len() };
		Ok(match size {
			KeySize::Aes128 => AesCore::A128(Aes128::new_from_slice(key).map_err(invalid)?),
			KeySize::Aes192 => AesCore::A192(Aes192::new_from_slice(key).map_err(invalid)?),
			KeySize::Aes256 => AesCore::A256(Aes256::new_from_slice(key).map_err(invalid)?),
		})
	}

	fn decrypt_block(&self, block: &mut Block) {
		match self {
			AesCore::A128(c) => c.decrypt_block(block),
			AesCore::A192(c) => c.decrypt_block(block),
			AesCore::A256(c) => c.decrypt_block(block),
		}
	}

	fn encrypt_block(&self, block: &mut Block) {
		match self {
			AesCore::A128(c) => c.encrypt_block(block),
			AesCore::A192(c) => c.encrypt_block(block),
			AesCore::A256(c) => c.encrypt_block(block),
		}
	}
}

fn check_blocks(data: &[u8]) -> Result<(), CipherError> {
	if data.is_empty() {
		return Err(CipherError::EmptyInput);
	}
	if data.len() % AES_BLOCK != 0 {
		return Err(CipherError::UnalignedCiphertext { len: data.len(), block: AES_BLOCK });
	}
	Ok(())
}

/// AES in CBC mode without padding removal; callers see every decrypted byte.
#[derive(Debug, Clone, Copy)]
pub struct AesCbc {
	pub key_size: KeySize,
}

impl Cipher for AesCbc {
	fn name(&self) -> &'static str {
		"aes-cbc"
	}

	fn key_len(&self) -> usize {
		self.key_size.bytes()
	}

	fn iv_len(&self) -> Option<usize> {
		Some(AES_BLOCK)
	}

	fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		check_blocks(ciphertext)?;
		let iv = iv.ok_or(CipherError::MissingIv)?;
		let core = AesCore::new(self.key_size, key)?;

		let mut prev = Block::clone_from_slice(iv);
		let mut plaintext = Vec::with_capacity(ciphertext.len());
		for chunk in ciphertext.chunks_exact(AES_BLOCK) {
			let mut block = Block::clone_from_slice(chunk);
			core.decrypt_block(&mut block);
			plaintext.extend(block.iter().zip(prev.iter()).map(|(b, p)| b ^ p));
			prev = Block::clone_from_slice(chunk);
		}
		Ok(plaintext)
	}

	fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		check_blocks(plaintext)?;
		let iv = iv.ok_or(CipherError::MissingIv)?;
		let core = AesCore::new(self.key_size, key)?;

		let mut prev = Block::clone_from_slice(iv);
		let mut ciphertext = Vec::with_capacity(plaintext.len());
		for chunk in plaintext.chunks_exact(AES_BLOCK) {
			let mut block = Block::clone_from_slice(&xor_cyclic(chunk, prev.as_slice()));
			core.encrypt_block(&mut block);
			ciphertext.extend_from_slice(&block);
			prev = block;
		}
		Ok(ciphertext)
	}
}

#[derive(Debug, Clone, Copy)]
pub struct AesEcb {
	pub key_size: KeySize,
}

impl Cipher for AesEcb {
	fn name(&self) -> &'static str {
		"aes-ecb"
	}

	fn key_len(&self) -> usize {
		self.key_size.bytes()
	}

	fn iv_len(&self) -> Option<usize> {
		None
	}

	fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		check_blocks(ciphertext)?;
		let core = AesCore::new(self.key_size, key)?;
		let mut plaintext = Vec::with_capacity(ciphertext.len());
		for chunk in ciphertext.chunks_exact(AES_BLOCK) {
			let mut block = Block::clone_from_slice(chunk);
			core.decrypt_block(&mut block);
			plaintext.extend_from_slice(&block);
		}
		Ok(plaintext)
	}

	fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		check_blocks(plaintext)?;
		let core = AesCore::new(self.key_size, key)?;
		let mut ciphertext = Vec::with_capacity(plaintext.len());
		for chunk in plaintext.chunks_exact(AES_BLOCK) {
			let mut block = Block::clone_from_slice(chunk);
			core.encrypt_block(&mut block);
			ciphertext.extend_from_slice(&block);
		}
		Ok(ciphertext)
	}
}

/// Toy add-rotate-xor keystream with a 24-bit key and a 32-bit nonce, both big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArxStream;

impl ArxStream {
	pub const KEY_LEN: usize = 3;
	pub const NONCE_LEN: usize = 4;

	pub fn keystream(key24: u32, nonce: u32, len: usize) -> Vec<u8> {
		let key24 = key24 & 0x00ff_ffff;
		let key32 = key24 | (key24 << 24);
		let mut state = nonce ^ key32;
		let mut out = Vec::with_capacity(len);
		for i in 0..len {
			state = state.wrapping_add(key32).rotate_left(7);
			out.push((state as u8) ^ ((state >> 8) as u8));
			state ^= i as u32;
		}
		out
	}

	fn apply(&self, key: &[u8], iv: Option<&[u8]>, data: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		if data.is_empty() {
			return Err(CipherError::EmptyInput);
		}
		let nonce = iv.ok_or(CipherError::MissingIv)?;
		let key24 = key.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
		let nonce = nonce.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
		Ok(xor_cyclic(data, Self::keystream(key24, nonce, data.len())))
	}
}

impl Cipher for ArxStream {
	fn name(&self) -> &'static str {
		"arx-stream"
	}

	fn key_len(&self) -> usize {
		Self::KEY_LEN
	}

	fn iv_len(&self) -> Option<usize> {
		Some(Self::NONCE_LEN)
	}

	fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.apply(key, iv, ciphertext)
	}

	fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.apply(key, iv, plaintext)
	}
}

#[derive(Debug, Clone, Copy)]
pub struct RepeatingXor {
	pub key_len: usize,
}

impl Cipher for RepeatingXor {
	fn name(&self) -> &'static str {
		"repeating-xor"
	}

	fn key_len(&self) -> usize {
		self.key_len
	}

	fn iv_len(&self) -> Option<usize> {
		None
	}

	fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.check_shape(key, iv)?;
		if ciphertext.is_empty() {
			return Err(CipherError::EmptyInput);
		}
		Ok(xor_cyclic(ciphertext, key))
	}

	fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
		self.decrypt(key, iv, plaintext)
	}
}

/// Cipher selection as it appears in a plan, e.g. `{"aes_cbc": {"key_size": 16}}` or `"arx_stream"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKind {
	AesCbc { key_size: KeySize },
	AesEcb { key_size: KeySize },
	ArxStream,
	RepeatingXor { key_len: usize },
}

impl Default for CipherKind {
	fn default() -> Self {
		CipherKind::AesCbc { key_size: KeySize::Aes128 }
	}
}

impl CipherKind {
	pub fn build(self) -> Result<Box<dyn Cipher>, HarnessError> {
		Ok(match self {
			CipherKind::AesCbc { key_size } => Box::new(AesCbc { key_size }),
			CipherKind::AesEcb { key_size } => Box::new(AesEcb { key_size }),
			CipherKind::ArxStream => Box::new(ArxStream),
			CipherKind::RepeatingXor { key_len: 0 } => {
				return Err(HarnessError::Plan("repeating_xor needs a key_len of at least 1".into()));
			}
			CipherKind::RepeatingXor { key_len } => Box::new(RepeatingXor { key_len }),
		})
	}
}

/// Command-line spelling: `aes128-cbc`, `aes256-ecb`, `arx`, `xor:4`.
impl FromStr for CipherKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.to_ascii_lowercase();
		if let Some(n) = s.strip_prefix("xor:") {
			let key_len = n.parse::<usize>().map_err(|e| format!("bad xor key length `{}`: {}", n, e))?;
			return Ok(CipherKind::RepeatingXor { key_len });
		}
		if s == "arx" || s == "arx-stream" {
			return Ok(CipherKind::ArxStream);
		}
		let (bits, mode) = s
			.strip_prefix("aes")
			.and_then(|rest| rest.split_once('-'))
			.ok_or_else(|| format!("unknown cipher `{}`", s))?;
		let key_size = match bits {
			"128" => KeySize::Aes128,
			"192" => KeySize::Aes192,
			"256" => KeySize::Aes256,
			_ => return Err(format!("unsupported AES key size `{}`", bits)),
		};
		match mode {
			"cbc" => Ok(CipherKind::AesCbc { key_size }),
			"ecb" => Ok(CipherKind::AesEcb { key_size }),
			_ => Err(format!("unknown AES mode `{}`", mode)),
		}
	}
}

impl fmt::Display for CipherKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CipherKind::AesCbc { key_size } => write!(f, "aes{}-cbc", key_size.bytes() * 8),
			CipherKind::AesEcb { key_size } => write!(f, "aes{}-ecb", key_size.bytes() * 8),
			CipherKind::ArxStream => f.write_str("arx"),
			CipherKind::RepeatingXor { key_len } => write!(f, "xor:{}", key_len),
		}
	}
}
