//! Candidate generation.
//!
//! A plan declares rules as [`Derivation`] trees over named Source Material.
//! [`Generator::candidates`] walks the rules in declaration order and lazily
//! yields one [`Candidate`] per rule and sweep value, or a [`DerivationError`]
//! labelled with the rule when the material cannot satisfy it. The sequence is
//! a pure function of the rules and the material, so the first match of a scan
//! is reproducible.

use std::iter;

use openssl::hash::MessageDigest;
use openssl::md::{Md, MdRef};
use openssl::pkey::Id;
use openssl::pkey_ctx::PkeyCtx;
use serde::Deserialize;

use crate::bytes::{xor_cyclic, Bytes};
use crate::cipher::Cipher;
use crate::error::{DerivationError, DerivationErrorKind as Kind};
use crate::source::SourceMaterial;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
	pub label: String,
	pub key: Vec<u8>,
	pub iv: Option<Vec<u8>>,
}

/// A numeric rule parameter: either fixed, or `"k"` / `"k+N"` bound to the rule's sweep value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ParamRepr")]
pub enum Param {
	Fixed(usize),
	Swept { offset: usize },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamRepr {
	Number(usize),
	Expr(String),
}

impl TryFrom<ParamRepr> for Param {
	type Error = String;

	fn try_from(repr: ParamRepr) -> Result<Self, Self::Error> {
		match repr {
			ParamRepr::Number(n) => Ok(Param::Fixed(n)),
			ParamRepr::Expr(s) => {
				let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
				match s.strip_prefix('k') {
					Some("") => Ok(Param::Swept { offset: 0 }),
					Some(rest) => rest
						.strip_prefix('+')
						.and_then(|n| n.parse().ok())
						.map(|offset| Param::Swept { offset })
						.ok_or_else(|| format!("cannot parse parameter `{}`", s)),
					None => Err(format!("parameter must be a number, `k` or `k+N`, not `{}`", s)),
				}
			}
		}
	}
}

impl From<usize> for Param {
	fn from(n: usize) -> Self {
		Param::Fixed(n)
	}
}

impl Param {
	fn zero() -> Self {
		Param::Fixed(0)
	}

	fn resolve(self, k: Option<usize>) -> Result<usize, Kind> {
		match (self, k) {
			(Param::Fixed(n), _) => Ok(n),
			(Param::Swept { offset }, Some(k)) => k
				.checked_add(offset)
				.ok_or_else(|| Kind::InvalidParameter(format!("k+{} overflows at k = {}", offset, k))),
			(Param::Swept { .. }, None) => Err(Kind::UnboundSweep),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlg {
	Md5,
	Sha1,
	#[default]
	Sha256,
	Sha384,
	Sha512,
}

impl HashAlg {
	fn message_digest(self) -> MessageDigest {
		match self {
			HashAlg::Md5 => MessageDigest::md5(),
			HashAlg::Sha1 => MessageDigest::sha1(),
			HashAlg::Sha256 => MessageDigest::sha256(),
			HashAlg::Sha384 => MessageDigest::sha384(),
			HashAlg::Sha512 => MessageDigest::sha512(),
		}
	}

	fn md(self) -> &'static MdRef {
		match self {
			HashAlg::Md5 => Md::md5(),
			HashAlg::Sha1 => Md::sha1(),
			HashAlg::Sha256 => Md::sha256(),
			HashAlg::Sha384 => Md::sha384(),
			HashAlg::Sha512 => Md::sha512(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOp {
	Add,
	Sub,
	Mul,
	Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
	#[default]
	Le,
	Be,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	#[default]
	Left,
	Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
	#[default]
	Zero,
	Cycle,
	Byte(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
	Source(String),
	/// Inline hex.
	Literal(String),
	Slice {
		of: Box<Derivation>,
		#[serde(default = "Param::zero")]
		start: Param,
		#[serde(default)]
		len: Option<usize>,
	},
	Xor {
		a: Box<Derivation>,
		b: Box<Derivation>,
	},
	Hash {
		#[serde(default)]
		alg: HashAlg,
		of: Vec<Derivation>,
	},
	Transpose {
		of: Box<Derivation>,
		rows: usize,
		cols: usize,
	},
	ArithWord {
		op: WordOp,
		a: Box<Derivation>,
		b: Box<Derivation>,
		#[serde(default)]
		order: ByteOrder,
	},
	Rotate {
		of: Box<Derivation>,
		shift: Param,
		#[serde(default)]
		direction: Direction,
		#[serde(default)]
		order: ByteOrder,
	},
	Concat(Vec<Derivation>),
	Reverse(Box<Derivation>),
	EndianSwap(Box<Derivation>),
	Columnar {
		of: Box<Derivation>,
		keyword: String,
		#[serde(default)]
		inverse: bool,
	},
	Pbkdf2 {
		#[serde(default)]
		alg: HashAlg,
		password: Box<Derivation>,
		salt: Box<Derivation>,
		iterations: Param,
		len: usize,
	},
	Hkdf {
		#[serde(default)]
		alg: HashAlg,
		ikm: Box<Derivation>,
		#[serde(default)]
		salt: Option<Box<Derivation>>,
		#[serde(default)]
		info: Option<Box<Derivation>>,
		len: usize,
	},
	Pad {
		of: Box<Derivation>,
		len: usize,
		#[serde(default)]
		fill: Fill,
	},
}

impl Derivation {
	pub fn source(name: &str) -> Self {
		Derivation::Source(name.to_string())
	}

	pub fn literal(bytes: &[u8]) -> Self {
		Derivation::Literal(hex::encode(bytes))
	}

	pub fn slice(self, start: usize, len: usize) -> Self {
		Derivation::Slice { of: Box::new(self), start: Param::Fixed(start), len: Some(len) }
	}

	/// Evaluates the tree. `k` is the current sweep value, if the rule has a sweep.
	pub fn eval(&self, material: &SourceMaterial, k: Option<usize>) -> Result<Vec<u8>, Kind> {
		match self {
			Derivation::Source(name) => material
				.get(name)
				.map(<[u8]>::to_vec)
				.ok_or_else(|| Kind::UnknownSource(name.clone())),
			Derivation::Literal(hex) => Ok(Bytes::from_hex(hex)?.into_vec()),
			Derivation::Slice { of, start, len } => {
				let data = of.eval(material, k)?;
				let start = start.resolve(k)?;
				let end = len.map_or(data.len(), |len| start.saturating_add(len));
				if start > data.len() || end > data.len() {
					return Err(Kind::OutOfRange { start, end, available: data.len() });
				}
				Ok(data[start..end].to_vec())
			}
			Derivation::Xor { a, b } => {
				let a = a.eval(material, k)?;
				let b = b.eval(material, k)?;
				if a.is_empty() || b.is_empty() {
					return Err(Kind::EmptyOperand("xor"));
				}
				Ok(xor_cyclic(a, b))
			}
			Derivation::Hash { alg, of } => {
				let data = concat(of, material, k)?;
				openssl::hash::hash(alg.message_digest(), &data)
					.map(|digest| digest.to_vec())
					.map_err(|e| Kind::Kdf(e.to_string()))
			}
			Derivation::Transpose { of, rows, cols } => transpose(&of.eval(material, k)?, *rows, *cols),
			Derivation::ArithWord { op, a, b, order } => {
				let a = words(&a.eval(material, k)?, *order, "arith_word lhs")?;
				let b = words(&b.eval(material, k)?, *order, "arith_word rhs")?;
				if a.is_empty() || b.is_empty() {
					return Err(Kind::EmptyOperand("arith_word"));
				}
				let out: Vec<u32> = a.iter()
					.zip(b.iter().cycle())
					.map(|(&x, &y)| match op {
						WordOp::Add => x.wrapping_add(y),
						WordOp::Sub => x.wrapping_sub(y),
						WordOp::Mul => x.wrapping_mul(y),
						WordOp::Xor => x ^ y,
					})
					.collect();
				Ok(unwords(&out, *order))
			}
			Derivation::Rotate { of, shift, direction, order } => {
				let shift = shift.resolve(k)?;
				if shift >= 32 {
					return Err(Kind::InvalidParameter(format!("rotation by {} bits", shift)));
				}
				let shift = shift as u32;
				let rotated: Vec<u32> = words(&of.eval(material, k)?, *order, "rotate input")?
					.into_iter()
					.map(|w| match direction {
						Direction::Left => w.rotate_left(shift),
						Direction::Right => w.rotate_right(shift),
					})
					.collect();
				Ok(unwords(&rotated, *order))
			}
			Derivation::Concat(parts) => concat(parts, material, k),
			Derivation::Reverse(of) => {
				let mut data = of.eval(material, k)?;
				data.reverse();
				Ok(data)
			}
			Derivation::EndianSwap(of) => {
				let data = of.eval(material, k)?;
				let be = unwords(&words(&data, ByteOrder::Le, "endian_swap input")?, ByteOrder::Be);
				Ok(be)
			}
			Derivation::Columnar { of, keyword, inverse } => {
				let data = of.eval(material, k)?;
				if *inverse {
					columnar_inverse(&data, keyword)
				} else {
					columnar(&data, keyword)
				}
			}
			Derivation::Pbkdf2 { alg, password, salt, iterations, len } => {
				let password = password.eval(material, k)?;
				let salt = salt.eval(material, k)?;
				let iterations = iterations.resolve(k)?;
				if iterations == 0 || *len == 0 {
					return Err(Kind::InvalidParameter("pbkdf2 needs iterations and len of at least 1".into()));
				}
				let mut out = vec![0u8; output_len(*len, "pbkdf2")?];
				openssl::pkcs5::pbkdf2_hmac(&password, &salt, iterations, alg.message_digest(), &mut out)
					.map_err(|e| Kind::Kdf(e.to_string()))?;
				Ok(out)
			}
			Derivation::Hkdf { alg, ikm, salt, info, len } => {
				let ikm = ikm.eval(material, k)?;
				let salt = salt.as_ref().map(|s| s.eval(material, k)).transpose()?;
				let info = info.as_ref().map(|i| i.eval(material, k)).transpose()?;
				hkdf(*alg, &ikm, salt.as_deref(), info.as_deref(), *len)
			}
			Derivation::Pad { of, len, fill } => {
				let data = of.eval(material, k)?;
				pad(data, output_len(*len, "pad")?, *fill)
			}
		}
	}
}

fn concat(parts: &[Derivation], material: &SourceMaterial, k: Option<usize>) -> Result<Vec<u8>, Kind> {
	let mut out = Vec::new();
	for part in parts {
		out.extend(part.eval(material, k)?);
	}
	Ok(out)
}

/// Reads the first `rows * cols` bytes as a row-major grid and emits it column by column.
fn transpose(data: &[u8], rows: usize, cols: usize) -> Result<Vec<u8>, Kind> {
	if rows == 0 || cols == 0 {
		return Err(Kind::InvalidParameter(format!("transpose dimensions {}x{}", rows, cols)));
	}
	let cells = rows.checked_mul(cols)
		.ok_or_else(|| Kind::InvalidParameter(format!("transpose dimensions {}x{}", rows, cols)))?;
	if cells > data.len() {
		return Err(Kind::OutOfRange { start: 0, end: cells, available: data.len() });
	}
	Ok((0..cols)
		.flat_map(|c| (0..rows).map(move |r| data[r * cols + c]))
		.collect())
}

fn words(data: &[u8], order: ByteOrder, what: &'static str) -> Result<Vec<u32>, Kind> {
	if data.len() % 4 != 0 {
		return Err(Kind::Misaligned { what, len: data.len(), multiple: 4 });
	}
	Ok(data.chunks_exact(4)
		.map(|c| {
			let w = [c[0], c[1], c[2], c[3]];
			match order {
				ByteOrder::Le => u32::from_le_bytes(w),
				ByteOrder::Be => u32::from_be_bytes(w),
			}
		})
		.collect())
}

fn unwords(words: &[u32], order: ByteOrder) -> Vec<u8> {
	words.iter()
		.flat_map(|w| match order {
			ByteOrder::Le => w.to_le_bytes(),
			ByteOrder::Be => w.to_be_bytes(),
		})
		.collect()
}

/// Column read order for a keyword: columns sorted by their letter, ties left to right.
fn column_order(keyword: &str) -> Result<Vec<usize>, Kind> {
	let keyword = keyword.to_ascii_uppercase().into_bytes();
	if keyword.is_empty() {
		return Err(Kind::InvalidParameter("columnar keyword is empty".into()));
	}
	let mut order: Vec<usize> = (0..keyword.len()).collect();
	order.sort_by_key(|&i| keyword[i]);
	Ok(order)
}

/// Writes `data` row by row under the keyword and reads columns in keyword order.
/// The last row is zero-padded, so the output length is a multiple of the keyword length.
fn columnar(data: &[u8], keyword: &str) -> Result<Vec<u8>, Kind> {
	let order = column_order(keyword)?;
	let width = order.len();
	let rows = data.len().div_ceil(width);
	let cell = |r: usize, c: usize| data.get(r * width + c).copied().unwrap_or(0);
	Ok(order.iter()
		.flat_map(|&c| (0..rows).map(move |r| cell(r, c)))
		.collect())
}

/// Fills columns in keyword order from `data` and reads the grid back row by row.
fn columnar_inverse(data: &[u8], keyword: &str) -> Result<Vec<u8>, Kind> {
	let order = column_order(keyword)?;
	let width = order.len();
	let rows = data.len().div_ceil(width);
	let mut grid = vec![0u8; rows * width];
	let mut input = data.iter();
	for &c in &order {
		for r in 0..rows {
			if let Some(&b) = input.next() {
				grid[r * width + c] = b;
			}
		}
	}
	grid.truncate(data.len());
	Ok(grid)
}

fn hkdf(alg: HashAlg, ikm: &[u8], salt: Option<&[u8]>, info: Option<&[u8]>, len: usize) -> Result<Vec<u8>, Kind> {
	if len == 0 {
		return Err(Kind::InvalidParameter("hkdf len must be at least 1".into()));
	}
	let kdf_err = |e: openssl::error::ErrorStack| Kind::Kdf(e.to_string());
	let mut ctx = PkeyCtx::new_id(Id::HKDF).map_err(kdf_err)?;
	ctx.derive_init().map_err(kdf_err)?;
	ctx.set_hkdf_md(alg.md()).map_err(kdf_err)?;
	ctx.set_hkdf_key(ikm).map_err(kdf_err)?;
	if let Some(salt) = salt {
		ctx.set_hkdf_salt(salt).map_err(kdf_err)?;
	}
	if let Some(info) = info {
		ctx.add_hkdf_info(info).map_err(kdf_err)?;
	}
	let mut out = vec![0u8; output_len(len, "hkdf")?];
	ctx.derive(Some(&mut out)).map_err(kdf_err)?;
	Ok(out)
}

/// Largest buffer a single derivation step may produce.
const MAX_OUTPUT: usize = 1 << 20;

fn output_len(len: usize, what: &str) -> Result<usize, Kind> {
	if len > MAX_OUTPUT {
		return Err(Kind::InvalidParameter(format!("{} len {} exceeds {}", what, len, MAX_OUTPUT)));
	}
	Ok(len)
}

fn pad(mut data: Vec<u8>, len: usize, fill: Fill) -> Result<Vec<u8>, Kind> {
	if data.len() >= len {
		data.truncate(len);
		return Ok(data);
	}
	match fill {
		Fill::Zero => data.resize(len, 0),
		Fill::Byte(b) => data.resize(len, b),
		Fill::Cycle => {
			if data.is_empty() {
				return Err(Kind::EmptyOperand("pad"));
			}
			data = data.iter().copied().cycle().take(len).collect();
		}
	}
	Ok(data)
}

/// How derived material is brought to the cipher's exact key / iv length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fit {
	/// Longer material is cut; shorter material is an error.
	#[default]
	Truncate,
	Exact,
	ZeroPad,
	Cycle,
}

impl Fit {
	fn apply(self, data: Vec<u8>, len: usize, what: &'static str) -> Result<Vec<u8>, Kind> {
		let wrong = |actual| Kind::WrongLength { what, expected: len, actual };
		match self {
			Fit::Exact if data.len() != len => Err(wrong(data.len())),
			Fit::Truncate if data.len() < len => Err(wrong(data.len())),
			Fit::ZeroPad => pad(data, len, Fill::Zero),
			Fit::Cycle => pad(data, len, Fill::Cycle),
			Fit::Exact | Fit::Truncate => pad(data, len, Fill::Zero),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Sweep {
	/// `from..to`, end exclusive.
	Range { from: usize, to: usize },
	Values { values: Vec<usize> },
}

impl Sweep {
	fn values(&self) -> Box<dyn Iterator<Item = usize> + '_> {
		match self {
			Sweep::Range { from, to } => Box::new(*from..*to),
			Sweep::Values { values } => Box::new(values.iter().copied()),
		}
	}
}

/// One entry of the plan's `rules` list. `{k}` in the label is replaced by the sweep value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandidateRule {
	pub label: String,
	pub key: Derivation,
	#[serde(default)]
	pub iv: Option<Derivation>,
	#[serde(default)]
	pub fit: Fit,
	#[serde(default)]
	pub sweep: Option<Sweep>,
}

impl CandidateRule {
	pub fn new(label: impl Into<String>, key: Derivation) -> Self {
		Self { label: label.into(), key, iv: None, fit: Fit::default(), sweep: None }
	}

	pub fn with_iv(mut self, iv: Derivation) -> Self {
		self.iv = Some(iv);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Labeled {
	pub label: String,
	pub derive: Derivation,
}

/// Every key paired with every iv, key-major.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductRule {
	pub keys: Vec<Labeled>,
	#[serde(default)]
	pub ivs: Vec<Labeled>,
	#[serde(default)]
	pub fit: Fit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleSet {
	#[serde(default)]
	pub rules: Vec<CandidateRule>,
	#[serde(default)]
	pub products: Vec<ProductRule>,
	/// Used by rules that need an iv and do not name one.
	#[serde(default)]
	pub default_iv: Option<Derivation>,
}

/// Key and iv lengths the cipher expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
	pub key_len: usize,
	pub iv_len: Option<usize>,
}

impl Shape {
	pub fn of(cipher: &dyn Cipher) -> Self {
		Self { key_len: cipher.key_len(), iv_len: cipher.iv_len() }
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Generator<'a> {
	material: &'a SourceMaterial,
	rules: &'a RuleSet,
	shape: Shape,
}

impl<'a> Generator<'a> {
	pub fn new(material: &'a SourceMaterial, rules: &'a RuleSet, shape: Shape) -> Self {
		Self { material, rules, shape }
	}

	/// A fresh, lazy candidate sequence. Calling this again restarts from the first rule.
	pub fn candidates(self) -> impl Iterator<Item = Result<Candidate, DerivationError>> + 'a {
		let singles = self.rules.rules.iter().flat_map(move |rule| {
			let sweep: Box<dyn Iterator<Item = Option<usize>> + 'a> = match &rule.sweep {
				Some(sweep) => Box::new(sweep.values().map(Some)),
				None => Box::new(iter::once(None)),
			};
			sweep.map(move |k| {
				let label = match k {
					Some(k) => rule.label.replace("{k}", &k.to_string()),
					None => rule.label.clone(),
				};
				self.build(label, &rule.key, rule.iv.as_ref(), rule.fit, k)
			})
		});

		let products = self.rules.products.iter().flat_map(move |product| {
			let ivs: Vec<Option<&'a Labeled>> = if self.shape.iv_len.is_some() && !product.ivs.is_empty() {
				product.ivs.iter().map(Some).collect()
			} else {
				vec![None]
			};
			product.keys.iter().flat_map(move |key| {
				ivs.clone().into_iter().map(move |iv| {
					let label = match iv {
						Some(iv) => format!("{} / {}", key.label, iv.label),
						None => key.label.clone(),
					};
					self.build(label, &key.derive, iv.map(|iv| &iv.derive), product.fit, None)
				})
			})
		});

		singles.chain(products)
	}

	fn build(&self, label: String, key: &Derivation, iv: Option<&Derivation>, fit: Fit, k: Option<usize>) -> Result<Candidate, DerivationError> {
		match self.derive_pair(key, iv, fit, k) {
			Ok((key, iv)) => Ok(Candidate { label, key, iv }),
			Err(kind) => Err(DerivationError::new(label, kind)),
		}
	}

	fn derive_pair(&self, key: &Derivation, iv: Option<&Derivation>, fit: Fit, k: Option<usize>) -> Result<(Vec<u8>, Option<Vec<u8>>), Kind> {
		let key = fit.apply(key.eval(self.material, k)?, self.shape.key_len, "key")?;
		let iv = match self.shape.iv_len {
			None => None,
			Some(len) => {
				let derivation = iv.or(self.rules.default_iv.as_ref()).ok_or(Kind::MissingIv)?;
				Some(fit.apply(derivation.eval(self.material, k)?, len, "iv")?)
			}
		};
		Ok((key, iv))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn material() -> SourceMaterial {
		SourceMaterial::new()
			.with("uid", Bytes::from_hex("5a928ebd3f5729b548b77e73").unwrap())
			.with("otp", (0u8..32).collect::<Vec<_>>())
			.with("text", Bytes::from_text("0123456789"))
	}

	fn eval(json: &str) -> Result<Vec<u8>, Kind> {
		let derivation: Derivation = serde_json::from_str(json).unwrap();
		derivation.eval(&material(), None)
	}

	const AES_SHAPE: Shape = Shape { key_len: 16, iv_len: Some(16) };

	#[test]
	fn slice_extracts_and_checks_bounds() {
		assert_eq!(eval(r#"{"slice": {"of": {"source": "otp"}, "start": 16}}"#).unwrap(), (16u8..32).collect::<Vec<_>>());
		assert_eq!(
			eval(r#"{"slice": {"of": {"source": "otp"}, "start": 20, "len": 16}}"#),
			Err(Kind::OutOfRange { start: 20, end: 36, available: 32 })
		);
		assert_eq!(eval(r#"{"source": "nope"}"#), Err(Kind::UnknownSource("nope".into())));
	}

	#[test]
	fn xor_wraps_the_shorter_operand() {
		let out = eval(r#"{"xor": {"a": {"slice": {"of": {"source": "otp"}, "len": 16}}, "b": {"source": "uid"}}}"#).unwrap();
		assert_eq!(out.len(), 16);
		assert_eq!(out[0], 0x5a);
		assert_eq!(out[12], 12 ^ 0x5a);
		assert_eq!(out[15], 15 ^ 0xbd);
	}

	#[test]
	fn hashes_match_known_digests() {
		let material = SourceMaterial::new().with("abc", Bytes::from_text("abc"));
		let sha = Derivation::Hash { alg: HashAlg::Sha256, of: vec![Derivation::source("abc")] };
		assert_eq!(hex::encode(sha.eval(&material, None).unwrap()), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
		let md5 = Derivation::Hash { alg: HashAlg::Md5, of: vec![Derivation::source("abc")] };
		assert_eq!(hex::encode(md5.eval(&material, None).unwrap()), "900150983cd24fb0d6963f7d28e17f72");
	}

	#[test]
	fn transpose_reads_column_major() {
		let out = eval(r#"{"transpose": {"of": {"source": "otp"}, "rows": 4, "cols": 8}}"#).unwrap();
		assert_eq!(&out[..8], &[0, 8, 16, 24, 1, 9, 17, 25]);
		assert_eq!(out.len(), 32);
		assert!(matches!(eval(r#"{"transpose": {"of": {"source": "uid"}, "rows": 4, "cols": 8}}"#), Err(Kind::OutOfRange { .. })));
	}

	#[test]
	fn arith_words_wrap_modulo_2_32() {
		let material = SourceMaterial::new()
			.with("a", vec![0xff, 0xff, 0xff, 0xff, 1, 0, 0, 0])
			.with("b", vec![2, 0, 0, 0]);
		let add = Derivation::ArithWord {
			op: WordOp::Add,
			a: Box::new(Derivation::source("a")),
			b: Box::new(Derivation::source("b")),
			order: ByteOrder::Le,
		};
		assert_eq!(add.eval(&material, None).unwrap(), vec![1, 0, 0, 0, 3, 0, 0, 0]);
		let sub_be = Derivation::ArithWord {
			op: WordOp::Sub,
			a: Box::new(Derivation::source("b")),
			b: Box::new(Derivation::literal(&[0, 0, 0, 3])),
			order: ByteOrder::Be,
		};
		assert_eq!(sub_be.eval(&material, None).unwrap(), 0x0200_0000u32.wrapping_sub(3).to_be_bytes());
		assert!(matches!(eval(r#"{"arith_word": {"op": "mul", "a": {"source": "text"}, "b": {"source": "uid"}}}"#), Err(Kind::Misaligned { .. })));
	}

	#[test]
	fn rotate_respects_byte_order() {
		let material = SourceMaterial::new().with("w", vec![1, 0, 0, 0]);
		let rotl = |order, direction| Derivation::Rotate {
			of: Box::new(Derivation::source("w")),
			shift: Param::Fixed(4),
			direction,
			order,
		};
		assert_eq!(rotl(ByteOrder::Le, Direction::Left).eval(&material, None).unwrap(), vec![0x10, 0, 0, 0]);
		assert_eq!(rotl(ByteOrder::Be, Direction::Left).eval(&material, None).unwrap(), vec![0x10, 0, 0, 0]);
		assert_eq!(rotl(ByteOrder::Le, Direction::Right).eval(&material, None).unwrap(), vec![0, 0, 0, 0x10]);
		assert!(matches!(eval(r#"{"rotate": {"of": {"source": "uid"}, "shift": 32}}"#), Err(Kind::InvalidParameter(_))));
	}

	#[test]
	fn reverse_and_endian_swap() {
		assert_eq!(eval(r#"{"reverse": {"literal": "010203"}}"#).unwrap(), vec![3, 2, 1]);
		assert_eq!(eval(r#"{"endian_swap": {"literal": "0102030405060708"}}"#).unwrap(), vec![4, 3, 2, 1, 8, 7, 6, 5]);
	}

	#[test]
	fn columnar_orders_by_keyword() {
		let out = eval(r#"{"columnar": {"of": {"source": "text"}, "keyword": "saint"}}"#).unwrap();
		assert_eq!(out, b"1627380549");
		let back = eval(r#"{"columnar": {"of": {"literal": "31363237333830353439"}, "keyword": "SAINT", "inverse": true}}"#).unwrap();
		assert_eq!(back, b"0123456789");
	}

	#[test]
	fn kdfs_match_reference_vectors() {
		let material = SourceMaterial::new()
			.with("password", Bytes::from_text("password"))
			.with("salt", Bytes::from_text("salt"))
			.with("ikm", vec![0x0b; 22])
			.with("hsalt", (0u8..=0x0c).collect::<Vec<_>>())
			.with("info", (0xf0u8..=0xf9).collect::<Vec<_>>());
		let pbkdf2 = Derivation::Pbkdf2 {
			alg: HashAlg::Sha256,
			password: Box::new(Derivation::source("password")),
			salt: Box::new(Derivation::source("salt")),
			iterations: Param::Fixed(1),
			len: 32,
		};
		assert_eq!(hex::encode(pbkdf2.eval(&material, None).unwrap()), "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b");
		let hkdf = Derivation::Hkdf {
			alg: HashAlg::Sha256,
			ikm: Box::new(Derivation::source("ikm")),
			salt: Some(Box::new(Derivation::source("hsalt"))),
			info: Some(Box::new(Derivation::source("info"))),
			len: 42,
		};
		assert_eq!(
			hex::encode(hkdf.eval(&material, None).unwrap()),
			"3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
		);
	}

	#[test]
	fn pad_extends_and_truncates() {
		assert_eq!(eval(r#"{"pad": {"of": {"literal": "0102"}, "len": 5, "fill": "cycle"}}"#).unwrap(), vec![1, 2, 1, 2, 1]);
		assert_eq!(eval(r#"{"pad": {"of": {"literal": "0102"}, "len": 4}}"#).unwrap(), vec![1, 2, 0, 0]);
		assert_eq!(eval(r#"{"pad": {"of": {"literal": "0102"}, "len": 3, "fill": {"byte": 255}}}"#).unwrap(), vec![1, 2, 255]);
		assert_eq!(eval(r#"{"pad": {"of": {"literal": "010203"}, "len": 1}}"#).unwrap(), vec![1]);
	}

	#[test]
	fn params_parse_sweep_expressions() {
		assert_eq!(serde_json::from_str::<Param>("7").unwrap(), Param::Fixed(7));
		assert_eq!(serde_json::from_str::<Param>(r#""k""#).unwrap(), Param::Swept { offset: 0 });
		assert_eq!(serde_json::from_str::<Param>(r#""k + 4""#).unwrap(), Param::Swept { offset: 4 });
		assert!(serde_json::from_str::<Param>(r#""j""#).is_err());
		assert_eq!(eval(r#"{"slice": {"of": {"source": "otp"}, "start": "k"}}"#), Err(Kind::UnboundSweep));
	}

	#[test]
	fn sweep_expands_in_order_with_labels() {
		let rules: RuleSet = serde_json::from_str(r#"{
			"default_iv": {"literal": "00000000000000000000000000000000"},
			"rules": [{
				"label": "OTP[{k}:{k}+16] ^ UID",
				"key": {"xor": {"a": {"slice": {"of": {"source": "otp"}, "start": "k", "len": 16}}, "b": {"source": "uid"}}},
				"sweep": {"from": 0, "to": 17}
			}]
		}"#).unwrap();
		let material = material();
		let out: Vec<_> = Generator::new(&material, &rules, AES_SHAPE).candidates().collect();
		assert_eq!(out.len(), 17);
		let first = out[0].as_ref().unwrap();
		assert_eq!(first.label, "OTP[0:0+16] ^ UID");
		assert_eq!(first.iv.as_deref(), Some(&[0u8; 16][..]));
		assert_eq!(out[16].as_ref().unwrap().key[0], 16 ^ 0x5a);
	}

	#[test]
	fn huge_sweep_streams() {
		let rules: RuleSet = serde_json::from_str(r#"{
			"default_iv": {"literal": "00000000000000000000000000000000"},
			"rules": [{
				"label": "OTP[{k}:]",
				"key": {"slice": {"of": {"source": "otp"}, "start": "k", "len": 16}},
				"sweep": {"from": 0, "to": 18446744073709551615}
			}]
		}"#).unwrap();
		let material = material();
		let mut candidates = Generator::new(&material, &rules, AES_SHAPE).candidates();
		assert_eq!(candidates.next().unwrap().unwrap().key, (0u8..16).collect::<Vec<_>>());
		assert_eq!(candidates.next().unwrap().unwrap().label, "OTP[1:]");
	}

	#[test]
	fn oversized_parameters_are_derivation_errors() {
		assert_eq!(
			eval(r#"{"slice": {"of": {"literal": "00"}, "start": 1, "len": 18446744073709551615}}"#),
			Err(Kind::OutOfRange { start: 1, end: usize::MAX, available: 1 })
		);
		assert!(matches!(
			eval(r#"{"transpose": {"of": {"source": "otp"}, "rows": 18446744073709551615, "cols": 2}}"#),
			Err(Kind::InvalidParameter(_))
		));
		assert!(matches!(
			eval(r#"{"pad": {"of": {"source": "otp"}, "len": 18446744073709551615}}"#),
			Err(Kind::InvalidParameter(_))
		));
	}

	#[test]
	fn sweep_offset_overflow_skips_the_candidate() {
		let rules: RuleSet = serde_json::from_str(r#"{
			"default_iv": {"literal": "00000000000000000000000000000000"},
			"rules": [
				{"label": "OTP[{k}+1:]", "key": {"slice": {"of": {"source": "otp"}, "start": "k+1", "len": 16}}, "sweep": {"values": [18446744073709551615, 0]}},
				{"label": "slice 1..max", "key": {"slice": {"of": {"literal": "00"}, "start": 1, "len": 18446744073709551615}}}
			]
		}"#).unwrap();
		let material = material();
		let out: Vec<_> = Generator::new(&material, &rules, AES_SHAPE).candidates().collect();
		assert_eq!(out.len(), 3);
		assert!(matches!(out[0].as_ref().unwrap_err().kind, Kind::InvalidParameter(_)));
		assert_eq!(out[1].as_ref().unwrap().key, (1u8..17).collect::<Vec<_>>());
		assert_eq!(out[2].as_ref().unwrap_err().rule, "slice 1..max");
	}

	#[test]
	fn failing_rule_is_skipped_not_fatal() {
		let rules = RuleSet {
			rules: vec![
				CandidateRule::new("too short", Derivation::source("uid")).with_iv(Derivation::source("otp")),
				CandidateRule::new("otp head", Derivation::source("otp")).with_iv(Derivation::source("otp")),
			],
			..RuleSet::default()
		};
		let material = material();
		let out: Vec<_> = Generator::new(&material, &rules, AES_SHAPE).candidates().collect();
		assert_eq!(out.len(), 2);
		let err = out[0].as_ref().unwrap_err();
		assert_eq!(err.rule, "too short");
		assert_eq!(err.kind, Kind::WrongLength { what: "key", expected: 16, actual: 12 });
		assert_eq!(out[1].as_ref().unwrap().key, (0u8..16).collect::<Vec<_>>());
	}

	#[test]
	fn fit_policies() {
		assert_eq!(Fit::ZeroPad.apply(vec![1, 2], 4, "key").unwrap(), vec![1, 2, 0, 0]);
		assert_eq!(Fit::Cycle.apply(vec![1, 2, 3], 4, "key").unwrap(), vec![1, 2, 3, 1]);
		assert_eq!(Fit::Truncate.apply(vec![9; 20], 16, "key").unwrap(), vec![9; 16]);
		assert!(Fit::Exact.apply(vec![9; 20], 16, "key").is_err());
		assert_eq!(Fit::Exact.apply(vec![9; 16], 16, "key").unwrap(), vec![9; 16]);
	}

	#[test]
	fn missing_iv_is_a_derivation_error() {
		let rules = RuleSet { rules: vec![CandidateRule::new("no iv", Derivation::source("otp"))], ..RuleSet::default() };
		let material = material();
		let out: Vec<_> = Generator::new(&material, &rules, AES_SHAPE).candidates().collect();
		assert_eq!(out[0].as_ref().unwrap_err().kind, Kind::MissingIv);

		let no_iv_cipher = Shape { key_len: 16, iv_len: None };
		let out: Vec<_> = Generator::new(&material, &rules, no_iv_cipher).candidates().collect();
		assert_eq!(out[0].as_ref().unwrap().iv, None);
	}

	#[test]
	fn products_are_key_major() {
		let rules: RuleSet = serde_json::from_str(r#"{
			"products": [{
				"keys": [
					{"label": "OTP[:16]", "derive": {"slice": {"of": {"source": "otp"}, "len": 16}}},
					{"label": "OTP[16:]", "derive": {"slice": {"of": {"source": "otp"}, "start": 16}}}
				],
				"ivs": [
					{"label": "zero", "derive": {"literal": "00000000000000000000000000000000"}},
					{"label": "uid+pad", "derive": {"pad": {"of": {"source": "uid"}, "len": 16}}}
				]
			}]
		}"#).unwrap();
		let material = material();
		let labels: Vec<String> = Generator::new(&material, &rules, AES_SHAPE)
			.candidates()
			.map(|c| c.unwrap().label)
			.collect();
		assert_eq!(labels, ["OTP[:16] / zero", "OTP[:16] / uid+pad", "OTP[16:] / zero", "OTP[16:] / uid+pad"]);
	}

	#[test]
	fn generation_is_repeatable() {
		let rules: RuleSet = serde_json::from_str(r#"{
			"default_iv": {"slice": {"of": {"source": "otp"}, "len": 16}},
			"rules": [
				{"label": "sha256(uid)", "key": {"hash": {"alg": "sha256", "of": [{"source": "uid"}]}}},
				{"label": "rotl {k}", "key": {"rotate": {"of": {"slice": {"of": {"source": "otp"}, "len": 16}}, "shift": "k"}}, "sweep": {"values": [1, 4, 8, 16]}}
			]
		}"#).unwrap();
		let material = material();
		let generator = Generator::new(&material, &rules, AES_SHAPE);
		let first: Vec<_> = generator.candidates().collect();
		let second: Vec<_> = generator.candidates().collect();
		assert_eq!(first.len(), 5);
		assert_eq!(first, second);
	}
}
