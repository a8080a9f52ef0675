//! Attack plans.
//!
//! A plan is a JSON document naming the Source Material, the cipher, the scorer
//! settings, the candidate rules and, optionally, an index-space brute force.
//! [`Harness::prepare`] performs every fallible startup step (loading sources,
//! building the cipher, cutting the ciphertext framings) so that a run either
//! starts with everything in place or does not start at all.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use log::info;
use serde::Deserialize;

use crate::cipher::{Cipher, CipherKind};
use crate::derive::{Derivation, Generator, Labeled, RuleSet, Shape};
use crate::driver::{AttackDriver, CancelToken, ScanMode, ScanReport};
use crate::error::{DerivationError, HarnessError, Result, SourceError};
use crate::scorer::{Scorer, ScorerConfig};
use crate::shard::{BruteForce, BruteReport, KeySpace};
use crate::source::{SourceMaterial, SourceSpec};

/// Source consulted when a plan lists no ciphertext framings.
pub const DEFAULT_CIPHERTEXT: &str = "ciphertext";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BruteForceConfig {
	pub key_bits: u32,
	#[serde(default)]
	pub iv: Option<Derivation>,
	#[serde(default)]
	pub shards: Option<usize>,
	#[serde(default)]
	pub workers: Option<usize>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
	#[serde(default = "BruteForceConfig::default_cap")]
	pub cap: usize,
}

impl BruteForceConfig {
	fn default_cap() -> usize {
		10
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Plan {
	#[serde(default)]
	pub sources: IndexMap<String, SourceSpec>,
	#[serde(default)]
	pub cipher: CipherKind,
	/// Labelled interpretations of which bytes are the ciphertext, tried in order.
	#[serde(default)]
	pub ciphertexts: Vec<Labeled>,
	#[serde(default)]
	pub scorer: ScorerConfig,
	#[serde(default)]
	pub scan: ScanMode,
	#[serde(flatten)]
	pub rules: RuleSet,
	#[serde(default)]
	pub brute_force: Option<BruteForceConfig>,
	#[serde(skip)]
	pub base_dir: PathBuf,
}

impl Plan {
	pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let text = fs::read_to_string(path).map_err(|source| HarnessError::PlanIo { path: path.to_path_buf(), source })?;
		let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
		Self::from_json(&text, base_dir)
	}

	pub fn from_json(text: &str, base_dir: PathBuf) -> Result<Self> {
		let mut plan: Plan = serde_json::from_str(text)?;
		plan.base_dir = base_dir;
		plan.validate()?;
		Ok(plan)
	}

	fn validate(&self) -> Result<()> {
		let scorer = &self.scorer;
		if !(0.0..=1.0).contains(&scorer.min_printable_ratio) {
			return Err(HarnessError::Plan(format!("min_printable_ratio {} is outside 0..=1", scorer.min_printable_ratio)));
		}
		if scorer.delimiters.iter().all(String::is_empty) && !scorer.accept_bare_braces {
			return Err(HarnessError::Plan("scorer has no flag delimiters".into()));
		}
		if self.scan == (ScanMode::Bounded { cap: 0 }) {
			return Err(HarnessError::Plan("bounded scan needs a cap of at least 1".into()));
		}
		if let Some(brute) = &self.brute_force {
			if brute.cap == 0 {
				return Err(HarnessError::Plan("brute_force cap must be at least 1".into()));
			}
		}
		Ok(())
	}
}

/// One ciphertext framing's result.
#[derive(Debug, Clone)]
pub struct Framed<R> {
	pub framing: String,
	pub report: R,
}

/// A plan with its Source Material loaded and its cipher, scorer and framings built.
pub struct Harness {
	plan: Plan,
	material: SourceMaterial,
	cipher: Box<dyn Cipher>,
	scorer: Scorer,
	framings: Vec<(String, Vec<u8>)>,
}

impl Harness {
	pub fn prepare(plan: Plan) -> Result<Self> {
		let material = SourceMaterial::load(&plan.sources, &plan.base_dir)?;
		let cipher = plan.cipher.build()?;
		let scorer = Scorer::new(plan.scorer.clone());
		let framings = frame(&plan.ciphertexts, &material)?;
		info!("plan ready: cipher {}, {} framing(s)", plan.cipher, framings.len());
		Ok(Self { plan, material, cipher, scorer, framings })
	}

	pub fn plan(&self) -> &Plan {
		&self.plan
	}

	pub fn material(&self) -> &SourceMaterial {
		&self.material
	}

	pub fn cipher(&self) -> &dyn Cipher {
		self.cipher.as_ref()
	}

	pub fn scorer(&self) -> &Scorer {
		&self.scorer
	}

	pub fn framings(&self) -> &[(String, Vec<u8>)] {
		&self.framings
	}

	pub fn generator(&self) -> Generator<'_> {
		Generator::new(&self.material, &self.plan.rules, Shape::of(self.cipher()))
	}

	/// Runs the rule-driven scan once per framing, stopping at the first framing that yields a FLAG.
	pub fn scan(&self, cancel: &CancelToken) -> Vec<Framed<ScanReport>> {
		let driver = AttackDriver::new(self.cipher(), &self.scorer)
			.with_mode(self.plan.scan)
			.with_cancel(cancel.clone());
		let mut reports = Vec::new();
		for (label, ciphertext) in &self.framings {
			info!("framing `{}` ({} bytes)", label, ciphertext.len());
			let report = driver.run(self.generator().candidates(), ciphertext);
			let stop = report.found.is_some() || report.cancelled;
			reports.push(Framed { framing: label.clone(), report });
			if stop {
				break;
			}
		}
		reports
	}

	/// Builds the brute force the plan describes. Callers may adjust the public fields before running it.
	pub fn brute_force(&self) -> Result<BruteForce> {
		let config = self.plan.brute_force.as_ref()
			.ok_or_else(|| HarnessError::Plan("plan has no brute_force section".into()))?;
		let space = KeySpace::new(config.key_bits, self.cipher.key_len())?;
		let iv = match self.cipher.iv_len() {
			None => None,
			Some(len) => {
				let derivation = config.iv.as_ref()
					.or(self.plan.rules.default_iv.as_ref())
					.ok_or_else(|| HarnessError::Plan(format!("{} needs an iv for brute force", self.cipher.name())))?;
				let iv = derivation.eval(&self.material, None)
					.map_err(|kind| HarnessError::Plan(DerivationError::new("brute_force iv", kind).to_string()))?;
				if iv.len() != len {
					return Err(HarnessError::Plan(format!("brute_force iv is {} bytes, cipher needs {}", iv.len(), len)));
				}
				Some(iv)
			}
		};
		let workers = config.workers.unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
		Ok(BruteForce {
			space,
			iv,
			shards: config.shards.unwrap_or(workers),
			workers,
			timeout: config.timeout_secs.map(Duration::from_secs),
			cap: config.cap,
		})
	}

	pub fn brute(&self, brute: &BruteForce, cancel: &CancelToken) -> Result<Vec<Framed<BruteReport>>> {
		let mut reports = Vec::new();
		for (label, ciphertext) in &self.framings {
			info!("framing `{}` ({} bytes)", label, ciphertext.len());
			let report = brute.run(self.cipher(), &self.scorer, ciphertext, cancel)?;
			let stop = report.found.is_some() || report.cancelled || report.timed_out;
			reports.push(Framed { framing: label.clone(), report });
			if stop {
				break;
			}
		}
		Ok(reports)
	}
}

fn frame(framings: &[Labeled], material: &SourceMaterial) -> std::result::Result<Vec<(String, Vec<u8>)>, SourceError> {
	if framings.is_empty() {
		let ciphertext = material.require(DEFAULT_CIPHERTEXT)?;
		return Ok(vec![(DEFAULT_CIPHERTEXT.to_string(), ciphertext.to_vec())]);
	}
	framings.iter()
		.map(|framing| {
			framing.derive.eval(material, None)
				.map(|bytes| (framing.label.clone(), bytes))
				.map_err(|kind| SourceError::Framing {
					label: framing.label.clone(),
					source: DerivationError::new(framing.label.clone(), kind),
				})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;
	use crate::cipher::{AesCbc, KeySize};
	use crate::driver::Outcome;

	fn zero_iv_aes_plan(ciphertext_hex: &str) -> String {
		format!(r#"{{
			"sources": {{
				"uid": {{"hex": "5a928ebd3f5729b548b77e73"}},
				"otp": {{"hex": "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"}},
				"blob": {{"hex": "{}"}}
			}},
			"cipher": {{"aes_cbc": {{"key_size": 16}}}},
			"ciphertexts": [
				{{"label": "iv || ct", "derive": {{"slice": {{"of": {{"source": "blob"}}, "start": 16}}}}}}
			],
			"default_iv": {{"slice": {{"of": {{"source": "blob"}}, "len": 16}}}},
			"scan": {{"bounded": {{"cap": 4}}}},
			"rules": [
				{{"label": "OTP[{{k}}:]", "key": {{"slice": {{"of": {{"source": "otp"}}, "start": "k"}}}}, "sweep": {{"from": 0, "to": 17}}}}
			]
		}}"#, ciphertext_hex)
	}

	#[test]
	fn scan_finds_flag_through_framing() {
		let cipher = AesCbc { key_size: KeySize::Aes128 };
		let key: Vec<u8> = (5u8..21).collect();
		let iv = [0x42u8; 16];
		let ct = cipher.encrypt(&key, Some(&iv), b"poctf{uwsp_s41nt_r0w}___________").unwrap();
		let blob = [iv.to_vec(), ct].concat();

		let plan = Plan::from_json(&zero_iv_aes_plan(&hex::encode(blob)), PathBuf::new()).unwrap();
		let harness = Harness::prepare(plan).unwrap();
		let reports = harness.scan(&CancelToken::new());

		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].framing, "iv || ct");
		match reports[0].report.outcome() {
			Outcome::Found(attempt) => {
				assert_eq!(attempt.candidate.label, "OTP[5:]");
				assert_eq!(attempt.plaintext, b"poctf{uwsp_s41nt_r0w}___________");
			}
			Outcome::NotFound => panic!("expected a flag"),
		}
		assert_eq!(reports[0].report.tried, 6);
	}

	#[test]
	fn default_framing_needs_a_ciphertext_source() {
		let plan = Plan::from_json(r#"{"sources": {"uid": {"hex": "00"}}}"#, PathBuf::new()).unwrap();
		assert!(matches!(Harness::prepare(plan), Err(HarnessError::Source(SourceError::Missing(_)))));
	}

	#[test]
	fn underivable_framing_is_fatal() {
		let plan = Plan::from_json(r#"{
			"sources": {"blob": {"hex": "0011"}},
			"ciphertexts": [{"label": "tail", "derive": {"slice": {"of": {"source": "blob"}, "start": 16}}}]
		}"#, PathBuf::new()).unwrap();
		match Harness::prepare(plan) {
			Err(HarnessError::Source(SourceError::Framing { label, .. })) => assert_eq!(label, "tail"),
			other => panic!("unexpected {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn rejects_nonsense_settings() {
		assert!(Plan::from_json(r#"{"scan": {"bounded": {"cap": 0}}}"#, PathBuf::new()).is_err());
		assert!(Plan::from_json(r#"{"scorer": {"min_printable_ratio": 1.5}}"#, PathBuf::new()).is_err());
		assert!(Plan::from_json(r#"{"scorer": {"delimiters": []}}"#, PathBuf::new()).is_err());
		assert!(matches!(Plan::from_json("{", PathBuf::new()), Err(HarnessError::Json(_))));
	}

	#[test]
	fn brute_force_section_builds_a_key_space() {
		let plan = Plan::from_json(r#"{
			"sources": {"ciphertext": {"hex": "00112233"}},
			"cipher": "arx_stream",
			"brute_force": {"key_bits": 24, "iv": {"literal": "deadbeef"}, "shards": 8, "workers": 2, "timeout_secs": 30}
		}"#, PathBuf::new()).unwrap();
		let harness = Harness::prepare(plan).unwrap();
		let brute = harness.brute_force().unwrap();
		assert_eq!(brute.space.size(), 1 << 24);
		assert_eq!(brute.iv, Some(vec![0xde, 0xad, 0xbe, 0xef]));
		assert_eq!((brute.shards, brute.workers, brute.cap), (8, 2, 10));
		assert_eq!(brute.timeout, Some(Duration::from_secs(30)));
	}

	#[test]
	fn brute_force_needs_an_iv_when_the_cipher_does() {
		let plan = Plan::from_json(r#"{
			"sources": {"ciphertext": {"hex": "00112233"}},
			"cipher": "arx_stream",
			"brute_force": {"key_bits": 24}
		}"#, PathBuf::new()).unwrap();
		assert!(Harness::prepare(plan).unwrap().brute_force().is_err());
	}

	#[test]
	fn load_from_file_resolves_relative_sources() {
		let tmp = TempDir::new().unwrap();
		let dir = tmp.path();
		fs::write(dir.join("ct.hex"), "68656c6c6f").unwrap();
		fs::write(dir.join("plan.json"), r#"{"sources": {"ciphertext": {"file": {"path": "ct.hex", "encoding": "hex"}}}}"#).unwrap();
		let harness = Harness::prepare(Plan::load_from_file(dir.join("plan.json")).unwrap()).unwrap();
		assert_eq!(harness.framings()[0].1, b"hello");
	}
}
