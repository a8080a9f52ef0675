//! The attack loop: candidates in, first FLAG out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::bytes::escape_ascii;
use crate::cipher::Cipher;
use crate::derive::Candidate;
use crate::error::{CipherError, DerivationError};
use crate::scorer::{Scorer, Verdict};

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

/// What a run keeps besides the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
	/// Every attempt, in order.
	#[default]
	Exhaustive,
	/// Only the `cap` best-scoring PARTIAL attempts.
	Bounded { cap: usize },
}

impl ScanMode {
	pub fn keep(self, attempts: &mut Vec<AttemptResult>, attempt: AttemptResult) {
		match self {
			ScanMode::Exhaustive => attempts.push(attempt),
			ScanMode::Bounded { cap } if attempt.verdict == Verdict::Partial => retain_best(attempts, attempt, cap),
			ScanMode::Bounded { .. } => {}
		}
	}
}

/// Inserts `attempt` into a list sorted by descending score, keeping at most `cap`.
/// Equal scores keep arrival order.
pub fn retain_best(attempts: &mut Vec<AttemptResult>, attempt: AttemptResult, cap: usize) {
	let pos = attempts.partition_point(|a| a.score >= attempt.score);
	if pos < cap {
		attempts.insert(pos, attempt);
		attempts.truncate(cap);
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
	pub candidate: Candidate,
	pub plaintext: Vec<u8>,
	pub verdict: Verdict,
	pub score: f64,
	/// Set when the cipher refused the candidate; the verdict is then REJECT.
	pub error: Option<CipherError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
	pub found: Option<AttemptResult>,
	pub attempts: Vec<AttemptResult>,
	/// Number of decryptions performed.
	pub tried: usize,
	pub skipped: Vec<DerivationError>,
	pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome<'r> {
	Found(&'r AttemptResult),
	NotFound,
}

impl ScanReport {
	pub fn outcome(&self) -> Outcome<'_> {
		match &self.found {
			Some(attempt) => Outcome::Found(attempt),
			None => Outcome::NotFound,
		}
	}
}

pub struct AttackDriver<'a> {
	cipher: &'a dyn Cipher,
	scorer: &'a Scorer,
	mode: ScanMode,
	cancel: CancelToken,
}

impl<'a> AttackDriver<'a> {
	pub fn new(cipher: &'a dyn Cipher, scorer: &'a Scorer) -> Self {
		Self { cipher, scorer, mode: ScanMode::default(), cancel: CancelToken::new() }
	}

	pub fn with_mode(mut self, mode: ScanMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn mode(&self) -> ScanMode {
		self.mode
	}

	/// Decrypts and classifies one candidate. Never fails: cipher errors become REJECT.
	pub fn attempt(&self, candidate: Candidate, ciphertext: &[u8]) -> AttemptResult {
		match self.cipher.decrypt(&candidate.key, candidate.iv.as_deref(), ciphertext) {
			Ok(plaintext) => {
				let assessment = self.scorer.assess(&plaintext);
				AttemptResult {
					candidate,
					plaintext,
					verdict: assessment.verdict,
					score: assessment.score,
					error: None,
				}
			}
			Err(error) => AttemptResult {
				candidate,
				plaintext: Vec::new(),
				verdict: Verdict::Reject,
				score: 0.0,
				error: Some(error),
			},
		}
	}

	pub fn run<I>(&self, candidates: I, ciphertext: &[u8]) -> ScanReport
	where I: IntoIterator<Item = Result<Candidate, DerivationError>> {
		info!("scanning with {} over {} ciphertext bytes", self.cipher.name(), ciphertext.len());
		let mut report = ScanReport::default();

		for item in candidates {
			if self.cancel.is_cancelled() {
				warn!("scan cancelled after {} attempt(s)", report.tried);
				report.cancelled = true;
				break;
			}
			let candidate = match item {
				Ok(candidate) => candidate,
				Err(e) => {
					warn!("skipping {}", e);
					report.skipped.push(e);
					continue;
				}
			};

			let attempt = self.attempt(candidate, ciphertext);
			report.tried += 1;
			match &attempt.error {
				Some(e) => debug!("{}: cipher error: {}", attempt.candidate.label, e),
				None => debug!("{}: {:?} {}", attempt.candidate.label, attempt.verdict, escape_ascii(&attempt.plaintext)),
			}

			if attempt.verdict == Verdict::Flag {
				info!("flag found by `{}` after {} attempt(s)", attempt.candidate.label, report.tried);
				if self.mode == ScanMode::Exhaustive {
					report.attempts.push(attempt.clone());
				}
				report.found = Some(attempt);
				break;
			}
			self.mode.keep(&mut report.attempts, attempt);
		}

		if report.found.is_none() && !report.cancelled {
			info!("no flag after {} attempt(s), {} rule(s) skipped", report.tried, report.skipped.len());
		}
		report
	}
}
