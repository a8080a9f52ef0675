//! Index-space brute force split across a worker pool.
//!
//! The key space is cut into contiguous, disjoint ranges. Workers publish the
//! lowest FLAG index they hit in a shared atomic and abandon indices above it,
//! so the merged answer is the one a single sequential pass would find first.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::cipher::Cipher;
use crate::derive::Candidate;
use crate::driver::{retain_best, AttackDriver, AttemptResult, CancelToken, ScanMode};
use crate::error::{HarnessError, Result};
use crate::scorer::{Scorer, Verdict};

const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Keys `0..2^bits`, each encoded big-endian into the cipher's key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
	bits: u32,
	key_len: usize,
}

impl KeySpace {
	pub fn new(bits: u32, key_len: usize) -> Result<Self> {
		if bits == 0 || bits > 32 {
			return Err(HarnessError::Plan(format!("key space of {} bits is outside 1..=32", bits)));
		}
		if bits as usize > key_len * 8 {
			return Err(HarnessError::Plan(format!("{} bits do not fit a {}-byte key", bits, key_len)));
		}
		Ok(Self { bits, key_len })
	}

	pub fn bits(&self) -> u32 {
		self.bits
	}

	pub fn size(&self) -> u64 {
		1u64 << self.bits
	}

	pub fn key(&self, index: u64) -> Vec<u8> {
		let be = index.to_be_bytes();
		let mut key = vec![0u8; self.key_len];
		let n = self.key_len.min(be.len());
		key[self.key_len - n..].copy_from_slice(&be[be.len() - n..]);
		key
	}

	/// `count` near-equal contiguous ranges covering the space; the first ones take the remainder.
	pub fn shards(&self, count: usize) -> Vec<Range<u64>> {
		let size = self.size();
		let count = (count.max(1) as u64).min(size);
		let base = size / count;
		let extra = size % count;
		let mut start = 0;
		(0..count)
			.map(|i| {
				let len = base + u64::from(i < extra);
				let range = start..start + len;
				start += len;
				range
			})
			.collect()
	}
}

#[derive(Debug, Clone)]
pub struct BruteForce {
	pub space: KeySpace,
	pub iv: Option<Vec<u8>>,
	pub shards: usize,
	pub workers: usize,
	pub timeout: Option<Duration>,
	/// PARTIAL attempts kept per worker and overall.
	pub cap: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BruteReport {
	pub found: Option<(u64, AttemptResult)>,
	pub partials: Vec<AttemptResult>,
	pub tried: u64,
	pub cancelled: bool,
	pub timed_out: bool,
}

#[derive(Default)]
struct ShardResult {
	found: Option<(u64, AttemptResult)>,
	partials: Vec<AttemptResult>,
	tried: u64,
}

struct Shared<'s> {
	driver: AttackDriver<'s>,
	ciphertext: &'s [u8],
	best: AtomicU64,
	cancel: CancelToken,
	expired: AtomicBool,
	deadline: Option<Instant>,
}

impl BruteForce {
	pub fn new(space: KeySpace) -> Self {
		Self { space, iv: None, shards: 1, workers: 1, timeout: None, cap: 10 }
	}

	pub fn run(&self, cipher: &dyn Cipher, scorer: &Scorer, ciphertext: &[u8], cancel: &CancelToken) -> Result<BruteReport> {
		let pool = ThreadPoolBuilder::new().num_threads(self.workers.max(1)).build()?;
		let ranges = self.space.shards(self.shards);
		info!(
			"brute forcing {} keys ({} bits) with {} in {} shard(s) on {} worker(s)",
			self.space.size(), self.space.bits(), cipher.name(), ranges.len(), self.workers.max(1)
		);

		let shared = Shared {
			driver: AttackDriver::new(cipher, scorer).with_mode(ScanMode::Bounded { cap: self.cap }),
			ciphertext,
			best: AtomicU64::new(u64::MAX),
			cancel: cancel.clone(),
			expired: AtomicBool::new(false),
			deadline: self.timeout.map(|t| Instant::now() + t),
		};

		let results: Vec<ShardResult> = pool.install(|| {
			ranges.into_par_iter()
				.map(|range| self.scan_shard(range, &shared))
				.collect()
		});

		let mut report = BruteReport {
			cancelled: cancel.is_cancelled(),
			timed_out: shared.expired.load(Ordering::SeqCst),
			..BruteReport::default()
		};
		for result in results {
			report.tried += result.tried;
			for partial in result.partials {
				retain_best(&mut report.partials, partial, self.cap);
			}
			report.found = match (report.found.take(), result.found) {
				(Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
				(a, b) => a.or(b),
			};
		}

		match &report.found {
			Some((index, attempt)) => info!("flag at index {:#x} (`{}`) after {} attempt(s)", index, attempt.candidate.label, report.tried),
			None if report.timed_out => warn!("timed out after {} attempt(s)", report.tried),
			None if report.cancelled => warn!("cancelled after {} attempt(s)", report.tried),
			None => info!("no flag in {} attempt(s)", report.tried),
		}
		Ok(report)
	}

	fn scan_shard(&self, range: Range<u64>, shared: &Shared<'_>) -> ShardResult {
		let mut result = ShardResult::default();
		let start = range.start;
		for index in range.clone() {
			if index >= shared.best.load(Ordering::Acquire) {
				break;
			}
			if shared.cancel.is_cancelled() || shared.expired.load(Ordering::Relaxed) {
				break;
			}
			if (index - start) % CLOCK_CHECK_INTERVAL == 0 && shared.deadline.is_some_and(|d| Instant::now() >= d) {
				shared.expired.store(true, Ordering::SeqCst);
				break;
			}

			let candidate = Candidate {
				label: format!("index {:#x}", index),
				key: self.space.key(index),
				iv: self.iv.clone(),
			};
			let attempt = shared.driver.attempt(candidate, shared.ciphertext);
			result.tried += 1;

			if attempt.verdict == Verdict::Flag {
				shared.best.fetch_min(index, Ordering::AcqRel);
				result.found = Some((index, attempt));
				break;
			}
			shared.driver.mode().keep(&mut result.partials, attempt);
		}
		debug!("shard {:#x}..{:#x} done after {} attempt(s)", range.start, range.end, result.tried);
		result
	}
}
