//! Plaintext classification.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verdict {
	Reject,
	Partial,
	Flag,
}

/// Which bytes the printable test looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
	#[default]
	Whole,
	/// Only the first `n` bytes, for callers that trust just the iv-independent part of the output.
	Prefix(usize),
}

impl Window {
	pub fn apply(self, bytes: &[u8]) -> &[u8] {
		match self {
			Window::Whole => bytes,
			Window::Prefix(n) => &bytes[..n.min(bytes.len())],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
	pub window: Window,
	pub delimiters: Vec<String>,
	pub case_insensitive: bool,
	/// Fraction of allowed bytes the window needs to avoid REJECT. 1.0 rejects on any stray byte.
	pub min_printable_ratio: f64,
	pub min_len: usize,
	/// Treat any `{...}` span as a flag even without a known prefix.
	pub accept_bare_braces: bool,
}

impl Default for ScorerConfig {
	fn default() -> Self {
		Self {
			window: Window::Whole,
			delimiters: vec!["flag{".into(), "ctf{".into(), "poctf{".into()],
			case_insensitive: true,
			min_printable_ratio: 1.0,
			min_len: 1,
			accept_bare_braces: false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
	pub verdict: Verdict,
	pub printable_ratio: f64,
	pub score: f64,
}

#[derive(Debug, Clone)]
pub struct Scorer {
	config: ScorerConfig,
	needles: Vec<Vec<u8>>,
}

pub fn is_allowed(b: u8) -> bool {
	matches!(b, 0x20..=0x7e | b'\t' | b'\n' | b'\r')
}

impl Scorer {
	pub fn new(config: ScorerConfig) -> Self {
		let needles = config.delimiters.iter()
			.filter(|d| !d.is_empty())
			.map(|d| if config.case_insensitive { d.to_ascii_lowercase().into_bytes() } else { d.clone().into_bytes() })
			.collect();
		Self { config, needles }
	}

	pub fn config(&self) -> &ScorerConfig {
		&self.config
	}

	pub fn classify(&self, plaintext: &[u8]) -> Verdict {
		self.assess(plaintext).verdict
	}

	pub fn assess(&self, plaintext: &[u8]) -> Assessment {
		let window = self.config.window.apply(plaintext);
		let printable_ratio = printable_ratio(window);

		let verdict = if plaintext.len() < self.config.min_len.max(1) || window.is_empty() {
			Verdict::Reject
		} else if printable_ratio < self.config.min_printable_ratio {
			Verdict::Reject
		} else if self.contains_flag(plaintext) {
			Verdict::Flag
		} else {
			Verdict::Partial
		};
		let score = match verdict {
			Verdict::Partial => score_text(&String::from_utf8_lossy(plaintext)),
			Verdict::Reject | Verdict::Flag => 0.0,
		};
		Assessment { verdict, printable_ratio, score }
	}

	fn contains_flag(&self, plaintext: &[u8]) -> bool {
		let haystack = if self.config.case_insensitive {
			plaintext.to_ascii_lowercase()
		} else {
			plaintext.to_vec()
		};
		let delimited = self.needles.iter().any(|needle| {
			find_all(&haystack, needle).any(|start| closed_span(&haystack[start + needle.len()..]))
		});
		delimited || (self.config.accept_bare_braces && find_all(&haystack, b"{").any(|start| closed_span(&haystack[start + 1..])))
	}
}

impl Default for Scorer {
	fn default() -> Self {
		Self::new(ScorerConfig::default())
	}
}

/// True when `rest` reaches a `}` through allowed bytes only.
fn closed_span(rest: &[u8]) -> bool {
	for &b in rest {
		if b == b'}' {
			return true;
		}
		if !is_allowed(b) {
			return false;
		}
	}
	false
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
	haystack.windows(needle.len().max(1))
		.enumerate()
		.filter(move |(_, w)| !needle.is_empty() && *w == needle)
		.map(|(i, _)| i)
}

pub fn printable_ratio(window: &[u8]) -> f64 {
	if window.is_empty() {
		return 0.0;
	}
	window.iter().filter(|b| is_allowed(**b)).count() as f64 / window.len() as f64
}

fn counts<T, I>(iterator: T) -> HashMap<I, usize>
where T: Iterator<Item=I>, I: Eq + Hash {
	let mut map = HashMap::new();
	for e in iterator {
		*map.entry(e).or_insert(0) += 1;
	}
	map
}

fn frequencies<T, I>(iterator: T) -> HashMap<I, f64>
where T: Iterator<Item=I>, I: Eq + Hash {
	let counts = counts(iterator);
	let total: usize = counts.values().sum();
	counts.into_iter()
		.map(|kv| (kv.0, kv.1 as f64 / total as f64))
		.collect()
}

/// English letter-frequency score; higher reads more like prose. Only used to rank PARTIALs.
pub fn score_text(text: &str) -> f64 {
	// From https://en.wikipedia.org/wiki/Letter_frequency
	const ENGLISH_FREQS: [(char, f64); 26] = [
		('a', 0.08200), ('b', 0.01500), ('c', 0.02800), ('d', 0.04300),
		('e', 0.12700), ('f', 0.02200), ('g', 0.02000), ('h', 0.06100),
		('i', 0.07000), ('j', 0.00150), ('k', 0.00770), ('l', 0.04000),
		('m', 0.02400), ('n', 0.06700), ('o', 0.07500), ('p', 0.01900),
		('q', 0.00095), ('r', 0.06000), ('s', 0.06300), ('t', 0.09100),
		('u', 0.02800), ('v', 0.00980), ('w', 0.02400), ('x', 0.00150),
		('y', 0.02000), ('z', 0.00074),
	];

	let text_lower = text.to_lowercase();
	let freqs = frequencies(text_lower.chars());

	let mut score = 0.0;
	for (c, f) in freqs {
		if c == ' ' { continue; }
		let fscore = ENGLISH_FREQS.iter()
			.find(|(letter, _)| *letter == c)
			.map(|(_, ef)| ef * f * (1.0 - (ef - f).abs().sqrt()))
			.unwrap_or(f * f * -1.0);
		score += fscore;
	}

	score
}
