//! Human-readable rendering of scan results.

use std::fmt::Write;

use crate::bytes::escape_ascii;
use crate::derive::Candidate;
use crate::driver::{AttemptResult, ScanReport};
use crate::error::DerivationError;
use crate::plan::Framed;
use crate::shard::BruteReport;

fn iv_hex(candidate: &Candidate) -> String {
	candidate.iv.as_deref().map_or_else(|| "-".to_string(), hex::encode)
}

pub fn render_found(framing: &str, attempt: &AttemptResult) -> String {
	let mut out = String::new();
	let _ = writeln!(out, "FOUND");
	let _ = writeln!(out, "  framing:   {}", framing);
	let _ = writeln!(out, "  candidate: {}", attempt.candidate.label);
	let _ = writeln!(out, "  key:       {}", hex::encode(&attempt.candidate.key));
	let _ = writeln!(out, "  iv:        {}", iv_hex(&attempt.candidate));
	let _ = writeln!(out, "  plaintext: {}", escape_ascii(&attempt.plaintext));
	out
}

/// One line per attempt: score, label, key, iv, escaped plaintext or the cipher error.
pub fn render_attempt_line(attempt: &AttemptResult) -> String {
	let tail = match &attempt.error {
		Some(e) => format!("error: {}", e),
		None => format!("\"{}\"", escape_ascii(&attempt.plaintext)),
	};
	format!(
		"{:>8.4} {:?} {} key={} iv={} {}",
		attempt.score, attempt.verdict, attempt.candidate.label,
		hex::encode(&attempt.candidate.key), iv_hex(&attempt.candidate), tail
	)
}

fn render_partials(out: &mut String, partials: &[AttemptResult], limit: usize) {
	let mut partials: Vec<&AttemptResult> = partials.iter().filter(|a| a.error.is_none()).collect();
	partials.sort_by(|a, b| b.verdict.cmp(&a.verdict).then(b.score.total_cmp(&a.score)));
	if partials.is_empty() {
		return;
	}
	let _ = writeln!(out, "best partial results:");
	for attempt in partials.into_iter().take(limit) {
		let _ = writeln!(out, "  {}", render_attempt_line(attempt));
	}
}

pub fn render_scan(reports: &[Framed<ScanReport>], limit: usize) -> String {
	if let Some(found) = reports.iter().find_map(|r| r.report.found.as_ref().map(|a| (&r.framing, a))) {
		return render_found(found.0, found.1);
	}
	let mut out = String::new();
	let tried: usize = reports.iter().map(|r| r.report.tried).sum();
	let skipped: Vec<&DerivationError> = reports.iter().flat_map(|r| &r.report.skipped).collect();
	let cancelled = reports.iter().any(|r| r.report.cancelled);
	let _ = writeln!(
		out,
		"not found ({} attempt(s) over {} framing(s), {} skipped{})",
		tried, reports.len(), skipped.len(), if cancelled { ", cancelled" } else { "" }
	);
	for report in reports {
		let _ = writeln!(out, "framing `{}`:", report.framing);
		render_partials(&mut out, &report.report.attempts, limit);
	}
	out
}

pub fn render_brute(reports: &[Framed<BruteReport>], limit: usize) -> String {
	if let Some((framing, index, attempt)) = reports.iter()
		.find_map(|r| r.report.found.as_ref().map(|(i, a)| (&r.framing, *i, a))) {
		let mut out = render_found(framing, attempt);
		let _ = writeln!(out, "  index:     {:#x}", index);
		return out;
	}
	let mut out = String::new();
	let tried: u64 = reports.iter().map(|r| r.report.tried).sum();
	let status = if reports.iter().any(|r| r.report.timed_out) {
		", timed out"
	} else if reports.iter().any(|r| r.report.cancelled) {
		", cancelled"
	} else {
		""
	};
	let _ = writeln!(out, "not found ({} key(s) tried{})", tried, status);
	for report in reports {
		let _ = writeln!(out, "framing `{}`:", report.framing);
		render_partials(&mut out, &report.report.partials, limit);
	}
	out
}

/// Dry-run listing: each generated candidate or skipped rule, in generation order.
pub fn render_candidates<I>(candidates: I) -> String
where I: IntoIterator<Item = Result<Candidate, DerivationError>> {
	let mut out = String::new();
	for (i, item) in candidates.into_iter().enumerate() {
		let _ = match item {
			Ok(c) => writeln!(out, "{:>4} {} key={} iv={}", i, c.label, hex::encode(&c.key), iv_hex(&c)),
			Err(e) => writeln!(out, "{:>4} skipped {}", i, e),
		};
	}
	out
}
