use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use log::error;
use rand::RngCore;

use ctf_key_harness::bytes::Bytes;
use ctf_key_harness::report::{render_brute, render_candidates, render_scan};
use ctf_key_harness::{CancelToken, CipherKind, Harness, HarnessError, Plan, Result};

#[derive(Parser, Debug)]
#[command(name = "keyharness")]
#[command(version, about = "Derive candidate keys from known material and hunt for a flag", long_about = None)]
struct Cli {
	/// More log output (-v debug, -vv trace)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	verbose: u8,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Try every candidate the plan's rules derive
	Scan {
		#[arg(short, long)]
		plan: PathBuf,

		/// Partial results to print when nothing is found
		#[arg(long, default_value_t = 10)]
		show: usize,
	},

	/// Search the plan's brute_force key space on a worker pool
	Brute {
		#[arg(short, long)]
		plan: PathBuf,

		#[arg(long)]
		shards: Option<usize>,

		#[arg(long)]
		workers: Option<usize>,

		/// Give up after this many seconds
		#[arg(long)]
		timeout: Option<u64>,

		#[arg(long, default_value_t = 10)]
		show: usize,
	},

	/// List the candidates a plan generates without decrypting anything
	Candidates {
		#[arg(short, long)]
		plan: PathBuf,
	},

	/// Encrypt a plaintext, e.g. to build a test ciphertext
	Encrypt {
		/// aes128-cbc, aes256-ecb, arx, xor:N, ...
		#[arg(long)]
		cipher: CipherKind,

		/// Key as hex
		#[arg(long)]
		key: String,

		/// IV as hex
		#[arg(long, conflicts_with = "random_iv")]
		iv: Option<String>,

		/// Generate an IV and prefix it to the output
		#[arg(long)]
		random_iv: bool,

		#[arg(long, conflicts_with = "input", required_unless_present = "input")]
		text: Option<String>,

		/// Read the plaintext from a file
		#[arg(long)]
		input: Option<PathBuf>,
	},
}

const FOUND: u8 = 0;
const NOT_FOUND: u8 = 1;
const STARTUP_FAILURE: u8 = 2;

fn init_logging(verbose: u8) {
	let level = match verbose {
		0 => "info",
		1 => "debug",
		_ => "trace",
	};
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
		.format_timestamp(Some(env_logger::TimestampPrecision::Seconds))
		.init();
}

fn load(plan: &Path) -> Result<Harness> {
	Harness::prepare(Plan::load_from_file(plan)?)
}

fn parse_hex(what: &str, s: &str) -> Result<Vec<u8>> {
	Bytes::from_hex(s)
		.map(Bytes::into_vec)
		.map_err(|e| HarnessError::Argument(format!("{}: {}", what, e)))
}

fn encrypt(cipher: CipherKind, key: &str, iv: Option<&str>, random_iv: bool, plaintext: &[u8]) -> Result<String> {
	let cipher = cipher.build()?;
	let key = parse_hex("key", key)?;
	let iv = match (iv, random_iv, cipher.iv_len()) {
		(Some(iv), _, _) => Some(parse_hex("iv", iv)?),
		(None, true, Some(len)) => {
			let mut iv = vec![0u8; len];
			rand::thread_rng().fill_bytes(&mut iv);
			Some(iv)
		}
		(None, true, None) => return Err(HarnessError::Argument(format!("{} takes no iv", cipher.name()))),
		(None, false, _) => None,
	};
	let ciphertext = cipher.encrypt(&key, iv.as_deref(), plaintext)?;
	Ok(match iv {
		Some(iv) if random_iv => hex::encode([iv, ciphertext].concat()),
		_ => hex::encode(ciphertext),
	})
}

fn run(cli: Cli) -> Result<u8> {
	match cli.command {
		Command::Scan { plan, show } => {
			let harness = load(&plan)?;
			let reports = harness.scan(&CancelToken::new());
			print!("{}", render_scan(&reports, show));
			let found = reports.iter().any(|r| r.report.found.is_some());
			Ok(if found { FOUND } else { NOT_FOUND })
		}
		Command::Brute { plan, shards, workers, timeout, show } => {
			let harness = load(&plan)?;
			let mut brute = harness.brute_force()?;
			if let Some(workers) = workers {
				brute.workers = workers;
			}
			if let Some(shards) = shards {
				brute.shards = shards;
			}
			if let Some(secs) = timeout {
				brute.timeout = Some(Duration::from_secs(secs));
			}
			let reports = harness.brute(&brute, &CancelToken::new())?;
			print!("{}", render_brute(&reports, show));
			let found = reports.iter().any(|r| r.report.found.is_some());
			Ok(if found { FOUND } else { NOT_FOUND })
		}
		Command::Candidates { plan } => {
			let harness = load(&plan)?;
			print!("{}", render_candidates(harness.generator().candidates()));
			Ok(FOUND)
		}
		Command::Encrypt { cipher, key, iv, random_iv, text, input } => {
			let plaintext = match (text, input) {
				(Some(text), _) => text.into_bytes(),
				(None, Some(path)) => fs::read(path)?,
				(None, None) => return Err(HarnessError::Argument("nothing to encrypt".into())),
			};
			println!("{}", encrypt(cipher, &key, iv.as_deref(), random_iv, &plaintext)?);
			Ok(FOUND)
		}
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	match run(cli) {
		Ok(code) => ExitCode::from(code),
		Err(e) => {
			error!("{}", e);
			ExitCode::from(STARTUP_FAILURE)
		}
	}
}
