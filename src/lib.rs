//! Key-candidate attack harness.
//!
//! Derives candidate keys and ivs from a few known buffers, decrypts a
//! ciphertext with each, and reports the first plaintext that reads as a flag.

pub mod bytes;
pub mod cipher;
pub mod derive;
pub mod driver;
pub mod error;
pub mod plan;
pub mod report;
pub mod scorer;
pub mod shard;
pub mod source;

pub use cipher::{Cipher, CipherKind};
pub use derive::{Candidate, Derivation, Generator, RuleSet};
pub use driver::{AttackDriver, AttemptResult, CancelToken, Outcome, ScanMode, ScanReport};
pub use error::{CipherError, DerivationError, HarnessError, Result, SourceError};
pub use plan::{Harness, Plan};
pub use scorer::{Scorer, ScorerConfig, Verdict};
pub use shard::{BruteForce, BruteReport, KeySpace};
pub use source::SourceMaterial;
