//! Error taxonomy for the image-build core.
//!
//! Stage functions and public APIs return `color_eyre::Result<T>` so
//! callers get rich, annotated reports; the variants here exist for the
//! cases callers need to match on programmatically (exit-code mapping,
//! `--validation` handling, resume sanity checks).

use std::fmt;

use thiserror::Error;

/// A single validation rule violation, accumulated rather than raised
/// immediately so a run surfaces every problem with the image
/// definition at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
	pub rule: &'static str,
	pub message: String,
}

impl ValidationIssue {
	#[must_use]
	pub fn new(rule: &'static str, message: impl Into<String>) -> Self {
		Self { rule, message: message.into() }
	}
}

impl fmt::Display for ValidationIssue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}] {}", self.rule, self.message)
	}
}

/// Top level error taxonomy (§7). Kinds only — the rich context lives
/// in the `color_eyre::Report` that wraps these at call sites.
#[derive(Error, Debug)]
pub enum CoreError {
	/// CLI misuse: conflicting flags, unknown `--until`/`--thru` target.
	#[error("configuration error: {0}")]
	Config(String),

	/// Schema failure or any custom image-definition rule violation,
	/// always aggregated across all rules before surfacing.
	#[error("image definition failed validation with {} issue(s)", .0.len())]
	Validation(Vec<ValidationIssue>),

	/// Failure to acquire or release mounts/loop devices/files. Never
	/// short-circuits the teardown stack.
	#[error("resource error: {0}")]
	Resource(String),

	/// A child process exited nonzero.
	#[error("command `{command}` exited with {status}")]
	ExternalCommand { command: String, status: String, output: String },

	/// Disk arithmetic boundary, hash-sum mismatch, missing model
	/// assertion.
	#[error("data error: {0}")]
	Data(String),

	/// Programming bug in the caller (e.g. `ExtraPPA.keep_enabled` nil
	/// at clean time).
	#[error("invariant violated: {0}")]
	Invariant(String),

	/// Resume metadata missing, corrupt, or out of range.
	#[error("metadata error: {0}")]
	Metadata(String),

	/// `write_offset_values` target position plus the 4-byte LE32 value
	/// would land past the end of the sized disk image (§4.8).
	#[error("offset-write for `{structure}` at byte {position} is beyond the image's {image_size}-byte extent")]
	WriteOffsetBeyondEOF { structure: String, position: u64, image_size: u64 },

	/// `generate_unique_disk_id` exhausted its retry budget without
	/// drawing a nonzero value absent from the caller's `existing` list.
	#[error("exhausted retries generating a unique disk id")]
	Collision,
}

impl CoreError {
	#[must_use]
	pub fn validation(issues: Vec<ValidationIssue>) -> Self {
		Self::Validation(issues)
	}

	/// Exit code mapping (§6): everything is `1`, `0` is reserved for
	/// success and never constructed from an error.
	#[must_use]
	pub const fn exit_code(&self) -> i32 {
		1
	}
}

pub type Result<T> = color_eyre::Result<T>;
