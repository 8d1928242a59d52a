//! Seams the engine is built against instead of `std::fs`/`std::process`
//! directly (§9 design notes: "global mocking hooks... becomes traits
//! injected at construction"). Production code uses the `Real*` impls;
//! tests substitute fakes.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	process::{Command, ExitStatus, Output},
};

use color_eyre::Result;

/// Filesystem operations the engine needs. A trait (rather than calling
/// `std::fs` directly) so tests can run the state calculator and
/// resume logic against an in-memory tree.
pub trait FileSystem: Send + Sync {
	fn create_dir_all(&self, path: &Path) -> Result<()>;
	fn remove_dir_all(&self, path: &Path) -> Result<()>;
	fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
	fn read_to_string(&self, path: &Path) -> Result<String>;
	fn exists(&self, path: &Path) -> bool;
	fn copy(&self, from: &Path, to: &Path) -> Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
	fn create_dir_all(&self, path: &Path) -> Result<()> {
		std::fs::create_dir_all(path)?;
		Ok(())
	}

	fn remove_dir_all(&self, path: &Path) -> Result<()> {
		if path.exists() {
			std::fs::remove_dir_all(path)?;
		}
		Ok(())
	}

	fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, contents)?;
		Ok(())
	}

	fn read_to_string(&self, path: &Path) -> Result<String> {
		Ok(std::fs::read_to_string(path)?)
	}

	fn exists(&self, path: &Path) -> bool {
		path.exists()
	}

	fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
		Ok(std::fs::copy(from, to)?)
	}
}

/// The outcome of running an external command, already captured so
/// callers can report stdout+stderr on failure (§7 `ExternalCommandError`).
#[derive(Debug, Clone)]
pub struct RunOutput {
	pub status: ExitStatus,
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
}

impl RunOutput {
	#[must_use]
	pub fn success(&self) -> bool {
		self.status.success()
	}
}

impl From<Output> for RunOutput {
	fn from(o: Output) -> Self {
		Self { status: o.status, stdout: o.stdout, stderr: o.stderr }
	}
}

/// Process-launch seam. Real implementation shells out; fakes record
/// invocations for assertions in tests.
pub trait ProcessRunner: Send + Sync {
	fn run(&self, program: &str, args: &[String], env: &HashMap<String, String>) -> Result<RunOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealProcessRunner;

impl ProcessRunner for RealProcessRunner {
	fn run(&self, program: &str, args: &[String], env: &HashMap<String, String>) -> Result<RunOutput> {
		let mut cmd = Command::new(program);
		cmd.args(args);
		for (k, v) in env {
			cmd.env(k, v);
		}
		Ok(cmd.output()?.into())
	}
}

/// HTTP fetch seam, used only by the Launchpad PPA-fingerprint lookup
/// (§4.7 `add_extra_ppas`).
pub trait HttpFetch: Send + Sync {
	fn get_json(&self, url: &str) -> Result<serde_json::Value>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealHttpFetch;

impl HttpFetch for RealHttpFetch {
	fn get_json(&self, url: &str) -> Result<serde_json::Value> {
		let resp = reqwest::blocking::get(url)?;
		Ok(resp.json()?)
	}
}

/// Random-byte seam, used by `generate_unique_disk_id` (§4.8).
pub trait RandomSource: Send + Sync {
	fn fill(&self, buf: &mut [u8]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealRandomSource;

impl RandomSource for RealRandomSource {
	fn fill(&self, buf: &mut [u8]) {
		use rand::RngCore;
		rand::thread_rng().fill_bytes(buf);
	}
}

/// Time seam, reserved for future use (metadata timestamps are
/// currently opaque to the engine; kept as a seam per §9 so a future
/// timestamp field doesn't need a new injection point).
pub trait Clock: Send + Sync {
	fn now_unix(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
	fn now_unix(&self) -> i64 {
		std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
			.unwrap_or_default()
	}
}

/// Bundle of ports the engine is constructed with. Defaults to the
/// real implementations; tests override individual fields.
pub struct Ports {
	pub fs: Box<dyn FileSystem>,
	pub proc: Box<dyn ProcessRunner>,
	pub http: Box<dyn HttpFetch>,
	pub rng: Box<dyn RandomSource>,
	pub clock: Box<dyn Clock>,
}

impl Default for Ports {
	fn default() -> Self {
		Self {
			fs: Box::new(RealFileSystem),
			proc: Box::new(RealProcessRunner),
			http: Box::new(RealHttpFetch),
			rng: Box::new(RealRandomSource),
			clock: Box::new(RealClock),
		}
	}
}

pub fn pathbuf(s: impl Into<PathBuf>) -> PathBuf {
	s.into()
}
