//! Small helpers and macros shared across the crate, in the same spirit
//! as the teacher's `util.rs`: thin wrappers around `std::process` and
//! `std::fs` plus a couple of declarative macros that keep call sites
//! terse.

use std::{
	fs::OpenOptions,
	path::{Path, PathBuf},
	process::Command,
};

use color_eyre::{eyre::eyre, Help, Result, SectionExt};
use tracing::{debug, trace, warn};

/// Builds a `std::process::Command`, one expression per argument.
///
/// ```ignore
/// let mut c = cmd!("mkfs.ext4", "-L", label, device);
/// c.status()?;
/// ```
#[macro_export]
macro_rules! cmd {
	($prog:expr $(, $arg:expr)* $(,)?) => {{
		#[allow(unused_mut)]
		let mut c = ::std::process::Command::new($prog);
		$( c.arg($arg); )*
		c
	}};
}

/// `let $pat = $expr else { bail!($msg) };` with a friendlier call
/// shape, matching the teacher's `bail_let!` usage in `builder.rs`.
#[macro_export]
macro_rules! bail_let {
	($pat:pat = $expr:expr => $msg:expr) => {
		let $pat = $expr else {
			return Err(::color_eyre::eyre::eyre!($msg));
		};
	};
}

/// Reads an environment-variable override.
///
/// `env_flag!(SOME_CONST)` reads the env var named after the constant
/// and falls back to the constant's own value, matching the teacher's
/// `KATSU_DRACUT_MODS`/`KATSU_DRACUT_ARGS` usage. `env_flag!("NAME")`
/// reads the named var and returns `Option<String>`.
#[macro_export]
macro_rules! env_flag {
	($name:ident) => {
		::std::env::var(stringify!($name)).unwrap_or_else(|_| $name.to_owned())
	};
	($name:literal) => {
		::std::env::var($name).ok()
	};
}

/// Renders an embedded Tera template (by path relative to the calling
/// file, like `include_str!`) against a set of named fields, either
/// returning the rendered `String` or writing it straight to a
/// destination path.
#[macro_export]
macro_rules! tpl {
	($path:literal => { $($name:ident $(: $val:expr)?),+ $(,)? }) => {{
		let mut __ctx = ::tera::Context::new();
		$( $crate::tpl!(@field __ctx, $name $(: $val)?); )+
		::tera::Tera::one_off(include_str!($path), &__ctx, false)
	}};
	($path:literal => { $($name:ident $(: $val:expr)?),+ $(,)? } => $dest:expr) => {{
		let __rendered = $crate::tpl!($path => { $($name $(: $val)?),+ })?;
		$crate::util::just_write($dest, __rendered)
	}};
	(@field $ctx:ident, $name:ident) => {
		$ctx.insert(stringify!($name), &$name);
	};
	(@field $ctx:ident, $name:ident : $val:expr) => {
		$ctx.insert(stringify!($name), &$val);
	};
}

/// Declares a `# <generator>: <description>` header constant for a
/// generated config file, matching the teacher's `prepend_comment!`
/// usage ahead of `fstab`/`grub.cfg`/PPA source-file generation.
#[macro_export]
macro_rules! prepend_comment {
	($name:ident: $path:literal, $desc:literal, $generator:path) => {
		#[allow(non_upper_case_globals, dead_code)]
		static $name: &str =
			::const_format::concatcp!("# ", $path, " -- ", $desc, "\n# generated by ", stringify!($generator), "\n");
	};
}

/// Runs a command to completion, treating a nonzero exit as a fatal
/// report with stdout/stderr attached (§7 `ExternalCommand`).
pub fn run_checked(cmd: &mut Command) -> Result<()> {
	let program = format!("{cmd:?}");
	trace!(%program, "running command");
	let out = cmd.output()?;
	if out.status.success() {
		return Ok(());
	}
	let stdout = String::from_utf8_lossy(&out.stdout).trim().to_owned();
	let stderr = String::from_utf8_lossy(&out.stderr).trim().to_owned();
	Err(eyre!("command `{program}` exited with {}", out.status))
		.with_section(move || stdout.header("Stdout:"))
		.with_section(move || stderr.header("Stderr:"))
}

/// Runs a command and returns its trimmed stdout, treating a nonzero
/// exit the same way `run_checked` does.
pub fn run_stdout(cmd: &mut Command) -> Result<String> {
	let program = format!("{cmd:?}");
	let out = cmd.output()?;
	if !out.status.success() {
		let stderr = String::from_utf8_lossy(&out.stderr).trim().to_owned();
		return Err(eyre!("command `{program}` exited with {}", out.status)).with_section(move || stderr.header("Stderr:"));
	}
	Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
}

/// Emits a nonfatal, user-visible warning. Per the error-handling
/// design, warnings carry the literal `WARNING:` prefix on stdout and
/// never alter the return code; mirrored into the tracing log so
/// `--debug` runs still capture it in structured form.
pub fn warn_user(msg: impl std::fmt::Display) {
	println!("WARNING: {msg}");
	warn!("{msg}");
}

/// Creates (or truncates) a sparse file of `size` bytes at `path`,
/// used for the per-structure part images and the backing raw disk.
pub fn create_sparse(path: &Path, size: u64) -> Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let f = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
	f.set_len(size)?;
	debug!(?path, size, "created sparse file");
	Ok(())
}

/// Writes `contents` to `path`, creating parent directories first.
pub fn just_write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
	let path = path.as_ref();
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(path, contents)?;
	Ok(())
}

/// A loop device attached to a backing file. Detaching is best-effort
/// on drop; the resource ledger calls `detach` explicitly during its
/// LIFO drain so a real failure surfaces in the teardown report instead
/// of only a dropped-and-logged warning.
pub struct LoopHandle {
	pub device: PathBuf,
	detached: bool,
}

impl LoopHandle {
	pub fn detach(&mut self) -> Result<()> {
		if self.detached {
			return Ok(());
		}
		let ld = loopdev_fyra::LoopDevice::open(&self.device)?;
		ld.detach()?;
		self.detached = true;
		Ok(())
	}
}

impl Drop for LoopHandle {
	fn drop(&mut self) {
		if !self.detached {
			if let Err(e) = self.detach() {
				warn!(device = ?self.device, error = ?e, "failed to detach loop device on drop");
			}
		}
	}
}

/// Attaches `path` to the next free loop device, returning its `/dev`
/// path and a handle that detaches it on drop or explicit `.detach()`.
pub fn loopdev_with_file(path: &Path) -> Result<(PathBuf, LoopHandle)> {
	let lc = loopdev_fyra::LoopControl::open()?;
	let ld = lc.next_free()?;
	ld.attach_file(path)?;
	let device = ld.path().ok_or_else(|| eyre!("loop device has no path"))?;
	debug!(?path, ?device, "attached loop device");
	Ok((device.clone(), LoopHandle { device, detached: false }))
}

/// Attaches `path` to the next free loop device with an explicit
/// sector size, used when a structure's filesystem needs a non-512
/// logical sector size.
pub fn loopdev_with_sector_size(path: &Path, sector_size: u32) -> Result<(PathBuf, LoopHandle)> {
	let lc = loopdev_fyra::LoopControl::open()?;
	let ld = lc.next_free()?;
	ld.with().sector_size(sector_size).attach(path)?;
	let device = ld.path().ok_or_else(|| eyre!("loop device has no path"))?;
	debug!(?path, ?device, sector_size, "attached loop device");
	Ok((device.clone(), LoopHandle { device, detached: false }))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_sparse_sets_length() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("part0.img");
		create_sparse(&path, 4096 * 4).unwrap();
		let meta = std::fs::metadata(&path).unwrap();
		assert_eq!(meta.len(), 4096 * 4);
	}

	#[test]
	fn just_write_creates_parents() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested/dir/file.txt");
		just_write(&path, "hello").unwrap();
		assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
	}
}
