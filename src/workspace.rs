//! Workspace & Resource Manager (C6, §4.6): owns the persistent work
//! directory, backed-up host files, mount stacks, and loop devices, and
//! guarantees their release via a LIFO teardown stack.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use sys_mount::{Mount, MountFlags, Unmount, UnmountFlags};
use tracing::{debug, warn};

use crate::{
	error::CoreError,
	ports::Ports,
	util::{self, LoopHandle},
};

/// One compensating action pushed onto the teardown stack the moment
/// its corresponding setup action succeeds (§9 scoped-acquisition
/// pattern).
struct TeardownAction {
	description: String,
	run: Box<dyn FnOnce() -> Result<()> + Send>,
}

/// The resource ledger: a LIFO stack of compensating actions. There is
/// no separate FIFO "setup queue" data structure — setup actions run
/// synchronously in program order as each `acquire_*` call is made,
/// which already gives FIFO semantics without a second collection to
/// keep in sync (documented as a simplification in `DESIGN.md`).
#[derive(Default)]
pub struct ResourceLedger {
	stack: Vec<TeardownAction>,
}

impl ResourceLedger {
	fn push(&mut self, description: impl Into<String>, run: impl FnOnce() -> Result<()> + Send + 'static) {
		self.stack.push(TeardownAction { description: description.into(), run: Box::new(run) });
	}

	/// Drains the entire stack unconditionally, in LIFO order. Every
	/// entry runs even if an earlier one failed; failures are chained
	/// as `"<later> after previous error: <earlier>"` (§4.6, §7).
	pub fn drain(&mut self) -> Option<color_eyre::Report> {
		let mut chained: Option<color_eyre::Report> = None;
		while let Some(action) = self.stack.pop() {
			debug!(step = %action.description, "draining teardown stack");
			if let Err(e) = (action.run)() {
				chained = Some(match chained {
					None => e,
					Some(prev) => eyre!("{e} after previous error: {prev}"),
				});
			}
		}
		chained
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.stack.is_empty()
	}
}

/// A mount request (§4.6 `acquire_mount`). `bind=true` with `fstype`
/// set is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct MountSpec {
	pub source: Option<PathBuf>,
	pub fstype: Option<String>,
	pub options: Vec<String>,
	pub bind: bool,
}

/// The fixed sub-roots under `WORKDIR` (§3 "Workspace").
pub struct Workspace {
	pub workdir: PathBuf,
	pub clean_on_teardown: bool,
	pub ledger: ResourceLedger,
}

impl Workspace {
	#[must_use]
	pub fn root(&self) -> PathBuf {
		self.workdir.join("root")
	}

	#[must_use]
	pub fn unpack(&self) -> PathBuf {
		self.workdir.join("unpack")
	}

	#[must_use]
	pub fn gadget_tree(&self) -> PathBuf {
		self.unpack().join("gadget")
	}

	#[must_use]
	pub fn volumes(&self) -> PathBuf {
		self.workdir.join("volumes")
	}

	#[must_use]
	pub fn chroot(&self) -> PathBuf {
		self.workdir.join("chroot")
	}

	#[must_use]
	pub fn scratch(&self) -> PathBuf {
		self.workdir.join("scratch")
	}

	#[must_use]
	pub fn metadata_path(&self) -> PathBuf {
		self.workdir.join("ubuntu-image.json")
	}

	/// Creates `WORKDIR` (random name under `TMPDIR` if `root` is
	/// `None`) and the fixed sub-roots (§4.6).
	pub fn make_temporary_directories(root: Option<PathBuf>, ports: &Ports) -> Result<Self> {
		let clean_on_teardown = root.is_none();
		let workdir = match root {
			Some(r) => r,
			None => {
				let base = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_owned());
				let name = format!("ubuntu-image-{}", uuid::Uuid::new_v4());
				PathBuf::from(base).join(name)
			},
		};

		for sub in ["root", "unpack", "volumes", "chroot", "scratch"] {
			ports.fs.create_dir_all(&workdir.join(sub))?;
		}

		debug!(?workdir, clean_on_teardown, "workspace directories created");
		Ok(Self { workdir, clean_on_teardown, ledger: ResourceLedger::default() })
	}

	/// Reopens a workspace at an existing `workdir` for `--resume`,
	/// without recreating or touching its sub-roots.
	#[must_use]
	pub fn at_existing(workdir: PathBuf) -> Self {
		Self { workdir, clean_on_teardown: false, ledger: ResourceLedger::default() }
	}

	/// Mounts per `spec`, pushing the matching unmount onto the
	/// teardown stack before returning (§4.6, §9 scoped acquisition).
	pub fn acquire_mount(&mut self, spec: &MountSpec, target: &Path) -> Result<()> {
		if spec.bind && spec.fstype.is_some() {
			return Err(CoreError::Resource("mount spec cannot combine bind=true with an fstype".to_owned()).into());
		}

		std::fs::create_dir_all(target)?;

		let mut builder = Mount::builder();
		if let Some(fstype) = &spec.fstype {
			builder = builder.fstype(fstype.as_str());
		}
		if spec.bind {
			builder = builder.flags(MountFlags::BIND);
		}
		if !spec.options.is_empty() {
			builder = builder.data(&spec.options.join(","));
		}

		let source = spec.source.clone().unwrap_or_else(|| PathBuf::from("none"));
		builder.mount(&source, target).map_err(|e| CoreError::Resource(format!("mount {target:?} failed: {e}")))?;

		let target_owned = target.to_path_buf();
		self.ledger.push(format!("unmount {}", target_owned.display()), move || {
			if let Err(e) = sys_mount::unmount(&target_owned, UnmountFlags::empty()) {
				warn!(target = ?target_owned, error = ?e, "unmount failed, retrying detached");
				sys_mount::unmount(&target_owned, UnmountFlags::DETACH)
					.map_err(|e| CoreError::Resource(format!("unmount {target_owned:?} failed: {e}")))?;
			}
			Ok(())
		});

		Ok(())
	}

	/// Attaches `image_path` to a loop device with `sector_size`,
	/// pushing the detach onto the teardown stack. A detach failure is
	/// a logged warning, never a fatal error on its own (§5, §9 open
	/// question).
	pub fn acquire_loop(&mut self, image_path: &Path, sector_size: u32) -> Result<PathBuf> {
		let (device, mut handle) = util::loopdev_with_sector_size(image_path, sector_size)?;
		self.ledger.push(format!("detach loop device {}", device.display()), move || {
			if let Err(e) = handle.detach() {
				warn!(device = ?handle.device, error = ?e, "failed to detach loop device during teardown");
			}
			Ok(())
		});
		Ok(device)
	}

	/// Backs up `<chroot>/etc/resolv.conf` and copies the host's in its
	/// place, pushing the restoration onto the teardown stack so it
	/// runs regardless of what happens afterward (§4.6, §5).
	pub fn backup_and_copy_resolv_conf(&mut self, chroot: &Path) -> Result<()> {
		let resolv = chroot.join("etc/resolv.conf");
		let backup = chroot.join("etc/resolv.conf.ubuntu-image-bak");

		if resolv.exists() {
			std::fs::copy(&resolv, &backup)?;
		}
		if let Ok(host_resolv) = std::fs::read(Path::new("/etc/resolv.conf")) {
			std::fs::write(&resolv, host_resolv)?;
		}

		let chroot_owned = chroot.to_path_buf();
		self.ledger.push(format!("restore resolv.conf in {}", chroot_owned.display()), move || {
			restore_resolv_conf(&chroot_owned)
		});
		Ok(())
	}
}

/// Restores `<chroot>/etc/resolv.conf` from its backup, or removes it
/// if there was none (§4.6). Called both from the ledger's drain and
/// directly by callers that want it restored without waiting for
/// teardown.
pub fn restore_resolv_conf(chroot: &Path) -> Result<()> {
	let resolv = chroot.join("etc/resolv.conf");
	let backup = chroot.join("etc/resolv.conf.ubuntu-image-bak");
	if backup.exists() {
		std::fs::rename(&backup, &resolv)?;
	} else if resolv.exists() {
		std::fs::remove_file(&resolv)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ledger_drains_in_lifo_order_and_chains_errors() {
		let mut ledger = ResourceLedger::default();
		ledger.push("first", || Err(eyre!("first failed")));
		ledger.push("second", || Err(eyre!("second failed")));
		let err = ledger.drain().unwrap();
		let msg = format!("{err}");
		assert!(msg.contains("second failed"));
		assert!(msg.contains("after previous error"));
		assert!(msg.contains("first failed"));
		assert!(ledger.is_empty());
	}

	#[test]
	fn ledger_drains_every_entry_even_after_failure() {
		let mut ledger = ResourceLedger::default();
		let ran = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let r1 = ran.clone();
		ledger.push("a", move || {
			r1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			Err(eyre!("boom"))
		});
		let r2 = ran.clone();
		ledger.push("b", move || {
			r2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			Ok(())
		});
		ledger.drain();
		assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 2);
	}

	#[test]
	fn make_temporary_directories_creates_fixed_subroots() {
		let dir = tempfile::tempdir().unwrap();
		let ws = Workspace::make_temporary_directories(Some(dir.path().to_path_buf()), &Ports::default()).unwrap();
		assert!(ws.root().exists());
		assert!(ws.unpack().exists());
		assert!(ws.volumes().exists());
		assert!(ws.chroot().exists());
		assert!(ws.scratch().exists());
		assert!(!ws.clean_on_teardown);
	}
}
