//! Chroot & Tool Orchestrator (C7, §4.7): builds and runs ordered
//! command sequences inside a prepared chroot via `tiffin::Container`,
//! the same enter/run/leave shape as the teacher's
//! `DnfRootBuilder::build`/`Auth::add_to_chroot`, but driving
//! `apt`/`debootstrap`/`grub-install` instead of `dnf`.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use tiffin::Container;
use tracing::info;

use crate::{
	definition::customization::ExtraPpa,
	error::CoreError,
	ports::Ports,
	util::{run_checked, run_stdout},
	workspace::{MountSpec, Workspace},
};

/// Enters `chroot` via `tiffin::Container`, runs `f` with the process
/// root changed, and leaves again before returning — the same
/// enter/run/leave shape as the teacher's `DnfRootBuilder::build`.
fn in_chroot<T>(chroot: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
	Container::new(chroot.to_path_buf()).run(f)?
}

/// `grub_target_for_arch(arch)` (§4.7): the `--target` value
/// `grub-install` needs for a given Debian/Ubuntu architecture name.
#[must_use]
pub fn grub_target_for_arch(arch: &str) -> &'static str {
	match arch {
		"amd64" => "x86_64-efi",
		"arm64" => "arm64-efi",
		"armhf" => "arm-efi",
		_ => "",
	}
}

/// `create_chroot` (§4.7): runs debootstrap, then normalizes
/// `/etc/hostname`, truncates `/etc/resolv.conf`, and appends extra
/// apt pockets.
pub fn create_chroot(chroot_dir: &Path, arch: &str, series: &str, extra_pockets: &[String]) -> Result<()> {
	std::fs::create_dir_all(chroot_dir)?;

	run_checked(&mut crate::cmd!(
		"debootstrap",
		"--arch",
		arch,
		"--variant=minbase",
		series,
		chroot_dir,
		"http://archive.ubuntu.com/ubuntu"
	))?;

	crate::util::just_write(chroot_dir.join("etc/hostname"), "ubuntu\n")?;
	crate::util::just_write(chroot_dir.join("etc/resolv.conf"), "")?;

	if !extra_pockets.is_empty() {
		let sources_list = chroot_dir.join("etc/apt/sources.list");
		let mut body = std::fs::read_to_string(&sources_list).unwrap_or_default();
		for pocket in extra_pockets {
			body.push_str(pocket);
			body.push('\n');
		}
		crate::util::just_write(&sources_list, body)?;
	}

	Ok(())
}

/// Bind-mounts `/dev`, `/proc`, `/sys` from the host and a fresh tmpfs
/// at `/run`, pushing the matching unmounts, and backs up/restores
/// `resolv.conf` around the whole block (§4.7 `install_packages`).
fn with_chroot_kernel_mounts<T>(workspace: &mut Workspace, chroot: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
	workspace.backup_and_copy_resolv_conf(chroot)?;

	workspace.acquire_mount(
		&MountSpec { bind: true, source: Some(PathBuf::from("/dev")), ..MountSpec::default() },
		&chroot.join("dev"),
	)?;
	workspace.acquire_mount(
		&MountSpec { bind: true, source: Some(PathBuf::from("/proc")), ..MountSpec::default() },
		&chroot.join("proc"),
	)?;
	workspace.acquire_mount(
		&MountSpec { bind: true, source: Some(PathBuf::from("/sys")), ..MountSpec::default() },
		&chroot.join("sys"),
	)?;
	workspace.acquire_mount(
		&MountSpec { fstype: Some("tmpfs".to_owned()), ..MountSpec::default() },
		&chroot.join("run"),
	)?;

	f()
}

/// `install_packages` (§4.7): mounts the kernel virtual filesystems,
/// runs `apt update` then `apt install`, and lets the caller's ledger
/// unwind the mounts on return.
pub fn install_packages(workspace: &mut Workspace, chroot: &Path, packages: &[String]) -> Result<()> {
	if packages.is_empty() {
		return Ok(());
	}

	with_chroot_kernel_mounts(workspace, chroot, || {
		in_chroot(chroot, || {
			run_checked(&mut crate::cmd!("apt-get", "update"))?;

			let mut install = crate::cmd!(
				"apt-get",
				"install",
				"--assume-yes",
				"--quiet",
				"--option=Dpkg::options::=--force-unsafe-io",
				"--option=Dpkg::Options::=--force-confold"
			);
			install.args(packages);
			run_checked(&mut install)
		})
	})
}

/// `add_extra_ppas` (§4.7): writes a source file per PPA (legacy
/// `.list` or deb822 `.sources`), fetches and imports its signing key,
/// and exports it to the trusted keyring.
pub fn add_extra_ppas(ppas: &[ExtraPpa], chroot: &Path, series: &str, deb822: bool, ports: &Ports) -> Result<()> {
	if ppas.is_empty() {
		return Ok(());
	}

	let sources_dir = chroot.join("etc/apt/sources.list.d");
	std::fs::create_dir_all(&sources_dir)?;
	std::fs::create_dir_all(chroot.join("etc/apt/trusted.gpg.d"))?;

	for ppa in ppas {
		let (owner, name) = ppa.name.split_once('/').ok_or_else(|| eyre!("PPA name `{}` must be `owner/name`", ppa.name))?;

		let fingerprint = match &ppa.fingerprint {
			Some(fp) => fp.clone(),
			None => fetch_launchpad_fingerprint(owner, name, ports)?,
		};

		write_ppa_source(&sources_dir, owner, name, ppa.auth.as_deref(), series, deb822)?;
		import_ppa_key(chroot, owner, name, &fingerprint)?;
	}

	Ok(())
}

fn write_ppa_source(sources_dir: &Path, owner: &str, name: &str, auth: Option<&str>, series: &str, deb822: bool) -> Result<()> {
	let host = match auth {
		Some(auth) => format!("{auth}@ppa.launchpadcontent.net"),
		None => "ppa.launchpadcontent.net".to_owned(),
	};

	if deb822 {
		let path = sources_dir.join(format!("{owner}-ubuntu-{name}-{series}.sources"));
		let body = format!(
			"X-Repolib-Name: {owner}/{name}\nEnabled: yes\nTypes: deb\nURIS: https://{host}/{owner}/{name}/ubuntu\nSuites: {series}\nComponents: main\n"
		);
		crate::util::just_write(path, body)
	} else {
		let path = sources_dir.join(format!("{owner}-ubuntu-{name}-{series}.list"));
		let body = format!("deb https://{host}/{owner}/{name}/ubuntu {series} main\n");
		crate::util::just_write(path, body)
	}
}

fn import_ppa_key(chroot: &Path, owner: &str, name: &str, fingerprint: &str) -> Result<()> {
	let exported = in_chroot(chroot, || {
		run_checked(&mut crate::cmd!("gpg", "--recv-keys", fingerprint))?;
		run_stdout(&mut crate::cmd!("gpg", "--export", fingerprint))
	})?;

	let key_path = chroot.join(format!("etc/apt/trusted.gpg.d/{owner}-ubuntu-{name}.gpg"));
	crate::util::just_write(key_path, exported)
}

/// Queries a Launchpad-style JSON endpoint for a PPA's signing-key
/// fingerprint when the image definition didn't pin one explicitly.
fn fetch_launchpad_fingerprint(owner: &str, name: &str, ports: &Ports) -> Result<String> {
	let url = format!("https://launchpad.net/api/1.0/~{owner}/+archive/ubuntu/{name}");
	let body = ports.http.get_json(&url)?;
	body["signing_key_fingerprint"]
		.as_str()
		.map(str::to_owned)
		.ok_or_else(|| eyre!("Launchpad response for {owner}/{name} had no signing_key_fingerprint"))
}

/// `clean_extra_ppas` (§4.7): removes the source file and key for
/// every PPA with `keep_enabled=false`. `keep_enabled` is required by
/// the type (unlike the source's nilable field), so the distinct
/// `ErrKeepEnabledNil` path never actually triggers here; see
/// `DESIGN.md`.
pub fn clean_extra_ppas(ppas: &[ExtraPpa], chroot: &Path, series: &str, deb822: bool) -> Result<()> {
	for ppa in ppas.iter().filter(|p| !p.keep_enabled) {
		let (owner, name) = ppa.name.split_once('/').ok_or_else(|| eyre!("PPA name `{}` must be `owner/name`", ppa.name))?;

		let source_path = if deb822 {
			chroot.join(format!("etc/apt/sources.list.d/{owner}-ubuntu-{name}-{series}.sources"))
		} else {
			chroot.join(format!("etc/apt/sources.list.d/{owner}-ubuntu-{name}-{series}.list"))
		};
		let key_path = chroot.join(format!("etc/apt/trusted.gpg.d/{owner}-ubuntu-{name}.gpg"));

		for path in [source_path, key_path] {
			if path.exists() {
				std::fs::remove_file(&path)?;
			}
		}
	}
	Ok(())
}

/// `setup_grub` (§4.7): associates a loop device with the target
/// image, mounts the rootfs (and optionally EFI) partitions, installs
/// GRUB for the given architecture, and regenerates its config with
/// host OS-prober suppressed.
pub fn setup_grub(
	workspace: &mut Workspace,
	image_path: &Path,
	rootfs_part_num: u32,
	efi_part_num: u32,
	arch: &str,
	sector_size: u32,
) -> Result<()> {
	let target = grub_target_for_arch(arch);
	if target.is_empty() {
		return Err(CoreError::Config(format!("no grub target for architecture `{arch}`")).into());
	}

	let loop_device = workspace.acquire_loop(image_path, sector_size)?;
	let rootfs_dev = partition_device_name(&loop_device, rootfs_part_num);
	let mount_point = workspace.scratch().join("loopback");

	workspace.acquire_mount(&MountSpec { source: Some(rootfs_dev.clone()), ..MountSpec::default() }, &mount_point)?;

	if efi_part_num > 0 {
		let efi_dev = partition_device_name(&loop_device, efi_part_num);
		workspace.acquire_mount(&MountSpec { source: Some(efi_dev), ..MountSpec::default() }, &mount_point.join("boot/efi"))?;
	}

	for (host, rel) in [("/dev", "dev"), ("/dev/pts", "dev/pts"), ("/proc", "proc"), ("/sys", "sys"), ("/run", "run")] {
		workspace.acquire_mount(
			&MountSpec { bind: true, source: Some(PathBuf::from(host)), ..MountSpec::default() },
			&mount_point.join(rel),
		)?;
	}

	workspace.backup_and_copy_resolv_conf(&mount_point)?;

	let loop_device_str = loop_device.to_string_lossy().into_owned();

	in_chroot(&mount_point, || {
		run_checked(&mut crate::cmd!("apt-get", "install", "--assume-yes", "udev"))?;

		run_checked(&mut crate::cmd!(
			"grub-install",
			&loop_device_str,
			"--boot-directory=/boot",
			"--efi-directory=/boot/efi",
			format!("--target={target}"),
			"--uefi-secure-boot",
			"--no-nvram"
		))?;

		if arch == "amd64" {
			run_checked(&mut crate::cmd!("grub-install", &loop_device_str, "--target=i386-pc"))?;
		}

		divert_os_prober(true)?;
		let update_result = run_checked(&mut crate::cmd!("update-grub"));
		divert_os_prober(false)?;
		update_result
	})?;

	info!(?image_path, target, "grub installed");
	Ok(())
}

fn divert_os_prober(enable: bool) -> Result<()> {
	let action = if enable { "--add" } else { "--remove" };
	run_checked(&mut crate::cmd!("dpkg-divert", "--local", "--rename", action, "/etc/grub.d/30_os-prober"))
}

pub(crate) fn partition_device_name(disk: &Path, partition: u32) -> PathBuf {
	let s = disk.to_string_lossy();
	let sep = if s.starts_with("/dev/mmcblk") || s.starts_with("/dev/nvme") || s.starts_with("/dev/loop") { "p" } else { "" };
	PathBuf::from(format!("{s}{sep}{partition}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn grub_target_matches_known_arches() {
		assert_eq!(grub_target_for_arch("amd64"), "x86_64-efi");
		assert_eq!(grub_target_for_arch("arm64"), "arm64-efi");
		assert_eq!(grub_target_for_arch("armhf"), "arm-efi");
		assert_eq!(grub_target_for_arch("riscv64"), "");
	}

	#[test]
	fn partition_device_name_uses_p_separator_for_loop_devices() {
		assert_eq!(partition_device_name(Path::new("/dev/loop0"), 1), PathBuf::from("/dev/loop0p1"));
		assert_eq!(partition_device_name(Path::new("/dev/sda"), 2), PathBuf::from("/dev/sda2"));
	}
}
