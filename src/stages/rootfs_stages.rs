//! Rootfs-population stages (§4.3): the three mutually exclusive
//! rootfs families (seed/tarball/archive-tasks) converge here on a
//! populated `<workdir>/root` chroot.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::{chroot, error::CoreError, util::run_checked};

use super::StageContext;

/// `germinate`: resolves the definition's named seeds against the
/// germinate metadata for `rootfs.seed.archive`/`pocket`, recording the
/// resulting package list on the resumable metadata for `install-packages`
/// to consume later.
pub fn germinate(ctx: &mut StageContext<'_>) -> Result<()> {
	let seed = ctx.def.rootfs.seed.as_ref().ok_or_else(|| eyre!("germinate ran without rootfs.seed"))?;

	let mut cmd = crate::cmd!(
		"germinate",
		"--seed-source",
		seed.urls.join(","),
		"--seed-dist",
		&seed.branch,
		"--dist",
		&ctx.def.series,
		"--arch",
		&ctx.def.architecture
	);
	if seed.vcs == Some(true) {
		cmd.arg("--vcs");
	}
	run_checked(&mut cmd)?;

	let mut packages = Vec::new();
	for name in &seed.names {
		let listing = std::fs::read_to_string(format!("{name}.seed")).unwrap_or_default();
		for line in listing.lines() {
			if let Some(pkg) = line.split_whitespace().next() {
				if !pkg.is_empty() && !pkg.starts_with('#') {
					packages.push(pkg.to_owned());
				}
			}
		}
	}
	packages.sort();
	packages.dedup();
	ctx.metadata.packages = packages;
	ctx.metadata.is_seeded = true;

	Ok(())
}

/// `create-chroot`: runs `debootstrap` into `<workdir>/root`.
pub fn create_chroot(ctx: &mut StageContext<'_>) -> Result<()> {
	chroot::create_chroot(&ctx.workspace.root(), &ctx.def.architecture, &ctx.def.series, &[])
}

/// `add-extra-ppas`: imports every `customization.extra-ppas` entry
/// into the rootfs chroot.
pub fn add_extra_ppas(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	let deb822 = ctx.def.rootfs.sources_list_deb822.unwrap_or(false);
	chroot::add_extra_ppas(&customization.extra_ppas, &ctx.workspace.root(), &ctx.def.series, deb822, ctx.ports)
}

/// `install-packages`: installs the germinated seed packages (if any)
/// plus `customization.extra-packages`.
pub fn install_packages(ctx: &mut StageContext<'_>) -> Result<()> {
	let mut packages = ctx.metadata.packages.clone();
	if let Some(customization) = &ctx.def.customization {
		packages.extend(customization.extra_packages.iter().cloned());
	}
	packages.sort();
	packages.dedup();

	let root = ctx.workspace.root();
	chroot::install_packages(ctx.workspace, &root, &packages)
}

/// `clean-extra-ppas`: removes every PPA with `keep-enabled: false`
/// from the rootfs chroot.
pub fn clean_extra_ppas(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	let deb822 = ctx.def.rootfs.sources_list_deb822.unwrap_or(false);
	chroot::clean_extra_ppas(&customization.extra_ppas, &ctx.workspace.root(), &ctx.def.series, deb822)
}

/// `extract-rootfs-tar`: downloads (or reads a local `file://`) the
/// rootfs tarball, verifies its checksum when pinned, and unpacks it
/// into `<workdir>/root`.
pub fn extract_rootfs_tar(ctx: &mut StageContext<'_>) -> Result<()> {
	let tarball = ctx.def.rootfs.tarball.as_ref().ok_or_else(|| eyre!("extract-rootfs-tar ran without rootfs.tarball"))?;
	let root = ctx.workspace.root();
	let scratch_tar = ctx.workspace.scratch().join("rootfs.tar");

	if let Some(path) = tarball.url.strip_prefix("file://") {
		std::fs::copy(path, &scratch_tar)?;
	} else {
		run_checked(&mut crate::cmd!("curl", "--fail", "--location", "--output", &scratch_tar, &tarball.url))?;
	}

	if let Some(expected) = &tarball.sha256sum {
		let actual = run_checked_sha256(&scratch_tar)?;
		if &actual != expected {
			return Err(CoreError::Data(format!("rootfs tarball sha256 mismatch: expected {expected}, got {actual}")).into());
		}
	}

	std::fs::create_dir_all(&root)?;
	run_checked(&mut crate::cmd!("tar", "--numeric-owner", "-C", &root, "-xf", &scratch_tar))?;

	info!(root = %root.display(), "rootfs tarball extracted");
	Ok(())
}

fn run_checked_sha256(path: &std::path::Path) -> Result<String> {
	let out = crate::util::run_stdout(&mut crate::cmd!("sha256sum", path))?;
	Ok(out.split_whitespace().next().unwrap_or_default().to_owned())
}

/// `build-rootfs-from-tasks`: runs each `rootfs.archive-tasks[]` entry
/// as an external build-plugin invocation, `<task.name> <root> <args...>`,
/// resolved on `PATH`. The least-constrained rootfs family (§3) — every
/// invariant beyond "the tool exits zero" is the plugin's to enforce.
pub fn build_rootfs_from_tasks(ctx: &mut StageContext<'_>) -> Result<()> {
	let tasks = ctx.def.rootfs.archive_tasks.as_ref().ok_or_else(|| eyre!("build-rootfs-from-tasks ran without rootfs.archive-tasks"))?;
	let root = ctx.workspace.root();
	std::fs::create_dir_all(&root)?;

	for task in tasks {
		let mut cmd = crate::cmd!(&task.name, &root);
		cmd.args(&task.args);
		run_checked(&mut cmd)?;
	}

	Ok(())
}

/// `prepare-classic-image`: ensures the snapd seed directories a
/// classic (non-Core) rootfs needs for `preseed-classic-image` exist.
pub fn prepare_classic_image(ctx: &mut StageContext<'_>) -> Result<()> {
	let root = ctx.workspace.root();
	for sub in ["var/lib/snapd/seed/snaps", "var/lib/snapd/seed/assertions"] {
		std::fs::create_dir_all(root.join(sub))?;
	}
	Ok(())
}

/// `preseed-classic-image`: downloads each `customization.extra-snaps`
/// entry and registers it in the chroot's snapd seed via
/// `snap prepare-image`.
pub fn preseed_classic_image(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	if customization.extra_snaps.is_empty() {
		return Ok(());
	}

	let root = ctx.workspace.root();
	let mut cmd = crate::cmd!("snap", "prepare-image", "--classic", "--arch", &ctx.def.architecture);
	for snap in &customization.extra_snaps {
		cmd.args(["--snap", &format!("{}/{}", snap.name, snap.channel)]);
	}
	cmd.args([ctx.workspace.gadget_tree().to_string_lossy().into_owned(), root.to_string_lossy().into_owned()]);
	run_checked(&mut cmd)?;

	ctx.metadata.snaps = customization.extra_snaps.iter().map(|s| s.name.clone()).collect();
	Ok(())
}
