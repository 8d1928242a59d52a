//! Rootfs-customization stages (§4.3): sources-list rewriting, the
//! manual-customization closed sum type, locale/cloud-init/fstab
//! content, and the `.disk/info` marker file.

use color_eyre::Result;
use serde::Serialize;
use tracing::info;

use crate::{error::CoreError, util::run_checked};

use super::StageContext;

/// `clean-rootfs`: removes apt/dpkg caches and machine-specific files
/// that must never ship in the produced image.
pub fn clean_rootfs(ctx: &mut StageContext<'_>) -> Result<()> {
	let root = ctx.workspace.root();
	for rel in ["var/cache/apt/archives", "var/lib/apt/lists", "etc/machine-id"] {
		let path = root.join(rel);
		if path.is_dir() {
			for entry in std::fs::read_dir(&path)? {
				let entry = entry?;
				if entry.file_type()?.is_dir() {
					std::fs::remove_dir_all(entry.path())?;
				} else {
					std::fs::remove_file(entry.path())?;
				}
			}
		} else if path.is_file() {
			std::fs::remove_file(&path)?;
		}
	}
	Ok(())
}

/// `customize-sources-list`: (re)writes `/etc/apt/sources.list` (or the
/// deb822 `/etc/apt/sources.list.d/ubuntu.sources`) for the image's
/// series, honoring `rootfs.sources-list-deb822`.
pub fn customize_sources_list(ctx: &mut StageContext<'_>) -> Result<()> {
	let root = ctx.workspace.root();
	let series = ctx.def.series.clone();
	let deb822 = ctx.def.rootfs.sources_list_deb822.unwrap_or(false);

	if deb822 {
		crate::prepend_comment!(PREPEND: "/etc/apt/sources.list.d/ubuntu.sources", "apt sources for the target series.", stages::customize_stages::customize_sources_list);
		crate::tpl!("../../templates/sources-deb822.sources.tera" => { PREPEND, series } => root.join("etc/apt/sources.list.d/ubuntu.sources"))?;
		let _ = std::fs::remove_file(root.join("etc/apt/sources.list"));
	} else {
		crate::prepend_comment!(PREPEND: "/etc/apt/sources.list", "apt sources for the target series.", stages::customize_stages::customize_sources_list);
		crate::tpl!("../../templates/sources-legacy.list.tera" => { PREPEND, series } => root.join("etc/apt/sources.list"))?;
	}

	Ok(())
}

/// `customize-cloud-init`: writes `customization.cloud-init` verbatim
/// as `/etc/cloud/cloud.cfg.d/90-image.cfg`.
pub fn customize_cloud_init(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	let Some(cloud_init) = &customization.cloud_init else { return Ok(()) };

	let rendered = serde_yaml::to_string(cloud_init)?;
	crate::util::just_write(ctx.workspace.root().join("etc/cloud/cloud.cfg.d/90-image.cfg"), rendered)
}

/// `customize-fstab`: appends `customization.fstab[]` entries to
/// `/etc/fstab`.
#[derive(Serialize)]
struct TplFstabEntry<'a> {
	spec: &'a str,
	mountpoint: &'a str,
	fstype: &'a str,
	options: &'a str,
	dump: u8,
	pass: u8,
}

pub fn customize_fstab(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	if customization.fstab.is_empty() {
		return Ok(());
	}

	crate::prepend_comment!(PREPEND: "/etc/fstab", "static file system information.", stages::customize_stages::customize_fstab);

	let entries: Vec<_> = customization
		.fstab
		.iter()
		.map(|e| TplFstabEntry {
			spec: &e.spec,
			mountpoint: &e.mountpoint,
			fstype: &e.fstype,
			options: if e.options.is_empty() { "defaults" } else { &e.options },
			dump: e.dump,
			pass: e.pass,
		})
		.collect();

	let rendered = crate::tpl!("../../templates/fstab.tera" => { PREPEND, entries })?;

	let fstab_path = ctx.workspace.root().join("etc/fstab");
	let existing = std::fs::read_to_string(&fstab_path).unwrap_or_default();
	crate::util::just_write(fstab_path, existing + &rendered)
}

/// `manual-customization`: executes every `customization.manual`
/// action, in field-declaration order (mkdirs, copy-file, execute,
/// touch-file, add-group, add-user), the closed sum type's program
/// order standing in for the source's dynamic-dispatch handler list.
pub fn manual_customization(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(customization) = &ctx.def.customization else { return Ok(()) };
	let Some(manual) = &customization.manual else { return Ok(()) };
	let root = ctx.workspace.root();

	for m in &manual.mkdirs {
		let target = join_absolute(&root, &m.path);
		std::fs::create_dir_all(&target)?;
		if let Some(mode) = m.mode {
			set_mode(&target, mode)?;
		}
	}

	for c in &manual.copy_file {
		let dest = join_absolute(&root, &c.dest);
		if let Some(parent) = dest.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::copy(&c.source, &dest)?;
	}

	for e in &manual.execute {
		let mut cmd = crate::cmd!("chroot", &root, &e.command);
		cmd.args(&e.args);
		run_checked(&mut cmd)?;
	}

	for t in &manual.touch_file {
		let target = join_absolute(&root, &t.path);
		if let Some(parent) = target.parent() {
			std::fs::create_dir_all(parent)?;
		}
		crate::util::just_write(target, "")?;
	}

	for g in &manual.add_group {
		let mut cmd = crate::cmd!("chroot", &root, "groupadd");
		if let Some(gid) = g.gid {
			cmd.args(["-g", &gid.to_string()]);
		}
		cmd.arg(&g.name);
		run_checked(&mut cmd)?;
	}

	for u in &manual.add_user {
		add_user(&root, u)?;
	}

	info!(
		mkdirs = manual.mkdirs.len(),
		copy_file = manual.copy_file.len(),
		execute = manual.execute.len(),
		touch_file = manual.touch_file.len(),
		add_group = manual.add_group.len(),
		add_user = manual.add_user.len(),
		"manual customization applied"
	);
	Ok(())
}

fn join_absolute(root: &std::path::Path, abs: &std::path::Path) -> std::path::PathBuf {
	root.join(abs.strip_prefix("/").unwrap_or(abs))
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> Result<()> {
	use std::os::unix::fs::PermissionsExt;
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
	Ok(())
}

fn add_user(root: &std::path::Path, user: &crate::definition::customization::AddUser) -> Result<()> {
	let mut cmd = crate::cmd!("chroot", root, "useradd");
	if user.create_home {
		cmd.arg("--create-home");
	}
	if let Some(shell) = &user.shell {
		cmd.args(["--shell", shell.as_str()]);
	}
	if let Some(uid) = user.uid {
		cmd.args(["--uid", &uid.to_string()]);
	}
	if let Some(gid) = user.gid {
		cmd.args(["--gid", &gid.to_string()]);
	}
	if !user.groups.is_empty() {
		cmd.args(["--groups", &user.groups.join(",")]);
	}
	cmd.arg(&user.username);
	run_checked(&mut cmd)?;

	if let Some(password) = &user.password {
		let chpasswd_input = format!("{}:{password}", user.username);
		let mut cmd = crate::cmd!("chroot", root, "chpasswd");
		cmd.stdin(std::process::Stdio::piped());
		let mut child = cmd.spawn()?;
		{
			use std::io::Write;
			child
				.stdin
				.as_mut()
				.ok_or_else(|| CoreError::Resource("chpasswd stdin pipe unavailable".to_owned()))?
				.write_all(chpasswd_input.as_bytes())?;
		}
		let status = child.wait()?;
		if !status.success() {
			return Err(CoreError::ExternalCommand {
				command: "chpasswd".to_owned(),
				status: status.to_string(),
				output: String::new(),
			}
			.into());
		}
	}

	if !user.ssh_keys.is_empty() {
		let ssh_dir = join_absolute(root, std::path::Path::new(&format!("/home/{}/.ssh", user.username)));
		std::fs::create_dir_all(&ssh_dir)?;
		crate::util::just_write(ssh_dir.join("authorized_keys"), user.ssh_keys.join("\n") + "\n")?;
	}

	Ok(())
}

/// `set-default-locale`: writes `/etc/default/locale`, matching the
/// teacher's single-purpose config-file stages.
pub fn set_default_locale(ctx: &mut StageContext<'_>) -> Result<()> {
	crate::util::just_write(ctx.workspace.root().join("etc/default/locale"), "LANG=C.UTF-8\n")
}

/// `populate-classic-rootfs-contents`: copies any `content/` tree the
/// gadget carries alongside `meta/gadget.yaml` into the rootfs,
/// without overwriting files the rootfs already owns.
pub fn populate_classic_rootfs_contents(ctx: &mut StageContext<'_>) -> Result<()> {
	let content_dir = ctx.workspace.gadget_tree().join("content");
	if !content_dir.is_dir() {
		return Ok(());
	}
	run_checked(&mut crate::cmd!(
		"cp",
		"-a",
		"--no-clobber",
		"--reflink=auto",
		format!("{}/.", content_dir.display()),
		ctx.workspace.root()
	))
}

/// `generate-disk-info`: writes `.disk/info` with the image name and
/// revision, gated on `--disk-info` (§4.4).
pub fn generate_disk_info(ctx: &mut StageContext<'_>) -> Result<()> {
	let body = format!("{} {} - Revision {}\n", ctx.def.name, ctx.def.series, ctx.def.revision);
	crate::util::just_write(ctx.workspace.root().join(".disk/info"), body)
}
