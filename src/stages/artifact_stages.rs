//! Final-artifact stages (§4.3): everything that reads a finished disk
//! image or rootfs tree and writes one more file to `--output-dir`.

use color_eyre::Result;
use tracing::info;

use crate::assembler;

use super::StageContext;

/// `make-qcow2-image`: converts the raw `.img` (produced by `make-disk`)
/// into a qcow2 artifact alongside it.
pub fn make_qcow2_image(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	let Some(_spec) = &artifacts.qcow2 else { return Ok(()) };

	let raw_path = ctx.output_dir.join(format!("{}.img", ctx.def.name));
	let qcow2_path = ctx.output_dir.join(format!("{}.qcow2", ctx.def.name));
	assembler::make_qcow2(&raw_path, &qcow2_path)?;

	if artifacts.img.is_none() {
		std::fs::remove_file(&raw_path)?;
	}
	Ok(())
}

/// `generate-package-manifest`: `<name>.manifest` listing every
/// installed package and its version.
pub fn generate_package_manifest(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	if artifacts.manifest.is_none() {
		return Ok(());
	}
	let dest = ctx.output_dir.join(format!("{}.manifest", ctx.def.name));
	assembler::generate_package_manifest(&ctx.workspace.root(), &dest)
}

/// `generate-filelist`: `<name>.filelist` listing every path in the
/// finished rootfs.
pub fn generate_filelist(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	if artifacts.filelist.is_none() {
		return Ok(());
	}
	let dest = ctx.output_dir.join(format!("{}.filelist", ctx.def.name));
	assembler::generate_file_list(&ctx.workspace.root(), &dest)
}

/// `generate-rootfs-tarball`: `<name>.rootfs.tar.gz` of the finished
/// rootfs tree, for callers that want the rootfs without a gadget.
pub fn generate_rootfs_tarball(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	if artifacts.rootfs_tar.is_none() {
		return Ok(());
	}
	let dest = ctx.output_dir.join(format!("{}.rootfs.tar.gz", ctx.def.name));
	assembler::generate_rootfs_tarball(&ctx.workspace.root(), &dest)
}

/// `finish`: the terminal stage the calculator never schedules
/// directly (§4.4) — the engine appends it after validating
/// `--until`/`--thru`. Logs the artifact set that was produced.
pub fn finish(ctx: &mut StageContext<'_>) -> Result<()> {
	match &ctx.def.artifacts {
		Some(artifacts) => info!(
			img = artifacts.img.is_some(),
			qcow2 = artifacts.qcow2.is_some(),
			manifest = artifacts.manifest.is_some(),
			filelist = artifacts.filelist.is_some(),
			rootfs_tar = artifacts.rootfs_tar.is_some(),
			"image build finished"
		),
		None => info!("image build finished with no artifacts requested"),
	}
	Ok(())
}
