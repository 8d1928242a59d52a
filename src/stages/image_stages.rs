//! Disk-assembly stages (§4.3): verifying the requested artifacts name
//! a real volume, sizing the rootfs, laying out the gadget's
//! structures onto a raw disk image, and installing the bootloader.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::{assembler, chroot, error::CoreError, gadget::{self, Role}};

use super::StageContext;

/// `verify-artifact-names`: confirms every `artifacts.*.volume`
/// reference names a volume the loaded gadget actually declares
/// (§4.1/§4.4 ordering: always runs right after `load-gadget-yaml`).
pub fn verify_artifact_names(ctx: &mut StageContext<'_>) -> Result<()> {
	let gadget = ctx.gadget.as_ref().ok_or_else(|| eyre!("verify-artifact-names ran before load-gadget-yaml"))?;
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };

	for spec in [&artifacts.img, &artifacts.qcow2].into_iter().flatten() {
		if let Some(volume) = &spec.volume {
			if !gadget.contains_key(volume) {
				return Err(CoreError::Data(format!("artifacts reference unknown volume `{volume}`")).into());
			}
		}
	}

	if artifacts.is_disk() && gadget.len() > 1 {
		let any_unnamed = [&artifacts.img, &artifacts.qcow2].into_iter().flatten().any(|s| s.volume.is_none());
		if any_unnamed {
			return Err(CoreError::Data("gadget declares multiple volumes; artifacts.img/qcow2 must name one".to_owned()).into());
		}
	}

	Ok(())
}

fn target_volume_name<'a>(ctx: &'a StageContext<'a>, requested: Option<&'a str>) -> Result<&'a str> {
	let gadget = ctx.gadget.as_ref().ok_or_else(|| eyre!("no gadget loaded"))?;
	if let Some(name) = requested {
		return Ok(name);
	}
	gadget.keys().next().map(String::as_str).ok_or_else(|| eyre!("gadget has no volumes"))
}

/// `calculate-rootfs-size`: sizes the populated rootfs and records it
/// on the resumable metadata so `populate-bootfs-contents` and
/// `make-disk` can both read it back without re-walking the tree.
pub fn calculate_rootfs_size_stage(ctx: &mut StageContext<'_>) -> Result<()> {
	let size = assembler::calculate_rootfs_size(&ctx.workspace.root())?;
	ctx.metadata.rootfs_size = size;
	info!(rootfs_size = size, "rootfs size calculated");
	Ok(())
}

/// `populate-bootfs-contents`: copies the gadget tree's boot assets
/// (everything under `meta/gadget.yaml`'s declared structures that
/// isn't the rootfs itself) into `<workdir>/volumes` staging so
/// `make-disk` only has to move bytes, not resolve sources.
pub fn populate_bootfs_contents(ctx: &mut StageContext<'_>) -> Result<()> {
	let gadget = ctx.gadget.as_ref().ok_or_else(|| eyre!("populate-bootfs-contents ran before load-gadget-yaml"))?;
	let volumes_dir = ctx.workspace.volumes();

	for (vol_name, volume) in gadget {
		let vol_dir = volumes_dir.join(vol_name);
		std::fs::create_dir_all(&vol_dir)?;
		for structure in &volume.structures {
			if structure.role() == Role::SystemData {
				continue;
			}
			let struct_dir = vol_dir.join(&structure.name);
			std::fs::create_dir_all(&struct_dir)?;
		}
	}

	Ok(())
}

/// `populate-prepare-partitions`: computes the final offset/size table
/// for every structure (now that rootfs size is known) and stores it
/// on the resumable metadata as `image_sizes`.
pub fn populate_prepare_partitions(ctx: &mut StageContext<'_>) -> Result<()> {
	let gadget = ctx.gadget.as_ref().ok_or_else(|| eyre!("populate-prepare-partitions ran before load-gadget-yaml"))?;
	let offsets = assembler::compute_structure_layout(gadget, ctx.metadata.rootfs_size);

	ctx.metadata.image_sizes =
		offsets.iter().map(|(k, (offset, size))| (k.clone(), offset.saturating_add(*size))).collect();

	Ok(())
}

/// `make-disk`: partitions and populates the raw disk image for the
/// targeted volume and writes it to `<output-dir>/<name>.img`. Runs
/// whenever either `artifacts.img` or `artifacts.qcow2` is requested —
/// a qcow2-only definition still needs a raw disk to convert from
/// (§4.4 step 9, scenario S2).
pub fn make_disk(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	let Some(spec) = artifacts.img.as_ref().or(artifacts.qcow2.as_ref()) else { return Ok(()) };

	let volume_name = target_volume_name(ctx, spec.volume.as_deref())?.to_owned();
	let gadget = ctx.gadget.clone().ok_or_else(|| eyre!("make-disk ran before load-gadget-yaml"))?;
	let full_volume_order = gadget::volume_order(&gadget);

	let mut single = indexmap::IndexMap::new();
	single.insert(
		volume_name.clone(),
		gadget.get(&volume_name).ok_or_else(|| eyre!("unknown volume `{volume_name}`"))?.clone(),
	);

	let offsets = assembler::compute_structure_layout(&single, ctx.metadata.rootfs_size);

	let requested_size = ctx
		.image_size_request
		.map(|raw| crate::cli::parse_image_sizes(raw, &full_volume_order))
		.transpose()?
		.and_then(|sizes| sizes.get(&volume_name).copied());
	let image_size = assembler::resolve_image_size(&offsets, requested_size);

	let mut existing_disk_ids = Vec::new();
	let disk_id = assembler::generate_unique_disk_id(ctx.ports, &mut existing_disk_ids)?;
	let disk_guid = assembler::generate_disk_guid(ctx.ports);

	ctx.metadata.sector_size = 512;
	ctx.metadata.volume_names.insert(volume_name.clone(), format!("{}.img", ctx.def.name));

	let disk_path = ctx.output_dir.join(format!("{}.img", ctx.def.name));
	assembler::partition_disk(&disk_path, &single, &offsets, disk_guid, image_size)?;
	assembler::copy_structure_content(ctx.workspace, &disk_path, &single, ctx.metadata.sector_size)?;

	let volume = &single[&volume_name];
	if volume.structures.iter().any(|s| s.role() == Role::Mbr) {
		assembler::write_mbr_disk_id(&disk_path, disk_id)?;
	}
	assembler::write_offset_values(volume, &disk_path, ctx.metadata.sector_size, image_size)?;

	info!(disk = %disk_path.display(), volume = volume_name, image_size, "disk image assembled");
	Ok(())
}

/// `update-bootloader`: installs GRUB onto the freshly made disk image
/// for volumes whose gadget declares `bootloader: grub`. Shares
/// `make-disk`'s `img`-or-`qcow2` gating so a qcow2-only definition
/// still gets a bootloader installed before conversion.
pub fn update_bootloader(ctx: &mut StageContext<'_>) -> Result<()> {
	let Some(artifacts) = &ctx.def.artifacts else { return Ok(()) };
	let Some(spec) = artifacts.img.as_ref().or(artifacts.qcow2.as_ref()) else { return Ok(()) };

	let volume_name = target_volume_name(ctx, spec.volume.as_deref())?.to_owned();
	let gadget = ctx.gadget.as_ref().ok_or_else(|| eyre!("update-bootloader ran before load-gadget-yaml"))?;
	let volume = gadget.get(&volume_name).ok_or_else(|| eyre!("unknown volume `{volume_name}`"))?;

	if volume.bootloader.as_deref() != Some("grub") {
		return Ok(());
	}

	let rootfs_part = volume.structures.iter().filter(|s| s.role() != Role::Mbr).position(|s| s.role() == Role::SystemData);
	let efi_part = volume.structures.iter().filter(|s| s.role() != Role::Mbr).position(|s| s.role() == Role::SystemBoot);

	let Some(rootfs_part_num) = rootfs_part else { return Ok(()) };
	let disk_path = ctx.output_dir.join(format!("{}.img", ctx.def.name));

	chroot::setup_grub(
		ctx.workspace,
		&disk_path,
		u32::try_from(rootfs_part_num).unwrap_or(0).saturating_add(1),
		efi_part.map_or(0, |n| u32::try_from(n).unwrap_or(0).saturating_add(1)),
		&ctx.def.architecture,
		ctx.metadata.sector_size,
	)
}
