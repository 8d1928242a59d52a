//! State Registry (C3, §4.3): a dependency-free catalogue of named
//! build stages. Mirrors the teacher's `IndexMap`-keyed script
//! dependency resolution in `builder::run_scripts`, generalized from
//! "scripts with `needs`" to "named build stages in calculated order".

pub mod artifact_stages;
pub mod customize_stages;
pub mod gadget_stages;
pub mod image_stages;
pub mod rootfs_stages;

use std::sync::OnceLock;

use color_eyre::Result;
use indexmap::IndexMap;

use crate::{engine::Metadata, ports::Ports, workspace::Workspace};
use crate::definition::ImageDefinition;
use crate::gadget::GadgetInfo;

/// Everything a stage function needs, passed by reference instead of
/// being reached via a parent/child back-pointer (§9 design note).
pub struct StageContext<'a> {
	pub def: &'a ImageDefinition,
	pub workspace: &'a mut Workspace,
	pub gadget: &'a mut Option<GadgetInfo>,
	pub metadata: &'a mut Metadata,
	pub ports: &'a Ports,
	pub output_dir: &'a std::path::Path,
	pub dry_run: bool,
	/// Raw `--size`/`--image-size` argument, resolved against the
	/// gadget's volume names by `make-disk` once it's loaded (§6, §8
	/// `parseImageSizes`).
	pub image_size_request: Option<&'a str>,
}

pub type StageFn = fn(&mut StageContext<'_>) -> Result<()>;

/// All stage names in the order `State Registry` exposes them,
/// exactly the catalogue in §4.3. The calculator selects a subset and
/// orders it; this list only has to be complete and name-stable.
pub const STAGE_NAMES: &[&str] = &[
	"make-temporary-directories",
	"determine-output-directory",
	"build-gadget-tree",
	"prepare-gadget-tree",
	"load-gadget-yaml",
	"germinate",
	"create-chroot",
	"add-extra-ppas",
	"install-packages",
	"clean-extra-ppas",
	"extract-rootfs-tar",
	"build-rootfs-from-tasks",
	"prepare-classic-image",
	"preseed-classic-image",
	"clean-rootfs",
	"customize-sources-list",
	"customize-cloud-init",
	"customize-fstab",
	"manual-customization",
	"set-default-locale",
	"populate-classic-rootfs-contents",
	"generate-disk-info",
	"verify-artifact-names",
	"calculate-rootfs-size",
	"populate-bootfs-contents",
	"populate-prepare-partitions",
	"make-disk",
	"update-bootloader",
	"make-qcow2-image",
	"generate-package-manifest",
	"generate-filelist",
	"generate-rootfs-tarball",
	"finish",
];

fn build_registry() -> IndexMap<&'static str, StageFn> {
	let mut m: IndexMap<&'static str, StageFn> = IndexMap::new();
	m.insert("make-temporary-directories", gadget_stages::make_temporary_directories);
	m.insert("determine-output-directory", gadget_stages::determine_output_directory);
	m.insert("build-gadget-tree", gadget_stages::build_gadget_tree);
	m.insert("prepare-gadget-tree", gadget_stages::prepare_gadget_tree);
	m.insert("load-gadget-yaml", gadget_stages::load_gadget_yaml);
	m.insert("germinate", rootfs_stages::germinate);
	m.insert("create-chroot", rootfs_stages::create_chroot);
	m.insert("add-extra-ppas", rootfs_stages::add_extra_ppas);
	m.insert("install-packages", rootfs_stages::install_packages);
	m.insert("clean-extra-ppas", rootfs_stages::clean_extra_ppas);
	m.insert("extract-rootfs-tar", rootfs_stages::extract_rootfs_tar);
	m.insert("build-rootfs-from-tasks", rootfs_stages::build_rootfs_from_tasks);
	m.insert("prepare-classic-image", rootfs_stages::prepare_classic_image);
	m.insert("preseed-classic-image", rootfs_stages::preseed_classic_image);
	m.insert("clean-rootfs", customize_stages::clean_rootfs);
	m.insert("customize-sources-list", customize_stages::customize_sources_list);
	m.insert("customize-cloud-init", customize_stages::customize_cloud_init);
	m.insert("customize-fstab", customize_stages::customize_fstab);
	m.insert("manual-customization", customize_stages::manual_customization);
	m.insert("set-default-locale", customize_stages::set_default_locale);
	m.insert("populate-classic-rootfs-contents", customize_stages::populate_classic_rootfs_contents);
	m.insert("generate-disk-info", customize_stages::generate_disk_info);
	m.insert("verify-artifact-names", image_stages::verify_artifact_names);
	m.insert("calculate-rootfs-size", image_stages::calculate_rootfs_size_stage);
	m.insert("populate-bootfs-contents", image_stages::populate_bootfs_contents);
	m.insert("populate-prepare-partitions", image_stages::populate_prepare_partitions);
	m.insert("make-disk", image_stages::make_disk);
	m.insert("update-bootloader", image_stages::update_bootloader);
	m.insert("make-qcow2-image", artifact_stages::make_qcow2_image);
	m.insert("generate-package-manifest", artifact_stages::generate_package_manifest);
	m.insert("generate-filelist", artifact_stages::generate_filelist);
	m.insert("generate-rootfs-tarball", artifact_stages::generate_rootfs_tarball);
	m.insert("finish", artifact_stages::finish);
	m
}

static REGISTRY: OnceLock<IndexMap<&'static str, StageFn>> = OnceLock::new();

/// The named stage catalogue. Built once, on first access.
pub fn registry() -> &'static IndexMap<&'static str, StageFn> {
	REGISTRY.get_or_init(build_registry)
}

pub fn lookup(name: &str) -> Option<StageFn> {
	registry().get(name).copied()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_declared_stage_name_is_registered() {
		let reg = registry();
		for name in STAGE_NAMES {
			assert!(reg.contains_key(name), "missing stage registration for `{name}`");
		}
		assert_eq!(reg.len(), STAGE_NAMES.len(), "registry has stages not in STAGE_NAMES");
	}
}
