//! Stage-plan scenarios beyond the ones already covered by
//! `calculator.rs`'s own unit tests: an `archive-tasks` rootfs with no
//! gadget at all, and a manifest-only artifact request that must not
//! pull in disk assembly stages.

use ubuntu_image_core::{
	calculator::calculate,
	definition::{
		artifacts::{ArtifactSpec, Artifacts},
		rootfs::{ArchiveTask, Rootfs},
		ImageClass, ImageDefinition,
	},
};

fn base_def() -> ImageDefinition {
	ImageDefinition {
		name: "t".into(),
		display_name: None,
		revision: 1,
		architecture: "amd64".into(),
		series: "noble".into(),
		class: ImageClass::Cloud,
		kernel: None,
		model_assertion: None,
		gadget: None,
		rootfs: Rootfs::default(),
		customization: None,
		artifacts: None,
	}
}

#[test]
fn archive_tasks_rootfs_with_no_gadget_skips_disk_stages() {
	let mut def = base_def();
	def.rootfs.archive_tasks = Some(vec![ArchiveTask { name: "mmdebstrap".into(), args: vec!["noble".into()] }]);

	let plan = calculate(&def, false);

	assert_eq!(
		plan,
		vec![
			"make-temporary-directories",
			"determine-output-directory",
			"build-rootfs-from-tasks",
			"clean-rootfs",
			"customize-sources-list",
			"set-default-locale",
			"populate-classic-rootfs-contents",
		]
	);
}

#[test]
fn manifest_only_artifact_skips_disk_assembly() {
	let mut def = base_def();
	def.rootfs.archive_tasks = Some(vec![ArchiveTask { name: "mmdebstrap".into(), args: vec![] }]);
	def.artifacts = Some(Artifacts { manifest: Some(ArtifactSpec::default()), ..Artifacts::default() });

	let plan = calculate(&def, false);

	assert!(plan.contains(&"generate-package-manifest"));
	assert!(!plan.contains(&"make-disk"));
	assert!(!plan.contains(&"calculate-rootfs-size"));
}

#[test]
fn disk_info_flag_adds_generate_disk_info_stage() {
	let mut def = base_def();
	def.rootfs.archive_tasks = Some(vec![ArchiveTask { name: "mmdebstrap".into(), args: vec![] }]);

	assert!(!calculate(&def, false).contains(&"generate-disk-info"));
	assert!(calculate(&def, true).contains(&"generate-disk-info"));
}
