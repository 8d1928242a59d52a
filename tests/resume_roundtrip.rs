//! Exercises `Engine::setup`'s `--resume` path end to end: a
//! definition is run through `setup`, progress is recorded and saved
//! as if a few stages had already completed, and a second `setup`
//! against the same `--workdir` must trim exactly those stages off the
//! head of its calculated plan.

use std::path::PathBuf;

use ubuntu_image_core::{
	definition::{
		artifacts::{ArtifactSpec, Artifacts},
		rootfs::{Rootfs, RootfsTarball},
		GadgetSource, GadgetType, ImageClass, ImageDefinition,
	},
	engine::{Engine, Metadata, RunOptions},
	ports::Ports,
};

fn sample_def() -> ImageDefinition {
	ImageDefinition {
		name: "resume-test".into(),
		display_name: None,
		revision: 1,
		architecture: "amd64".into(),
		series: "noble".into(),
		class: ImageClass::Preinstalled,
		kernel: None,
		model_assertion: None,
		gadget: Some(GadgetSource {
			kind: GadgetType::Prebuilt,
			url: String::new(),
			git_ref: None,
			branch: None,
			target: None,
		}),
		rootfs: Rootfs {
			tarball: Some(RootfsTarball { url: "https://example.invalid/rootfs.tar.gz".into(), gpg: None, sha256sum: None }),
			..Rootfs::default()
		},
		customization: None,
		artifacts: Some(Artifacts { img: Some(ArtifactSpec::default()), ..Artifacts::default() }),
	}
}

fn run_options(workdir: PathBuf, resume: bool) -> RunOptions {
	RunOptions {
		workdir: Some(workdir),
		resume,
		until: None,
		thru: None,
		output_dir: PathBuf::from("."),
		dry_run: false,
		disk_info: false,
		image_size: None,
		channel: None,
	}
}

#[test]
fn setup_trims_completed_stages_on_resume() {
	let workdir = tempfile::tempdir().unwrap();

	let mut def = sample_def();
	ubuntu_image_core::definition::default_and_validate(&mut def).unwrap();

	let fresh = Engine::setup(def.clone(), PathBuf::from("image.yaml"), run_options(workdir.path().to_path_buf(), false), Ports::default()).unwrap();

	let full_plan_len = ubuntu_image_core::calculator::calculate(&def, false).len() + 1; // + finish
	assert!(full_plan_len > 3, "fixture definition should calculate a non-trivial plan");

	// Simulate three completed stages by hand-writing metadata, the
	// same file `Engine::teardown` would have produced mid-run.
	let mut metadata = Metadata::new(PathBuf::from("image.yaml"));
	metadata.steps_taken = 3;
	metadata.current_step = Some("load-gadget-yaml".to_owned());
	metadata.save(&fresh.workspace.metadata_path()).unwrap();
	drop(fresh);

	let resumed = Engine::setup(def, PathBuf::from("image.yaml"), run_options(workdir.path().to_path_buf(), true), Ports::default()).unwrap();

	assert_eq!(resumed.metadata.steps_taken, 3);
	assert_eq!(resumed.metadata.current_step.as_deref(), Some("load-gadget-yaml"));
}

#[test]
fn resume_without_workdir_is_rejected() {
	let def = sample_def();
	let options = RunOptions {
		workdir: None,
		resume: true,
		until: None,
		thru: None,
		output_dir: PathBuf::from("."),
		dry_run: false,
		disk_info: false,
		image_size: None,
		channel: None,
	};
	let err = Engine::setup(def, PathBuf::from("image.yaml"), options, Ports::default()).unwrap_err();
	assert!(format!("{err}").contains("--resume requires --workdir"));
}

#[test]
fn metadata_json_round_trips_through_disk() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("ubuntu-image.json");

	let mut metadata = Metadata::new(PathBuf::from("image.yaml"));
	metadata.steps_taken = 5;
	metadata.packages = vec!["systemd".into(), "udev".into()];
	metadata.save(&path).unwrap();

	let loaded = Metadata::load(&path).unwrap();
	assert_eq!(loaded, metadata);
}
