//! State Calculator (C4, §4.4): translates a validated image
//! definition into an ordered, deduplicated pipeline of stage names.
//! Deterministic and based only on the definition's contents (plus the
//! `--disk-info` flag, the one CLI input the algorithm consults).

use crate::definition::{rootfs::Rootfs, GadgetType, ImageDefinition};

/// `calculate(def)` (§4.4). `finish` is deliberately not appended here
/// — the engine appends it after validating `--until`/`--thru` (§4.4
/// ordering invariant).
#[must_use]
pub fn calculate(def: &ImageDefinition, disk_info: bool) -> Vec<&'static str> {
	let mut stages = vec!["make-temporary-directories", "determine-output-directory"];

	if let Some(gadget) = &def.gadget {
		match gadget.kind {
			GadgetType::Git | GadgetType::Directory => {
				stages.push("build-gadget-tree");
				stages.push("prepare-gadget-tree");
			},
			GadgetType::Prebuilt => stages.push("prepare-gadget-tree"),
		}
		stages.push("load-gadget-yaml");
	}

	let artifacts = def.artifacts.as_ref();
	if artifacts.is_some_and(|a| a.is_disk()) {
		stages.push("verify-artifact-names");
	}

	append_rootfs_family(&mut stages, def);

	stages.push("clean-rootfs");
	stages.push("customize-sources-list");

	if let Some(customization) = &def.customization {
		if customization.cloud_init.is_some() {
			stages.push("customize-cloud-init");
		}
		if !customization.fstab.is_empty() {
			stages.push("customize-fstab");
		}
		if customization.manual.as_ref().is_some_and(|m| !m.is_empty()) {
			stages.push("manual-customization");
		}
	}

	stages.push("set-default-locale");
	stages.push("populate-classic-rootfs-contents");

	if disk_info {
		stages.push("generate-disk-info");
	}

	if let Some(artifacts) = artifacts {
		if !artifacts.is_empty() {
			let mut made_disk = false;

			if def.gadget.is_some() {
				stages.push("calculate-rootfs-size");
				stages.push("populate-bootfs-contents");
				stages.push("populate-prepare-partitions");
			}

			if artifacts.img.is_some() {
				stages.push("make-disk");
				stages.push("update-bootloader");
				made_disk = true;
			}

			if artifacts.qcow2.is_some() {
				if !made_disk {
					stages.push("make-disk");
					stages.push("update-bootloader");
				}
				stages.push("make-qcow2-image");
			}

			if artifacts.manifest.is_some() {
				stages.push("generate-package-manifest");
			}
			if artifacts.filelist.is_some() {
				stages.push("generate-filelist");
			}
			if artifacts.rootfs_tar.is_some() {
				stages.push("generate-rootfs-tarball");
			}
		}
	}

	stages
}

fn append_rootfs_family(stages: &mut Vec<&'static str>, def: &ImageDefinition) {
	let Rootfs { seed, tarball, archive_tasks, .. } = &def.rootfs;

	if tarball.is_some() {
		stages.push("extract-rootfs-tar");

		if let Some(customization) = &def.customization {
			let has_ppas = !customization.extra_ppas.is_empty();
			let has_packages = !customization.extra_packages.is_empty();
			if has_ppas {
				stages.push("add-extra-ppas");
			}
			if has_packages || has_ppas {
				stages.push("install-packages");
			}
			if has_ppas {
				stages.push("clean-extra-ppas");
			}
			if !customization.extra_snaps.is_empty() {
				stages.push("prepare-classic-image");
				stages.push("preseed-classic-image");
			}
		}
	} else if seed.is_some() {
		stages.push("germinate");
		stages.push("create-chroot");

		let has_ppas = def.customization.as_ref().is_some_and(|c| !c.extra_ppas.is_empty());
		if has_ppas {
			stages.push("add-extra-ppas");
			stages.push("install-packages");
			stages.push("clean-extra-ppas");
		} else {
			stages.push("install-packages");
		}

		stages.push("prepare-classic-image");
		stages.push("preseed-classic-image");
	} else if archive_tasks.is_some() {
		stages.push("build-rootfs-from-tasks");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::definition::{artifacts::Artifacts, customization::{Customization, ExtraPpa}, rootfs::{Rootfs, RootfsSeed, RootfsTarball}, GadgetSource, GadgetType, ImageClass, ImageDefinition};

	fn base_def() -> ImageDefinition {
		ImageDefinition {
			name: "t".into(),
			display_name: None,
			revision: 1,
			architecture: "amd64".into(),
			series: "noble".into(),
			class: ImageClass::Preinstalled,
			kernel: None,
			model_assertion: None,
			gadget: None,
			rootfs: Rootfs::default(),
			customization: None,
			artifacts: None,
		}
	}

	#[test]
	fn calculate_is_deterministic_and_make_disk_appears_at_most_once() {
		let mut def = base_def();
		def.gadget = Some(GadgetSource { kind: GadgetType::Prebuilt, url: String::new(), git_ref: None, branch: None, target: None });
		def.rootfs.seed = Some(RootfsSeed {
			urls: vec!["https://example.invalid".into()],
			branch: "noble".into(),
			names: vec!["minimal".into()],
			vcs: None,
			archive: "ubuntu".into(),
			pocket: "release".into(),
		});
		def.customization = Some(Customization {
			extra_ppas: vec![ExtraPpa { name: "x".into(), auth: None, fingerprint: None, keep_enabled: true }],
			..Customization::default()
		});
		def.artifacts = Some(Artifacts { img: Some(crate::definition::artifacts::ArtifactSpec::default()), ..Artifacts::default() });

		let once = calculate(&def, false);
		let twice = calculate(&def, false);
		assert_eq!(once, twice);
		assert_eq!(once.iter().filter(|&&s| s == "make-disk").count(), 1);
	}

	#[test]
	fn scenario_s1_prebuilt_seed_ppa_img() {
		let mut def = base_def();
		def.gadget = Some(GadgetSource { kind: GadgetType::Prebuilt, url: String::new(), git_ref: None, branch: None, target: None });
		def.rootfs.seed = Some(RootfsSeed {
			urls: vec!["https://example.invalid".into()],
			branch: "noble".into(),
			names: vec!["minimal".into()],
			vcs: None,
			archive: "ubuntu".into(),
			pocket: "release".into(),
		});
		def.customization = Some(Customization {
			extra_ppas: vec![ExtraPpa { name: "x".into(), auth: None, fingerprint: None, keep_enabled: true }],
			..Customization::default()
		});
		def.artifacts = Some(Artifacts { img: Some(crate::definition::artifacts::ArtifactSpec::default()), ..Artifacts::default() });

		let expected = vec![
			"make-temporary-directories",
			"determine-output-directory",
			"prepare-gadget-tree",
			"load-gadget-yaml",
			"verify-artifact-names",
			"germinate",
			"create-chroot",
			"add-extra-ppas",
			"install-packages",
			"clean-extra-ppas",
			"prepare-classic-image",
			"preseed-classic-image",
			"clean-rootfs",
			"customize-sources-list",
			"set-default-locale",
			"populate-classic-rootfs-contents",
			"calculate-rootfs-size",
			"populate-bootfs-contents",
			"populate-prepare-partitions",
			"make-disk",
			"update-bootloader",
		];
		assert_eq!(calculate(&def, false), expected);
	}

	#[test]
	fn scenario_s2_git_tarball_qcow2() {
		let mut def = base_def();
		def.gadget = Some(GadgetSource { kind: GadgetType::Git, url: "https://example.invalid/gadget.git".into(), git_ref: None, branch: None, target: None });
		def.rootfs.tarball = Some(RootfsTarball { url: "https://example.invalid/rootfs.tar.gz".into(), gpg: None, sha256sum: None });
		def.artifacts = Some(Artifacts { qcow2: Some(crate::definition::artifacts::ArtifactSpec::default()), ..Artifacts::default() });

		let expected = vec![
			"make-temporary-directories",
			"determine-output-directory",
			"build-gadget-tree",
			"prepare-gadget-tree",
			"load-gadget-yaml",
			"verify-artifact-names",
			"extract-rootfs-tar",
			"clean-rootfs",
			"customize-sources-list",
			"set-default-locale",
			"populate-classic-rootfs-contents",
			"calculate-rootfs-size",
			"populate-bootfs-contents",
			"populate-prepare-partitions",
			"make-disk",
			"update-bootloader",
			"make-qcow2-image",
		];
		assert_eq!(calculate(&def, false), expected);
	}
}
