//! Image-Definition Model & Validator (C1, §4.1): typed representation
//! of the YAML input, defaulting, and accumulated-error validation.

pub mod artifacts;
pub mod customization;
pub mod rootfs;

use std::path::{Path, PathBuf};

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationIssue};

pub use artifacts::Artifacts;
pub use customization::Customization;
pub use rootfs::Rootfs;

fn default_kernel_name() -> String {
	"linux".to_owned()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KernelConfig {
	#[serde(default = "default_kernel_name")]
	pub name: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ImageClass {
	Preinstalled,
	Cloud,
	Installer,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GadgetType {
	Git,
	Directory,
	Prebuilt,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GadgetSource {
	#[serde(rename = "type")]
	pub kind: GadgetType,
	#[serde(default)]
	pub url: String,
	#[serde(default, rename = "ref")]
	pub git_ref: Option<String>,
	#[serde(default)]
	pub branch: Option<String>,
	#[serde(default)]
	pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageDefinition {
	pub name: String,
	#[serde(default, rename = "display-name")]
	pub display_name: Option<String>,
	pub revision: i64,
	pub architecture: String,
	pub series: String,
	pub class: ImageClass,
	#[serde(default)]
	pub kernel: Option<KernelConfig>,
	#[serde(default, rename = "model-assertion")]
	pub model_assertion: Option<PathBuf>,
	#[serde(default)]
	pub gadget: Option<GadgetSource>,
	pub rootfs: Rootfs,
	#[serde(default)]
	pub customization: Option<Customization>,
	#[serde(default)]
	pub artifacts: Option<Artifacts>,
}

/// Decodes the YAML at `path` into the typed record (§4.1 step 1). No
/// validation is performed here; call `default_and_validate` next.
pub fn load(path: &Path) -> Result<ImageDefinition> {
	let raw = std::fs::read_to_string(path)
		.map_err(|e| CoreError::Config(format!("cannot read image definition {}: {e}", path.display())))?;
	let def: ImageDefinition = serde_yaml::from_str(&raw)
		.map_err(|e| CoreError::Config(format!("cannot parse image definition {}: {e}", path.display())))?;
	Ok(def)
}

/// Returns `true` if `path` is absolute and contains no `..` segment,
/// the rule shared by every manual-customization path field (§4.1
/// step 5) and gadget content `source` field (§4.2).
#[must_use]
pub fn is_safe_absolute_path(path: &Path) -> bool {
	path.is_absolute() && !path.components().any(|c| c == std::path::Component::ParentDir)
}

fn require_nonempty(issues: &mut Vec<ValidationIssue>, rule: &'static str, field: &str, value: &str) {
	if value.trim().is_empty() {
		issues.push(ValidationIssue::new(rule, format!("`{field}` must not be empty")));
	}
}

/// Applies field defaults and runs every custom validation rule,
/// accumulating violations rather than stopping at the first one
/// (§4.1 step 5, §7 "Validation errors ... accumulated").
pub fn default_and_validate(def: &mut ImageDefinition) -> Result<()> {
	let mut issues = Vec::new();

	require_nonempty(&mut issues, "emptyRequiredField", "name", &def.name);
	require_nonempty(&mut issues, "emptyRequiredField", "architecture", &def.architecture);
	require_nonempty(&mut issues, "emptyRequiredField", "series", &def.series);

	if def.kernel.is_none() {
		def.kernel = Some(KernelConfig { name: default_kernel_name() });
	}

	match def.rootfs.sources_list_deb822 {
		None => {
			crate::util::warn_user("rootfs.sources-list-deb822 not set, defaulting to legacy .list sources");
			def.rootfs.sources_list_deb822 = Some(false);
		},
		Some(true) => crate::util::warn_user("using deb822 (.sources) apt source format"),
		Some(false) => crate::util::warn_user("using legacy (.list) apt source format"),
	}

	match def.rootfs.populated_count() {
		1 => {},
		0 => issues.push(ValidationIssue::new("schema", "rootfs must populate exactly one of seed, tarball, archive-tasks")),
		_ => issues.push(ValidationIssue::new(
			"schema",
			"rootfs must populate exactly one of seed, tarball, archive-tasks, not several",
		)),
	}

	if let Some(gadget) = &def.gadget {
		if !matches!(gadget.kind, GadgetType::Prebuilt) && gadget.url.trim().is_empty() {
			issues.push(ValidationIssue::new("missingURL", "gadget.url is required unless gadget.type is prebuilt"));
		}
	} else if def.artifacts.as_ref().is_some_and(Artifacts::is_disk) {
		issues.push(ValidationIssue::new(
			"dependentKey",
			"artifacts.img/qcow2 require gadget to be present (keys: img, gadget)",
		));
	}

	if let Some(customization) = &def.customization {
		for ppa in &customization.extra_ppas {
			if ppa.auth.is_some() && ppa.fingerprint.is_none() {
				issues.push(ValidationIssue::new(
					"missingPrivatePPAFingerprint",
					format!("PPA `{}` sets auth but no fingerprint", ppa.name),
				));
			}
		}

		for snap in &customization.extra_snaps {
			require_nonempty(&mut issues, "emptyRequiredField", "customization.extra-snaps[].name", &snap.name);
		}

		if let Some(manual) = &customization.manual {
			for m in &manual.mkdirs {
				if !is_safe_absolute_path(&m.path) {
					issues.push(ValidationIssue::new(
						"pathNotAbsolute",
						format!("manual.mkdirs path {:?} must be absolute and contain no `..`", m.path),
					));
				}
			}
			for c in &manual.copy_file {
				if !is_safe_absolute_path(&c.dest) {
					issues.push(ValidationIssue::new(
						"pathNotAbsolute",
						format!("manual.copy-file dest {:?} must be absolute and contain no `..`", c.dest),
					));
				}
			}
			for t in &manual.touch_file {
				if !is_safe_absolute_path(&t.path) {
					issues.push(ValidationIssue::new(
						"pathNotAbsolute",
						format!("manual.touch-file path {:?} must be absolute and contain no `..`", t.path),
					));
				}
			}
		}
	}

	if issues.is_empty() {
		Ok(())
	} else {
		Err(CoreError::validation(issues).into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn minimal_yaml() -> &'static str {
		r"
name: test-image
revision: 1
architecture: amd64
series: noble
class: preinstalled
rootfs:
  tarball:
    url: https://example.invalid/rootfs.tar.gz
"
	}

	#[test]
	fn parses_minimal_definition() {
		let def: ImageDefinition = serde_yaml::from_str(minimal_yaml()).unwrap();
		assert_eq!(def.name, "test-image");
		assert!(def.rootfs.tarball.is_some());
	}

	#[test]
	fn defaults_kernel_name_and_deb822_flag() {
		let mut def: ImageDefinition = serde_yaml::from_str(minimal_yaml()).unwrap();
		default_and_validate(&mut def).unwrap();
		assert_eq!(def.kernel.unwrap().name, "linux");
		assert_eq!(def.rootfs.sources_list_deb822, Some(false));
	}

	#[test]
	fn missing_gadget_with_disk_artifact_is_dependent_key_error() {
		let mut def: ImageDefinition = serde_yaml::from_str(minimal_yaml()).unwrap();
		def.artifacts = Some(Artifacts { img: Some(artifacts::ArtifactSpec::default()), ..Artifacts::default() });
		let err = default_and_validate(&mut def).unwrap_err();
		let msg = format!("{err:?}");
		assert!(msg.contains("dependentKey"), "{msg}");
	}

	#[test]
	fn ppa_auth_without_fingerprint_is_rejected() {
		let mut def: ImageDefinition = serde_yaml::from_str(minimal_yaml()).unwrap();
		def.customization = Some(Customization {
			extra_ppas: vec![customization::ExtraPpa {
				name: "private/ppa".to_owned(),
				auth: Some("u:p".to_owned()),
				fingerprint: None,
				keep_enabled: true,
			}],
			..Customization::default()
		});
		let err = default_and_validate(&mut def).unwrap_err();
		let msg = format!("{err:?}");
		assert!(msg.contains("missingPrivatePPAFingerprint"), "{msg}");
	}

	#[test]
	fn unsafe_manual_paths_are_rejected() {
		let mut def: ImageDefinition = serde_yaml::from_str(minimal_yaml()).unwrap();
		def.customization = Some(Customization {
			manual: Some(customization::ManualCustomization {
				mkdirs: vec![customization::MkDir { path: PathBuf::from("relative/path"), mode: None }],
				..customization::ManualCustomization::default()
			}),
			..Customization::default()
		});
		let err = default_and_validate(&mut def).unwrap_err();
		let msg = format!("{err:?}");
		assert!(msg.contains("pathNotAbsolute"), "{msg}");
	}
}
