//! Requested output artifacts (§3 "Artifacts").

use serde::{Deserialize, Serialize};

/// A single requested artifact. Present as a YAML key with an
/// (optional) body naming which volume it applies to when the gadget
/// declares more than one.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ArtifactSpec {
	#[serde(default)]
	pub volume: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Artifacts {
	#[serde(default)]
	pub img: Option<ArtifactSpec>,
	#[serde(default)]
	pub qcow2: Option<ArtifactSpec>,
	#[serde(default)]
	pub manifest: Option<ArtifactSpec>,
	#[serde(default)]
	pub filelist: Option<ArtifactSpec>,
	#[serde(default, rename = "rootfs-tar")]
	pub rootfs_tar: Option<ArtifactSpec>,
}

impl Artifacts {
	/// Whether any declared artifact requires a physically partitioned
	/// disk image to exist (§4.1 `DependentKey` rule, §4.4 step 9).
	#[must_use]
	pub const fn is_disk(&self) -> bool {
		self.img.is_some() || self.qcow2.is_some()
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.img.is_none()
			&& self.qcow2.is_none()
			&& self.manifest.is_none()
			&& self.filelist.is_none()
			&& self.rootfs_tar.is_none()
	}
}
