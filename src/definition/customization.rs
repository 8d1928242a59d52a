//! Rootfs customization: PPAs, extra packages/snaps, fstab overrides,
//! and manual actions (§3, §9 closed sum type over manual actions).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const fn default_true() -> bool {
	true
}

fn default_snap_store() -> String {
	"canonical".to_owned()
}

fn default_snap_channel() -> String {
	"stable".to_owned()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExtraPpa {
	pub name: String,
	#[serde(default)]
	pub auth: Option<String>,
	#[serde(default)]
	pub fingerprint: Option<String>,
	#[serde(default = "default_true")]
	pub keep_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnapConfig {
	pub name: String,
	#[serde(default = "default_snap_channel")]
	pub channel: String,
	#[serde(default = "default_snap_store")]
	pub store: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FstabEntry {
	pub spec: String,
	pub mountpoint: String,
	pub fstype: String,
	#[serde(default)]
	pub options: String,
	#[serde(default)]
	pub dump: u8,
	#[serde(default)]
	pub pass: u8,
}

/// `customization.manual.mkdirs[]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MkDir {
	pub path: PathBuf,
	#[serde(default)]
	pub mode: Option<u32>,
}

/// `customization.manual.copy-file[]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CopyFile {
	pub source: PathBuf,
	pub dest: PathBuf,
}

/// `customization.manual.execute[]`: a command run inside the chroot.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Execute {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
}

/// `customization.manual.touch-file[]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TouchFile {
	pub path: PathBuf,
}

/// `customization.manual.add-group[]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AddGroup {
	pub name: String,
	#[serde(default)]
	pub gid: Option<u32>,
}

/// `customization.manual.add-user[]`, the same shape as the teacher's
/// `Auth` record, adapted to the closed sum-type manual-action model
/// instead of a single top-level users list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AddUser {
	pub username: String,
	#[serde(default)]
	pub password: Option<String>,
	#[serde(default)]
	pub groups: Vec<String>,
	#[serde(default = "default_true")]
	pub create_home: bool,
	#[serde(default)]
	pub shell: Option<String>,
	#[serde(default)]
	pub uid: Option<u32>,
	#[serde(default)]
	pub gid: Option<u32>,
	#[serde(default)]
	pub ssh_keys: Vec<String>,
}

/// The closed sum type replacing the source's dynamically-typed
/// customization handlers (§9): one field per concrete action kind,
/// each a homogeneous list.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ManualCustomization {
	#[serde(default)]
	pub mkdirs: Vec<MkDir>,
	#[serde(default, rename = "copy-file")]
	pub copy_file: Vec<CopyFile>,
	#[serde(default)]
	pub execute: Vec<Execute>,
	#[serde(default, rename = "touch-file")]
	pub touch_file: Vec<TouchFile>,
	#[serde(default, rename = "add-group")]
	pub add_group: Vec<AddGroup>,
	#[serde(default, rename = "add-user")]
	pub add_user: Vec<AddUser>,
}

impl ManualCustomization {
	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.mkdirs.is_empty()
			&& self.copy_file.is_empty()
			&& self.execute.is_empty()
			&& self.touch_file.is_empty()
			&& self.add_group.is_empty()
			&& self.add_user.is_empty()
	}
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Customization {
	#[serde(default, rename = "cloud-init")]
	pub cloud_init: Option<serde_yaml::Value>,
	#[serde(default, rename = "extra-ppas")]
	pub extra_ppas: Vec<ExtraPpa>,
	#[serde(default, rename = "extra-packages")]
	pub extra_packages: Vec<String>,
	#[serde(default, rename = "extra-snaps")]
	pub extra_snaps: Vec<SnapConfig>,
	#[serde(default)]
	pub fstab: Vec<FstabEntry>,
	#[serde(default)]
	pub manual: Option<ManualCustomization>,
}
