//! The rootfs source: exactly one of `seed`, `tarball`, or
//! `archive-tasks` is expected to be populated (§3 "Image Definition").

use serde::{Deserialize, Serialize};

fn default_archive() -> String {
	"ubuntu".to_owned()
}

fn default_pocket() -> String {
	"release".to_owned()
}

/// A seed-driven rootfs: packages are resolved by germinating named
/// seeds against an apt archive.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RootfsSeed {
	pub urls: Vec<String>,
	pub branch: String,
	pub names: Vec<String>,
	#[serde(default)]
	pub vcs: Option<bool>,
	#[serde(default = "default_archive")]
	pub archive: String,
	#[serde(default = "default_pocket")]
	pub pocket: String,
}

/// A prebuilt tarball rootfs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RootfsTarball {
	pub url: String,
	#[serde(default)]
	pub gpg: Option<String>,
	#[serde(default)]
	pub sha256sum: Option<String>,
}

/// One step of an `archive-tasks`-driven rootfs build, the least
/// constrained of the three rootfs families: a named task with
/// free-form arguments handed to `build-rootfs-from-tasks`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ArchiveTask {
	pub name: String,
	#[serde(default)]
	pub args: Vec<String>,
}

/// Tri-state selector for the apt source-list format, plus the actual
/// rootfs source union. `sources_list_deb822` is `None` until
/// `default_and_validate` resolves and warns about it (§4.1 step 2).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rootfs {
	#[serde(default)]
	pub seed: Option<RootfsSeed>,
	#[serde(default)]
	pub tarball: Option<RootfsTarball>,
	#[serde(default, rename = "archive-tasks")]
	pub archive_tasks: Option<Vec<ArchiveTask>>,
	#[serde(default, rename = "sources-list-deb822")]
	pub sources_list_deb822: Option<bool>,
}

impl Rootfs {
	/// How many of the three mutually exclusive families are populated;
	/// exactly one is required (§3).
	#[must_use]
	pub const fn populated_count(&self) -> u8 {
		self.seed.is_some() as u8 + self.tarball.is_some() as u8 + self.archive_tasks.is_some() as u8
	}
}
