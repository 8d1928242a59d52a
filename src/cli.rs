//! Command-line surface (§6), `clap`-derived in the same style as the
//! teacher's `KatsuCli`.

use std::{collections::HashMap, path::PathBuf};

use bytesize::ByteSize;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};

use crate::error::CoreError;

/// How a failed image-definition validation should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum Validation {
	/// Propagate validation failures as a run-ending error (default).
	Enforce,
	/// Log the violations as warnings and continue the run anyway.
	Ignore,
}

/// Builds a bootable Linux disk image from a declarative image
/// definition.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct ImageCoreCli {
	/// Path to the YAML image definition.
	pub definition: PathBuf,

	/// Directory to write the requested artifacts into.
	#[arg(short, long, default_value = ".")]
	pub output_dir: PathBuf,

	/// Reuse (or create) a persistent work directory instead of a
	/// disposable one under `TMPDIR`.
	#[arg(short, long)]
	pub workdir: Option<PathBuf>,

	/// Resume a previous run from `--workdir`'s saved metadata.
	#[arg(long, requires = "workdir")]
	pub resume: bool,

	/// Run stages up to, but not including, the named stage.
	#[arg(long, conflicts_with = "thru")]
	pub until: Option<String>,

	/// Run stages up to and including the named stage.
	#[arg(long, conflicts_with = "until")]
	pub thru: Option<String>,

	/// Validate and calculate the stage plan without running anything.
	#[arg(long)]
	pub dry_run: bool,

	/// Write `.disk/info` into the populated rootfs.
	#[arg(long)]
	pub disk_info: bool,

	/// Only validate the image definition, then exit.
	#[arg(long)]
	pub validate: bool,

	/// Raise the default log level to `trace`. `IMAGE_CORE_LOG` still
	/// overrides this.
	#[arg(long, conflicts_with_all = ["verbose", "quiet"])]
	pub debug: bool,

	/// Raise the default log level to `debug`. `IMAGE_CORE_LOG` still
	/// overrides this.
	#[arg(long, conflicts_with_all = ["debug", "quiet"])]
	pub verbose: bool,

	/// Lower the default log level to `error`. `IMAGE_CORE_LOG` still
	/// overrides this.
	#[arg(long, conflicts_with_all = ["debug", "verbose"])]
	pub quiet: bool,

	/// Overrides the rootfs seed's apt pocket (e.g. `proposed`,
	/// `updates`) without editing the image definition.
	#[arg(long)]
	pub channel: Option<String>,

	/// Requested final image size: a bare size (`4G`) applied to every
	/// volume, a comma-separated `name:size` list, or a 1-based
	/// `index:size` pair. Smaller than the computed minimum is a
	/// warning, not an error.
	#[arg(long, visible_alias = "image-size")]
	pub size: Option<String>,

	/// How to handle image-definition validation failures.
	#[arg(long, value_enum)]
	pub validation: Option<Validation>,
}

impl ImageCoreCli {
	/// The `EnvFilter` directive `--debug`/`--verbose`/`--quiet` select,
	/// before `IMAGE_CORE_LOG` has a chance to override it (§10.1).
	#[must_use]
	pub const fn default_filter_directive(&self) -> &'static str {
		if self.quiet {
			"error"
		} else if self.debug {
			"trace"
		} else if self.verbose {
			"debug"
		} else {
			"info"
		}
	}
}

/// `parseImageSizes` (§8 boundary behavior): resolves a `--size`
/// argument against the gadget's volume names, in declaration order.
///
/// - A bare size (`"4G"`, no `,`/`:`) applies to every volume.
/// - A comma-separated list of `name:size` or `index:size` (1-based)
///   pairs sets each volume individually.
/// - Any entry with more than two `:`-separated fields is rejected as
///   malformed rather than parsed permissively (§9 open question).
pub fn parse_image_sizes(spec: &str, volume_order: &[String]) -> Result<HashMap<String, u64>> {
	if !spec.contains(',') && !spec.contains(':') {
		let size = parse_byte_size(spec)?;
		return Ok(volume_order.iter().cloned().map(|v| (v, size)).collect());
	}

	let mut out = HashMap::new();
	for entry in spec.split(',') {
		let fields: Vec<&str> = entry.split(':').collect();
		let [name_or_index, size] = fields[..] else {
			return Err(eyre!(CoreError::Config(format!("malformed --size entry `{entry}`; expected `name:size`"))));
		};
		let size = parse_byte_size(size)?;

		if let Ok(index) = name_or_index.parse::<usize>() {
			let volume = volume_order.get(index.saturating_sub(1)).ok_or_else(|| {
				eyre!(CoreError::Config(format!("--size volume index {index} is out of range ({} volumes)", volume_order.len())))
			})?;
			out.insert(volume.clone(), size);
		} else {
			out.insert(name_or_index.to_owned(), size);
		}
	}
	Ok(out)
}

fn parse_byte_size(s: &str) -> Result<u64> {
	s.parse::<ByteSize>().map(|b| b.0).map_err(|e| eyre!(CoreError::Config(format!("invalid size `{s}`: {e}"))))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn volumes() -> Vec<String> {
		vec!["pc".to_owned()]
	}

	#[test]
	fn bare_size_applies_to_every_volume() {
		let sizes = parse_image_sizes("4G", &volumes()).unwrap();
		assert_eq!(sizes["pc"], ByteSize::gb(4).0);
	}

	#[test]
	fn named_pairs_set_each_volume() {
		let vols = vec!["first".to_owned(), "second".to_owned()];
		let sizes = parse_image_sizes("first:1G,second:2G", &vols).unwrap();
		assert_eq!(sizes["first"], ByteSize::gb(1).0);
		assert_eq!(sizes["second"], ByteSize::gb(2).0);
	}

	#[test]
	fn numeric_index_out_of_range_is_config_error() {
		let vols = vec!["only-one".to_owned()];
		let err = parse_image_sizes("9:1G", &vols).unwrap_err();
		assert!(format!("{err}").contains("out of range"), "{err}");
	}

	#[test]
	fn numeric_index_in_range_selects_volume() {
		let vols = vec!["first".to_owned(), "second".to_owned()];
		let sizes = parse_image_sizes("2:3G", &vols).unwrap();
		assert_eq!(sizes["second"], ByteSize::gb(3).0);
	}

	#[test]
	fn three_field_entry_is_rejected_as_malformed() {
		let err = parse_image_sizes("first:1G:2G", &volumes()).unwrap_err();
		assert!(format!("{err}").contains("malformed"), "{err}");
	}
}
