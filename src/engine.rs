//! State-Machine Engine (C5, §4.5): executes the calculated stage
//! list in order, persists/restores resumable metadata, and routes
//! errors through teardown.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
	calculator,
	definition::ImageDefinition,
	error::CoreError,
	gadget::GadgetInfo,
	ports::Ports,
	stages::{self, StageContext},
	workspace::Workspace,
};

/// The serializable subset of engine state a run can resume from
/// (§3 "Metadata"). Temp-dir paths are deliberately not part of this —
/// they're recomputed from `workdir` on resume since paths may move
/// (§4.5 "Resume semantics").
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metadata {
	pub steps_taken: usize,
	pub current_step: Option<String>,
	pub gadget_info: Option<GadgetInfo>,
	pub image_sizes: HashMap<String, u64>,
	pub volume_order: Vec<String>,
	pub rootfs_size: u64,
	pub sector_size: u32,
	pub is_seeded: bool,
	pub volume_names: HashMap<String, String>,
	pub yaml_file_path: PathBuf,
	pub packages: Vec<String>,
	pub snaps: Vec<String>,
}

impl Metadata {
	#[must_use]
	pub fn new(yaml_file_path: PathBuf) -> Self {
		Self { sector_size: 512, yaml_file_path, ..Self::default() }
	}

	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|e| CoreError::Metadata(format!("cannot read {}: {e}", path.display())))?;
		serde_json::from_str(&raw).map_err(|e| CoreError::Metadata(format!("corrupt metadata {}: {e}", path.display())).into())
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		let json = serde_json::to_string_pretty(self)?;
		crate::util::just_write(path, json)
	}
}

/// Engine run options derived from the CLI (§6).
pub struct RunOptions {
	pub workdir: Option<PathBuf>,
	pub resume: bool,
	pub until: Option<String>,
	pub thru: Option<String>,
	pub output_dir: PathBuf,
	pub dry_run: bool,
	pub disk_info: bool,
	/// Raw `--size`/`--image-size` argument, plumbed through to
	/// `make-disk` via `StageContext::image_size_request`.
	pub image_size: Option<String>,
	/// `--channel` override applied to `rootfs.seed.pocket` in `setup`.
	pub channel: Option<String>,
}

pub enum EngineState {
	NotStarted,
	Ready,
	Running,
	Succeeded,
	Failing,
}

pub struct Engine {
	pub def: ImageDefinition,
	pub workspace: Workspace,
	pub metadata: Metadata,
	pub ports: Ports,
	pub options: RunOptions,
	pub gadget: Option<GadgetInfo>,
	stage_list: Vec<&'static str>,
	state: EngineState,
}

impl Engine {
	/// `Setup()` (§4.5): validates the CLI combination, calculates the
	/// stage list, resolves `--until`/`--thru` against known stage
	/// names, and on `--resume` loads metadata and trims completed
	/// stages off the head of the list.
	pub fn setup(mut def: ImageDefinition, yaml_path: PathBuf, options: RunOptions, ports: Ports) -> Result<Self> {
		if options.until.is_some() && options.thru.is_some() {
			return Err(CoreError::Config("--until and --thru are mutually exclusive".to_owned()).into());
		}
		if options.resume && options.workdir.is_none() {
			return Err(CoreError::Config("--resume requires --workdir".to_owned()).into());
		}

		if let Some(channel) = &options.channel {
			if let Some(seed) = &mut def.rootfs.seed {
				seed.pocket = channel.clone();
			}
		}

		let mut calculated: Vec<&'static str> = calculator::calculate(&def, options.disk_info);

		for target in [&options.until, &options.thru].into_iter().flatten() {
			if !stages::STAGE_NAMES.contains(&target.as_str()) {
				return Err(CoreError::Config(format!("unknown stage name `{target}`")).into());
			}
		}

		calculated.push("finish");

		let (workspace, metadata) = if options.resume {
			let workdir = options.workdir.clone().expect("checked above");
			let workspace = Workspace::at_existing(workdir);
			let metadata = Metadata::load(&workspace.metadata_path())?;
			if metadata.steps_taken > calculated.len() {
				return Err(CoreError::Metadata(format!(
					"StepsTaken {} exceeds calculated stage count {}",
					metadata.steps_taken,
					calculated.len()
				))
				.into());
			}
			calculated.drain(..metadata.steps_taken);
			(workspace, metadata)
		} else {
			let workspace = Workspace::make_temporary_directories(options.workdir.clone(), &ports)?;
			(workspace, Metadata::new(yaml_path))
		};

		Ok(Self {
			def,
			workspace,
			metadata,
			ports,
			options,
			gadget: None,
			stage_list: calculated,
			state: EngineState::Ready,
		})
	}

	/// `Run()` (§4.5): executes remaining stages in order, honoring
	/// `--until`/`--thru`, persisting progress as it goes.
	pub fn run(&mut self) -> Result<()> {
		self.state = EngineState::Running;

		let result = self.run_inner();

		match result {
			Ok(()) => {
				self.state = EngineState::Succeeded;
				self.teardown()?;
				Ok(())
			},
			Err(e) => {
				self.state = EngineState::Failing;
				let teardown_err = self.teardown();
				if let Err(te) = teardown_err {
					return Err(eyre!("{te} after previous error: {e}"));
				}
				Err(e)
			},
		}
	}

	fn run_inner(&mut self) -> Result<()> {
		let stage_list = self.stage_list.clone();

		for name in stage_list {
			if self.options.until.as_deref() == Some(name) {
				break;
			}

			let stage_fn = stages::lookup(name).ok_or_else(|| CoreError::Invariant(format!("stage `{name}` not registered")))?;

			info!(stage = name, "running stage");
			{
				let mut ctx = StageContext {
					def: &self.def,
					workspace: &mut self.workspace,
					gadget: &mut self.gadget,
					metadata: &mut self.metadata,
					ports: &self.ports,
					output_dir: &self.options.output_dir,
					dry_run: self.options.dry_run,
					image_size_request: self.options.image_size.as_deref(),
				};
				stage_fn(&mut ctx)?;
			}

			self.metadata.steps_taken += 1;
			self.metadata.current_step = Some(name.to_owned());
			debug!(stage = name, steps_taken = self.metadata.steps_taken, "stage complete");

			if self.options.thru.as_deref() == Some(name) {
				break;
			}
		}

		Ok(())
	}

	/// `Teardown()` (§4.5): removes the workspace when it was ephemeral
	/// (no `--workdir` given), regardless of run outcome, otherwise
	/// persists metadata so `--resume` can pick the run back up.
	fn teardown(&mut self) -> Result<()> {
		let ledger_err = self.workspace.ledger.drain();

		let result = if self.workspace.clean_on_teardown {
			self.ports.fs.remove_dir_all(&self.workspace.workdir)
		} else {
			self.metadata.save(&self.workspace.metadata_path())
		};

		match (ledger_err, result) {
			(None, r) => r,
			(Some(le), Ok(())) => Err(le),
			(Some(le), Err(e)) => Err(eyre!("{e} after previous error: {le}")),
		}
	}

	#[must_use]
	pub const fn state(&self) -> &EngineState {
		&self.state
	}
}
