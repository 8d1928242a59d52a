//! Gadget-tree stages (§4.3): materializing the gadget source into the
//! workspace and loading its `gadget.yaml` into the in-memory model.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::{definition::GadgetType, error::CoreError, gadget, util::run_checked};

use super::StageContext;

/// `make-temporary-directories`: the workspace's fixed sub-roots are
/// created by `Engine::setup` before any stage runs; this stage only
/// re-asserts the invariant so a `--resume` run against a workdir an
/// operator tampered with fails loudly instead of mid-build.
pub fn make_temporary_directories(ctx: &mut StageContext<'_>) -> Result<()> {
	for dir in [ctx.workspace.root(), ctx.workspace.unpack(), ctx.workspace.volumes(), ctx.workspace.chroot(), ctx.workspace.scratch()] {
		if !dir.is_dir() {
			return Err(CoreError::Resource(format!("expected workspace directory {} to exist", dir.display())).into());
		}
	}
	Ok(())
}

/// `determine-output-directory`: ensures the `--output-dir` target
/// exists before any artifact stage tries to write into it.
pub fn determine_output_directory(ctx: &mut StageContext<'_>) -> Result<()> {
	std::fs::create_dir_all(ctx.output_dir)?;
	Ok(())
}

/// `build-gadget-tree`: clones a git gadget source or copies a local
/// directory source into `<workdir>/unpack/gadget`.
pub fn build_gadget_tree(ctx: &mut StageContext<'_>) -> Result<()> {
	let gadget = ctx.def.gadget.as_ref().ok_or_else(|| eyre!("build-gadget-tree ran without a gadget source"))?;
	let dest = ctx.workspace.gadget_tree();

	match gadget.kind {
		GadgetType::Git => {
			let mut cmd = crate::cmd!("git", "clone", "--depth", "1");
			if let Some(branch) = &gadget.branch {
				cmd.args(["--branch", branch.as_str()]);
			}
			cmd.args([gadget.url.as_str(), &dest.to_string_lossy()]);
			run_checked(&mut cmd)?;

			if let Some(git_ref) = &gadget.git_ref {
				run_checked(&mut crate::cmd!("git", "-C", &dest, "checkout", git_ref))?;
			}
		},
		GadgetType::Directory => {
			run_checked(&mut crate::cmd!("cp", "-a", "--reflink=auto", format!("{}/.", gadget.url), &dest))?;
		},
		GadgetType::Prebuilt => unreachable!("calculator never schedules build-gadget-tree for a prebuilt gadget"),
	}

	info!(dest = %dest.display(), "gadget tree materialized");
	Ok(())
}

/// `prepare-gadget-tree`: resolves the `target` subdirectory (when the
/// gadget source names one) and verifies `meta/gadget.yaml` is present
/// at the resolved root, for every gadget kind including `prebuilt`
/// (whose tree is `gadget.url` itself, already on disk).
pub fn prepare_gadget_tree(ctx: &mut StageContext<'_>) -> Result<()> {
	let gadget = ctx.def.gadget.as_ref().ok_or_else(|| eyre!("prepare-gadget-tree ran without a gadget source"))?;

	let tree_root = if matches!(gadget.kind, GadgetType::Prebuilt) {
		std::path::PathBuf::from(&gadget.url)
	} else {
		ctx.workspace.gadget_tree()
	};

	let resolved = match &gadget.target {
		Some(target) => tree_root.join(target),
		None => tree_root,
	};

	let yaml_path = resolved.join("meta/gadget.yaml");
	if !yaml_path.is_file() {
		return Err(CoreError::Data(format!("gadget.yaml not found at {}", yaml_path.display())).into());
	}

	if resolved != ctx.workspace.gadget_tree() {
		run_checked(&mut crate::cmd!("cp", "-a", "--reflink=auto", format!("{}/.", resolved.display()), ctx.workspace.gadget_tree()))?;
	}

	Ok(())
}

/// `load-gadget-yaml`: parses and post-processes `gadget.yaml`,
/// storing the result on the stage context and stamping the resumable
/// metadata's `volume_order` (§3, §4.2).
pub fn load_gadget_yaml(ctx: &mut StageContext<'_>) -> Result<()> {
	let yaml_path = ctx.workspace.gadget_tree().join("meta/gadget.yaml");
	let bytes = std::fs::read(&yaml_path)?;
	let info = gadget::parse_and_post_process(&bytes)?;

	ctx.metadata.volume_order = gadget::volume_order(&info);
	ctx.metadata.gadget_info = Some(info.clone());
	*ctx.gadget = Some(info);

	Ok(())
}
