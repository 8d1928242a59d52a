#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::format_push_string)]
#![warn(clippy::get_unwrap)]
#![allow(clippy::missing_inline_in_public_items)]
#![allow(clippy::implicit_return)]
#![allow(clippy::blanket_clippy_restriction_lints)]
#![allow(clippy::pattern_type_mismatch)]

use clap::Parser;
use color_eyre::Result;
use tracing::{info, trace, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use ubuntu_image_core::{
	calculator,
	cli::{ImageCoreCli, Validation},
	definition,
	engine::{Engine, RunOptions},
	ports::Ports,
};

fn main() -> Result<()> {
	if let Err(e) = dotenvy::dotenv() {
		if !e.not_found() {
			return Err(e.into());
		}
	}

	color_eyre::install()?;

	let cli = ImageCoreCli::parse();

	let filter = EnvFilter::try_from_env("IMAGE_CORE_LOG").unwrap_or_else(|_| EnvFilter::new(cli.default_filter_directive()));
	let fmtlyr = fmt::layer().pretty().with_filter(filter);
	let subscriber = Registry::default().with(tracing_error::ErrorLayer::default()).with(fmtlyr);
	tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
	trace!("starting up");

	sudo::escalate_if_needed().expect("failed to escalate to root");

	let mut def = definition::load(&cli.definition)?;
	if let Err(e) = definition::default_and_validate(&mut def) {
		if cli.validation == Some(Validation::Ignore) {
			warn!(error = %e, "ignoring image definition validation failure (--validation ignore)");
		} else {
			return Err(e);
		}
	}

	if cli.validate {
		info!(name = %def.name, "image definition is valid");
		return Ok(());
	}

	let stage_plan = calculator::calculate(&def, cli.disk_info);
	if cli.dry_run {
		for stage in &stage_plan {
			println!("{stage}");
		}
		println!("finish");
		return Ok(());
	}

	let options = RunOptions {
		workdir: cli.workdir,
		resume: cli.resume,
		until: cli.until,
		thru: cli.thru,
		output_dir: cli.output_dir,
		dry_run: cli.dry_run,
		disk_info: cli.disk_info,
		image_size: cli.size,
		channel: cli.channel,
	};

	let mut engine = Engine::setup(def, cli.definition, options, Ports::default())?;

	info!("building image");
	engine.run()?;

	info!("image build complete");
	Ok(())
}
