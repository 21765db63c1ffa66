use super::super::args::InitArgs;
use super::provider_builder::{apply_args, CliContext};
use crate::exit_codes::EXIT_SUCCESS;
use anyhow::{bail, Context};
use promptolab_core::config::Settings;

/// Write a settings file with defaults plus any flags given. The environment
/// is not consulted, so the file reads the same on every machine.
pub(crate) fn run(ctx: &CliContext, args: InitArgs) -> anyhow::Result<i32> {
    let path = &ctx.settings_path;
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut settings = Settings::default();
    apply_args(&mut settings, &args.engine)?;
    settings.store_dir = ctx.store_dir.clone();
    settings.validate().context("invalid settings")?;
    settings.save(path)?;

    eprintln!("Wrote {} (model {})", path.display(), settings.model);
    Ok(EXIT_SUCCESS)
}
