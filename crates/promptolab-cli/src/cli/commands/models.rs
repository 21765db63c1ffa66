use super::super::args::ModelsArgs;
use super::provider_builder::{self, CliContext};
use crate::exit_codes::EXIT_SUCCESS;
use anyhow::Context;

pub(crate) async fn run(ctx: &CliContext, args: ModelsArgs) -> anyhow::Result<i32> {
    let settings = ctx.settings(&args.engine)?;
    let provider = provider_builder::provider(&settings)?;
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("listing models from {}", provider.provider_name()))?;
    for m in models {
        println!("{m}");
    }
    Ok(EXIT_SUCCESS)
}
