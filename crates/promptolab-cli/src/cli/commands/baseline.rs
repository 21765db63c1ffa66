use super::super::args::BaselineArgs;
use super::provider_builder::{self, CliContext};
use crate::exit_codes::{EXIT_CASE_FAILURES, EXIT_PROVIDER_ERROR, EXIT_SUCCESS};
use anyhow::Context;
use promptolab_core::engine::baseline::{BaselineGenerator, BaselineSummary};
use promptolab_core::report::console;

pub(crate) async fn run(ctx: &CliContext, args: BaselineArgs) -> anyhow::Result<i32> {
    let settings = ctx.settings(&args.engine)?;
    let store = ctx.store(&settings);
    let mut test_set = store
        .load(&args.test_set)
        .with_context(|| format!("loading test set '{}'", args.test_set))?;

    // The recorded baseline prompt must be the one the outputs came from.
    if let Some(prompt) = args.system_prompt {
        test_set.system_prompt = Some(prompt);
    }

    let provider = provider_builder::provider(&settings)?;
    provider_builder::preflight(provider.as_ref(), &settings, &[settings.model.as_str()]).await?;

    let config = settings.evaluation_config(None);
    let generator =
        BaselineGenerator::new(provider, settings.runner_config(), settings.retry_policy());
    let progress = console::default_progress_sink("Generating baselines", test_set.len());
    let handle = generator.start(test_set, &config, progress)?;

    let interrupt = provider_builder::cancel_on_ctrl_c(handle.cancel_handle());
    let outcome = handle.wait().await;
    interrupt.abort();
    let outcome = outcome.context("baseline generation")?;

    let path = store.save(&outcome.test_set)?;
    console::print_baseline_summary(&outcome.summary);
    eprintln!("Saved {}", path.display());
    Ok(exit_code(&outcome.summary))
}

fn exit_code(summary: &BaselineSummary) -> i32 {
    if summary.halted.is_some() {
        EXIT_PROVIDER_ERROR
    } else if summary.is_clean() {
        EXIT_SUCCESS
    } else {
        EXIT_CASE_FAILURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptolab_core::{CaseError, EngineError};

    #[test]
    fn exit_code_reflects_summary() {
        let mut s = BaselineSummary {
            succeeded: 3,
            ..Default::default()
        };
        assert_eq!(exit_code(&s), EXIT_SUCCESS);
        s.not_dispatched = 1;
        assert_eq!(exit_code(&s), EXIT_CASE_FAILURES);
        s.halted = Some(CaseError::new("c2", &EngineError::quota("429")));
        assert_eq!(exit_code(&s), EXIT_PROVIDER_ERROR);
    }
}
