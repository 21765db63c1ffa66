use super::super::args::EvalArgs;
use super::provider_builder::{self, CliContext};
use crate::exit_codes::{EXIT_CASE_FAILURES, EXIT_PROVIDER_ERROR, EXIT_SUCCESS};
use anyhow::Context;
use promptolab_core::engine::evaluate::{EvaluationOrchestrator, ResultSink};
use promptolab_core::grader::LlmGrader;
use promptolab_core::model::{CaseStatus, EvaluationResult, EvaluationRun};
use promptolab_core::report::{console, json, markdown, ReportBuilder};
use promptolab_core::similarity::SimilarityScorer;

pub(crate) async fn run(ctx: &CliContext, args: EvalArgs) -> anyhow::Result<i32> {
    let mut settings = ctx.settings(&args.engine)?;
    if let Some(m) = args.grader_model {
        settings.grader.model = Some(m);
    }
    let store = ctx.store(&settings);
    let mut test_set = store
        .load(&args.test_set)
        .with_context(|| format!("loading test set '{}'", args.test_set))?;

    let provider = provider_builder::provider(&settings)?;
    let config = settings.evaluation_config(args.system_prompt);
    let grader = LlmGrader::new(
        provider.clone(),
        settings.grader_config(),
        settings.retry_policy(),
    );

    let mut models = vec![config.model.as_str()];
    let grader_model = grader.model_for(&config.model);
    if grader_model != config.model {
        models.push(grader_model);
    }
    provider_builder::preflight(provider.as_ref(), &settings, &models).await?;

    let orchestrator = EvaluationOrchestrator::new(
        provider.clone(),
        SimilarityScorer::new(provider.clone(), settings.retry_policy()),
        grader,
        settings.runner_config(),
        settings.retry_policy(),
    );
    let sink: ResultSink = Box::new(|r: &EvaluationResult| {
        eprintln!("{}", console::format_result_line(r));
    });
    let handle = orchestrator.start(&test_set, &config, Some(sink), None)?;
    eprintln!("Evaluating {} cases (run {})", test_set.len(), handle.run_id());

    let interrupt = provider_builder::cancel_on_ctrl_c(handle.cancel_handle());
    let run = handle.wait().await;
    interrupt.abort();
    let run = run.context("evaluation")?;

    if !args.no_save {
        test_set.record_run(&run);
        store.save(&test_set)?;
    }

    if args.report_json.is_some() || args.report_md.is_some() {
        let report = ReportBuilder::build(&run);
        if let Some(path) = &args.report_json {
            json::write_json(&report, path)?;
            eprintln!("Wrote {}", path.display());
        }
        if let Some(path) = &args.report_md {
            std::fs::write(path, markdown::render_markdown(&report))
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
    }

    console::print_summary(&run);
    Ok(exit_code(&run))
}

fn exit_code(run: &EvaluationRun) -> i32 {
    if run.summary.halted.is_some() {
        return EXIT_PROVIDER_ERROR;
    }
    let regressed = run
        .results
        .iter()
        .any(|r| r.status == CaseStatus::Failed || r.grade.is_pass() == Some(false));
    if regressed || run.summary.partial {
        EXIT_CASE_FAILURES
    } else {
        EXIT_SUCCESS
    }
}
