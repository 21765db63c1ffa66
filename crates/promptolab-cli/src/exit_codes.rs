//! Process exit codes. Part of the public contract.

use promptolab_core::EngineError;

pub const EXIT_SUCCESS: i32 = 0;
/// Some cases failed or regressed, or the run was partial.
pub const EXIT_CASE_FAILURES: i32 = 1;
/// Bad settings, flags or test set.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Backend unreachable, quota exhausted or storage failure.
pub const EXIT_PROVIDER_ERROR: i32 = 3;

/// Exit code for a command that failed outright.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<EngineError>())
        .map(EngineError::exit_code)
        .unwrap_or(EXIT_CONFIG_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn engine_errors_keep_their_code_through_context() {
        let err = Err::<(), _>(EngineError::quota("429"))
            .context("evaluating test set")
            .unwrap_err();
        assert_eq!(for_error(&err), EXIT_PROVIDER_ERROR);

        let err = Err::<(), _>(EngineError::validation("empty"))
            .context("loading")
            .unwrap_err();
        assert_eq!(for_error(&err), EXIT_CONFIG_ERROR);

        assert_eq!(for_error(&anyhow::anyhow!("other")), EXIT_CONFIG_ERROR);
    }
}
