use crate::grader::GraderConfig;
use crate::model::EvaluationConfig;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Deterministic fingerprint of everything that shapes a run's outputs.
///
/// Unset parameters are recorded as empty so that "backend default" and an
/// explicit value never collide.
pub fn compute(
    config: &EvaluationConfig,
    system_prompt: Option<&str>,
    grader: &GraderConfig,
) -> Fingerprint {
    fn opt<T: ToString>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_default()
    }

    let parts = vec![
        format!("model={}", config.model),
        format!("temperature={}", opt(config.temperature)),
        format!("max_tokens={}", opt(config.max_tokens)),
        format!("top_p={}", opt(config.top_p)),
        format!("system_prompt={}", system_prompt.unwrap_or_default()),
        format!(
            "grader_model={}",
            grader.model.as_deref().unwrap_or(&config.model)
        ),
        format!("grader_temperature={}", opt(grader.temperature)),
        format!("engine_version={}", env!("CARGO_PKG_VERSION")),
    ];

    let hex = sha256_hex(&parts.join("\n"));
    Fingerprint {
        hex,
        components: parts,
    }
}
