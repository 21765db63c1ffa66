//! Pre-flight model check against the backend's model list.

use crate::errors::{EngineError, EngineResult};
use crate::providers::Provider;
use tracing::warn;

/// Minimum normalized Levenshtein similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.55;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelCheck {
    Known,
    Unknown { suggestion: Option<String> },
    /// The backend could not list its models; nothing was checked.
    Unverified { reason: String },
}

pub fn closest_model<'a>(needle: &str, hay: impl IntoIterator<Item = &'a String>) -> Option<String> {
    let mut best: Option<(f64, &String)> = None;
    for candidate in hay {
        let sim = strsim::normalized_levenshtein(needle, candidate);
        if sim >= SUGGESTION_THRESHOLD && best.map_or(true, |(b, _)| sim > b) {
            best = Some((sim, candidate));
        }
    }
    best.map(|(_, c)| c.clone())
}

fn unknown_message(model: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!("model '{model}' is not offered by the backend (did you mean '{s}'?)"),
        None => format!("model '{model}' is not offered by the backend"),
    }
}

/// Check that `model` is listed by `provider`.
///
/// An unknown model is a warning, or a capability error when `strict`.
/// A failed listing never fails the check.
pub async fn check_model(
    provider: &dyn Provider,
    model: &str,
    strict: bool,
) -> EngineResult<ModelCheck> {
    let models = match provider.list_models().await {
        Ok(m) => m,
        Err(e) => {
            warn!(model, error = %e, "could not list models, skipping model check");
            return Ok(ModelCheck::Unverified {
                reason: e.to_string(),
            });
        }
    };
    if models.iter().any(|m| m == model) {
        return Ok(ModelCheck::Known);
    }

    let suggestion = closest_model(model, &models);
    let message = unknown_message(model, suggestion.as_deref());
    if strict {
        return Err(EngineError::capability(message));
    }
    warn!(model, suggestion = ?suggestion, "{message}");
    Ok(ModelCheck::Unknown { suggestion })
}
