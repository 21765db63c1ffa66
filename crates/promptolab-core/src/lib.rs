//! Evaluation engine for prompt regression testing.
//!
//! A [`model::TestSet`] gets reference outputs from the
//! [`engine::baseline::BaselineGenerator`], then is re-run under a new
//! [`model::EvaluationConfig`] by the [`engine::evaluate::EvaluationOrchestrator`],
//! which scores every case with the [`similarity::SimilarityScorer`] and the
//! [`grader::LlmGrader`]. [`report::ReportBuilder`] turns the resulting
//! [`model::EvaluationRun`] into an exportable document.

pub mod config;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod grader;
pub mod model;
pub mod preflight;
pub mod providers;
pub mod report;
pub mod similarity;
pub mod storage;

pub use errors::{CaseError, EngineError, EngineResult, ErrorKind};
