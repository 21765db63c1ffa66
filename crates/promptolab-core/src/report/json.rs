use crate::errors::{EngineError, EngineResult};
use crate::report::EvaluationReport;
use std::path::Path;

pub fn to_json_string(report: &EvaluationReport) -> EngineResult<String> {
    serde_json::to_string_pretty(report)
        .map_err(|e| EngineError::internal(format!("failed to serialize report: {e}")))
}

pub fn write_json(report: &EvaluationReport, out: &Path) -> EngineResult<()> {
    let body = to_json_string(report)?;
    std::fs::write(out, body)
        .map_err(|e| EngineError::storage(format!("failed to write {}: {e}", out.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{fixtures, ReportBuilder};

    #[test]
    fn writes_pretty_json_with_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json(&ReportBuilder::build(&fixtures::run()), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"metadata\""));
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["metadata"]["model"], "gpt-4o-mini");
        assert_eq!(v["rows"][0]["grade"], "A");
        assert_eq!(v["rows"][3]["error"]["kind"], "provider_connection");
        assert_eq!(v["stats"]["grade_distribution"]["F"], 0);
    }

    #[test]
    fn unwritable_path_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let err = write_json(&ReportBuilder::build(&fixtures::run()), &path).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Storage);
    }
}
