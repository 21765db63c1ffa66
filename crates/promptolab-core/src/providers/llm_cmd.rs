//! Subprocess backend driving the `llm` command-line tool.

use super::Provider;
use crate::errors::{EngineError, EngineResult};
use crate::model::{ProviderRequest, ProviderResponse};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_EMBEDDING_MODEL: &str = "3-large";

#[derive(Debug, Clone)]
pub struct LlmCmdProvider {
    program: PathBuf,
    embedding_model: Option<String>,
}

impl LlmCmdProvider {
    pub fn new(program: impl Into<PathBuf>, embedding_model: Option<String>) -> Self {
        Self {
            program: program.into(),
            embedding_model,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Arguments for a completion. Unset parameters are left to the tool's defaults.
    pub fn completion_args(request: &ProviderRequest) -> Vec<String> {
        let mut args = vec!["-m".to_string(), request.model.clone()];
        let p = &request.params;
        if let Some(t) = p.temperature {
            args.extend(["-o".to_string(), "temperature".to_string(), t.to_string()]);
        }
        if let Some(m) = p.max_tokens {
            args.extend(["-o".to_string(), "max_tokens".to_string(), m.to_string()]);
        }
        if let Some(tp) = p.top_p {
            args.extend(["-o".to_string(), "top_p".to_string(), tp.to_string()]);
        }
        if let Some(system) = request.system_prompt.as_deref() {
            if !system.is_empty() {
                args.extend(["-s".to_string(), system.to_string()]);
            }
        }
        args
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> EngineResult<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::capability(format!(
                "failed to start '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        let input = child.stdin.take();
        let write = async move {
            if let (Some(mut pipe), Some(text)) = (input, stdin) {
                pipe.write_all(text.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| {
            EngineError::connection(format!(
                "failed to wait for '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(classify_failure(&detail));
        }

        // A write error with a successful exit means the tool stopped reading early.
        if let Err(e) = written {
            debug!(error = %e, "llm stdin write failed");
        }

        String::from_utf8(output.stdout)
            .map_err(|_| EngineError::connection("llm produced non-UTF-8 output"))
    }
}

fn classify_failure(detail: &str) -> EngineError {
    match EngineError::classify_message(detail) {
        EngineError::ProviderQuota { .. } => EngineError::quota(format!("llm: {detail}")),
        EngineError::ProviderCapability { .. } => {
            EngineError::capability(format!("llm: {detail}"))
        }
        e if e.is_timeout() => EngineError::timeout(format!("llm: {detail}")),
        _ => EngineError::connection(format!("llm: {detail}")),
    }
}

/// Parse `llm models` output.
///
/// Lines look like `OpenAI Chat: gpt-4o (aliases: 4o)`. The id is the text
/// after the first colon, cut before any parenthesis.
pub fn parse_models(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("Default:"))
        .filter_map(|line| {
            let (_, rest) = line.split_once(':')?;
            let id = rest.split('(').next().unwrap_or_default().trim();
            (!id.is_empty()).then(|| id.to_string())
        })
        .collect()
}

pub fn parse_embedding(output: &str) -> EngineResult<Vec<f32>> {
    let vector: Vec<f32> = serde_json::from_str(output.trim())
        .map_err(|e| EngineError::connection(format!("malformed embedding output: {e}")))?;
    if vector.is_empty() {
        return Err(EngineError::connection("empty embedding vector"));
    }
    Ok(vector)
}

#[async_trait]
impl Provider for LlmCmdProvider {
    async fn complete(&self, request: &ProviderRequest) -> EngineResult<ProviderResponse> {
        let args = Self::completion_args(request);
        debug!(model = %request.model, args = args.len(), "spawning llm");
        let stdout = self.run(&args, Some(&request.prompt)).await?;
        Ok(ProviderResponse {
            text: stdout.trim().to_string(),
            usage: None,
            provider: self.provider_name().to_string(),
            model: request.model.clone(),
        })
    }

    async fn list_models(&self) -> EngineResult<Vec<String>> {
        let stdout = self.run(&["models".to_string()], None).await?;
        Ok(parse_models(&stdout))
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Err(EngineError::capability("no embedding model configured"));
        };
        let args = [
            "embed".to_string(),
            "-m".to_string(),
            model.to_string(),
            "-c".to_string(),
            text.to_string(),
        ];
        let stdout = self.run(&args, None).await?;
        parse_embedding(&stdout)
    }

    fn provider_name(&self) -> &'static str {
        "llm_cmd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::model::ModelParams;

    #[test]
    fn args_include_only_set_params() {
        let req = ProviderRequest::new("gpt-4o-mini", "hi")
            .with_system_prompt(Some("be brief"))
            .with_params(ModelParams {
                temperature: Some(0.5),
                max_tokens: None,
                top_p: Some(0.9),
            });
        let args = LlmCmdProvider::completion_args(&req);
        assert_eq!(
            args,
            vec![
                "-m",
                "gpt-4o-mini",
                "-o",
                "temperature",
                "0.5",
                "-o",
                "top_p",
                "0.9",
                "-s",
                "be brief"
            ]
        );
    }

    #[test]
    fn args_skip_empty_system_prompt() {
        let req = ProviderRequest::new("m", "hi").with_system_prompt(Some(""));
        assert_eq!(LlmCmdProvider::completion_args(&req), vec!["-m", "m"]);
    }

    #[test]
    fn parses_models_listing() {
        let out = "OpenAI Chat: gpt-4o (aliases: 4o)\n\
                   OpenAI Chat: gpt-4o-mini (aliases: 4o-mini)\n\
                   Anthropic Messages: claude-3-5-sonnet-latest\n\
                   \n\
                   Default: gpt-4o-mini\n";
        assert_eq!(
            parse_models(out),
            vec!["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet-latest"]
        );
    }

    #[test]
    fn parses_embedding_vector() {
        assert_eq!(parse_embedding("[0.5, -1.0]\n").unwrap(), vec![0.5, -1.0]);
        assert!(parse_embedding("nope").is_err());
        assert!(parse_embedding("[]").is_err());
    }

    #[tokio::test]
    async fn missing_program_is_capability_error() {
        let p = LlmCmdProvider::new("/nonexistent/promptolab-llm", None);
        let err = p
            .complete(&ProviderRequest::new("m", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderCapability);
    }

    #[cfg(unix)]
    mod script {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn script(body: &str) -> tempfile::TempPath {
            let mut f = tempfile::Builder::new()
                .prefix("fake-llm")
                .tempfile()
                .unwrap();
            writeln!(f, "#!/bin/sh\n{body}").unwrap();
            let path = f.into_temp_path();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn completion_reads_prompt_from_stdin() {
            let path = script("read -r line; echo \"got: $line $2\"");
            let p = LlmCmdProvider::new(path.to_path_buf(), None);
            let resp = p
                .complete(&ProviderRequest::new("gpt-4o", "hello"))
                .await
                .unwrap();
            assert_eq!(resp.text, "got: hello gpt-4o");
            assert_eq!(resp.provider, "llm_cmd");
        }

        #[tokio::test]
        async fn nonzero_exit_is_classified_from_stderr() {
            let path = script("echo 'Error: Rate limit reached' >&2; exit 1");
            let p = LlmCmdProvider::new(path.to_path_buf(), None);
            let err = p
                .complete(&ProviderRequest::new("m", "x"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProviderQuota);

            let path = script("echo 'Error: Unknown model: nope' >&2; exit 1");
            let p = LlmCmdProvider::new(path.to_path_buf(), None);
            let err = p
                .complete(&ProviderRequest::new("nope", "x"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProviderCapability);

            let path = script("exit 3");
            let p = LlmCmdProvider::new(path.to_path_buf(), None);
            let err = p
                .complete(&ProviderRequest::new("m", "x"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProviderConnection);
        }

        #[tokio::test]
        async fn embed_and_models_use_subcommands() {
            let path = script(
                "case \"$1\" in\n\
                 models) echo 'OpenAI Chat: gpt-4o (aliases: 4o)';;\n\
                 embed) echo '[1.0, 0.0, 0.5]';;\n\
                 esac",
            );
            let p = LlmCmdProvider::new(path.to_path_buf(), Some("3-large".into()));
            assert!(p.supports_embeddings());
            assert_eq!(p.list_models().await.unwrap(), vec!["gpt-4o"]);
            assert_eq!(p.embed("text").await.unwrap(), vec![1.0, 0.0, 0.5]);
        }
    }
}
