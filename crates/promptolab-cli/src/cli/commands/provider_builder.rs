//! Settings resolution and provider construction shared by all commands.

use super::super::args::EngineArgs;
use anyhow::Context;
use promptolab_core::config::Settings;
use promptolab_core::engine::CancelHandle;
use promptolab_core::preflight::{check_model, ModelCheck};
use promptolab_core::providers::{build_provider, BackendKind, Provider};
use promptolab_core::storage::TestSetStore;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) const DEFAULT_STORE_DIR: &str = ".promptolab/test_sets";

pub struct CliContext {
    pub settings_path: PathBuf,
    pub store_dir: Option<PathBuf>,
}

impl CliContext {
    /// Settings file, then environment, then flags.
    pub(crate) fn settings(&self, engine: &EngineArgs) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(&self.settings_path)
            .with_context(|| format!("loading settings {}", self.settings_path.display()))?;
        settings.apply_env()?;
        apply_args(&mut settings, engine)?;
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }

    /// Flag, then settings `store_dir`, then the default directory.
    pub(crate) fn store(&self, settings: &Settings) -> TestSetStore {
        let dir = self
            .store_dir
            .clone()
            .or_else(|| settings.store_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
        TestSetStore::new(dir)
    }
}

pub(crate) fn apply_args(settings: &mut Settings, args: &EngineArgs) -> anyhow::Result<()> {
    if let Some(b) = &args.backend {
        settings.provider.backend = b.parse::<BackendKind>()?;
    }
    if let Some(m) = &args.model {
        settings.model = m.clone();
    }
    if args.temperature.is_some() {
        settings.temperature = args.temperature;
    }
    if args.max_tokens.is_some() {
        settings.max_tokens = args.max_tokens;
    }
    if args.top_p.is_some() {
        settings.top_p = args.top_p;
    }
    if let Some(c) = args.concurrency {
        settings.run.concurrency = c;
    }
    if let Some(p) = &args.llm_program {
        settings.provider.llm_program = p.clone();
    }
    if args.strict_models {
        settings.strict_models = true;
    }
    Ok(())
}

pub(crate) fn provider(settings: &Settings) -> anyhow::Result<Arc<dyn Provider>> {
    build_provider(&settings.provider)
        .with_context(|| format!("building {} provider", settings.provider.backend))
}

/// Check each model against the backend list. Warns, or fails under strict mode.
pub(crate) async fn preflight(
    provider: &dyn Provider,
    settings: &Settings,
    models: &[&str],
) -> anyhow::Result<()> {
    for model in models {
        if let ModelCheck::Unknown { suggestion } =
            check_model(provider, model, settings.strict_models).await?
        {
            match suggestion {
                Some(s) => eprintln!("warning: model '{model}' not listed by backend (did you mean '{s}'?)"),
                None => eprintln!("warning: model '{model}' not listed by backend"),
            }
        }
    }
    Ok(())
}

/// Cancel `cancel` on the first Ctrl-C. Abort the returned task once the run is over.
pub(crate) fn cancel_on_ctrl_c(cancel: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted: finishing in-flight cases, no new cases will start");
            cancel.cancel();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let mut s = Settings::default();
        let args = EngineArgs {
            backend: Some("http".into()),
            model: Some("gpt-4o".into()),
            top_p: Some(0.5),
            concurrency: Some(2),
            strict_models: true,
            ..Default::default()
        };
        apply_args(&mut s, &args).unwrap();
        assert_eq!(s.provider.backend, BackendKind::Http);
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.top_p, Some(0.5));
        assert_eq!(s.temperature, None);
        assert_eq!(s.run.concurrency, 2);
        assert!(s.strict_models);
    }

    #[test]
    fn bad_backend_flag_is_rejected() {
        let mut s = Settings::default();
        let args = EngineArgs {
            backend: Some("carrier-pigeon".into()),
            ..Default::default()
        };
        assert!(apply_args(&mut s, &args).is_err());
    }

    #[test]
    fn store_dir_precedence() {
        let mut settings = Settings::default();
        let ctx = CliContext {
            settings_path: "unused.yaml".into(),
            store_dir: None,
        };
        assert_eq!(ctx.store(&settings).dir(), std::path::Path::new(DEFAULT_STORE_DIR));
        settings.store_dir = Some("from-settings".into());
        assert_eq!(ctx.store(&settings).dir(), std::path::Path::new("from-settings"));
        let ctx = CliContext {
            settings_path: "unused.yaml".into(),
            store_dir: Some("from-flag".into()),
        };
        assert_eq!(ctx.store(&settings).dir(), std::path::Path::new("from-flag"));
    }
}
