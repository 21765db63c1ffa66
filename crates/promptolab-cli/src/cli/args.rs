use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptolab",
    version,
    about = "Prompt regression testing: record baseline outputs, then grade new prompts and models against them"
)]
pub struct Cli {
    /// Settings file (YAML). Missing file means defaults.
    #[arg(long, global = true, default_value = "promptolab.yaml", env = "PROMPTOLAB_SETTINGS")]
    pub settings: PathBuf,

    /// Directory holding test sets [default: settings store_dir, else .promptolab/test_sets]
    #[arg(long, global = true, env = "PROMPTOLAB_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Log output format (filter with RUST_LOG)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate baseline outputs for every case of a test set
    Baseline(BaselineArgs),
    /// Re-run a test set under new settings and grade against the baselines
    Eval(EvalArgs),
    /// Write a settings file with default values
    Init(InitArgs),
    /// List models offered by the configured backend
    Models(ModelsArgs),
    /// Create, inspect and delete test sets
    Sets(SetsArgs),
    Version,
}

/// Overrides for the settings file. Unset flags leave settings untouched.
#[derive(Args, Clone, Debug, Default)]
pub struct EngineArgs {
    /// Backend: llm_cmd (the `llm` tool) or http (OpenAI-compatible endpoints)
    #[arg(long)]
    pub backend: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// Maximum cases in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Path of the `llm` executable
    #[arg(long)]
    pub llm_program: Option<PathBuf>,

    /// Fail instead of warning when the model is not offered by the backend
    #[arg(long)]
    pub strict_models: bool,
}

#[derive(Args, Clone, Debug)]
pub struct BaselineArgs {
    #[arg(long)]
    pub test_set: String,

    /// Replace the test set's system prompt before generating
    #[arg(long)]
    pub system_prompt: Option<String>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Clone, Debug)]
pub struct EvalArgs {
    #[arg(long)]
    pub test_set: String,

    /// System prompt under test [default: the test set's own]
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Grader model [default: settings grader.model, else the evaluation model]
    #[arg(long)]
    pub grader_model: Option<String>,

    /// Write the full report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Write the full report as Markdown
    #[arg(long)]
    pub report_md: Option<PathBuf>,

    /// Do not save current outputs back into the test set
    #[arg(long)]
    pub no_save: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Clone, Debug)]
pub struct InitArgs {
    /// Overwrite an existing settings file
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Clone, Debug)]
pub struct ModelsArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Clone, Debug)]
pub struct SetsArgs {
    #[command(subcommand)]
    pub cmd: SetsSub,
}

#[derive(Subcommand, Clone, Debug)]
pub enum SetsSub {
    /// List stored test sets
    List,
    /// Print a test set as JSON
    Show { name: String },
    /// Create a test set, or append cases to an existing one
    Add {
        name: String,
        /// Case input; repeatable
        #[arg(long = "input")]
        inputs: Vec<String>,
        /// Read one case input per non-empty line
        #[arg(long)]
        from_file: Option<PathBuf>,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Delete a test set
    Delete { name: String },
}
