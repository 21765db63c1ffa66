use super::super::args::{EngineArgs, SetsArgs, SetsSub};
use super::provider_builder::CliContext;
use crate::exit_codes::EXIT_SUCCESS;
use anyhow::{bail, Context};
use promptolab_core::model::TestSet;
use std::path::Path;

pub(crate) fn run(ctx: &CliContext, args: SetsArgs) -> anyhow::Result<i32> {
    let settings = ctx.settings(&EngineArgs::default())?;
    let store = ctx.store(&settings);
    match args.cmd {
        SetsSub::List => {
            for name in store.list()? {
                println!("{name}");
            }
        }
        SetsSub::Show { name } => {
            let test_set = store.load(&name)?;
            println!("{}", serde_json::to_string_pretty(&test_set)?);
        }
        SetsSub::Add {
            name,
            inputs,
            from_file,
            system_prompt,
        } => {
            let mut inputs = inputs;
            if let Some(path) = &from_file {
                inputs.extend(read_lines(path)?);
            }
            if inputs.is_empty() && system_prompt.is_none() {
                bail!("nothing to add: pass --input, --from-file or --system-prompt");
            }
            let mut test_set = if store.exists(&name) {
                store.load(&name)?
            } else {
                TestSet::new(name.as_str())
            };
            if system_prompt.is_some() {
                test_set.system_prompt = system_prompt;
            }
            for input in inputs {
                test_set.add_case(input);
            }
            let path = store.save(&test_set)?;
            eprintln!(
                "{} now has {} cases ({})",
                test_set.name,
                test_set.len(),
                path.display()
            );
        }
        SetsSub::Delete { name } => {
            if !store.delete(&name)? {
                bail!("test set '{name}' not found in {}", store.dir().display());
            }
            eprintln!("Deleted {name}");
        }
    }
    Ok(EXIT_SUCCESS)
}

/// One case input per non-empty line.
fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_lines(&text))
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
