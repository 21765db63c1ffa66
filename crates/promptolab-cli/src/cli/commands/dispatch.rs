use super::super::args::{Cli, Command};
use super::provider_builder::CliContext;
use crate::exit_codes::EXIT_SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let ctx = CliContext {
        settings_path: cli.settings,
        store_dir: cli.store_dir,
    };
    match cli.cmd {
        Command::Baseline(args) => super::baseline::run(&ctx, args).await,
        Command::Eval(args) => super::eval::run(&ctx, args).await,
        Command::Init(args) => super::init::run(&ctx, args),
        Command::Models(args) => super::models::run(&ctx, args).await,
        Command::Sets(args) => super::sets::run(&ctx, args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_SUCCESS)
        }
    }
}
