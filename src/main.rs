mod chat;
mod cli;
mod commands;
mod config;
mod context;
mod history;
mod llm;
mod prompt;
mod resolve;
mod store;
mod util;

use std::process::ExitCode;

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, parse_args, usage, version};
use crate::commands::{run_admin, run_chat_mode, run_define_context, run_single_shot};
use crate::config::{StorePaths, load_config_or_default};
use crate::context::{ContextManager, Tier};
use crate::history::HistoryManager;
use crate::llm::GeminiClient;
use crate::resolve::{Mode, ResolveError, resolve};
use crate::util::{LineInput, print_error, print_warning};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => return usage_error(&ResolveError::from(err)),
    };
    if cli.help {
        println!("{}", usage());
        return ExitCode::SUCCESS;
    }
    if cli.version {
        println!("{}", version());
        return ExitCode::SUCCESS;
    }
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            print_error(&format!("Error: {err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn usage_error(err: &ResolveError) -> ExitCode {
    print_error(&format!("Error: {err}"));
    eprintln!();
    eprintln!("{}", usage());
    ExitCode::FAILURE
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = load_config_or_default()?;
    let paths = StorePaths::resolve()?;
    let ctx = ContextManager::new(&paths);
    let history = HistoryManager::new(&paths.history);

    let inv = match resolve(cli, &cfg.default_model, ctx.exists(Tier::Local)) {
        Ok(inv) => inv,
        Err(err) => return Ok(usage_error(&err)),
    };
    for warning in &inv.warnings {
        print_warning(warning);
    }
    debug!(mode = ?inv.mode, model = %inv.model, "resolved invocation");

    let client = GeminiClient::new(&cfg);
    let mut input = LineInput::open();
    match &inv.mode {
        Mode::Administrative(actions) => run_admin(actions, &history, &ctx)?,
        Mode::DefineContext { force_new } => {
            run_define_context(
                &ctx,
                &mut input,
                &client,
                &cfg.default_model,
                *force_new,
                &inv.prompt,
            )
            .await?
        }
        Mode::Chat => run_chat_mode(&inv, &ctx, &history, &mut input, &client).await?,
        Mode::SingleShot => run_single_shot(&inv, &ctx, &history, &client).await?,
    }
    Ok(ExitCode::SUCCESS)
}
