use anyhow::Result;

use crate::context::ContextManager;
use crate::llm::Transport;
use crate::util::{Prompter, print_notice};

pub async fn run_define_context<P, T>(
    ctx: &ContextManager,
    input: &mut P,
    transport: &T,
    summary_model: &str,
    force_new: bool,
    initial_prompt: &str,
) -> Result<()>
where
    P: Prompter,
    T: Transport,
{
    let saved = ctx
        .prompt_for_local_context(input, transport, summary_model, force_new, initial_prompt)
        .await?;
    if saved {
        println!("Run `ask \"your question\"` to use it, or `ask --chat` to start a conversation.");
    } else {
        print_notice("Local context not saved.");
    }
    Ok(())
}
