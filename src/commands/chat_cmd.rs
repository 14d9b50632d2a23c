use anyhow::Result;

use crate::chat::{ChatOptions, ChatSession, run_chat};
use crate::context::ContextManager;
use crate::history::HistoryManager;
use crate::llm::Transport;
use crate::prompt::chat_seed;
use crate::resolve::Invocation;
use crate::util::Prompter;

pub async fn run_chat_mode<P, T>(
    inv: &Invocation,
    ctx: &ContextManager,
    history: &HistoryManager,
    input: &mut P,
    transport: &T,
) -> Result<()>
where
    P: Prompter,
    T: Transport,
{
    let remember = inv.use_memory();
    let seed = chat_seed(ctx, history, inv.use_context(), remember);
    let session = ChatSession::new(
        ChatOptions {
            model: &inv.model,
            system_instruction: inv.system_instruction.as_deref(),
            params: inv.params,
            stream: inv.stream,
        },
        seed,
        remember.then_some(history),
    );
    run_chat(input, transport, session).await
}
