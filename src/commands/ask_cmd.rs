use anyhow::{Result, bail};
use crossterm::style::Stylize;
use tracing::debug;

use crate::context::ContextManager;
use crate::history::HistoryManager;
use crate::llm::{GenerateRequest, Transport, TransportError, require_text};
use crate::prompt::{SingleShotInput, compose_single_shot, context_text};
use crate::resolve::Invocation;
use crate::util::print_warning;

pub async fn run_single_shot<T: Transport>(
    inv: &Invocation,
    ctx: &ContextManager,
    history: &HistoryManager,
    transport: &T,
) -> Result<()> {
    let context = if inv.use_context() {
        context_text(ctx)
    } else {
        None
    };
    let composed = compose_single_shot(&SingleShotInput {
        prompt: &inv.prompt,
        file: inv.file.as_deref(),
        image: inv.image.as_deref(),
        system_instruction: inv.system_instruction.as_deref(),
        context: context.as_deref(),
    })?;
    if composed.context_dropped {
        print_warning(
            "Warning: the local/general context was not added to the prompt because --system-instruction was given.",
        );
    }

    let messages = [composed.message];
    let request = GenerateRequest {
        model: &inv.model,
        messages: &messages,
        params: inv.params,
        system_instruction: inv.system_instruction.as_deref(),
    };
    debug!(model = %inv.model, stream = inv.stream, "single-shot request");

    println!("{}", "Gemini:".green().bold());
    let response = match transport
        .generate(&request, inv.stream)
        .await
        .and_then(require_text)
    {
        Ok(response) => response,
        Err(TransportError::StreamInterrupted { message, .. }) => {
            println!();
            bail!("Response interrupted: {message}");
        }
        Err(err) => return Err(err.into()),
    };
    if inv.stream {
        println!();
    } else {
        println!("{response}");
    }

    if inv.use_memory() {
        if let Err(err) = history.record(&inv.model, &composed.recorded, &response) {
            print_warning(&format!("Warning: failed to save chat history: {err:#}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse_args;
    use crate::config::StorePaths;
    use crate::context::Tier;
    use crate::llm::ConversationMessage;
    use crate::llm::testing::{FakeTransport, block_on};
    use crate::resolve::resolve;

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: ContextManager,
        history: HistoryManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::rooted(dir.path(), dir.path());
        Fixture {
            ctx: ContextManager::new(&paths),
            history: HistoryManager::new(&paths.history),
            _dir: dir,
        }
    }

    fn invocation(args: &[&str]) -> Invocation {
        resolve(parse_args(args.iter().copied()).unwrap(), "gemini-test", true).unwrap()
    }

    #[test]
    fn context_is_prefixed_and_exchange_recorded() {
        let fx = fixture();
        fx.ctx.set(Tier::Local, "a todo app").unwrap();
        let transport = FakeTransport::replying(vec![Ok("use clap".to_string())]);
        let inv = invocation(&["how", "to", "parse", "args?"]);

        block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).unwrap();

        let seen = transport.seen.borrow();
        assert_eq!(
            seen[0],
            vec![ConversationMessage::user("LOCAL CONTEXT: a todo app\n\nhow to parse args?")]
        );
        assert_eq!(
            fx.history.load(),
            vec![
                ConversationMessage::user("how to parse args?"),
                ConversationMessage::model("use clap"),
            ]
        );
    }

    #[test]
    fn system_instruction_replaces_context() {
        let fx = fixture();
        fx.ctx.set(Tier::General, "always be polite").unwrap();
        let transport = FakeTransport::replying(vec![Ok("ok".to_string())]);
        let inv = invocation(&["--system-instruction", "Be terse", "hello"]);

        block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).unwrap();

        assert_eq!(transport.seen.borrow()[0], vec![ConversationMessage::user("hello")]);
        assert_eq!(transport.instructions.borrow()[0].as_deref(), Some("Be terse"));
    }

    #[test]
    fn disabled_context_and_memory_are_respected() {
        let fx = fixture();
        fx.ctx.set(Tier::Local, "ignored").unwrap();
        let transport = FakeTransport::replying(vec![Ok("ok".to_string())]);
        let inv = invocation(&["--disable-context", "--disable-chat-memory", "hello"]);

        block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).unwrap();

        assert_eq!(transport.seen.borrow()[0], vec![ConversationMessage::user("hello")]);
        assert!(fx.history.load().is_empty());
    }

    #[test]
    fn transport_failure_records_nothing() {
        let fx = fixture();
        let transport = FakeTransport::replying(vec![Err(TransportError::StreamInterrupted {
            partial: "half an ans".to_string(),
            message: "connection reset".to_string(),
        })]);
        let inv = invocation(&["--stream", "hello"]);

        let err = block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).unwrap_err();
        assert!(err.to_string().contains("interrupted"));
        assert!(fx.history.load().is_empty());
    }

    #[test]
    fn empty_reply_fails_and_records_nothing() {
        let fx = fixture();
        let transport = FakeTransport::replying(vec![Ok("  ".to_string())]);
        let inv = invocation(&["hello"]);

        let err = block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).unwrap_err();
        assert!(err.to_string().contains("empty response"));
        assert!(fx.history.load().is_empty());
    }

    #[test]
    fn missing_file_fails_before_any_call() {
        let fx = fixture();
        let transport = FakeTransport::default();
        let inv = invocation(&["--file", "/definitely/not/here.txt", "q"]);

        assert!(block_on(run_single_shot(&inv, &fx.ctx, &fx.history, &transport)).is_err());
        assert!(transport.seen.borrow().is_empty());
    }
}
