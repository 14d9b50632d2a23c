use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::config::StorePaths;
use crate::llm::{ConversationMessage, GenerateRequest, GenerationParams, Transport};
use crate::store;
use crate::util::{Prompter, print_error, print_notice, print_success, print_warning};

pub const ACKNOWLEDGMENT: &str = "Understood.";

const CONTEXT_EXAMPLE: &str = "Tell me what we will be working on. For example: \"I'm writing a Node.js desktop app with MySQL and React that queries Telegram through a bot.\"";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tier {
    Local,
    General,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::Local => "LOCAL CONTEXT",
            Tier::General => "GENERAL CONTEXT",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::General => "general",
        }
    }
}

pub struct ContextManager {
    local: PathBuf,
    general: PathBuf,
}

impl ContextManager {
    pub fn new(paths: &StorePaths) -> Self {
        Self {
            local: paths.local_context.clone(),
            general: paths.general_context.clone(),
        }
    }

    pub fn path(&self, tier: Tier) -> &Path {
        match tier {
            Tier::Local => &self.local,
            Tier::General => &self.general,
        }
    }

    /// Trimmed context text, or `None` when the tier is empty or absent.
    pub fn text(&self, tier: Tier) -> Option<String> {
        let text = store::read_text(self.path(tier));
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn exists(&self, tier: Tier) -> bool {
        self.text(tier).is_some()
    }

    /// `[labelled user turn, acknowledgment]`, or nothing for an empty tier.
    pub fn primer(&self, tier: Tier) -> Vec<ConversationMessage> {
        match self.text(tier) {
            Some(text) => vec![
                ConversationMessage::user(format!("{}: {}", tier.label(), text)),
                ConversationMessage::model(ACKNOWLEDGMENT),
            ],
            None => Vec::new(),
        }
    }

    pub fn set(&self, tier: Tier, text: &str) -> Result<()> {
        store::write_text(self.path(tier), text.trim())
    }

    pub fn clear(&self, tier: Tier) -> Result<bool> {
        store::remove(self.path(tier))
    }

    /// Interactive definition of the local context. Returns whether a context was saved.
    pub async fn prompt_for_local_context<P, T>(
        &self,
        input: &mut P,
        transport: &T,
        summary_model: &str,
        force_new: bool,
        initial_prompt: &str,
    ) -> Result<bool>
    where
        P: Prompter,
        T: Transport,
    {
        print_notice("\n--- LOCAL PROJECT CONTEXT ---");
        let existed = self.exists(Tier::Local);

        let question = if force_new {
            println!("You asked for a new local context. The existing one will be overwritten.");
            println!("{CONTEXT_EXAMPLE}");
            "Your new project context (leave empty to delete the existing one)? "
        } else {
            println!("There is no local project context defined for this directory.");
            println!("It is the \"explanation of what you will do here\".");
            println!("{CONTEXT_EXAMPLE}");
            "Your project context (leave empty to skip)? "
        };

        let answer = if initial_prompt.trim().is_empty() {
            input.ask(question)?.unwrap_or_default()
        } else {
            match summarize_context(transport, summary_model, initial_prompt).await {
                Ok(proposal) => {
                    print_notice("\nProposed context:");
                    println!("\"{proposal}\"");
                    let confirm = input.ask("Is this right? (Y/n) ")?.unwrap_or_default();
                    if is_rejection(&confirm) {
                        println!("Enter your own context, or leave it empty:");
                        input.ask("Your context: ")?.unwrap_or_default()
                    } else {
                        proposal
                    }
                }
                Err(err) => {
                    print_warning(
                        "Warning: could not generate a context proposal. Please enter the context manually.",
                    );
                    print_error(&format!("Context proposal error: {err}"));
                    input
                        .ask("Your project context (leave empty to skip/delete): ")?
                        .unwrap_or_default()
                }
            }
        };

        let answer = answer.trim();
        if !answer.is_empty() {
            self.set(Tier::Local, answer)?;
            print_success(&format!(
                "Local context saved to {}.",
                self.path(Tier::Local).display()
            ));
            return Ok(true);
        }
        if force_new && existed {
            self.clear(Tier::Local)?;
            print_notice("Existing local context deleted.");
        }
        Ok(false)
    }
}

fn is_rejection(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no")
}

fn summary_instruction(text: &str) -> String {
    format!(
        "Based on the following text, write one concise sentence (50 words at most) that can serve \
         as the project context for my AI assistant, focused on what I will be working on or its main \
         purpose. If the text is a question, rephrase it as a context statement. Example format: \
         \"I am building an app with X for Y\". Text: \"{text}\""
    )
}

async fn summarize_context<T: Transport>(
    transport: &T,
    model: &str,
    initial_prompt: &str,
) -> Result<String> {
    debug!(model, "requesting context summary");
    let messages = vec![ConversationMessage::user(summary_instruction(initial_prompt.trim()))];
    let request = GenerateRequest {
        model,
        messages: &messages,
        params: GenerationParams::default(),
        system_instruction: None,
    };
    let proposal = transport.generate(&request, false).await?;
    let proposal = proposal.trim().trim_matches('"').trim().to_string();
    if proposal.is_empty() {
        anyhow::bail!("the model returned an empty proposal");
    }
    Ok(proposal)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::llm::TransportError;
    use crate::llm::testing::{FakeTransport, block_on};
    use crate::util::testing::ScriptedInput;

    fn manager() -> (tempfile::TempDir, ContextManager) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::rooted(dir.path(), dir.path());
        (dir, ContextManager::new(&paths))
    }

    #[test]
    fn primer_is_empty_without_context() {
        let (_dir, ctx) = manager();
        assert!(ctx.primer(Tier::Local).is_empty());
        fs::write(ctx.path(Tier::Local), "  \n").unwrap();
        assert!(ctx.primer(Tier::Local).is_empty());
    }

    #[test]
    fn primer_embeds_label_and_text() {
        let (_dir, ctx) = manager();
        fs::write(ctx.path(Tier::Local), "Building a CLI tool\n").unwrap();
        let primer = ctx.primer(Tier::Local);
        assert_eq!(primer.len(), 2);
        let first = primer[0].joined_text();
        assert!(first.starts_with("LOCAL CONTEXT"));
        assert!(first.contains("Building a CLI tool"));
        assert_eq!(primer[1], ConversationMessage::model(ACKNOWLEDGMENT));
    }

    #[test]
    fn set_trims_and_clear_reports() {
        let (_dir, ctx) = manager();
        ctx.set(Tier::General, "  always answer in English \n").unwrap();
        assert_eq!(ctx.text(Tier::General).as_deref(), Some("always answer in English"));
        assert!(ctx.clear(Tier::General).unwrap());
        assert!(!ctx.clear(Tier::General).unwrap());
        assert!(!ctx.exists(Tier::General));
    }

    #[test]
    fn free_text_answer_is_saved_without_initial_prompt() {
        let (_dir, ctx) = manager();
        let mut input = ScriptedInput::new(["  A Rust CLI for notes  "]);
        let transport = FakeTransport::default();
        let saved = block_on(ctx.prompt_for_local_context(&mut input, &transport, "m", false, ""))
            .unwrap();
        assert!(saved);
        assert_eq!(ctx.text(Tier::Local).as_deref(), Some("A Rust CLI for notes"));
        assert!(transport.seen.borrow().is_empty());
    }

    #[test]
    fn accepted_proposal_is_saved() {
        let (_dir, ctx) = manager();
        let mut input = ScriptedInput::new([""]);
        let transport = FakeTransport::replying(vec![Ok("\"I am building a parser\"\n".to_string())]);
        let saved = block_on(ctx.prompt_for_local_context(
            &mut input,
            &transport,
            "m",
            false,
            "how do I parse toml?",
        ))
        .unwrap();
        assert!(saved);
        assert_eq!(ctx.text(Tier::Local).as_deref(), Some("I am building a parser"));
        let seen = transport.seen.borrow();
        assert!(seen[0][0].joined_text().contains("how do I parse toml?"));
    }

    #[test]
    fn rejected_proposal_asks_for_own_text() {
        let (_dir, ctx) = manager();
        let mut input = ScriptedInput::new(["N", "my own words"]);
        let transport = FakeTransport::replying(vec![Ok("proposal".to_string())]);
        let saved = block_on(ctx.prompt_for_local_context(&mut input, &transport, "m", false, "x"))
            .unwrap();
        assert!(saved);
        assert_eq!(ctx.text(Tier::Local).as_deref(), Some("my own words"));
        assert_eq!(input.asked.len(), 2);
    }

    #[test]
    fn summary_failure_falls_back_to_free_text() {
        let (_dir, ctx) = manager();
        let mut input = ScriptedInput::new(["typed context"]);
        let transport = FakeTransport::replying(vec![Err(TransportError::Request(
            "offline".to_string(),
        ))]);
        let saved = block_on(ctx.prompt_for_local_context(&mut input, &transport, "m", true, "x"))
            .unwrap();
        assert!(saved);
        assert_eq!(ctx.text(Tier::Local).as_deref(), Some("typed context"));
    }

    #[test]
    fn forced_empty_answer_clears_existing_context() {
        let (_dir, ctx) = manager();
        ctx.set(Tier::Local, "old").unwrap();
        let mut input = ScriptedInput::new(["n", ""]);
        let transport = FakeTransport::replying(vec![Ok("proposal".to_string())]);
        let saved = block_on(ctx.prompt_for_local_context(&mut input, &transport, "m", true, "x"))
            .unwrap();
        assert!(!saved);
        assert!(!ctx.path(Tier::Local).exists());
    }

    #[test]
    fn unforced_empty_answer_keeps_things_unchanged() {
        let (_dir, ctx) = manager();
        let mut input = ScriptedInput::new(Vec::<String>::new());
        let transport = FakeTransport::default();
        let saved = block_on(ctx.prompt_for_local_context(&mut input, &transport, "m", false, ""))
            .unwrap();
        assert!(!saved);
        assert!(!ctx.path(Tier::Local).exists());
    }
}
