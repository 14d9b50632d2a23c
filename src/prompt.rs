use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::context::{ContextManager, Tier};
use crate::history::HistoryManager;
use crate::llm::{ConversationMessage, Fragment, Role, attach_image};

/// Labelled context lines (general first), or `None` when neither tier is set.
pub fn context_text(ctx: &ContextManager) -> Option<String> {
    let lines: Vec<String> = [Tier::General, Tier::Local]
        .into_iter()
        .filter_map(|tier| ctx.text(tier).map(|text| format!("{}: {}", tier.label(), text)))
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Chat seed: general primer, local primer, then the stored history.
pub fn chat_seed(
    ctx: &ContextManager,
    history: &HistoryManager,
    use_context: bool,
    use_memory: bool,
) -> Vec<ConversationMessage> {
    let mut messages = Vec::new();
    if use_context {
        messages.extend(ctx.primer(Tier::General));
        messages.extend(ctx.primer(Tier::Local));
    }
    if use_memory {
        messages.extend(history.load());
    }
    messages
}

pub fn file_prompt(file_name: &str, content: &str, question: &str) -> String {
    format!(
        "Based on the content of the following file, answer my question.\n\n\
         --- START OF FILE: {file_name} ---\n\n{content}\n\n--- END OF FILE ---\n\n\
         My question is: {question}"
    )
}

pub fn read_input_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        bail!("File does not exist: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// The single user turn of a one-off request.
#[derive(Debug)]
pub struct ComposedPrompt {
    pub message: ConversationMessage,
    /// What the history keeps of this turn: the user's own words, not the context or file body.
    pub recorded: String,
    /// Context was available but left out because a system instruction was given.
    pub context_dropped: bool,
}

pub struct SingleShotInput<'a> {
    pub prompt: &'a str,
    pub file: Option<&'a Path>,
    pub image: Option<&'a Path>,
    pub system_instruction: Option<&'a str>,
    pub context: Option<&'a str>,
}

pub fn compose_single_shot(input: &SingleShotInput<'_>) -> Result<ComposedPrompt> {
    let has_instruction = input
        .system_instruction
        .is_some_and(|s| !s.trim().is_empty());
    let context = input.context.filter(|c| !c.trim().is_empty());
    let context_dropped = has_instruction && context.is_some();
    let prefix = if has_instruction { None } else { context };

    if let Some(image) = input.image {
        let mut fragments = Vec::new();
        if !input.prompt.is_empty() {
            fragments.push(Fragment::Text(input.prompt.to_string()));
        }
        fragments.push(attach_image(image)?);
        return Ok(ComposedPrompt {
            message: ConversationMessage {
                role: Role::User,
                fragments,
            },
            recorded: input.prompt.to_string(),
            context_dropped,
        });
    }

    let (body, recorded) = match input.file {
        Some(path) => {
            let content = read_input_file(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let recorded = format!("{} [file: {name}]", input.prompt).trim_start().to_string();
            (file_prompt(&name, &content, input.prompt), recorded)
        }
        None => (input.prompt.to_string(), input.prompt.to_string()),
    };
    let text = match prefix {
        Some(prefix) => format!("{prefix}\n\n{body}"),
        None => body,
    };
    Ok(ComposedPrompt {
        message: ConversationMessage::user(text),
        recorded,
        context_dropped,
    })
}
