use std::path::PathBuf;

use thiserror::Error;

use crate::cli::{Cli, describe_parse_error};
use crate::config::ModelTier;
use crate::llm::GenerationParams;

/// A flag pair that may be left unset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Toggle {
    #[default]
    Unset,
    On,
    Off,
}

impl Toggle {
    fn from_flags(enable: bool, disable: bool) -> Self {
        match (enable, disable) {
            (true, _) => Toggle::On,
            (_, true) => Toggle::Off,
            _ => Toggle::Unset,
        }
    }

    pub fn effective(self, default_on: bool) -> bool {
        match self {
            Toggle::Unset => default_on,
            Toggle::On => true,
            Toggle::Off => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminActions {
    pub clear_history: bool,
    pub clear_local: bool,
    pub set_local: Option<String>,
    pub clear_general: bool,
    pub set_general: Option<String>,
}

impl AdminActions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            clear_history: cli.clear_history,
            clear_local: cli.clear_context_local,
            set_local: cli.set_context_local.clone(),
            clear_general: cli.clear_context_general,
            set_general: cli.set_context_general.clone(),
        }
    }

    pub fn any(&self) -> bool {
        self.clear_history || self.touches_context()
    }

    pub fn touches_context(&self) -> bool {
        self.clear_local
            || self.set_local.is_some()
            || self.clear_general
            || self.set_general.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Administrative(AdminActions),
    /// Interactive local-context definition; the prompt, if any, seeds a summary.
    DefineContext { force_new: bool },
    Chat,
    SingleShot,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: Mode,
    pub model: String,
    pub prompt: String,
    pub file: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub system_instruction: Option<String>,
    pub params: GenerationParams,
    pub stream: bool,
    pub chat_memory: Toggle,
    pub context: Toggle,
    pub warnings: Vec<String>,
}

impl Invocation {
    pub fn use_context(&self) -> bool {
        self.context.effective(true)
    }

    /// In chat this covers loading and saving; single-shot calls only record.
    pub fn use_memory(&self) -> bool {
        self.chat_memory.effective(true)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("{0}")]
    Parse(String),
    #[error("Only one of --lite, --flash or --pro may be given.")]
    MultipleModelFlags,
    #[error(
        "Administrative options (--clear-*, --set-context-*) cannot be combined with chat or generation options (found {0})."
    )]
    AdminConflict(String),
    #[error("--set-context-local and --clear-context-local cannot be used together.")]
    LocalSetClearConflict,
    #[error("--set-context-general and --clear-context-general cannot be used together.")]
    GeneralSetClearConflict,
    #[error("--enable-chat-memory only has an effect in --chat mode.")]
    EnableChatMemoryWithoutChat,
    #[error(
        "--force-new-context needs an initial prompt and cannot be combined with --chat, --file or --image."
    )]
    ForceNewContextConditions,
    #[error("--image, --file and --force-new-context cannot be used in --chat mode.")]
    ChatModeConflict,
    #[error("--image and --file cannot be used together.")]
    ImageFileConflict,
    #[error("A prompt, --file, --image, --chat or --force-new-context with a prompt is required.")]
    MissingAction,
}

impl From<clap::Error> for ResolveError {
    fn from(err: clap::Error) -> Self {
        ResolveError::Parse(describe_parse_error(&err))
    }
}

fn selected_tiers(cli: &Cli) -> Vec<ModelTier> {
    [
        (cli.lite, ModelTier::Lite),
        (cli.flash, ModelTier::Flash),
        (cli.pro, ModelTier::Pro),
    ]
    .into_iter()
    .filter_map(|(set, tier)| set.then_some(tier))
    .collect()
}

/// Names of the options that may not accompany administrative actions.
fn admin_conflicts(cli: &Cli, has_prompt: bool, tiers: &[ModelTier]) -> Vec<&'static str> {
    let mut found = Vec::new();
    let mut check = |present: bool, name: &'static str| {
        if present {
            found.push(name);
        }
    };
    check(cli.chat, "--chat");
    check(cli.stream, "--stream");
    check(has_prompt, "a prompt");
    check(cli.image.is_some(), "--image");
    check(cli.file.is_some(), "--file");
    check(cli.system_instruction.is_some(), "--system-instruction");
    check(cli.max_tokens.is_some(), "--max-tokens");
    check(cli.temperature.is_some(), "--temperature");
    check(cli.force_new_context, "--force-new-context");
    for tier in tiers {
        found.push(tier.flag());
    }
    found
}

/// Classifies the invocation and validates option combinations.
///
/// `local_context_exists` reports whether a non-empty local context is stored,
/// which decides between the context-definition prompt and the missing-action error.
pub fn resolve(
    cli: Cli,
    default_model: &str,
    local_context_exists: bool,
) -> Result<Invocation, ResolveError> {
    let tiers = selected_tiers(&cli);
    if tiers.len() > 1 {
        return Err(ResolveError::MultipleModelFlags);
    }
    let model = tiers
        .first()
        .map(|t| t.model_name().to_string())
        .unwrap_or_else(|| default_model.to_string());

    let prompt = cli.prompt_text().trim().to_string();
    let has_prompt = !prompt.is_empty();
    let chat_memory = Toggle::from_flags(cli.enable_chat_memory, cli.disable_chat_memory);
    let context = Toggle::from_flags(cli.enable_context, cli.disable_context);
    let admin = AdminActions::from_cli(&cli);
    let mut warnings = Vec::new();

    if admin.any() {
        let conflicts = admin_conflicts(&cli, has_prompt, &tiers);
        if !conflicts.is_empty() {
            return Err(ResolveError::AdminConflict(conflicts.join(", ")));
        }
        if admin.set_local.is_some() && admin.clear_local {
            return Err(ResolveError::LocalSetClearConflict);
        }
        if admin.set_general.is_some() && admin.clear_general {
            return Err(ResolveError::GeneralSetClearConflict);
        }
        if context == Toggle::Off && admin.touches_context() {
            warnings.push(
                "Warning: --disable-context was given together with a context set/clear. \
                 The set/clear still runs; the context is just not used in this run."
                    .to_string(),
            );
        }
    }

    if chat_memory == Toggle::On && !cli.chat {
        return Err(ResolveError::EnableChatMemoryWithoutChat);
    }

    let mode = if admin.any() {
        Mode::Administrative(admin)
    } else {
        classify(&cli, has_prompt, local_context_exists)?
    };

    if mode == Mode::Chat && chat_memory == Toggle::Off {
        warnings.push(
            "Warning: with --disable-chat-memory this conversation will not be saved to the history. \
             Use --clear-history if you want a fresh chat."
                .to_string(),
        );
    }

    Ok(Invocation {
        mode,
        model,
        prompt,
        file: cli.file,
        image: cli.image,
        system_instruction: cli.system_instruction,
        params: GenerationParams {
            max_output_tokens: cli.max_tokens,
            temperature: cli.temperature,
        },
        stream: cli.stream,
        chat_memory,
        context,
        warnings,
    })
}

fn classify(cli: &Cli, has_prompt: bool, local_context_exists: bool) -> Result<Mode, ResolveError> {
    let has_input = cli.file.is_some() || cli.image.is_some();

    if cli.force_new_context {
        if cli.chat || has_input || !has_prompt {
            return Err(ResolveError::ForceNewContextConditions);
        }
        return Ok(Mode::DefineContext { force_new: true });
    }

    if cli.chat {
        if has_input {
            return Err(ResolveError::ChatModeConflict);
        }
        return Ok(Mode::Chat);
    }

    if cli.image.is_some() && cli.file.is_some() {
        return Err(ResolveError::ImageFileConflict);
    }

    if has_prompt || has_input {
        return Ok(Mode::SingleShot);
    }
    if local_context_exists {
        return Err(ResolveError::MissingAction);
    }
    Ok(Mode::DefineContext { force_new: false })
}
