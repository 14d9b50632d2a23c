use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

const NOTES: &str = "\
Any token that is not a recognised option becomes part of the prompt.

Files:
  ./.ask_history.json      chat history of this directory
  ./.ask_context.local     local project context
  ~/.ask_context.general   general context for every directory
  ~/.ask/config.toml       optional settings (base_url, default_model, api_key_env, api_key)

Administrative options (--clear-*, --set-context-*) cannot be combined with
chat, generation or model options.";

#[derive(Parser, Debug)]
#[command(
    name = "ask",
    about = "Ask Gemini from the terminal, with layered context and chat history",
    override_usage = "ask [OPTIONS] [PROMPT]...",
    after_help = NOTES,
    args_override_self = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Use gemini-2.5-flash-lite-preview-06-17
    #[arg(long, help_heading = "Model and chat")]
    pub lite: bool,
    /// Use gemini-2.5-flash
    #[arg(long, help_heading = "Model and chat")]
    pub flash: bool,
    /// Use gemini-1.5-pro
    #[arg(long, help_heading = "Model and chat")]
    pub pro: bool,
    /// Interactive chat with history memory
    #[arg(long, help_heading = "Model and chat")]
    pub chat: bool,
    /// Print the response as it is generated
    #[arg(long, help_heading = "Model and chat")]
    pub stream: bool,

    /// Attach an image (single-shot only)
    #[arg(long, value_name = "PATH", help_heading = "Input")]
    pub image: Option<PathBuf>,
    /// Answer based on the content of a text file
    #[arg(long, value_name = "PATH", help_heading = "Input")]
    pub file: Option<PathBuf>,

    /// Maximum number of output tokens
    #[arg(long, value_name = "N", help_heading = "Generation")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature, e.g. 0.0 to 1.0
    #[arg(long, value_name = "FLOAT", help_heading = "Generation")]
    pub temperature: Option<f32>,
    /// System instruction; replaces the stored context for this call
    #[arg(long, value_name = "TEXT", help_heading = "Generation")]
    pub system_instruction: Option<String>,

    /// Load and save chat history (default in --chat)
    #[arg(long, overrides_with = "disable_chat_memory", help_heading = "Memory and context")]
    pub enable_chat_memory: bool,
    /// Neither load nor save chat history
    #[arg(long, overrides_with = "enable_chat_memory", help_heading = "Memory and context")]
    pub disable_chat_memory: bool,
    /// Use the local and general context (default)
    #[arg(long, overrides_with = "disable_context", help_heading = "Memory and context")]
    pub enable_context: bool,
    /// Ignore the local and general context for this call
    #[arg(long, overrides_with = "enable_context", help_heading = "Memory and context")]
    pub disable_context: bool,
    /// Define a new local context from the given prompt, replacing the current one
    #[arg(long, help_heading = "Memory and context")]
    pub force_new_context: bool,

    /// Delete the chat history of this directory
    #[arg(long, help_heading = "Administration")]
    pub clear_history: bool,
    /// Store the local context for this directory
    #[arg(long, value_name = "TEXT", help_heading = "Administration")]
    pub set_context_local: Option<String>,
    /// Delete the local context
    #[arg(long, help_heading = "Administration")]
    pub clear_context_local: bool,
    /// Store the general context
    #[arg(long, value_name = "TEXT", help_heading = "Administration")]
    pub set_context_general: Option<String>,
    /// Delete the general context
    #[arg(long, help_heading = "Administration")]
    pub clear_context_general: bool,

    /// Print debug diagnostics to stderr
    #[arg(long)]
    pub verbose: bool,
    /// Print this help
    #[arg(long)]
    pub help: bool,
    /// Print the version
    #[arg(long)]
    pub version: bool,

    #[arg(value_name = "PROMPT", hide = true)]
    pub prompt: Vec<String>,
}

impl Cli {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}

/// Parses the raw arguments (without the program name).
///
/// Recognised `--flag` tokens are handed to clap; everything else is collected
/// as prompt text. Value flags always take the next token, even an empty one or
/// one that starts with `--`. Arguments must be valid UTF-8.
pub fn parse_args<I, S>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let cmd = Cli::command();
    let mut flags = Vec::new();
    let mut prompt = Vec::new();
    let tokens: Vec<String> = args
        .into_iter()
        .map(|arg| {
            arg.into().into_string().map_err(|raw| {
                cmd.clone().error(
                    ErrorKind::InvalidUtf8,
                    format!("argument is not valid UTF-8: {}", raw.to_string_lossy()),
                )
            })
        })
        .collect::<Result<_, _>>()?;
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        let Some(body) = token.strip_prefix("--") else {
            prompt.push(token);
            continue;
        };
        let (name, inline) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let Some(arg) = cmd.get_arguments().find(|a| a.get_long() == Some(name)) else {
            prompt.push(token);
            continue;
        };
        if inline.is_some() || !arg.get_action().takes_values() {
            flags.push(token.clone());
            continue;
        }
        match tokens.next() {
            Some(value) => flags.push(format!("--{name}={value}")),
            None => {
                return Err(Cli::command().error(
                    ErrorKind::InvalidValue,
                    format!("a value is required for '--{name}' but none was supplied"),
                ));
            }
        }
    }

    let argv = std::iter::once("ask".to_string())
        .chain(flags)
        .chain(std::iter::once("--".to_string()))
        .chain(prompt);
    Cli::try_parse_from(argv)
}

pub fn usage() -> String {
    Cli::command().render_help().to_string()
}

pub fn version() -> String {
    format!("ask {}", env!("CARGO_PKG_VERSION"))
}

/// First line of a clap error, without clap's own prefix.
pub fn describe_parse_error(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        parse_args(args.iter().copied()).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unknown_tokens_become_prompt_in_order() {
        let cli = parse(&["what", "--weird", "is", "--stream", "this?"]);
        assert!(cli.stream);
        assert_eq!(cli.prompt_text(), "what --weird is this?");
    }

    #[test]
    fn value_flags_take_the_next_token_verbatim() {
        let cli = parse(&["--set-context-local", "", "--clear-context-local"]);
        assert_eq!(cli.set_context_local.as_deref(), Some(""));
        assert!(cli.clear_context_local);

        let cli = parse(&["--system-instruction", "--chat", "hi"]);
        assert_eq!(cli.system_instruction.as_deref(), Some("--chat"));
        assert!(!cli.chat);
        assert_eq!(cli.prompt_text(), "hi");
    }

    #[test]
    fn equals_form_and_negative_numbers() {
        let cli = parse(&["--temperature=0.3", "--max-tokens", "256", "hello"]);
        assert_eq!(cli.temperature, Some(0.3));
        assert_eq!(cli.max_tokens, Some(256));

        let cli = parse(&["--temperature", "-0.5", "x"]);
        assert_eq!(cli.temperature, Some(-0.5));
    }

    #[test]
    fn repeated_flags_keep_the_last_value() {
        let cli = parse(&["--file", "a.txt", "--file", "b.txt", "q"]);
        assert_eq!(cli.file, Some(PathBuf::from("b.txt")));

        let cli = parse(&["--enable-context", "--disable-context"]);
        assert!(cli.disable_context);
        assert!(!cli.enable_context);

        let cli = parse(&["--disable-chat-memory", "--enable-chat-memory"]);
        assert!(cli.enable_chat_memory);
        assert!(!cli.disable_chat_memory);
    }

    #[test]
    fn invalid_numbers_and_missing_values_fail() {
        assert!(parse_args(["--max-tokens", "many"]).is_err());
        assert!(parse_args(["--temperature", "warm"]).is_err());
        assert!(parse_args(["hello", "--file"]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_arguments_are_rejected() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'q', 0xff]);
        let err = parse_args([OsString::from("--file"), raw]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUtf8);
        assert!(describe_parse_error(&err).contains("not valid UTF-8"));
    }

    #[test]
    fn parse_error_description_is_one_line() {
        let err = parse_args(["--max-tokens", "many"]).unwrap_err();
        let text = describe_parse_error(&err);
        assert!(text.contains("--max-tokens"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn usage_lists_every_option() {
        let text = usage();
        for flag in ["--chat", "--set-context-general", "--force-new-context", "--temperature"] {
            assert!(text.contains(flag), "usage is missing {flag}");
        }
    }
}
