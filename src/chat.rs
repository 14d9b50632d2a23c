use anyhow::Result;
use crossterm::style::Stylize;
use tracing::debug;

use crate::history::HistoryManager;
use crate::llm::{
    ConversationMessage, GenerateRequest, GenerationParams, Transport, TransportError, require_text,
};
use crate::util::{Prompter, print_error};

pub struct ChatOptions<'a> {
    pub model: &'a str,
    pub system_instruction: Option<&'a str>,
    pub params: GenerationParams,
    pub stream: bool,
}

/// Conversation log of one chat run. Turns past `persisted` have not been written to history yet.
pub struct ChatSession<'a> {
    opts: ChatOptions<'a>,
    log: Vec<ConversationMessage>,
    persisted: usize,
    history: Option<&'a HistoryManager>,
}

impl<'a> ChatSession<'a> {
    /// `seed` holds primers and loaded history; it is never written back.
    /// Without a `history`, nothing is saved.
    pub fn new(
        opts: ChatOptions<'a>,
        seed: Vec<ConversationMessage>,
        history: Option<&'a HistoryManager>,
    ) -> Self {
        let persisted = seed.len();
        Self {
            opts,
            log: seed,
            persisted,
            history,
        }
    }

    async fn send<T: Transport>(&self, transport: &T, text: &str) -> Result<String, TransportError> {
        let mut messages = self.log.clone();
        messages.push(ConversationMessage::user(text));
        let request = GenerateRequest {
            model: self.opts.model,
            messages: &messages,
            params: self.opts.params,
            system_instruction: self.opts.system_instruction,
        };
        transport
            .generate(&request, self.opts.stream)
            .await
            .and_then(require_text)
    }

    fn commit(&mut self, prompt: &str, response: &str) {
        push_dedup(&mut self.log, ConversationMessage::user(prompt));
        push_dedup(&mut self.log, ConversationMessage::model(response));
    }

    fn persist_pending(&mut self) -> Result<()> {
        let Some(history) = self.history else {
            return Ok(());
        };
        let pending = &self.log[self.persisted.min(self.log.len())..];
        history.save(pending, self.opts.model)?;
        self.persisted = self.log.len();
        Ok(())
    }

    /// Last write on exit; with nothing pending it only re-applies the retention cap.
    pub fn finish(&mut self) -> Result<()> {
        self.persist_pending()
    }
}

/// Appends a turn unless it repeats the previous one (same role, same trimmed text).
pub fn push_dedup(log: &mut Vec<ConversationMessage>, message: ConversationMessage) {
    let text = message.joined_text().trim().to_string();
    if let Some(last) = log.last() {
        if last.role == message.role && last.joined_text().trim() == text {
            return;
        }
    }
    log.push(ConversationMessage::text(message.role, text));
}

fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

pub async fn run_chat<P, T>(input: &mut P, transport: &T, mut session: ChatSession<'_>) -> Result<()>
where
    P: Prompter,
    T: Transport,
{
    println!(
        "Chat mode. Model: {}. Type 'exit' or 'quit' to leave.",
        session.opts.model
    );
    if session.opts.stream {
        println!("Streaming enabled.");
    }
    debug!(seeded = session.log.len(), "chat session started");

    loop {
        let Some(line) = input.ask(&format!("{} ", "You:".cyan().bold()))? else {
            println!();
            break;
        };
        if is_exit_command(&line) {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        println!("{}", "Gemini:".green().bold());
        match session.send(transport, prompt).await {
            Ok(response) => {
                if session.opts.stream {
                    println!();
                } else {
                    println!("{response}");
                }
                session.commit(prompt, &response);
                if let Err(err) = session.persist_pending() {
                    print_error(&format!("Failed to save chat history: {err:#}"));
                }
            }
            Err(TransportError::StreamInterrupted { message, .. }) => {
                println!();
                print_error(&format!("Response interrupted: {message}"));
            }
            Err(err) => print_error(&format!("Error: {err}")),
        }
        println!();
    }

    if let Err(err) = session.finish() {
        print_error(&format!("Failed to save chat history: {err:#}"));
    }
    println!("\nGoodbye!");
    Ok(())
}
