use std::path::PathBuf;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{ConversationMessage, Role};
use crate::store::{self, JsonLoad};
use crate::util::print_warning;

/// Records fed back into the next request.
pub const LOAD_LIMIT: usize = 10;
/// Records kept on disk.
pub const RETAIN_LIMIT: usize = 20;

/// One persisted prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExchange {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response: String,
}

impl StoredExchange {
    pub fn new(model: &str, prompt: &str, response: &str) -> Self {
        Self {
            timestamp: now_timestamp(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            response: response.to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        self.prompt.trim().is_empty() && self.response.trim().is_empty()
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Alternating user/model turns, starting with a question and ending with its answer.
///
/// Empty halves are dropped and same-role neighbours merged, so role-split
/// records (`{"role":"user","prompt":"q","response":""}`) load as one exchange.
pub fn exchanges_to_messages(records: &[StoredExchange]) -> Vec<ConversationMessage> {
    let turns: Vec<ConversationMessage> = records
        .iter()
        .flat_map(|r| {
            [
                ConversationMessage::user(r.prompt.clone()),
                ConversationMessage::model(r.response.clone()),
            ]
        })
        .filter(|m| !m.joined_text().trim().is_empty())
        .collect();

    let mut merged = merge_same_role(&turns);
    if merged.first().is_some_and(|(role, _)| *role == Role::Model) {
        merged.remove(0);
    }
    if merged.last().is_some_and(|(role, _)| *role == Role::User) {
        merged.pop();
    }
    merged
        .into_iter()
        .map(|(role, text)| ConversationMessage::text(role, text))
        .collect()
}

/// Collapses runs of same-role turns: repeated text is dropped, distinct text is joined.
pub fn merge_same_role(turns: &[ConversationMessage]) -> Vec<(Role, String)> {
    let mut out: Vec<(Role, String)> = Vec::new();
    for turn in turns {
        let text = turn.joined_text().trim().to_string();
        match out.last_mut() {
            Some((role, last)) if *role == turn.role => {
                if *last != text && !text.is_empty() {
                    if !last.is_empty() {
                        last.push_str("\n\n");
                    }
                    last.push_str(&text);
                }
            }
            _ => out.push((turn.role, text)),
        }
    }
    out
}

pub fn messages_to_exchanges(turns: &[ConversationMessage], model: &str) -> Vec<StoredExchange> {
    let merged = merge_same_role(turns);
    let mut out = Vec::new();
    let mut iter = merged.into_iter().peekable();
    while let Some((role, text)) = iter.next() {
        let record = match role {
            Role::User => {
                let response = match iter.peek() {
                    Some((Role::Model, _)) => iter.next().map(|(_, t)| t).unwrap_or_default(),
                    _ => String::new(),
                };
                StoredExchange::new(model, &text, &response)
            }
            Role::Model => StoredExchange::new(model, "", &text),
        };
        if !record.is_empty() {
            out.push(record);
        }
    }
    out
}

fn keep_recent<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

pub struct HistoryManager {
    path: PathBuf,
}

impl HistoryManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Most recent exchanges as user/model message pairs. Never fails.
    pub fn load(&self) -> Vec<ConversationMessage> {
        let records = match store::read_json_array::<StoredExchange>(&self.path) {
            JsonLoad::Loaded(records) => records,
            JsonLoad::Missing => Vec::new(),
            JsonLoad::Corrupt(err) => {
                debug!(error = %err, "history parse failed");
                print_warning(&format!(
                    "Warning: could not read chat history ({}). Starting a fresh history.",
                    self.path.display()
                ));
                Vec::new()
            }
        };
        let recent = keep_recent(records, LOAD_LIMIT);
        debug!(records = recent.len(), "loaded chat history");
        exchanges_to_messages(&recent)
    }

    fn existing_for_save(&self) -> Vec<StoredExchange> {
        match store::read_json_array::<StoredExchange>(&self.path) {
            JsonLoad::Corrupt(_) => {
                print_warning("Warning: existing chat history is corrupt and will be overwritten.");
                Vec::new()
            }
            other => other.into_records(),
        }
    }

    /// Appends `turns` to the stored history and rewrites it truncated to [`RETAIN_LIMIT`].
    pub fn save(&self, turns: &[ConversationMessage], model: &str) -> Result<()> {
        let mut records = self.existing_for_save();
        records.extend(messages_to_exchanges(turns, model));
        self.write(records)
    }

    pub fn record(&self, model: &str, prompt: &str, response: &str) -> Result<()> {
        let mut records = self.existing_for_save();
        records.push(StoredExchange::new(model, prompt, response));
        self.write(records)
    }

    fn write(&self, records: Vec<StoredExchange>) -> Result<()> {
        let records = keep_recent(records, RETAIN_LIMIT);
        debug!(records = records.len(), path = %self.path.display(), "saving chat history");
        store::write_json_pretty(&self.path, &records)
    }

    pub fn clear(&self) -> Result<bool> {
        store::remove(&self.path)
    }
}
