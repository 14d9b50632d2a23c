use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::util::print_warning;

/// Outcome of reading a JSON array file.
#[derive(Debug)]
pub enum JsonLoad<T> {
    Missing,
    Loaded(Vec<T>),
    Corrupt(String),
}

impl<T> JsonLoad<T> {
    pub fn into_records(self) -> Vec<T> {
        match self {
            JsonLoad::Loaded(records) => records,
            JsonLoad::Missing | JsonLoad::Corrupt(_) => Vec::new(),
        }
    }
}

/// Reads a text file. Missing files read as empty; unreadable files warn and read as empty.
pub fn read_text(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => {
            print_warning(&format!(
                "Warning: could not read {} ({err}); treating it as empty.",
                path.display()
            ));
            String::new()
        }
    }
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = text.len(), "wrote file");
    Ok(())
}

/// Deletes a file, returning whether it existed.
pub fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed file");
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

pub fn read_json_array<T: DeserializeOwned>(path: &Path) -> JsonLoad<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return JsonLoad::Missing,
        Err(err) => return JsonLoad::Corrupt(err.to_string()),
    };
    if text.trim().is_empty() {
        return JsonLoad::Missing;
    }
    match serde_json::from_str::<Vec<T>>(&text) {
        Ok(records) => JsonLoad::Loaded(records),
        Err(err) => JsonLoad::Corrupt(err.to_string()),
    }
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    write_text(path, &text)
}
