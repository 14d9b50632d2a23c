use std::io::{self, BufRead, IsTerminal, StdinLock, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::style::Stylize;

/// Source of interactive answers. `None` means the input was closed.
pub trait Prompter {
    fn ask(&mut self, label: &str) -> Result<Option<String>>;
}

/// Owned stdin session for the whole process; released when dropped.
pub struct LineInput {
    stdin: StdinLock<'static>,
}

impl LineInput {
    pub fn open() -> Self {
        Self {
            stdin: io::stdin().lock(),
        }
    }
}

impl Prompter for LineInput {
    fn ask(&mut self, label: &str) -> Result<Option<String>> {
        print!("{label}");
        io::stdout().flush().context("Failed to flush stdout")?;
        let mut input = String::new();
        let read = self
            .stdin
            .read_line(&mut input)
            .context("Failed to read stdin")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(input.trim_end_matches(['\n', '\r']).to_string()))
    }
}

impl Drop for LineInput {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
    }
}

pub fn print_warning(msg: &str) {
    eprintln!("{}", msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{}", msg.red());
}

pub fn print_success(msg: &str) {
    println!("{}", msg.green());
}

pub fn print_notice(msg: &str) {
    println!("{}", msg.yellow());
}

pub fn truncate_with_suffix(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut_at, _)) => format!("{}{}", &text[..cut_at], suffix),
        None => text.to_string(),
    }
}

const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// Spinner on stderr while a non-streamed reply is pending. Silent when stderr is not a terminal.
pub struct WorkingStatus {
    stop: Arc<AtomicBool>,
    ticker: Option<thread::JoinHandle<()>>,
}

impl WorkingStatus {
    pub fn start(label: impl Into<String>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !io::stderr().is_terminal() {
            return Self { stop, ticker: None };
        }

        let label = label.into();
        let started = Instant::now();
        let stop_flag = Arc::clone(&stop);
        let ticker = thread::spawn(move || {
            let mut frames = SPINNER_FRAMES.iter().cycle();
            while !stop_flag.load(Ordering::Relaxed) {
                let frame = frames.next().copied().unwrap_or('|');
                eprint!("\r{frame} {label} {}s", started.elapsed().as_secs());
                let _ = io::stderr().flush();
                thread::sleep(Duration::from_millis(120));
            }
            eprint!("\r\x1b[2K");
            let _ = io::stderr().flush();
        });

        Self {
            stop,
            ticker: Some(ticker),
        }
    }
}

impl Drop for WorkingStatus {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}
