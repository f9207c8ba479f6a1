//! In-game event log: a bounded ring shown in the sidebar, optionally mirrored to a file.

use anyhow::Result;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

const CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    /// Time since the journal was opened.
    pub at: Duration,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.at.as_millis();
        write!(
            f,
            "{:02}:{:02}.{:03} {:<5} {}",
            ms / 60_000,
            (ms / 1000) % 60,
            ms % 1000,
            self.level.tag(),
            self.message
        )
    }
}

pub struct Journal {
    started: Instant,
    entries: VecDeque<Entry>,
    sink: Option<fs::File>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            entries: VecDeque::with_capacity(CAPACITY),
            sink: None,
        }
    }

    /// Mirror every entry to `path` (appending). Creates the parent directory if needed.
    pub fn with_file(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.sink = Some(fs::OpenOptions::new().create(true).append(true).open(path)?);
        Ok(self)
    }

    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        let entry = Entry {
            at: self.started.elapsed(),
            level,
            message: message.into(),
        };
        if let Some(f) = self.sink.as_mut() {
            if writeln!(f, "{entry}").is_err() {
                // Stop mirroring after the first failed write.
                self.sink = None;
            }
        }
        if self.entries.len() == CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    /// Most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Entry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}
