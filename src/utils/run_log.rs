//! The per-run log: one timestamped line per event, appended to a file and
//! echoed to stdout.
//!
//! File writes are best-effort. A run never fails because its log could not
//! be written.

use chrono::Local;
use fs4::fs_std::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// How lines are rendered on the interactive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFormat {
    /// Line-oriented text for terminals and pipes
    Plain,
    /// Escaped markup with `<br />` line breaks, for CGI output
    Html,
    /// No echo at all
    Off,
}

impl ConsoleFormat {
    pub fn detect() -> Self {
        if std::env::var_os("GATEWAY_INTERFACE").is_some() {
            Self::Html
        } else {
            Self::Plain
        }
    }

    pub fn render(self, line: &str) -> Option<String> {
        match self {
            Self::Plain => Some(line.to_string()),
            Self::Html => Some(html_line(line)),
            Self::Off => None,
        }
    }
}

fn html_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    for c in line.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '\n' => out.push_str("<br />\n"),
            c => out.push(c),
        }
    }
    out
}

pub struct RunLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
    console: ConsoleFormat,
}

impl RunLogger {
    /// Open the run log inside `log_dir`, named after the custom archive name
    /// when there is one. Falls back to the system temp directory when the
    /// log directory cannot be created.
    pub fn create(log_dir: &Path, custom_name: Option<&str>, console: ConsoleFormat) -> Self {
        let stamp = Local::now().timestamp();
        let file_name = match custom_name {
            Some(name) => format!("{}_{}.txt", sanitize(name), stamp),
            None => format!("Log_backup_{}.txt", stamp),
        };

        let path = match fs::create_dir_all(log_dir) {
            Ok(()) => log_dir.join(file_name),
            Err(e) => {
                warn!("Cannot create log directory {}: {}", log_dir.display(), e);
                std::env::temp_dir().join(format!("log_file_{}.txt", stamp))
            }
        };

        Self::at(path, console)
    }

    /// Append to exactly this file.
    pub fn at(path: PathBuf, console: ConsoleFormat) -> Self {
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Run log {} is not writable: {}", path.display(), e);
                None
            }
        };

        Self {
            path,
            file: Mutex::new(file),
            console,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message.as_ref()
        );

        {
            let mut file = self.file.lock();
            if let Some(file) = file.as_mut() {
                // Swallowed: the log is a record, not a dependency of the run.
                let _ = append_locked(file, line.as_bytes());
            }
        }

        if let Some(rendered) = self.console.render(&line) {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(rendered.as_bytes());
            let _ = stdout.flush();
        }
    }
}

fn append_locked(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    FileExt::lock_exclusive(&*file)?;
    let result = file.write_all(bytes).and_then(|_| file.flush());
    let _ = FileExt::unlock(&*file);
    result
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
