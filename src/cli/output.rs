//! Output formatting for CLI results
//!
//! Results go to stdout; progress, notices and errors go to stderr so that
//! `--format json` output can be piped.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;
use vigil_core::domain::ProgressEvent;

/// Output format for CLI results
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text tables (default)
    #[default]
    Table,
    /// JSON output for machine processing
    Json,
}

/// Writer configured from the global CLI flags
#[derive(Debug, Clone)]
pub struct OutputWriter {
    format: OutputFormat,
    quiet: bool,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn header(&self, title: &str) {
        if self.chatty() {
            eprintln!("\n== {} ==", title);
        }
    }

    pub fn info(&self, message: &str) {
        if self.chatty() {
            eprintln!("{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("warning: {}", message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("error: {}", message);
    }

    /// One progress line per event.
    pub fn progress(&self, event: &ProgressEvent) {
        if self.chatty() {
            eprintln!("{}", progress_line(event));
        }
    }

    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, value)?;
        writeln!(stdout)?;
        Ok(())
    }

    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(render_table(headers, rows).as_bytes())?;
        Ok(())
    }

    /// Plain line on stdout.
    pub fn line(&self, text: &str) -> anyhow::Result<()> {
        writeln!(io::stdout().lock(), "{}", text)?;
        Ok(())
    }

    fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Table
    }
}

pub fn progress_line(event: &ProgressEvent) -> String {
    match &event.stage {
        Some(stage) => format!("[{:>3}%] {} - {}", event.progress, event.status, stage),
        None => format!("[{:>3}%] {}", event.progress, event.status),
    }
}

/// Render rows as left-aligned columns separated by two spaces.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut out = format_row(headers.iter().copied(), &widths);
    out.push_str(&format_row(rule.iter().map(String::as_str), &widths));
    for row in rows {
        out.push_str(&format_row(row.iter().map(String::as_str), &widths));
    }
    out
}

fn format_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", line.trim_end())
}
