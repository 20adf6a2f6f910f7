use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::check::{CheckReport, YearSummary};
use crate::import::{ImportReport, MissingReport, ProgressEvent, ProgressSink, SortReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(result: &ImportReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sort(result: &SortReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_check(result: &CheckReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_show(result: &YearSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_missing(result: &MissingReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to `tracing` at info level.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
