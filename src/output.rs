use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    IndexResult, ProgressEvent, ProgressSink, RunResult, SourceOutcome, SourcesResult, Stage,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable output: pretty JSON on stdout, progress suppressed.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_indexes(result: &IndexResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sources(result: &SourcesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
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

/// Terminal output: progress lines on stderr and a short summary on stdout.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "run {} ({})", result.as_of, result.mode)?;
        for line in summary_lines(result) {
            writeln!(stdout, "  {line}")?;
        }
        Ok(())
    }

    pub fn print_indexes(result: &IndexResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        for entry in &result.collections {
            writeln!(stdout, "{}: {} indexes", entry.collection, entry.indexes)?;
        }
        Ok(())
    }

    pub fn print_sources(result: &SourcesResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        for entry in &result.sources {
            let collection = entry
                .collection
                .map(|collection| collection.to_string())
                .unwrap_or_else(|| "-".to_string());
            let marker = if entry.selected { "*" } else { " " };
            writeln!(stdout, "{marker} {:<12} {collection}", entry.source.as_str())?;
        }
        Ok(())
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn summary_lines(result: &RunResult) -> Vec<String> {
    result
        .items
        .iter()
        .map(|item| {
            let label = match item.stage {
                Stage::Source => item.source.to_string(),
                Stage::Enrichment => format!("{} (enrichment)", item.source),
            };
            match &item.outcome {
                SourceOutcome::Completed { rows, write, .. } => format!(
                    "{label}: {rows} rows -> {} deleted={} inserted={} modified={} in {}s",
                    write.collection,
                    write.deleted,
                    write.inserted,
                    write.modified,
                    write.elapsed_seconds
                ),
                SourceOutcome::Inapplicable { reason } => format!("{label}: skipped, {reason}"),
                SourceOutcome::Failed { error } => format!("{label}: FAILED, {error}"),
            }
        })
        .collect()
}
