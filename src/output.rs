use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{CloneResult, ProgressEvent, ProgressSink, VersionsResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_clone(result: &CloneResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_versions(result: &VersionsResult) -> io::Result<()> {
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

/// Reports progress through the log, leaving stdout to the results.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64);
        match (event.completed, event.total) {
            (Some(completed), Some(total)) => {
                info!(completed, total, elapsed_ms, "{}", event.message)
            }
            _ => info!(elapsed_ms, "{}", event.message),
        }
    }
}
