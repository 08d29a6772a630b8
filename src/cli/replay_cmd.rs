use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cli::output::{OutputFormat, OutputOptions};
use crate::cli::renderer;
use burnwatch::core::config::EngineConfig;
use burnwatch::core::diagnostics::DiagnosticsSnapshot;
use burnwatch::core::engine::{Clock, Engine};
use burnwatch::core::models::alert::Alert;
use burnwatch::core::models::snapshot::Snapshot;
use burnwatch::core::normalizer::RawEvent;

#[derive(Debug, Default, PartialEq)]
pub struct ReplayTally {
    pub lines: u64,
    pub submitted: u64,
    /// Line number and reason for every line that was not accepted
    pub rejected: Vec<(u64, String)>,
}

#[derive(Serialize)]
struct ReplayPayload<'a> {
    snapshot: &'a Snapshot,
    alert_history: &'a [Alert],
    diagnostics: DiagnosticsSnapshot,
}

/// Parse one JSON-lines record. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<Result<RawEvent, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// Feed every record from `reader` into `engine`.
pub fn feed<R: BufRead>(engine: &Engine, reader: R) -> Result<ReplayTally> {
    let mut tally = ReplayTally::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read event stream")?;
        let number = idx as u64 + 1;
        tally.lines = number;

        let outcome = match parse_line(&line) {
            None => continue,
            Some(Ok(raw)) => engine.submit(raw).map_err(|e| e.to_string()),
            Some(Err(e)) => Err(format!("invalid JSON: {}", e)),
        };
        match outcome {
            Ok(()) => tally.submitted += 1,
            Err(reason) => {
                debug!(line = number, %reason, "Skipping record");
                tally.rejected.push((number, reason));
            }
        }
    }
    Ok(tally)
}

pub async fn run(path: &Path, config: EngineConfig, opts: &OutputOptions) -> Result<()> {
    let engine = Engine::start_with_clock(config, Clock::Replay)?;
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let tally = feed(&engine, BufReader::new(file))?;
    let snapshot: Arc<Snapshot> = engine.flush().await?;
    let alert_history = engine.alert_history().await?;
    let diagnostics = engine.diagnostics();
    engine.shutdown().await;

    match opts.format {
        OutputFormat::Text => {
            println!("{}", renderer::render_snapshot(&snapshot, opts.use_color));
            println!();
            println!(
                "Replayed {} event{} from {} ({} rejected)",
                tally.submitted,
                if tally.submitted == 1 { "" } else { "s" },
                path.display(),
                tally.rejected.len()
            );
        }
        OutputFormat::Json => {
            let payload = ReplayPayload {
                snapshot: &snapshot,
                alert_history: &alert_history,
                diagnostics,
            };
            println!("{}", opts.to_json(&payload)?);
        }
    }

    if opts.verbose {
        for (line, reason) in &tally.rejected {
            eprintln!("line {}: {}", line, reason);
        }
    }

    Ok(())
}
