//! memovox application binary - composition root.
//!
//! 1. Parse arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the journal store (migration, legacy import and sweep run on first use)
//! 4. Dispatch the requested command
//!
//! Transcription and analysis use the offline collaborators: the transcript
//! comes from the command line and reports carry the canned analysis.

mod cli;

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Parser;
use serde::Serialize;

use memovox_core::clock::DayClock;
use memovox_core::collaborators::{MockAnalyzer, MockTranscriber};
use memovox_core::config::MemovoxConfig;
use memovox_core::error::{MemovoxError, Result};
use memovox_core::types::{AnalysisType, AudioPayload, MemoPatch};
use memovox_storage::{
    generate_report, record_memo, CapturedAudio, MemoSelection, ReportRequest, VoiceStore,
    DEFAULT_REPORT_DAYS,
};

use cli::{CliArgs, Command};

/// Parse a memo date: an RFC 3339 instant, or a calendar day in the store's
/// local time carrying the current time of day.
fn parse_date(clock: &dyn DayClock, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(day) => Ok(clock.with_local_date(clock.now(), day)),
        Err(_) => Err(MemovoxError::InvalidArgument(format!(
            "Unrecognized date '{}': expected RFC 3339 or YYYY-MM-DD",
            raw
        ))),
    }
}

/// Parse a YYYY-MM-DD calendar day.
fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        MemovoxError::InvalidArgument(format!("Unrecognized day '{}': expected YYYY-MM-DD", raw))
    })
}

/// Explicit ids win; otherwise a range whose missing ends default to the
/// last 30 days.
fn report_selection(
    clock: &dyn DayClock,
    memo_ids: Vec<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<MemoSelection> {
    if !memo_ids.is_empty() {
        return Ok(MemoSelection::Ids(memo_ids));
    }
    let today = clock.today();
    Ok(MemoSelection::Range {
        from: match from {
            Some(raw) => parse_day(&raw)?,
            None => today - Duration::days(DEFAULT_REPORT_DAYS),
        },
        to: match to {
            Some(raw) => parse_day(&raw)?,
            None => today,
        },
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_audio(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Audio file read");
    Ok(bytes)
}

async fn run(store: &VoiceStore, command: Command) -> Result<()> {
    let clock = store.clock();
    match command {
        Command::Status => {
            let report = store.ready().await?;
            print_json(report)?;
        }
        Command::Add {
            audio,
            transcript,
            date,
            formats,
        } => {
            let date = match date {
                Some(raw) => parse_date(clock.as_ref(), &raw)?,
                None => clock.now(),
            };
            let capture = CapturedAudio {
                bytes: read_audio(&audio).await?,
                candidate_formats: formats,
            };
            let memo = record_memo(store, &MockTranscriber::new(transcript), capture, date).await?;
            println!("{}", memo.id);
        }
        Command::List => {
            for memo in store.list_memos().await? {
                println!(
                    "{}  {}  {:<24}  {}",
                    memo.id,
                    clock.local_date(memo.date),
                    memo.audio_format,
                    memo.transcript
                );
            }
        }
        Command::Show { id } => {
            let memo = store
                .get_memo(&id)
                .await?
                .ok_or_else(|| MemovoxError::memo_not_found(id))?;
            print_json(&memo)?;
        }
        Command::Edit {
            id,
            transcript,
            date,
            audio,
            format,
        } => {
            let mut patch = MemoPatch {
                transcript,
                ..MemoPatch::default()
            };
            if let Some(raw) = date {
                patch.date = Some(parse_date(clock.as_ref(), &raw)?);
            }
            if let Some(path) = audio {
                patch.audio = Some(AudioPayload::untyped(read_audio(&path).await?));
            }
            patch.audio_format = format;
            if patch.is_empty() {
                return Err(MemovoxError::InvalidArgument(
                    "Nothing to change: pass --transcript, --date, or --audio".to_string(),
                ));
            }
            print_json(&store.update_memo(&id, patch).await?)?;
        }
        Command::Delete { id } => {
            if store.delete_memo(&id).await? {
                println!("Deleted {}", id);
            } else {
                println!("Nothing to delete: no memo {}", id);
            }
        }
        Command::ExportAudio { id, out } => {
            let payload = store.get_audio(&id).await?.ok_or_else(|| MemovoxError::NotFound {
                kind: "Audio",
                id: id.clone(),
            })?;
            tokio::fs::write(&out, &payload.bytes).await?;
            println!(
                "{} ({} bytes, {})",
                out.display(),
                payload.len(),
                payload.format.as_deref().unwrap_or("unknown")
            );
        }
        Command::Streak => print_json(&store.streak().await?)?,
        Command::RecomputeStreak => print_json(&store.recompute_streak_from_scratch().await?)?,
        Command::Sweep => print_json(&store.consistency_sweep().await?)?,
        Command::Report {
            memo_ids,
            from,
            to,
            topic,
            kind,
            analysis_type,
        } => {
            let request = ReportRequest {
                kind: kind.into(),
                topic,
                analysis_type: AnalysisType::from(analysis_type.as_str()),
                selection: report_selection(clock.as_ref(), memo_ids, from, to)?,
            };
            let report = generate_report(store, &MockAnalyzer::new(), request).await?;
            println!("{}", report.id);
        }
        Command::Reports => {
            for report in store.list_reports().await? {
                println!(
                    "{}  {}  {:<10}  {}",
                    report.id,
                    clock.local_date(report.date),
                    report.analysis_type,
                    report.title
                );
            }
        }
        Command::ShowReport { id } => {
            let report = store
                .get_report(&id)
                .await?
                .ok_or_else(|| MemovoxError::report_not_found(id))?;
            print_json(&report)?;
        }
        Command::DeleteReport { id } => {
            if store.delete_report(&id).await? {
                println!("Deleted {}", id);
            } else {
                println!("Nothing to delete: no report {}", id);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config_found = config_file.exists();
    let mut config = MemovoxConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level; stdout is reserved
    // for command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting memovox v{}", env!("CARGO_PKG_VERSION"));
    if config_found {
        tracing::debug!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::debug!(path = %config_file.display(), "No configuration file; using defaults");
    }

    // Storage.
    let store = match VoiceStore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open journal store");
            return Err(e.into());
        }
    };
    tracing::debug!(path = %store.config().database_path().display(), "Journal store opened");

    if let Err(e) = run(&store, args.command).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e.into());
    }
    Ok(())
}
