//! CLI argument definitions for the memovox application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use memovox_core::types::ReportKind;

/// memovox - a local voice-memo health journal.
#[derive(Parser, Debug)]
#[command(name = "memovox", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the journal database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the store, run startup work, and print what it did.
    Status,
    /// Record a memo from an audio file.
    Add {
        /// Audio file to store.
        audio: PathBuf,
        /// Transcript text for the memo.
        #[arg(short = 't', long)]
        transcript: String,
        /// Memo date: RFC 3339 timestamp or YYYY-MM-DD (local day). Defaults to now.
        #[arg(long)]
        date: Option<String>,
        /// Audio format tag; repeat to list fallbacks, best first.
        #[arg(short = 'f', long = "format")]
        formats: Vec<String>,
    },
    /// List memos, newest first.
    List,
    /// Print one memo as JSON.
    Show { id: String },
    /// Change a memo's transcript, date, or audio.
    Edit {
        id: String,
        #[arg(short = 't', long)]
        transcript: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Replacement audio file.
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Format tag for the replacement audio.
        #[arg(short = 'f', long = "format")]
        format: Option<String>,
    },
    /// Delete a memo and its audio.
    Delete { id: String },
    /// Write a memo's audio to a file.
    ExportAudio {
        id: String,
        /// Destination file.
        #[arg(short = 'o', long = "out")]
        out: PathBuf,
    },
    /// Print the current streak.
    Streak,
    /// Rebuild the streak from memo dates alone.
    RecomputeStreak,
    /// Re-run the payload and format consistency sweep.
    Sweep,
    /// Generate a report from selected memos, or from every memo in a
    /// date range (the last 30 days unless --from/--to say otherwise).
    Report {
        /// Memo ids to analyze.
        #[arg(conflicts_with_all = ["from", "to"])]
        memo_ids: Vec<String>,
        /// First local day of the range, YYYY-MM-DD.
        #[arg(long)]
        from: Option<String>,
        /// Last local day of the range, YYYY-MM-DD; the whole day is included.
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        topic: String,
        #[arg(long, value_enum, default_value_t = KindArg::Personal)]
        kind: KindArg,
        /// health, symptoms, treatment, or general.
        #[arg(long = "type", default_value = "health")]
        analysis_type: String,
    },
    /// List saved reports.
    Reports,
    /// Print one report as JSON.
    ShowReport { id: String },
    /// Delete a saved report.
    DeleteReport { id: String },
}

/// Report audience as accepted on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Personal,
    Doctor,
    Therapist,
}

impl From<KindArg> for ReportKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Personal => ReportKind::Personal,
            KindArg::Doctor => ReportKind::Doctor,
            KindArg::Therapist => ReportKind::Therapist,
        }
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > MEMOVOX_CONFIG env var > platform default (~/.memovox/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("MEMOVOX_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".memovox").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".memovox").join("config.toml");
    }
    PathBuf::from("config.toml")
}
