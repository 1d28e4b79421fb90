//! Recording and report-generation flows on top of the store.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};

use memovox_core::clock::DayClock;
use memovox_core::collaborators::{Analyzer, Transcriber};
use memovox_core::error::{MemovoxError, Result};
use memovox_core::format;
use memovox_core::types::{AnalysisType, AudioPayload, Memo, NewReport, Report, ReportKind};

use crate::store::VoiceStore;

/// Audio as it comes off a recorder, plus the tags it may be encoded as.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub bytes: Vec<u8>,
    /// Tags the recorder reported for this capture, best first.
    pub candidate_formats: Vec<String>,
}

/// Choose the tag to store a capture under: the first well-formed specific
/// candidate, else the sniffed format, else `default_format`.
pub fn capture_format(capture: &CapturedAudio, default_format: &str) -> String {
    capture
        .candidate_formats
        .iter()
        .filter(|tag| !format::is_generic(tag))
        .find_map(|tag| format::validate(tag).ok())
        .or_else(|| format::sniff(&capture.bytes).map(str::to_string))
        .unwrap_or_else(|| default_format.to_string())
}

/// Transcribe a capture and store it as a new memo.
///
/// Nothing is stored when transcription fails.
pub async fn record_memo<T: Transcriber>(
    store: &VoiceStore,
    transcriber: &T,
    capture: CapturedAudio,
    date: DateTime<Utc>,
) -> Result<Memo> {
    let tag = capture_format(&capture, &store.config().audio.default_format);
    let payload = AudioPayload::new(capture.bytes, tag.clone());

    let transcript = transcriber.transcribe(&payload).await?;
    let id = store.add_memo(transcript, date, payload, tag).await?;
    store
        .get_memo(&id)
        .await?
        .ok_or_else(|| MemovoxError::memo_not_found(id))
}

/// Days before today that a default report reaches back.
pub const DEFAULT_REPORT_DAYS: i64 = 30;

/// Which memos a report analyzes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoSelection {
    /// Hand-picked memos, in selection order.
    Ids(Vec<String>),
    /// Every memo recorded on local days `from` through `to`, both whole
    /// days included.
    Range { from: NaiveDate, to: NaiveDate },
}

impl MemoSelection {
    /// The last `DEFAULT_REPORT_DAYS` days up to and including today.
    pub fn recent(clock: &dyn DayClock) -> Self {
        let to = clock.today();
        Self::Range {
            from: to - Duration::days(DEFAULT_REPORT_DAYS),
            to,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub kind: ReportKind,
    pub topic: String,
    pub analysis_type: AnalysisType,
    pub selection: MemoSelection,
}

/// Analyze the selected memos and save the result as a report.
pub async fn generate_report<A: Analyzer>(
    store: &VoiceStore,
    analyzer: &A,
    request: ReportRequest,
) -> Result<Report> {
    let (memo_ids, mut memos) = match request.selection {
        MemoSelection::Ids(ids) => {
            if ids.is_empty() {
                return Err(MemovoxError::InvalidArgument(
                    "Select at least one memo for analysis".to_string(),
                ));
            }
            let mut memos = Vec::with_capacity(ids.len());
            for id in &ids {
                match store.get_memo(id).await? {
                    Some(memo) => memos.push(memo),
                    None => warn!(id = %id, "Selected memo no longer exists; skipping"),
                }
            }
            if memos.is_empty() {
                return Err(MemovoxError::InvalidArgument(
                    "None of the selected memos exist".to_string(),
                ));
            }
            (ids, memos)
        }
        MemoSelection::Range { from, to } => {
            let mut memos = store.list_memos_between(from, to).await?;
            if memos.is_empty() {
                return Err(MemovoxError::InvalidArgument(format!(
                    "No memos recorded between {} and {}",
                    from, to
                )));
            }
            // Listed newest first.
            memos.reverse();
            let ids: Vec<String> = memos.iter().map(|m| m.id.clone()).collect();
            (ids, memos)
        }
    };
    memos.sort_by_key(|m| m.date);

    let topic = request.kind.enhance_topic(request.topic.trim());
    let transcripts: Vec<String> = memos.into_iter().map(|m| m.transcript).collect();
    let content = analyzer
        .analyze(&transcripts, &topic, &request.analysis_type)
        .await?;

    let report = store
        .save_report(NewReport {
            title: topic.clone(),
            topic,
            analysis_type: request.analysis_type,
            date: store.clock().now(),
            content,
            memo_ids,
        })
        .await?;
    info!(id = %report.id, transcripts = transcripts.len(), "Report generated");
    Ok(report)
}
