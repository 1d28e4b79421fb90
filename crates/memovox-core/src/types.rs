use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Memos
// =============================================================================

/// One voice-journal entry's metadata.
///
/// The audio bytes live in the blob store under the same `id`;
/// `audio_format` always describes how those bytes are encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub id: String,
    pub transcript: String,
    pub date: DateTime<Utc>,
    pub audio_format: String,
}

/// Raw audio bytes together with the type the producer declared for them.
///
/// `format` mirrors a browser `Blob.type`: it may be absent when the
/// container that carried the bytes lost it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub format: Option<String>,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            bytes,
            format: Some(format.into()),
        }
    }

    /// Bytes with no declared type.
    pub fn untyped(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            format: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Partial update for a memo. Only `Some` fields are applied.
#[derive(Clone, Debug, Default)]
pub struct MemoPatch {
    pub transcript: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub audio: Option<AudioPayload>,
    /// Explicit tag for `audio`. Without it the payload's own type is used.
    pub audio_format: Option<String>,
}

impl MemoPatch {
    pub fn transcript(text: impl Into<String>) -> Self {
        Self {
            transcript: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn date(date: DateTime<Utc>) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn audio(payload: AudioPayload) -> Self {
        Self {
            audio: Some(payload),
            ..Self::default()
        }
    }

    pub fn with_audio_format(mut self, format: impl Into<String>) -> Self {
        self.audio_format = Some(format.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_none()
            && self.date.is_none()
            && self.audio.is_none()
            && self.audio_format.is_none()
    }
}

/// Generate a fresh record identifier.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Reports
// =============================================================================

/// Category of analysis a report was generated with.
///
/// Unknown tags (older exports, hand-edited rows) are kept verbatim in
/// `Other` so they survive a round trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AnalysisType {
    Health,
    Symptoms,
    Treatment,
    General,
    Other(String),
}

impl AnalysisType {
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisType::Health => "health",
            AnalysisType::Symptoms => "symptoms",
            AnalysisType::Treatment => "treatment",
            AnalysisType::General => "general",
            AnalysisType::Other(tag) => tag,
        }
    }

    /// Human-readable category name.
    pub fn label(&self) -> &str {
        match self {
            AnalysisType::Health => "Overall Health",
            AnalysisType::Symptoms => "Symptom Analysis",
            AnalysisType::Treatment => "Treatment Effectiveness",
            AnalysisType::General => "General Analysis",
            AnalysisType::Other(_) => "Health Report",
        }
    }
}

impl From<&str> for AnalysisType {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "health" => AnalysisType::Health,
            "symptoms" => AnalysisType::Symptoms,
            "treatment" => AnalysisType::Treatment,
            "general" => AnalysisType::General,
            _ => AnalysisType::Other(tag.to_string()),
        }
    }
}

impl From<String> for AnalysisType {
    fn from(tag: String) -> Self {
        AnalysisType::from(tag.as_str())
    }
}

impl From<AnalysisType> for String {
    fn from(kind: AnalysisType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience a report is prepared for. Changes the topic the analyzer sees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    #[default]
    Personal,
    Doctor,
    Therapist,
}

impl ReportKind {
    pub fn enhance_topic(&self, topic: &str) -> String {
        match self {
            ReportKind::Personal => topic.to_string(),
            ReportKind::Doctor => format!("Clinical Report: {}", topic),
            ReportKind::Therapist => format!("Mental Health Assessment: {}", topic),
        }
    }
}

/// A saved analysis artifact. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub analysis_type: AnalysisType,
    pub date: DateTime<Utc>,
    /// Serialized analysis result, stored verbatim.
    pub content: String,
    /// Memos the report was derived from, in selection order. May dangle.
    pub memo_ids: Vec<String>,
}

/// Report fields supplied by the generation flow; the store assigns the id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReport {
    pub title: String,
    pub topic: String,
    pub analysis_type: AnalysisType,
    pub date: DateTime<Utc>,
    pub content: String,
    pub memo_ids: Vec<String>,
}

impl NewReport {
    pub fn into_report(self, id: String) -> Report {
        Report {
            id,
            title: self.title,
            topic: self.topic,
            analysis_type: self.analysis_type,
            date: self.date,
            content: self.content,
            memo_ids: dedup_preserving_order(self.memo_ids),
        }
    }
}

/// Drop repeated ids, keeping the first occurrence.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

// =============================================================================
// Analysis content
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub recommendation: String,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub risk: String,
    pub severity: RiskLevel,
    pub mitigation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risks: Vec<Risk>,
    pub overall_risk_level: RiskLevel,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationTimeline {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}

/// Typed view over the JSON an analyzer produces for `Report::content`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub executive_summary: String,
    pub detailed_findings: Vec<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub risk_assessment: RiskAssessment,
    pub implementation_timeline: ImplementationTimeline,
}

impl AnalysisReport {
    /// Parse stored report content. Content that is not an analysis report
    /// yields `None`; the raw string stays available on the `Report`.
    pub fn parse(content: &str) -> Option<Self> {
        match serde_json::from_str(content) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::debug!(error = %e, "Report content is not a structured analysis");
                None
            }
        }
    }
}
