//! Interfaces to the services the store consumes but does not implement.
//!
//! Transcription and analysis are remote, fallible calls. The store only
//! persists what they return; mock implementations let the flows and the
//! binary run offline.

use std::future::Future;

use crate::error::{MemovoxError, Result};
use crate::types::{
    AnalysisReport, AnalysisType, AudioPayload, ImplementationTimeline, Recommendation, Risk,
    RiskAssessment, RiskLevel,
};

/// Speech-to-text for a recorded memo.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &AudioPayload) -> impl Future<Output = Result<String>> + Send;
}

/// Produces serialized analysis content from memo transcripts.
///
/// Transcripts arrive oldest-first. The returned string is stored verbatim
/// as `Report::content`.
pub trait Analyzer: Send + Sync {
    fn analyze(
        &self,
        transcripts: &[String],
        topic: &str,
        analysis_type: &AnalysisType,
    ) -> impl Future<Output = Result<String>> + Send;
}

// =============================================================================
// Mock implementations
// =============================================================================

/// Returns a fixed transcript for any non-empty payload.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    text: String,
}

impl MockTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new("[mock transcription]")
    }
}

impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &AudioPayload) -> Result<String> {
        if audio.is_empty() {
            return Err(MemovoxError::Transcription(
                "Cannot transcribe empty audio".to_string(),
            ));
        }
        tracing::debug!(bytes = audio.len(), "Mock transcription generated");
        Ok(self.text.clone())
    }
}

/// Returns a canned analysis report as JSON.
#[derive(Debug, Clone, Default)]
pub struct MockAnalyzer;

impl MockAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn canned_report(transcripts: &[String], topic: &str, analysis_type: &AnalysisType) -> AnalysisReport {
        AnalysisReport {
            executive_summary: format!(
                "{} based on {} memo(s) about {}.",
                analysis_type.label(),
                transcripts.len(),
                topic
            ),
            detailed_findings: transcripts
                .iter()
                .map(|t| t.chars().take(80).collect())
                .collect(),
            insights: vec!["Recording consistency supports trend analysis".to_string()],
            recommendations: vec![Recommendation {
                recommendation: "Keep recording daily".to_string(),
                confidence: 0.8,
                rationale: "More data points improve the analysis".to_string(),
            }],
            risk_assessment: RiskAssessment {
                risks: vec![Risk {
                    risk: "Sparse data".to_string(),
                    severity: RiskLevel::Low,
                    mitigation: "Record at least once a day".to_string(),
                }],
                overall_risk_level: RiskLevel::Low,
            },
            implementation_timeline: ImplementationTimeline {
                immediate: vec!["Review this report".to_string()],
                short_term: vec![],
                long_term: vec![],
            },
        }
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze(
        &self,
        transcripts: &[String],
        topic: &str,
        analysis_type: &AnalysisType,
    ) -> Result<String> {
        if transcripts.is_empty() {
            return Err(MemovoxError::Analysis(
                "No transcripts to analyze".to_string(),
            ));
        }
        let report = Self::canned_report(transcripts, topic, analysis_type);
        Ok(serde_json::to_string(&report)?)
    }
}
