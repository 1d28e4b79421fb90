//! Startup consistency sweep between memo metadata and stored payloads.
//!
//! Rewrites any payload whose stored tag disagrees with its memo's
//! `audio_format`, fills in `audio_format` for memos that never had one, and
//! removes payloads no memo refers to. A record that fails is logged and
//! skipped; the sweep always runs to completion.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use memovox_core::error::{MemovoxError, Result};
use memovox_core::format;
use memovox_core::types::Memo;

use crate::blob::BlobStore;
use crate::legacy::SkippedRecord;
use crate::repository::MemoRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    /// Payloads rewritten under their memo's format.
    pub payloads_retagged: usize,
    /// Memos whose missing format was filled in from the payload.
    pub memos_retagged: usize,
    /// Memos with no stored payload.
    pub missing_payloads: Vec<String>,
    pub orphans_removed: usize,
    pub failures: Vec<SkippedRecord>,
}

impl SweepReport {
    pub fn changed_anything(&self) -> bool {
        self.payloads_retagged > 0 || self.memos_retagged > 0 || self.orphans_removed > 0
    }
}

pub fn run_sweep(
    memos: &MemoRepository,
    blobs: &dyn BlobStore,
    fallback_format: &str,
) -> Result<SweepReport> {
    let all = memos.list()?;
    let mut report = SweepReport {
        examined: all.len(),
        ..SweepReport::default()
    };

    for memo in &all {
        if let Err(e) = reconcile(memo, memos, blobs, fallback_format, &mut report) {
            let skipped = SkippedRecord {
                id: memo.id.clone(),
                reason: e.to_string(),
            };
            warn!(error = %skipped.to_error(), "Consistency sweep skipped memo");
            report.failures.push(skipped);
        }
    }

    let known: HashSet<&str> = all.iter().map(|m| m.id.as_str()).collect();
    for id in blobs.list_ids()? {
        if known.contains(id.as_str()) {
            continue;
        }
        match blobs.delete(&id) {
            Ok(_) => {
                debug!(id = %id, "Removed orphaned payload");
                report.orphans_removed += 1;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to remove orphaned payload");
                report.failures.push(SkippedRecord {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    if report.changed_anything() || !report.missing_payloads.is_empty() {
        info!(
            examined = report.examined,
            payloads_retagged = report.payloads_retagged,
            memos_retagged = report.memos_retagged,
            missing = report.missing_payloads.len(),
            orphans = report.orphans_removed,
            failures = report.failures.len(),
            "Consistency sweep finished"
        );
    } else {
        debug!(examined = report.examined, "Consistency sweep found nothing to fix");
    }
    Ok(report)
}

fn reconcile(
    memo: &Memo,
    memos: &MemoRepository,
    blobs: &dyn BlobStore,
    fallback_format: &str,
    report: &mut SweepReport,
) -> Result<()> {
    let Some(blob) = blobs.get(&memo.id)? else {
        debug!(id = %memo.id, "Memo has no stored payload");
        report.missing_payloads.push(memo.id.clone());
        return Ok(());
    };

    let declared = if format::is_generic(&memo.audio_format) {
        let adopted = blob
            .effective_format()
            .unwrap_or_else(|| fallback_format.to_string());
        if !memos.set_audio_format(&memo.id, &adopted)? {
            return Err(MemovoxError::memo_not_found(memo.id.clone()));
        }
        report.memos_retagged += 1;
        adopted
    } else {
        memo.audio_format.clone()
    };

    if !format::same_format(&blob.format_tag, &declared) {
        blobs.put(&memo.id, &blob.data, &declared)?;
        report.payloads_retagged += 1;
    }
    Ok(())
}
