//! Audio format tags.
//!
//! A format tag is a MIME-like string (`audio/webm;codecs=opus`). The store
//! records one per memo and must keep it in agreement with the stored bytes,
//! so this module provides normalization, validation, magic-byte sniffing and
//! the deterministic candidate ordering used for playback negotiation.

use crate::error::{MemovoxError, Result};

/// Tag a generic binary container falls back to when it loses the real type.
pub const GENERIC_TAG: &str = "application/octet-stream";

/// Tag used when nothing better is known.
pub const DEFAULT_FORMAT: &str = "audio/webm";

/// Recording formats in order of preference.
pub const PREFERRED_FORMATS: &[&str] = &[
    "audio/webm",
    "audio/webm;codecs=opus",
    "audio/ogg;codecs=opus",
    "audio/ogg",
    "audio/mp4",
    "audio/mpeg",
    "audio/wav",
];

/// Canonical form: trimmed, lowercase, no whitespace around parameters.
pub fn normalize(tag: &str) -> String {
    tag.split(';')
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

/// The `type/subtype` part of a tag, without parameters.
pub fn essence(tag: &str) -> String {
    normalize(tag)
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Check that `tag` looks like `type/subtype[;param=value...]`.
///
/// Returns the normalized tag.
pub fn validate(tag: &str) -> Result<String> {
    let normalized = normalize(tag);
    let mut parts = normalized.split(';');
    let essence = parts.next().unwrap_or_default();

    let well_formed = match essence.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty() && !sub.is_empty() && !sub.contains('/') && !essence.contains(' ')
        }
        None => false,
    };
    if !well_formed {
        return Err(MemovoxError::InvalidArgument(format!(
            "Malformed format tag: {:?}",
            tag
        )));
    }

    for param in parts {
        match param.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {}
            _ => {
                return Err(MemovoxError::InvalidArgument(format!(
                    "Malformed format tag parameter {:?} in {:?}",
                    param, tag
                )))
            }
        }
    }

    Ok(normalized)
}

/// Whether `tag` carries no real type information.
pub fn is_generic(tag: &str) -> bool {
    let normalized = normalize(tag);
    normalized.is_empty() || essence(&normalized) == GENERIC_TAG
}

/// Whether two tags describe the same format.
pub fn same_format(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Detect the container format from the payload's leading bytes.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("audio/webm");
    }
    if bytes.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some("audio/wav");
    }
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return Some("audio/mp4");
    }
    if bytes.starts_with(b"ID3") {
        return Some("audio/mpeg");
    }
    // MPEG audio frame sync: 11 set bits.
    if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        return Some("audio/mpeg");
    }
    None
}

/// Resolve the tag a payload should be stored under when the caller did not
/// pass one: the payload's declared type, else its sniffed container format.
pub fn infer(declared: Option<&str>, bytes: &[u8]) -> Result<String> {
    if let Some(tag) = declared.filter(|t| !is_generic(t)) {
        return validate(tag);
    }
    sniff(bytes).map(str::to_string).ok_or_else(|| {
        MemovoxError::InvalidArgument(
            "Audio payload has no declared type and its format could not be detected".to_string(),
        )
    })
}

/// Ordered, deduplicated list of tags to try when playing a payload back.
///
/// Preference: the memo's declared tag, then tags the runtime reports as
/// supported, then the remaining candidates. Generic and malformed tags are
/// skipped.
pub fn negotiate_playback(
    declared: Option<&str>,
    runtime_supported: &[&str],
    candidates: &[&str],
) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    let all = declared
        .into_iter()
        .chain(runtime_supported.iter().copied())
        .chain(candidates.iter().copied());

    for tag in all {
        if is_generic(tag) {
            continue;
        }
        if let Ok(normalized) = validate(tag) {
            if !ordered.contains(&normalized) {
                ordered.push(normalized);
            }
        }
    }
    ordered
}

/// First preferred tag the runtime can record, else `fallback`.
pub fn select_recording_format<F>(preferred: &[String], is_supported: F, fallback: &str) -> String
where
    F: Fn(&str) -> bool,
{
    preferred
        .iter()
        .find(|tag| is_supported(tag))
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}
