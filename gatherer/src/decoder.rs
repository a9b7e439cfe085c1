//! Object decoder: candidate bytes to a typed reading

use igpu_shared::{LinuxReading, Platform, Reading, WindowsReading};

/// Characters of the offending candidate kept in error messages
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, thiserror::Error)]
#[error("failed to decode {platform} reading: {source} (candidate: {preview})")]
pub struct DecodeError {
    pub platform: Platform,
    pub preview: String,
    #[source]
    pub source: serde_json::Error,
}

fn preview(candidate: &[u8]) -> String {
    let text = String::from_utf8_lossy(candidate);
    let mut out: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(PREVIEW_CHARS)
        .collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

/// Decodes candidates into the reading shape of one platform
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    platform: Platform,
}

impl Decoder {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn decode(&self, candidate: &[u8]) -> Result<Reading, DecodeError> {
        let decoded = match self.platform {
            Platform::Linux => serde_json::from_slice::<LinuxReading>(candidate).map(Reading::from),
            Platform::Windows => {
                serde_json::from_slice::<WindowsReading>(candidate).map(Reading::from)
            }
        };
        decoded.map_err(|source| DecodeError {
            platform: self.platform,
            preview: preview(candidate),
            source,
        })
    }
}
