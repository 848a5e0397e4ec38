//! Vision policy gate (§4.6 step 1): per-media-file admission decision, evaluated before
//! the budget gate and the provider call.

use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDecision {
    Analyze,
    Skip,
    OcrOnly,
}

#[derive(Debug, Clone)]
pub struct VisionPolicy {
    pub allowed_mimes: HashSet<String>,
    pub min_size_bytes: i64,
    pub max_size_bytes: i64,
    pub denied_channels: HashSet<Uuid>,
}

impl Default for VisionPolicy {
    fn default() -> Self {
        Self {
            allowed_mimes: ["image/jpeg", "image/png", "image/webp", "image/gif"].iter().map(|s| s.to_string()).collect(),
            min_size_bytes: 256,
            max_size_bytes: 20 * 1024 * 1024,
            denied_channels: HashSet::new(),
        }
    }
}

impl VisionPolicy {
    /// Evaluates one media file against mime/size/deny-list rules. Budget exhaustion is
    /// handled separately by the caller (§4.6: "blocks move the file to `ocr_only`"), so
    /// this never consults a budget gate itself. `channel_id` is `None` when the calling
    /// event doesn't carry one (the deny-list check is then skipped).
    pub fn decide(&self, mime: &str, size_bytes: i64, channel_id: Option<Uuid>) -> FileDecision {
        if channel_id.is_some_and(|c| self.denied_channels.contains(&c)) {
            return FileDecision::Skip;
        }
        if size_bytes < self.min_size_bytes || size_bytes > self.max_size_bytes {
            return FileDecision::OcrOnly;
        }
        if !self.allowed_mimes.contains(mime) {
            return FileDecision::OcrOnly;
        }
        FileDecision::Analyze
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_channel_skips_regardless_of_mime() {
        let channel = Uuid::new_v4();
        let mut policy = VisionPolicy::default();
        policy.denied_channels.insert(channel);
        assert_eq!(policy.decide("image/jpeg", 1024, Some(channel)), FileDecision::Skip);
    }

    #[test]
    fn oversized_file_falls_back_to_ocr_only() {
        let policy = VisionPolicy::default();
        assert_eq!(policy.decide("image/jpeg", 50 * 1024 * 1024, None), FileDecision::OcrOnly);
    }

    #[test]
    fn disallowed_mime_falls_back_to_ocr_only() {
        let policy = VisionPolicy::default();
        assert_eq!(policy.decide("application/pdf", 1024, None), FileDecision::OcrOnly);
    }

    #[test]
    fn allowed_mime_within_bounds_analyzes() {
        let policy = VisionPolicy::default();
        assert_eq!(policy.decide("image/png", 4096, None), FileDecision::Analyze);
    }
}
