//! Stream name catalogue (§4.1, §6). Streams are named `stream:<domain>.<event>`;
//! `.dlq()` derives the sidecar dead-letter stream name for any base stream.

use std::fmt;

/// A stream in the event catalogue. Each variant owns the domain/event name used to
/// build the Redis key `stream:<domain>.<event>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    PostsParsed,
    PostsVisionUploaded,
    PostsVisionAnalyzed,
    AlbumsParsed,
    AlbumAssembled,
    AlbumAssemblyExpired,
    PostsTagged,
    PostsEnriched,
    PostsIndexed,
    PostsCrawled,
}

impl Stream {
    pub const fn base_name(self) -> &'static str {
        match self {
            Self::PostsParsed => "posts.parsed",
            Self::PostsVisionUploaded => "posts.vision.uploaded",
            Self::PostsVisionAnalyzed => "posts.vision.analyzed",
            Self::AlbumsParsed => "albums.parsed",
            Self::AlbumAssembled => "album.assembled",
            Self::AlbumAssemblyExpired => "album.assembly_expired",
            Self::PostsTagged => "posts.tagged",
            Self::PostsEnriched => "posts.enriched",
            Self::PostsIndexed => "posts.indexed",
            Self::PostsCrawled => "posts.crawled",
        }
    }

    /// The Redis key for the stream itself: `stream:<domain>.<event>`.
    pub fn key(self) -> String {
        format!("stream:{}", self.base_name())
    }

    /// The Redis key for this stream's DLQ sidecar: `stream:<domain>.<event>.dlq`.
    pub fn dlq_key(self) -> String {
        format!("stream:{}.dlq", self.base_name())
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_matches_spec() {
        assert_eq!(Stream::PostsParsed.key(), "stream:posts.parsed");
        assert_eq!(Stream::PostsParsed.dlq_key(), "stream:posts.parsed.dlq");
    }
}
