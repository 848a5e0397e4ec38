//! Domain entities from spec §3. These are plain data types shared by every crate that
//! needs to speak about a post, a media object, an enrichment row, or an album — the
//! actual persistence and state-machine logic live in `msgforge-store`/`msgforge-workers`.

pub mod album;
pub mod dlq;
pub mod enrichment;
pub mod episodic;
pub mod media;
pub mod post;

pub use album::{AlbumKind, AlbumState, MediaGroup, MediaGroupItem, VisionSummary};
pub use dlq::DlqEvent;
pub use enrichment::{EnrichmentKind, EnrichmentStatus, PostEnrichment};
pub use episodic::EpisodicEvent;
pub use media::{MediaObject, MediaRole, PostMediaMap};
pub use post::{Post, PostForward, PostReaction, PostReply};

/// Telegram-native ids are `i64`; every other id in the system is a UUID (§6).
pub type TelegramId = i64;
