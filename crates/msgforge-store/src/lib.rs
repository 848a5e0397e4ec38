//! Postgres persistence (§4.3, §4.5, §4.10) and the S3-compatible content-addressed
//! media store (§4.4).

pub mod album_repo;
pub mod enrichment_repo;
pub mod episodic;
pub mod ingest;
pub mod media_repo;
pub mod media_store;
pub mod models;
pub mod outbox;
pub mod pool;
pub mod post_repo;
pub mod schema;
pub mod tenant_resolver;

pub use album_repo::{infer_album_kind, AlbumGroup, AlbumRepo};
pub use enrichment_repo::{compute_params_hash, EnrichmentRepo, UpsertRequest};
pub use episodic::EpisodicRepo;
pub use ingest::{ChannelRef, IngestBatch, IngestOutcome, IngestPost, IngestRepo, MediaItem};
pub use media_repo::MediaRepo;
pub use media_store::{MediaStore, PutResult};
pub use outbox::OutboxSweeper;
pub use pool::{init_pool, run_blocking, DbConnection, DbPool};
pub use post_repo::PostRepo;
pub use tenant_resolver::{TenantResolver, DEFAULT_TENANT_SENTINEL};
