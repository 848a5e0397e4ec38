//! Atomic ingest persistence (§4.3): one transaction per batch, outbox-published
//! `posts.parsed` per post.

use chrono::Utc;
use diesel::prelude::*;
use msgforge_core::domain::{Post, PostForward, PostReaction, PostReply};
use msgforge_core::error::PipelineError;
use msgforge_core::events::{AlbumsParsed, EventHeaders, PostsParsed, Stream};
use uuid::Uuid;

use crate::album_repo::infer_album_kind;
use crate::models::{MediaObjectRow, PostForwardRow, PostMediaMapRow, PostReactionRow, PostReplyRow, PostRow};
use crate::pool::{run_blocking, DbPool};
use crate::schema::{channels, media_objects, post_forwards, post_media_map, post_reactions, post_replies, posts};

/// One media item carried alongside a post in an ingest batch. The CAS `Put` has
/// already happened by the time this reaches ingest; only the resulting identity is
/// persisted here.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub sha256: String,
    pub mime: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub bucket: String,
    pub position: i32,
    pub role: msgforge_core::domain::MediaRole,
}

#[derive(Debug, Clone)]
pub struct IngestPost {
    pub post: Post,
    pub media: Vec<MediaItem>,
    pub forwards: Vec<PostForward>,
    pub reactions: Vec<PostReaction>,
    pub replies: Vec<PostReply>,
}

#[derive(Debug, Clone)]
pub struct IngestBatch {
    pub channel_username_or_id: ChannelRef,
    pub posts: Vec<IngestPost>,
}

#[derive(Debug, Clone)]
pub enum ChannelRef {
    Username(String),
    TelegramId(i64),
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub inserted_posts: usize,
    pub skipped_duplicate_posts: usize,
}

pub struct IngestRepo {
    pool: DbPool,
}

impl IngestRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns the `AlbumRepo` sharing this repo's pool, for callers that need the
    /// durable album lookup outside of an ingest batch (the assembler, mainly).
    pub fn album_repo(&self) -> crate::album_repo::AlbumRepo {
        crate::album_repo::AlbumRepo::new(self.pool.clone())
    }

    /// Persists a batch in one transaction, writing an outbox row for `posts.parsed`
    /// per inserted post in the same critical section (§4.3 step 6).
    pub async fn save_batch(&self, batch: IngestBatch) -> Result<IngestOutcome, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| Self::save_batch_sync(conn, batch)).await
    }

    fn save_batch_sync(conn: &mut crate::pool::DbConnection, batch: IngestBatch) -> Result<IngestOutcome, PipelineError> {
        conn.transaction(|conn| {
            let channel_id = Self::resolve_channel_id(conn, &batch.channel_username_or_id)?;
            Self::check_subscription(conn, channel_id)?;

            let mut outcome = IngestOutcome::default();
            for item in batch.posts {
                let inserted = Self::save_one_post(conn, channel_id, &item)?;
                if inserted {
                    outcome.inserted_posts += 1;
                    Self::write_outbox(conn, &item.post, &item.media)?;
                    if item.post.grouped_id.is_some() {
                        Self::write_album_group(conn, channel_id, &item)?;
                    }
                } else {
                    outcome.skipped_duplicate_posts += 1;
                }
            }
            Ok(outcome)
        })
    }

    fn resolve_channel_id(conn: &mut PgConnection, channel_ref: &ChannelRef) -> Result<Uuid, PipelineError> {
        let result = match channel_ref {
            ChannelRef::Username(username) => channels::table
                .filter(channels::username.eq(username))
                .select(channels::id)
                .first::<Uuid>(conn)
                .optional()?,
            ChannelRef::TelegramId(tg_id) => channels::table
                .filter(channels::telegram_id.eq(tg_id))
                .select(channels::id)
                .first::<Uuid>(conn)
                .optional()?,
        };
        result.ok_or_else(|| {
            let label = match channel_ref {
                ChannelRef::Username(u) => u.clone(),
                ChannelRef::TelegramId(id) => id.to_string(),
            };
            PipelineError::ChannelNotFound(label)
        })
    }

    /// §4.3 step 2: a channel with no active subscriber is a skip, not a failure.
    fn check_subscription(conn: &mut PgConnection, channel_id: Uuid) -> Result<(), PipelineError> {
        #[derive(QueryableByName)]
        struct ActiveFlag {
            #[diesel(sql_type = diesel::sql_types::Bool)]
            is_active: bool,
        }

        let row = diesel::sql_query(
            "SELECT uc.is_active FROM user_channel uc WHERE uc.channel_id = $1 LIMIT 1",
        )
        .bind::<diesel::sql_types::Uuid, _>(channel_id)
        .get_result::<ActiveFlag>(conn)
        .optional()?;

        match row {
            None => Err(PipelineError::UserNotSubscribed(channel_id.to_string())),
            Some(ActiveFlag { is_active: false }) => Err(PipelineError::SubscriptionInactive(channel_id.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn save_one_post(conn: &mut PgConnection, channel_id: Uuid, item: &IngestPost) -> Result<bool, PipelineError> {
        let mut post = item.post.clone();
        post.channel_id = channel_id;
        let row = PostRow::from(&post);

        let inserted = diesel::insert_into(posts::table)
            .values(&row)
            .on_conflict((posts::channel_id, posts::message_seq))
            .do_nothing()
            .execute(conn)?;

        if inserted == 0 {
            return Ok(false);
        }

        for media in &item.media {
            Self::upsert_media_object(conn, media)?;
            let link = PostMediaMapRow { post_id: post.id, sha256: media.sha256.clone(), position: media.position, role: role_str(media.role).to_string() };
            diesel::insert_into(post_media_map::table)
                .values(&link)
                .on_conflict((post_media_map::post_id, post_media_map::sha256))
                .do_nothing()
                .execute(conn)?;
        }

        for forward in &item.forwards {
            let row = PostForwardRow {
                post_id: post.id,
                origin_channel_username: forward.origin_channel_username.clone(),
                origin_message_id: forward.origin_message_id.unwrap_or_default(),
                forwarded_at: forward.forwarded_at,
            };
            diesel::insert_into(post_forwards::table)
                .values(&row)
                .on_conflict((post_forwards::post_id, post_forwards::origin_message_id))
                .do_nothing()
                .execute(conn)?;
        }

        for reaction in &item.reactions {
            let row = PostReactionRow { post_id: post.id, emoji: reaction.emoji.clone(), count: reaction.count, recorded_at: reaction.recorded_at };
            diesel::insert_into(post_reactions::table)
                .values(&row)
                .on_conflict((post_reactions::post_id, post_reactions::emoji))
                .do_update()
                .set((post_reactions::count.eq(reaction.count), post_reactions::recorded_at.eq(reaction.recorded_at)))
                .execute(conn)?;
        }

        for reply in &item.replies {
            let row = PostReplyRow { post_id: post.id, reply_to_message_seq: reply.reply_to_message_seq, recorded_at: reply.recorded_at };
            diesel::insert_into(post_replies::table)
                .values(&row)
                .on_conflict((post_replies::post_id, post_replies::reply_to_message_seq))
                .do_nothing()
                .execute(conn)?;
        }

        Ok(true)
    }

    /// `INSERT ... ON CONFLICT (sha256) DO UPDATE SET refs_count = refs_count + 1, last_seen_at = now()`.
    fn upsert_media_object(conn: &mut PgConnection, media: &MediaItem) -> Result<(), PipelineError> {
        let now = Utc::now();
        let row = MediaObjectRow {
            sha256: media.sha256.clone(),
            mime: media.mime.clone(),
            size_bytes: media.size_bytes,
            object_key: media.object_key.clone(),
            bucket: media.bucket.clone(),
            first_seen_at: now,
            last_seen_at: now,
            refs_count: 1,
        };
        diesel::insert_into(media_objects::table)
            .values(&row)
            .on_conflict(media_objects::sha256)
            .do_update()
            .set((
                media_objects::refs_count.eq(media_objects::refs_count + 1),
                media_objects::last_seen_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Adds this post's media to its `media_groups` row and enqueues `albums.parsed`
    /// (§4.3 step 6, §4.7 transition 1), all inside the same transaction as the rest of
    /// the batch. Runs once per post that carries a `grouped_id`; album membership itself
    /// is tracked at the post level, one `media_group_items` row per media item.
    fn write_album_group(conn: &mut PgConnection, channel_id: Uuid, item: &IngestPost) -> Result<(), PipelineError> {
        let grouped_id = item.post.grouped_id.expect("caller checked grouped_id.is_some()");
        let tenant_id = item.post.tenant_id.clone();

        let mut album_kind = None;
        let mut group = None;
        for media in &item.media {
            album_kind = Some(infer_album_kind(album_kind, &media.mime));
            group = Some(crate::album_repo::AlbumRepo::add_item_sync(
                conn,
                tenant_id.clone(),
                channel_id,
                grouped_id,
                item.post.id,
                media.sha256.clone(),
                album_kind.unwrap(),
            )?);
        }

        let Some(group) = group else {
            return Ok(());
        };

        let payload = AlbumsParsed {
            group_id: group.id,
            tenant_id: group.tenant_id.clone(),
            channel_id: group.channel_id,
            grouped_id: group.grouped_id,
            items_count: group.items_count,
            post_ids: group.post_ids,
        };
        let headers = EventHeaders::new(format!("album:{}:{}", group.id, item.post.id), Some(group.tenant_id));
        crate::outbox::enqueue(conn, Stream::AlbumsParsed, &headers, &payload)
    }

    /// Writes the `posts.parsed` outbox row inside the same transaction (§4.3 step 6).
    /// The sweeper in `outbox.rs` is the only thing that ever talks to the bus for these.
    fn write_outbox(conn: &mut PgConnection, post: &Post, media: &[MediaItem]) -> Result<(), PipelineError> {
        let payload = PostsParsed {
            post_id: post.id,
            channel_id: post.channel_id,
            tenant_id: post.tenant_id.clone(),
            text: post.text.clone(),
            has_media: post.has_media,
            media_sha256_list: media.iter().map(|m| m.sha256.clone()).collect(),
            grouped_id: post.grouped_id,
            telegram_post_url: None,
            posted_at: post.posted_at,
        };
        let headers = EventHeaders::new(format!("post:{}", post.id), Some(post.tenant_id.clone()));
        crate::outbox::enqueue(conn, Stream::PostsParsed, &headers, &payload)
    }
}

fn role_str(role: msgforge_core::domain::MediaRole) -> &'static str {
    match role {
        msgforge_core::domain::MediaRole::Primary => "primary",
        msgforge_core::domain::MediaRole::Attachment => "attachment",
    }
}
