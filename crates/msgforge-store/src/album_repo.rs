//! Durable album persistence (§3, §4.7): the `media_groups`/`media_group_items` side of
//! the album assembler. The ephemeral `AlbumState` machine lives in the fast store
//! (`msgforge-workers::album`); this repo is its DB-backed source of truth for "which
//! posts belong to this `grouped_id`", which is what makes split-batch albums robust
//! (§4.7: "found via the DB, not the current batch").

use chrono::Utc;
use diesel::prelude::*;
use msgforge_core::domain::AlbumKind;
use msgforge_core::error::PipelineError;
use uuid::Uuid;

use crate::models::{MediaGroupItemRow, MediaGroupRow};
use crate::pool::{run_blocking, DbPool};
use crate::schema::{media_group_items, media_groups};

pub struct AlbumRepo {
    pool: DbPool,
}

/// Current durable state of one album, as seen by ingest or the assembler.
#[derive(Debug, Clone)]
pub struct AlbumGroup {
    pub id: Uuid,
    pub tenant_id: String,
    pub channel_id: Uuid,
    pub grouped_id: i64,
    pub items_count: i32,
    pub post_ids: Vec<Uuid>,
}

impl AlbumRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Adds one post's media to the album identified by `(tenant_id, channel_id,
    /// grouped_id)`, creating the `media_groups` row on first sight. `items_count` only
    /// ever grows — Telegram delivery splits mean a later batch can report more items
    /// than the first one saw (§4.7 transition 1).
    pub async fn add_item(
        &self,
        tenant_id: String,
        channel_id: Uuid,
        grouped_id: i64,
        post_id: Uuid,
        sha256: String,
        album_kind: AlbumKind,
    ) -> Result<AlbumGroup, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            conn.transaction(|conn| Self::add_item_sync(conn, tenant_id, channel_id, grouped_id, post_id, sha256, album_kind))
        })
        .await
    }

    pub(crate) fn add_item_sync(
        conn: &mut PgConnection,
        tenant_id: String,
        channel_id: Uuid,
        grouped_id: i64,
        post_id: Uuid,
        sha256: String,
        album_kind: AlbumKind,
    ) -> Result<AlbumGroup, PipelineError> {
        let existing = media_groups::table
            .filter(media_groups::tenant_id.eq(&tenant_id))
            .filter(media_groups::channel_id.eq(channel_id))
            .filter(media_groups::grouped_id.eq(grouped_id))
            .first::<MediaGroupRow>(conn)
            .optional()?;

        let group = match existing {
            Some(row) => row,
            None => {
                let row = MediaGroupRow {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.clone(),
                    channel_id,
                    grouped_id,
                    items_count: 0,
                    album_kind: album_kind_str(album_kind).to_string(),
                    meta: serde_json::json!({}),
                };
                diesel::insert_into(media_groups::table).values(&row).execute(conn)?;
                row
            }
        };

        let next_position = media_group_items::table
            .filter(media_group_items::group_id.eq(group.id))
            .count()
            .get_result::<i64>(conn)? as i32;

        let item = MediaGroupItemRow { group_id: group.id, position: next_position, post_id, sha256 };
        diesel::insert_into(media_group_items::table)
            .values(&item)
            .on_conflict((media_group_items::group_id, media_group_items::position))
            .do_nothing()
            .execute(conn)?;

        let items_count = (next_position + 1).max(group.items_count);
        diesel::update(media_groups::table.filter(media_groups::id.eq(group.id)))
            .set(media_groups::items_count.eq(items_count))
            .execute(conn)?;

        let post_ids = Self::post_ids_sync(conn, group.id)?;
        Ok(AlbumGroup { id: group.id, tenant_id, channel_id, grouped_id, items_count, post_ids })
    }

    /// Looks up which album (if any) a post belongs to — the DB-backed replacement for
    /// the source's narrow message-id window (§9 Open Question).
    pub async fn find_group_for_post(&self, post_id: Uuid) -> Result<Option<AlbumGroup>, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            let Some(group_id) = media_group_items::table
                .filter(media_group_items::post_id.eq(post_id))
                .select(media_group_items::group_id)
                .first::<Uuid>(conn)
                .optional()?
            else {
                return Ok(None);
            };
            let row = media_groups::table.filter(media_groups::id.eq(group_id)).first::<MediaGroupRow>(conn)?;
            let post_ids = Self::post_ids_sync(conn, group_id)?;
            Ok(Some(AlbumGroup {
                id: row.id,
                tenant_id: row.tenant_id,
                channel_id: row.channel_id,
                grouped_id: row.grouped_id,
                items_count: row.items_count,
                post_ids,
            }))
        })
        .await
    }

    fn post_ids_sync(conn: &mut PgConnection, group_id: Uuid) -> Result<Vec<Uuid>, PipelineError> {
        Ok(media_group_items::table
            .filter(media_group_items::group_id.eq(group_id))
            .order(media_group_items::position.asc())
            .select(media_group_items::post_id)
            .load::<Uuid>(conn)?)
    }

    /// Writes the aggregated vision summary into `media_groups.meta.enrichment`
    /// (§4.7 transition 3b).
    pub async fn write_enrichment(&self, group_id: Uuid, enrichment: serde_json::Value) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            let row = media_groups::table.filter(media_groups::id.eq(group_id)).first::<MediaGroupRow>(conn)?;
            let mut meta = row.meta;
            meta.as_object_mut()
                .ok_or_else(|| PipelineError::IntegrityViolation { message: format!("media_groups.meta for {group_id} is not a JSON object") })?
                .insert("enrichment".to_string(), enrichment);
            meta.as_object_mut().unwrap().insert("assembled_at".to_string(), serde_json::json!(Utc::now()));
            diesel::update(media_groups::table.filter(media_groups::id.eq(group_id)))
                .set(media_groups::meta.eq(meta))
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}

fn album_kind_str(kind: AlbumKind) -> &'static str {
    match kind {
        AlbumKind::Photo => "photo",
        AlbumKind::Video => "video",
        AlbumKind::Mixed => "mixed",
        AlbumKind::Document => "document",
    }
}

/// Infers the album kind from the mime types seen so far: uniform photo/video/document,
/// `mixed` once more than one category is present.
pub fn infer_album_kind(existing: Option<AlbumKind>, mime: &str) -> AlbumKind {
    let this_kind = if mime.starts_with("image/") {
        AlbumKind::Photo
    } else if mime.starts_with("video/") {
        AlbumKind::Video
    } else {
        AlbumKind::Document
    };
    match existing {
        None => this_kind,
        Some(prev) if prev == this_kind => prev,
        Some(_) => AlbumKind::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_album_kind_switches_to_mixed_on_second_category() {
        let k = infer_album_kind(None, "image/jpeg");
        assert_eq!(k, AlbumKind::Photo);
        let k2 = infer_album_kind(Some(k), "video/mp4");
        assert_eq!(k2, AlbumKind::Mixed);
    }

    #[test]
    fn infer_album_kind_stays_uniform_for_same_category() {
        let k = infer_album_kind(Some(AlbumKind::Photo), "image/png");
        assert_eq!(k, AlbumKind::Photo);
    }
}
