//! Read-only post lookup (§4.11, §4.9): the enrichment publisher and retagger need the
//! original post row to rebuild `posts.enriched`'s `text` field and, via the source text
//! stashed on the tags enrichment row, the retagger's regeneration input.

use diesel::prelude::*;
use msgforge_core::domain::Post;
use msgforge_core::error::PipelineError;
use uuid::Uuid;

use crate::models::PostRow;
use crate::pool::{run_blocking, DbPool};
use crate::schema::posts;

pub struct PostRepo {
    pool: DbPool,
}

impl PostRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, post_id: Uuid) -> Result<Option<Post>, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            posts::table
                .filter(posts::id.eq(post_id))
                .first::<PostRow>(conn)
                .optional()
                .map(|opt| opt.map(Into::into))
                .map_err(PipelineError::from)
        })
        .await
    }
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            channel_id: row.channel_id,
            tenant_id: row.tenant_id,
            message_seq: row.message_seq,
            text: row.text,
            posted_at: row.posted_at,
            grouped_id: row.grouped_id,
            has_media: row.has_media,
        }
    }
}
