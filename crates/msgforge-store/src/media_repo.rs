//! Media lookup by content hash (§4.6 upstream): the Vision dispatcher needs each
//! `posts.parsed` post's `media_sha256_list` resolved to the object store key/mime/size
//! that Ingest already persisted to `media_objects` in the same transaction.

use diesel::prelude::*;
use msgforge_core::domain::MediaObject;
use msgforge_core::error::PipelineError;

use crate::models::MediaObjectRow;
use crate::pool::{run_blocking, DbPool};
use crate::schema::media_objects;

pub struct MediaRepo {
    pool: DbPool,
}

impl MediaRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Order is not guaranteed to match `sha256_list`; callers that need the original
    /// position (§6 `posts.vision.uploaded.media_files`) should re-sort by `sha256`.
    pub async fn list_by_sha256(&self, sha256_list: Vec<String>) -> Result<Vec<MediaObject>, PipelineError> {
        if sha256_list.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            media_objects::table
                .filter(media_objects::sha256.eq_any(sha256_list))
                .load::<MediaObjectRow>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(PipelineError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn empty_sha256_list_is_treated_as_the_short_circuit_case() {
        let sha256_list: Vec<String> = Vec::new();
        assert!(sha256_list.is_empty());
    }
}
