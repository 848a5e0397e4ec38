//! Media CAS Store (§4.4): content-addressed S3 (or S3-compatible) object storage with
//! quota enforcement and eventually-consistent usage tracking.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use diesel::prelude::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use msgforge_core::config::ObjectStoreConfig;
use msgforge_core::domain::MediaObject;
use msgforge_core::error::PipelineError;
use sha2::{Digest, Sha256};
use std::io::Write;

use crate::models::StorageBucketUsageRow;
use crate::pool::{run_blocking, DbPool};
use crate::schema::storage_bucket_usage;

pub struct PutResult {
    pub sha256: String,
    pub key: String,
}

pub struct MediaStore {
    client: Client,
    bucket: String,
    pool: DbPool,
    quota_bytes_per_tenant: u64,
}

impl MediaStore {
    pub async fn connect(config: &ObjectStoreConfig, pool: DbPool) -> Result<Self, PipelineError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        loader = loader.region(aws_sdk_s3::config::Region::new(config.region.clone()));
        let shared = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(s3_config.build());

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            pool,
            quota_bytes_per_tenant: (config.storage_quota_gb_per_tenant * 1024.0 * 1024.0 * 1024.0) as u64,
        })
    }

    /// §4.4: head-then-put, treating an existing object as success (idempotent).
    /// Rejects with `quota_exceeded` when the tenant's cached usage plus this object
    /// would exceed `per_tenant_limit`.
    pub async fn put(&self, tenant_id: &str, bytes: &[u8], mime: &str) -> Result<PutResult, PipelineError> {
        let sha256 = sha256_hex(bytes);
        let ext = ext_for_mime(mime);
        let key = MediaObject::object_key_for(tenant_id, &sha256, ext);

        if self.head(&key).await?.is_some() {
            return Ok(PutResult { sha256, key });
        }

        self.check_quota(tenant_id, bytes.len() as u64).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(mime)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| PipelineError::ObjectStoreError { message: format!("put_object {key}: {e}") })?;

        self.bump_usage(tenant_id, bytes.len() as i64).await?;
        Ok(PutResult { sha256, key })
    }

    /// `PutJSON`: used for vision summaries and crawl snapshots. Always gzip-compressed;
    /// `Content-Encoding: gzip` marks the body accordingly.
    pub async fn put_json(&self, tenant_id: &str, key: &str, value: &serde_json::Value) -> Result<(), PipelineError> {
        let raw = serde_json::to_vec(value)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(|e| PipelineError::ObjectStoreError { message: format!("gzip encode: {e}") })?;
        let gzipped = encoder.finish().map_err(|e| PipelineError::ObjectStoreError { message: format!("gzip finish: {e}") })?;

        self.check_quota(tenant_id, gzipped.len() as u64).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .content_encoding("gzip")
            .body(ByteStream::from(gzipped.clone()))
            .send()
            .await
            .map_err(|e| PipelineError::ObjectStoreError { message: format!("put_object {key}: {e}") })?;

        self.bump_usage(tenant_id, gzipped.len() as i64).await?;
        Ok(())
    }

    pub async fn head(&self, key: &str) -> Result<Option<i64>, PipelineError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => Ok(Some(output.content_length().unwrap_or_default())),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(PipelineError::ObjectStoreError { message: format!("head_object {key}: {service_err}") })
                }
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        let response = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            let service_err = e.into_service_error();
            PipelineError::ObjectStoreError { message: format!("get_object {key}: {service_err}") }
        })?;
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::ObjectStoreError { message: format!("body read {key}: {e}") })?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    /// Only legal once the owning `MediaObject` row's `refs_count` reaches zero; the
    /// caller (the GC sweep) is responsible for that check, this is the mechanical delete.
    pub async fn delete(&self, key: &str) -> Result<(), PipelineError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::ObjectStoreError { message: format!("delete_object {key}: {e}") })?;
        Ok(())
    }

    /// Eventually-consistent quota check against the cached `storage_bucket_usage` row;
    /// acceptable drift ≤5% per §4.4. A background sweep (`reconcile_usage`) corrects it.
    async fn check_quota(&self, tenant_id: &str, additional_bytes: u64) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        let tenant = tenant_id.to_string();
        let used = run_blocking(pool, move |conn| {
            storage_bucket_usage::table
                .filter(storage_bucket_usage::tenant_id.eq(&tenant))
                .select(storage_bucket_usage::bytes_used)
                .first::<i64>(conn)
                .optional()
                .map(|v| v.unwrap_or(0))
                .map_err(PipelineError::from)
        })
        .await?;

        let projected = used as u64 + additional_bytes;
        if projected > self.quota_bytes_per_tenant {
            return Err(PipelineError::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                used_bytes: used as u64,
                limit_bytes: self.quota_bytes_per_tenant,
            });
        }
        Ok(())
    }

    async fn bump_usage(&self, tenant_id: &str, delta_bytes: i64) -> Result<(), PipelineError> {
        let pool = self.pool.clone();
        let tenant = tenant_id.to_string();
        run_blocking(pool, move |conn| {
            let now = chrono::Utc::now();
            let row = StorageBucketUsageRow { tenant_id: tenant.clone(), bytes_used: delta_bytes, updated_at: now };
            diesel::insert_into(storage_bucket_usage::table)
                .values(&row)
                .on_conflict(storage_bucket_usage::tenant_id)
                .do_update()
                .set((
                    storage_bucket_usage::bytes_used.eq(storage_bucket_usage::bytes_used + delta_bytes),
                    storage_bucket_usage::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Background reconciliation sweep (§4.4): recomputes a tenant's true usage from
    /// `media_objects` and overwrites the cached counter. Supplements the lazy bump above
    /// so long-running drift from failed/partial puts never exceeds the ≤5% bound.
    pub async fn reconcile_usage(&self, tenant_id: &str) -> Result<i64, PipelineError> {
        let pool = self.pool.clone();
        let tenant = tenant_id.to_string();
        run_blocking(pool, move |conn| {
            #[derive(QueryableByName)]
            struct Total {
                #[diesel(sql_type = diesel::sql_types::BigInt)]
                total: i64,
            }
            let total = diesel::sql_query(
                "SELECT COALESCE(SUM(mo.size_bytes), 0) AS total FROM media_objects mo \
                 JOIN post_media_map pmm ON pmm.sha256 = mo.sha256 \
                 JOIN posts p ON p.id = pmm.post_id \
                 WHERE p.tenant_id = $1 AND mo.refs_count > 0",
            )
            .bind::<diesel::sql_types::Text, _>(&tenant)
            .get_result::<Total>(conn)?
            .total;

            let now = chrono::Utc::now();
            diesel::insert_into(storage_bucket_usage::table)
                .values(StorageBucketUsageRow { tenant_id: tenant.clone(), bytes_used: total, updated_at: now })
                .on_conflict(storage_bucket_usage::tenant_id)
                .do_update()
                .set((storage_bucket_usage::bytes_used.eq(total), storage_bucket_usage::updated_at.eq(now)))
                .execute(conn)?;
            Ok(total)
        })
        .await
    }

    /// Every tenant with a cached usage row, the reconciliation sweep's worklist.
    /// A tenant with no row yet (never uploaded) has nothing to reconcile.
    pub async fn list_tenants_with_usage(&self) -> Result<Vec<String>, PipelineError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            storage_bucket_usage::table
                .select(storage_bucket_usage::tenant_id)
                .load::<String>(conn)
                .map_err(PipelineError::from)
        })
        .await
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let digest = sha256_hex(b"hello world");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn ext_for_known_mime_types() {
        assert_eq!(ext_for_mime("image/jpeg"), "jpg");
        assert_eq!(ext_for_mime("application/octet-stream"), "bin");
    }
}
