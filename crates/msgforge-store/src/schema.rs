//! Diesel table definitions matching §6's persistence layout.

diesel::table! {
    use diesel::sql_types::*;

    channels (id) {
        id -> Uuid,
        telegram_id -> Int8,
        username -> Nullable<Text>,
        settings -> Json,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    users (id) {
        id -> Uuid,
        tenant_id -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    user_channel (user_id, channel_id) {
        user_id -> Uuid,
        channel_id -> Uuid,
        is_active -> Bool,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    posts (id) {
        id -> Uuid,
        channel_id -> Uuid,
        tenant_id -> Text,
        message_seq -> Int8,
        text -> Text,
        posted_at -> Timestamptz,
        grouped_id -> Nullable<Int8>,
        has_media -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    media_objects (sha256) {
        sha256 -> Text,
        mime -> Text,
        size_bytes -> Int8,
        object_key -> Text,
        bucket -> Text,
        first_seen_at -> Timestamptz,
        last_seen_at -> Timestamptz,
        refs_count -> Int4,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    post_media_map (post_id, sha256) {
        post_id -> Uuid,
        sha256 -> Text,
        position -> Int4,
        role -> Text,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    media_groups (id) {
        id -> Uuid,
        tenant_id -> Text,
        channel_id -> Uuid,
        grouped_id -> Int8,
        items_count -> Int4,
        album_kind -> Text,
        meta -> Json,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    media_group_items (group_id, position) {
        group_id -> Uuid,
        position -> Int4,
        post_id -> Uuid,
        sha256 -> Text,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    post_enrichment (post_id, kind) {
        post_id -> Uuid,
        kind -> Text,
        provider -> Text,
        params_hash -> Nullable<Text>,
        data -> Json,
        status -> Text,
        error -> Nullable<Text>,
        updated_at -> Timestamptz,
        description -> Nullable<Text>,
        classification -> Nullable<Text>,
        ocr_text -> Nullable<Text>,
        tags -> Nullable<Array<Text>>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    post_forwards (post_id, origin_message_id) {
        post_id -> Uuid,
        origin_channel_username -> Nullable<Text>,
        origin_message_id -> Int8,
        forwarded_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    post_reactions (post_id, emoji) {
        post_id -> Uuid,
        emoji -> Text,
        count -> Int4,
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    post_replies (post_id, reply_to_message_seq) {
        post_id -> Uuid,
        reply_to_message_seq -> Int8,
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    dlq_events (id) {
        id -> Uuid,
        source_event -> Text,
        payload_snippet -> Json,
        error_code -> Text,
        attempts -> Int4,
        next_retry_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    episodic_memory (id) {
        id -> Uuid,
        kind -> Text,
        component -> Text,
        tenant_id -> Nullable<Text>,
        summary -> Text,
        detail -> Json,
        occurred_at -> Timestamptz,
    }
}

/// Outbox pattern support (§4.3): rows written in the same transaction as the ingest
/// batch; the sweeper republishes anything still `published_at IS NULL`.
diesel::table! {
    use diesel::sql_types::*;

    outbox_events (id) {
        id -> Uuid,
        stream -> Text,
        idempotency_key -> Text,
        headers -> Json,
        payload -> Json,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

/// Global crawl dedup set and budget counters live in the fast store (Redis), not here —
/// see `msgforge-workers::budget`.
diesel::table! {
    use diesel::sql_types::*;

    storage_bucket_usage (tenant_id) {
        tenant_id -> Text,
        bytes_used -> Int8,
        updated_at -> Timestamptz,
    }
}
