diesel::table! {
    use diesel::sql_types::*;

    event_store (global_sequence) {
        event_id -> Uuid,
        stream_id -> Uuid,
        stream_version -> Int8,
        event_type -> Varchar,
        payload -> Json,
        metadata -> Json,
        global_sequence -> Int8,
        committed_at -> Timestamptz,
        schema_version -> Int4,
        checksum -> Nullable<Varchar>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    event_store_archive (global_sequence) {
        event_id -> Uuid,
        stream_id -> Uuid,
        stream_version -> Int8,
        event_type -> Varchar,
        payload -> Json,
        metadata -> Json,
        global_sequence -> Int8,
        committed_at -> Timestamptz,
        schema_version -> Int4,
        checksum -> Nullable<Varchar>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    event_snapshots (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        aggregate_version -> Int8,
        snapshot_data -> Json,
        compression -> Varchar,
        created_at -> Timestamptz,
        metadata -> Json,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    projection_checkpoints (projection_name) {
        projection_name -> Varchar,
        last_global_sequence -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    event_store,
    event_store_archive,
    event_snapshots,
    projection_checkpoints,
);
