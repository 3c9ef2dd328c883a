//! Read-model tables plus the projection checkpoint table. Lives in its own
//! schema module rather than `event-store`'s since these are Query Service
//! tables, never touched by the Command Service.

diesel::table! {
    projection_checkpoints (projection_name) {
        projection_name -> Varchar,
        last_global_sequence -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_read_models (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Int8,
        category_id -> Nullable<Uuid>,
        deleted -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    category_read_models (id) {
        id -> Uuid,
        name -> Varchar,
        parent_id -> Nullable<Uuid>,
        path -> Varchar,
        depth -> Int4,
        deleted -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_read_models (id) {
        id -> Uuid,
        user_id -> Uuid,
        status -> Varchar,
        subtotal -> Int8,
        tax -> Int8,
        shipping -> Int8,
        total -> Int8,
        items -> Json,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(projection_checkpoints, product_read_models, category_read_models, order_read_models,);
