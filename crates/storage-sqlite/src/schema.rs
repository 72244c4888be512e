//! Diesel table definitions. Kept in lockstep with the current schema
//! version in `migrations`.

diesel::table! {
    customers (id) {
        id -> Text,
        name -> Text,
        email -> Nullable<Text>,
        phone -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    menu_items (id) {
        id -> Text,
        name -> Text,
        category -> Nullable<Text>,
        price -> Text,
        currency -> Text,
        is_available -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    orders (id) {
        id -> Text,
        customer_id -> Nullable<Text>,
        table_label -> Nullable<Text>,
        status -> Text,
        total -> Text,
        currency -> Text,
        note -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    schema_version (id) {
        id -> Integer,
        version -> Integer,
        updated_at -> Text,
    }
}

diesel::table! {
    sync_queue (id) {
        id -> BigInt,
        entity_type -> Text,
        entity_id -> Text,
        operation -> Text,
        payload -> Text,
        status -> Text,
        attempt_count -> Integer,
        last_attempt_at -> Nullable<Text>,
        next_retry_at -> Nullable<Text>,
        last_error -> Nullable<Text>,
        last_error_code -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(customers, menu_items, orders, sync_queue);
