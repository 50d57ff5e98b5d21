// tests/settings_store_test.rs
// Settings store: insert-if-absent registration, typed reads, masking

mod common;

use recall_backend::settings::{SettingSpec, SettingType, SettingsStore};
use std::collections::HashMap;

async fn store() -> SettingsStore {
    let pool = common::memory_pool().await;
    let store = SettingsStore::new(pool);
    store.init_schema().await.expect("schema");
    store
}

fn spec(key: &'static str, default: &'static str, setting_type: SettingType) -> SettingSpec {
    SettingSpec {
        key,
        default,
        category: "test",
        setting_type,
        description: "test setting",
    }
}

#[tokio::test]
async fn registration_preserves_user_edits() {
    let store = store().await;
    let specs = [spec("greeting", "hello", SettingType::Text)];
    let env = HashMap::new();

    store.register_defaults(&specs, &env).await.unwrap();
    assert_eq!(store.get_or("greeting", "").await, "hello");

    // User edits the value; re-registration must not clobber it
    store.set("greeting", "shalom").await.unwrap();
    store.register_defaults(&specs, &env).await.unwrap();
    assert_eq!(store.get_or("greeting", "").await, "shalom");
}

#[tokio::test]
async fn typed_getters_parse_on_read() {
    let store = store().await;
    store.set("max_items", "250").await.unwrap();
    store.set("threshold", "0.35").await.unwrap();
    store.set("enabled", "true").await.unwrap();
    store.set("broken_int", "abc").await.unwrap();

    assert_eq!(store.get_int("max_items", 0).await, 250);
    assert!((store.get_float("threshold", 0.0).await - 0.35).abs() < f64::EPSILON);
    assert!(store.get_bool("enabled", false).await);
    // Unparseable values fall back to the default
    assert_eq!(store.get_int("broken_int", 42).await, 42);
    assert_eq!(store.get_int("missing", 7).await, 7);
}

#[tokio::test]
async fn secrets_are_masked_in_listings() {
    let store = store().await;
    store
        .register_defaults(
            &[spec("api_token", "", SettingType::Secret)],
            &HashMap::new(),
        )
        .await
        .unwrap();
    store.set("api_token", "super-secret").await.unwrap();

    let rows = store.list().await.unwrap();
    let row = rows.iter().find(|r| r.key == "api_token").unwrap();
    assert_eq!(row.value, "********");

    // The raw read still returns the real value
    assert_eq!(store.get_or("api_token", "").await, "super-secret");
}

#[tokio::test]
async fn env_overlay_applies_only_on_first_registration() {
    let store = store().await;
    // set_var is unsafe in edition 2024; this test is the only writer
    // of this variable
    unsafe { std::env::set_var("RECALL_TEST_SETTING_ENV", "from-env") };

    let specs = [spec("env_backed", "default", SettingType::Text)];
    let env: HashMap<&str, &str> = HashMap::from([("env_backed", "RECALL_TEST_SETTING_ENV")]);

    store.register_defaults(&specs, &env).await.unwrap();
    assert_eq!(store.get_or("env_backed", "").await, "from-env");

    unsafe { std::env::remove_var("RECALL_TEST_SETTING_ENV") };
}
