use serde_json::{Value, json};
use slicesync_crypto::generate_secret;
use slicesync_storage::{
    KeyValueStore, MemoryStore, SECRET_KEY, SqliteStore, StorageError, StorageResult,
};
use slicesync_sync::{
    BusEndpoint, BusMessage, ConfigError, ExecutionMode, Realm, SliceConfig, SliceStatus,
    SyncError,
};
use slicesync_types::{ManualClock, SliceKey};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lets spawned listeners drain the bus.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Two contexts over one store and one bus.
fn make_contexts() -> (Arc<MemoryStore>, Realm, Realm) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let a = Realm::new(store.clone());
    let b = Realm::builder()
        .store(store.clone())
        .bus(a.bus().clone())
        .build();
    (store, a, b)
}

fn key(s: &str) -> SliceKey {
    SliceKey::parse(s).unwrap()
}

fn drain(endpoint: &mut BusEndpoint) -> Vec<BusMessage> {
    std::iter::from_fn(|| endpoint.try_recv()).collect()
}

#[derive(Clone, Default)]
struct Recorder<T> {
    calls: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    fn callback(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let calls = Arc::clone(&self.calls);
        move |value: &T| calls.lock().unwrap().push(value.clone())
    }

    fn calls(&self) -> Vec<T> {
        self.calls.lock().unwrap().clone()
    }
}

fn counter() -> SliceConfig<i64> {
    SliceConfig::builder("counter", 0)
        .reducer("inc", |n: &i64, payload| n + payload.as_i64().unwrap_or(1))
        .selector("double", |n: &i64, _| json!(n * 2))
        .build()
        .unwrap()
}

// ── Mount ────────────────────────────────────────────────────────

#[tokio::test]
async fn mount_reads_default_and_seeds_store() {
    let (store, realm, _) = make_contexts();

    let handle = realm.mount(counter()).unwrap();

    assert_eq!(handle.get(), 0);
    assert!(handle.is_ready());
    assert_eq!(handle.key().as_str(), "counter");
    assert_eq!(store.get("slice-counter").unwrap().as_deref(), Some("0"));
    assert!(store.get("slices-checksum-counter").unwrap().is_some());
}

#[tokio::test]
async fn mount_reads_existing_value() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    a.mount(config.clone()).unwrap().set(12).unwrap();

    let handle = b.mount(config).unwrap();
    assert_eq!(handle.get(), 12);
}

#[tokio::test]
async fn client_mount_without_store_fails() {
    let realm = Realm::without_store();
    let err = realm.mount(counter()).unwrap_err();
    match err {
        SyncError::StoreUnavailable { key } => assert_eq!(key, "counter"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn rejected_default_fails_mount() {
    let (_, realm, _) = make_contexts();
    let config = SliceConfig::builder("counter", -1_i64)
        .schema(|n: &i64| -> Result<(), String> {
            if *n >= 0 {
                Ok(())
            } else {
                Err("negative".into())
            }
        })
        .build()
        .unwrap();

    let err = realm.mount(config).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Config(ConfigError::DefaultRejected {
            mode: ExecutionMode::Client,
            ..
        })
    ));
    assert!(err.to_string().contains("counter"));
}

#[tokio::test]
async fn rejected_server_default_fails_mount() {
    let (_, realm, _) = make_contexts();
    let config = SliceConfig::builder("name", "client".to_string())
        .server_rendered(String::new())
        .schema(|s: &String| -> Result<(), String> {
            if s.is_empty() {
                Err("empty".into())
            } else {
                Ok(())
            }
        })
        .build()
        .unwrap();

    let err = realm.mount(config).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Config(ConfigError::DefaultRejected {
            mode: ExecutionMode::Server,
            ..
        })
    ));
}

#[test]
fn mount_outside_runtime_fails() {
    let realm = Realm::new(Arc::new(MemoryStore::new()));
    let err = realm.mount(counter()).unwrap_err();
    assert!(matches!(err, SyncError::RuntimeUnavailable { .. }));
}

// ── Convergence ──────────────────────────────────────────────────

#[tokio::test]
async fn set_converges_other_context() {
    let (store, a, b) = make_contexts();
    let changes = Recorder::default();
    let config = Arc::new(
        SliceConfig::builder("theme", "light".to_string())
            .on_change(changes.callback())
            .build()
            .unwrap(),
    );

    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    tab_a.set("dark".to_string()).unwrap();
    assert_eq!(tab_a.get(), "dark");
    settle().await;

    assert_eq!(tab_b.get(), "dark");
    assert_eq!(store.get("slice-theme").unwrap().as_deref(), Some("\"dark\""));
    // only the receiving context is notified
    assert_eq!(changes.calls(), vec!["dark".to_string()]);
}

#[tokio::test]
async fn duplicate_value_changed_is_noop() {
    let (_, a, b) = make_contexts();
    let changes = Recorder::default();
    let config = Arc::new(
        SliceConfig::builder("theme", "light".to_string())
            .on_change(changes.callback())
            .build()
            .unwrap(),
    );
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    tab_a.set("dark".to_string()).unwrap();
    settle().await;

    let publisher = a.bus().detached_publisher();
    for _ in 0..3 {
        publisher.publish(BusMessage::ValueChanged {
            key: key("theme"),
            value: json!("dark"),
        });
    }
    settle().await;

    assert_eq!(tab_b.get(), "dark");
    assert_eq!(changes.calls().len(), 1);
}

#[tokio::test]
async fn messages_for_other_slices_are_ignored() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    let _tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    a.bus().detached_publisher().publish(BusMessage::ValueChanged {
        key: key("other"),
        value: json!(99),
    });
    settle().await;

    assert_eq!(tab_b.get(), 0);
}

#[tokio::test]
async fn undecodable_value_changed_is_ignored() {
    let (_, a, _) = make_contexts();
    let handle = a.mount(counter()).unwrap();

    a.bus().detached_publisher().publish(BusMessage::ValueChanged {
        key: key("counter"),
        value: json!("not a number"),
    });
    settle().await;

    assert_eq!(handle.get(), 0);
}

#[tokio::test]
async fn update_resolves_against_memory() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    let next = tab_a.update(|n| n + 5).unwrap();
    assert_eq!(next, 5);
    settle().await;
    assert_eq!(tab_b.get(), 5);
}

#[tokio::test]
async fn watch_receiver_sees_remote_changes() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();
    let mut state = tab_b.subscribe();

    tab_a.set(4).unwrap();
    settle().await;

    assert!(state.has_changed().unwrap());
    let snapshot = state.borrow_and_update().clone();
    assert_eq!(snapshot.value, 4);
    assert!(snapshot.is_ready());
}

#[tokio::test]
async fn converges_over_sqlite() {
    init_tracing();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = Realm::new(store.clone());
    let b = Realm::builder().store(store).bus(a.bus().clone()).build();
    let config = Arc::new(counter());

    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    tab_a.dispatch("inc", Value::Null).unwrap();
    settle().await;
    assert_eq!(tab_b.get(), 1);
}

// ── Reducers & selectors ─────────────────────────────────────────

#[tokio::test]
async fn counter_increments_twice() {
    let (store, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    assert_eq!(tab_a.dispatch("inc", Value::Null).unwrap(), 1);
    assert_eq!(tab_a.reducers()["inc"].call(Value::Null).unwrap(), 2);

    assert_eq!(tab_a.get(), 2);
    assert_eq!(store.get("slice-counter").unwrap().as_deref(), Some("2"));
    settle().await;
    assert_eq!(tab_b.get(), 2);
}

#[tokio::test]
async fn reducer_reads_authoritative_store() {
    let (store, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    tab_a.dispatch("inc", json!(10)).unwrap();
    assert_eq!(tab_b.get(), 0);

    // tab_b has not seen the broadcast yet but still builds on the stored 10
    assert_eq!(tab_b.dispatch("inc", Value::Null).unwrap(), 11);
    assert_eq!(store.get("slice-counter").unwrap().as_deref(), Some("11"));

    settle().await;
    assert_eq!(tab_a.get(), 11);
}

#[tokio::test]
async fn selectors_project_memory() {
    let (_, a, _) = make_contexts();
    let handle = a.mount(counter()).unwrap();
    handle.set(21).unwrap();

    assert_eq!(handle.select("double", Value::Null).unwrap(), json!(42));
    let selectors = handle.selectors();
    assert_eq!(selectors.keys().copied().collect::<Vec<_>>(), vec!["double"]);
    assert_eq!(selectors["double"].call(Value::Null).unwrap(), json!(42));
}

#[tokio::test]
async fn unknown_names_are_errors() {
    let (_, a, _) = make_contexts();
    let handle = a.mount(counter()).unwrap();

    assert!(matches!(
        handle.dispatch("dec", Value::Null),
        Err(SyncError::UnknownReducer { .. })
    ));
    assert!(matches!(
        handle.select("triple", Value::Null),
        Err(SyncError::UnknownSelector { .. })
    ));
}

// ── Staleness ────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_value_recovers_and_invalidates_peers() {
    let (store, a, _) = make_contexts();
    let config = counter();
    store
        .set("slices-checksum-counter", config.fingerprint())
        .unwrap();
    store.set("slice-counter", "{garbage").unwrap();
    let mut observer = a.bus().subscribe().unwrap();

    let handle = a.mount(config).unwrap();

    assert_eq!(handle.get(), 0);
    assert_eq!(
        drain(&mut observer),
        vec![BusMessage::ConfigInvalidated {
            key: key("counter")
        }]
    );
    assert!(store.get("slice-counter").unwrap().is_none());
}

#[tokio::test]
async fn reducer_over_corrupt_value_keeps_its_write() {
    let (store, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config.clone()).unwrap();
    let mut observer = a.bus().subscribe().unwrap();
    store.set("slice-counter", "{garbage").unwrap();

    assert_eq!(tab_a.dispatch("inc", Value::Null).unwrap(), 1);
    assert_eq!(
        drain(&mut observer),
        vec![BusMessage::ValueChanged {
            key: key("counter"),
            value: json!(1),
        }]
    );

    settle().await;
    assert_eq!(tab_a.get(), 1);
    assert_eq!(tab_b.get(), 1);
    assert_eq!(store.get("slice-counter").unwrap().as_deref(), Some("1"));

    let fresh = Realm::new(store.clone()).mount(config).unwrap();
    assert_eq!(fresh.get(), 1);
}

#[tokio::test]
async fn config_drift_resets_to_new_default() {
    let (store, a, _) = make_contexts();
    let old = SliceConfig::builder("theme", "light".to_string())
        .build()
        .unwrap();
    let handle = a.mount(old).unwrap();
    handle.set("dark".to_string()).unwrap();
    handle.unmount();

    let new = SliceConfig::builder("theme", "system".to_string())
        .build()
        .unwrap();
    let fingerprint = new.fingerprint().to_string();
    let handle = a.mount(new).unwrap();

    assert_eq!(handle.get(), "system");
    assert_eq!(
        store.get("slices-checksum-theme").unwrap(),
        Some(fingerprint)
    );
}

#[tokio::test]
async fn invalidation_resets_every_context() {
    let (store, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();
    tab_a.set(9).unwrap();
    settle().await;
    assert_eq!(tab_b.get(), 9);

    a.bus()
        .detached_publisher()
        .publish(BusMessage::ConfigInvalidated {
            key: key("counter"),
        });
    settle().await;

    assert_eq!(tab_a.get(), 0);
    assert_eq!(tab_b.get(), 0);
    assert!(store.get("slice-counter").unwrap().is_none());
}

// ── Encryption ───────────────────────────────────────────────────

fn token() -> Arc<SliceConfig<String>> {
    Arc::new(
        SliceConfig::builder("token", String::new())
            .encrypt(true)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn encrypted_value_is_readable_with_the_realm_secret() {
    let (store, a, _) = make_contexts();
    let handle = a.mount(token()).unwrap();
    handle.set("abc".to_string()).unwrap();

    let stored = store.get("slice-token").unwrap().unwrap();
    assert!(!stored.contains("abc"));

    // a fresh context over the same store decodes it
    let other = Realm::new(store.clone());
    assert_eq!(other.mount(token()).unwrap().get(), "abc");
}

#[tokio::test]
async fn encrypted_value_with_wrong_secret_falls_back() {
    let (store, a, _) = make_contexts();
    a.mount(token()).unwrap().set("abc".to_string()).unwrap();

    store
        .set(SECRET_KEY, &generate_secret().to_base64())
        .unwrap();

    let other = Realm::new(store.clone());
    assert_eq!(other.mount(token()).unwrap().get(), "");
}

// ── Server rendering ─────────────────────────────────────────────

fn theme_ssr() -> Arc<SliceConfig<String>> {
    Arc::new(
        SliceConfig::builder("theme", "light".to_string())
            .server_rendered("server".to_string())
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn server_rendered_slice_hydrates_once() {
    let (_, a, b) = make_contexts();
    let config = theme_ssr();
    {
        let seed = a.mount(config.clone()).unwrap();
        seed.set("dark".to_string()).unwrap();
    }

    let handle = b.mount(config).unwrap();
    assert_eq!(handle.get(), "server");
    assert_eq!(handle.status(), SliceStatus::Initializing);

    settle().await;
    assert!(handle.is_ready());
    assert_eq!(handle.get(), "dark");
}

/// A store whose every operation fails.
struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Err(StorageError::LockPoisoned)
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::LockPoisoned)
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::LockPoisoned)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Err(StorageError::LockPoisoned)
    }
}

#[tokio::test]
async fn failed_hydration_is_observable() {
    init_tracing();
    let realm = Realm::new(Arc::new(BrokenStore));

    let handle = realm.mount(theme_ssr()).unwrap();
    let mut state = handle.subscribe();
    assert_eq!(handle.status(), SliceStatus::Initializing);

    settle().await;
    assert!(state.has_changed().unwrap());
    let snapshot = state.borrow_and_update().clone();
    assert_eq!(snapshot.status, SliceStatus::Failed);
    assert_eq!(snapshot.value, "server");
    assert!(!handle.is_ready());
}

#[tokio::test]
async fn server_context_keeps_server_default() {
    let (_, a, _) = make_contexts();
    let server = a.server();

    let handle = server.mount(theme_ssr()).unwrap();
    settle().await;

    assert_eq!(handle.get(), "server");
    assert!(!handle.is_ready());
    assert!(matches!(
        handle.set("dark".to_string()),
        Err(SyncError::StoreUnavailable { .. })
    ));
}

#[tokio::test]
async fn server_context_rejects_client_only_slices() {
    let (_, a, _) = make_contexts();
    let err = a.server().mount(counter()).unwrap_err();
    assert!(matches!(err, SyncError::StoreUnavailable { .. }));
}

// ── Expiration ───────────────────────────────────────────────────

const NOW: u64 = 1_000_000;

#[tokio::test(start_paused = true)]
async fn expiration_resets_value_once() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let realm = Realm::builder()
        .store(store.clone())
        .clock(clock.clone())
        .build();
    let expirations = Recorder::default();
    let config = SliceConfig::builder("session", String::new())
        .expire("0d-0h-1m-0s")
        .on_expire(expirations.callback())
        .build()
        .unwrap();
    store
        .set("slices-expire-session", &(NOW + 50).to_string())
        .unwrap();
    let mut observer = realm.bus().subscribe().unwrap();

    let handle = realm.mount(config).unwrap();
    handle.set("token".to_string()).unwrap();
    settle().await;
    assert_eq!(handle.get(), "token");

    clock.advance(60);
    tokio::time::advance(Duration::from_millis(60)).await;
    settle().await;

    let expired = drain(&mut observer)
        .into_iter()
        .filter(|m| matches!(m, BusMessage::Expired { .. }))
        .count();
    assert_eq!(expired, 1);
    assert_eq!(expirations.calls(), vec![String::new()]);
    assert_eq!(handle.get(), "");
    assert!(store.get("slice-session").unwrap().is_none());
    assert_eq!(
        store.get("slices-expire-session").unwrap(),
        Some((NOW + 60 + 60_000).to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn expiring_default_value_skips_callback() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let realm = Realm::builder()
        .store(store.clone())
        .clock(clock.clone())
        .build();
    let expirations = Recorder::<i64>::default();
    let config = SliceConfig::builder("session", 0_i64)
        .expire("0d-0h-0m-1s")
        .on_expire(expirations.callback())
        .build()
        .unwrap();

    let handle = realm.mount(config).unwrap();

    clock.advance(1_000);
    tokio::time::advance(Duration::from_millis(1_000)).await;
    settle().await;

    assert!(expirations.calls().is_empty());
    assert_eq!(handle.get(), 0);
    assert_eq!(
        store.get("slices-expire-session").unwrap(),
        Some((NOW + 2_000).to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn expiration_reaches_every_context() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let a = Realm::builder()
        .store(store.clone())
        .clock(clock.clone())
        .build();
    let b = Realm::builder()
        .store(store.clone())
        .clock(clock.clone())
        .bus(a.bus().clone())
        .build();
    let config = Arc::new(
        SliceConfig::builder("session", 0_i64)
            .expire("0d-0h-0m-5s")
            .build()
            .unwrap(),
    );

    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();
    tab_a.set(3).unwrap();
    settle().await;
    assert_eq!(tab_b.get(), 3);

    clock.advance(5_000);
    tokio::time::advance(Duration::from_millis(5_000)).await;
    settle().await;

    assert_eq!(tab_a.get(), 0);
    assert_eq!(tab_b.get(), 0);
}

// ── Unmount ──────────────────────────────────────────────────────

#[tokio::test]
async fn unmount_detaches_from_bus() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();
    assert_eq!(a.bus().subscriber_count(), 2);

    tab_b.unmount();
    settle().await;
    assert_eq!(a.bus().subscriber_count(), 1);

    tab_a.set(1).unwrap();
    settle().await;
    assert_eq!(tab_a.get(), 1);
}

#[tokio::test]
async fn closed_realm_keeps_local_value() {
    let (_, a, b) = make_contexts();
    let config = Arc::new(counter());
    let tab_a = a.mount(config.clone()).unwrap();
    let tab_b = b.mount(config).unwrap();

    a.close();
    tab_a.set(8).unwrap();
    settle().await;

    assert_eq!(tab_a.get(), 8);
    assert_eq!(tab_b.get(), 0);
    assert!(matches!(
        b.mount(counter()),
        Err(SyncError::BusClosed)
    ));
}
