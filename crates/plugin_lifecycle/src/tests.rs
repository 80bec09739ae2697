//! Lifecycle scenarios against a real bus and a temporary persistent root

use crate::*;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Hooks that record each call and optionally fail or register handlers
#[derive(Default)]
struct RecordingHooks {
    log: Log,
    handlers_on_load: usize,
    fail_close: bool,
    fail_on_load: bool,
}

#[async_trait]
impl PluginHooks for RecordingHooks {
    fn init(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        self.log.lock().unwrap().push("init".into());
        Ok(())
    }

    async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<()> {
        self.log.lock().unwrap().push("on_load".into());
        for _ in 0..self.handlers_on_load {
            ctx.register_handler("message", |_event| Ok(Value::Null), 0);
        }
        if self.fail_on_load {
            return Err(PluginError::hook("on_load refused"));
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        self.log.lock().unwrap().push("close".into());
        if self.fail_close {
            return Err(PluginError::hook("close refused"));
        }
        Ok(())
    }

    async fn on_unload(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push("on_unload".into());
        Ok(())
    }
}

/// File store that records saves and can simulate a full disk
struct RecordingStore {
    inner: FileStore,
    log: Log,
    disk_full: bool,
}

impl PersistentStore for RecordingStore {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn load(&self) -> std::result::Result<LoadOutcome, StoreError> {
        self.inner.load()
    }

    fn save(&self, document: &Document) -> std::result::Result<(), StoreError> {
        self.log.lock().unwrap().push("save".into());
        if self.disk_full {
            return Err(StoreError::Save {
                path: self.inner.path().to_path_buf(),
                reason: "No space left on device".into(),
            });
        }
        self.inner.save(document)
    }
}

/// Bus wrapper counting unsubscribe attempts
#[derive(Default)]
struct CountingBus {
    inner: InMemoryEventBus,
    unsubscribes: AtomicUsize,
}

impl EventBus for CountingBus {
    fn subscribe(&self, event_type: &str, handler: EventHandlerFn, priority: i32) -> HandlerId {
        self.inner.subscribe(event_type, handler, priority)
    }

    fn unsubscribe(&self, handler_id: HandlerId) -> std::result::Result<(), EventError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(handler_id)
    }

    fn publish_sync(&self, event: &Event) -> std::result::Result<Vec<Value>, EventError> {
        self.inner.publish_sync(event)
    }

    fn publish_async(&self, event: Event) -> BoxFuture<'static, std::result::Result<Vec<Value>, EventError>> {
        self.inner.publish_async(event)
    }
}

fn echo_config(root: &Path) -> PluginConfig {
    PluginConfig::new("Echo", "1.0").with_persistent_root(root)
}

fn new_bus() -> Arc<InMemoryEventBus> {
    Arc::new(InMemoryEventBus::new())
}

fn recording_store(log: Log, disk_full: bool) -> impl FnOnce(PathBuf) -> RecordingStore {
    move |path| RecordingStore {
        inner: FileStore::new(path),
        log,
        disk_full,
    }
}

#[test]
fn test_first_load_only_on_first_construction() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();

    let first = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();
    assert!(first.context().first_load());
    assert!(first.context().data().is_empty());
    assert!(!first.context().data().was_restored());
    assert_eq!(first.state(), LifecycleState::Constructed);
    assert_eq!(first.context().work_path(), root.path().join("Echo"));
    assert!(root.path().join("Echo").is_dir());

    for _ in 0..3 {
        let again = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();
        assert!(!again.context().first_load());
    }
}

#[test]
fn test_missing_identity_creates_nothing() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();

    for (name, version, expected) in [
        ("", "1.0", "missing plugin name"),
        ("Echo", "", "missing plugin version"),
    ] {
        let config = PluginConfig::new(name, version).with_persistent_root(root.path());
        let err = PluginLifecycle::new(bus.clone(), config, NoopHooks).unwrap_err();

        assert!(matches!(err, PluginError::Validation(_)));
        assert!(err.to_string().contains(expected));
    }

    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn test_name_outside_one_directory_creates_nothing() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("root");
    std::fs::create_dir(&root).unwrap();
    let bus = new_bus();

    for name in [".", "..", "a/b", "../escape"] {
        let config = PluginConfig::new(name, "1.0").with_persistent_root(&root);
        let err = PluginLifecycle::new(bus.clone(), config, NoopHooks).unwrap_err();
        assert!(matches!(err, PluginError::Validation(_)), "{name} accepted");
    }

    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(outer.path()).unwrap().count(), 1);
}

#[test]
fn test_missing_root_is_created() {
    let root = TempDir::new().unwrap();
    let nested = root.path().join("a").join("b");

    let plugin = PluginLifecycle::new(new_bus(), echo_config(&nested), NoopHooks).unwrap();
    assert!(plugin.context().first_load());
    assert!(nested.join("Echo").is_dir());
}

#[test]
fn test_corrupt_state_fails_construction() {
    let root = TempDir::new().unwrap();
    let work = root.path().join("Echo");
    std::fs::create_dir_all(&work).unwrap();
    std::fs::write(work.join("Echo.json"), "{ definitely not json").unwrap();

    let err = PluginLifecycle::new(new_bus(), echo_config(root.path()), NoopHooks).unwrap_err();
    match err {
        PluginError::PersistenceLoad { plugin, source } => {
            assert_eq!(plugin, "Echo");
            assert!(matches!(source, StoreError::Load { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_state_format_fails_construction() {
    let root = TempDir::new().unwrap();
    let err = PluginLifecycle::with_store(new_bus(), echo_config(root.path()), NoopHooks, |path| {
        FileStore::new(path.with_extension("bin"))
    })
    .unwrap_err();

    assert!(matches!(
        err,
        PluginError::PersistenceLoad { source: StoreError::FileTypeUnknown(_), .. }
    ));
}

#[tokio::test]
async fn test_state_round_trip_across_instances() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();

    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();
    plugin.context_mut().data_mut().set("greeting", "hello");
    plugin.context_mut().data_mut().set("count", 2);
    let saved = plugin.context().data().document().clone();
    plugin.unload().await.unwrap();
    assert_eq!(plugin.state(), LifecycleState::Unloaded);
    assert!(root.path().join("Echo").join("Echo.json").is_file());

    let reloaded = PluginLifecycle::new(bus, echo_config(root.path()), NoopHooks).unwrap();
    assert!(!reloaded.context().first_load());
    assert!(reloaded.context().data().was_restored());
    assert_eq!(reloaded.context().data().document(), &saved);
}

#[tokio::test]
async fn test_reconstruct_without_saved_data_is_empty() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();

    let first = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();
    drop(first);

    let second = PluginLifecycle::new(bus, echo_config(root.path()), NoopHooks).unwrap();
    assert!(!second.context().first_load());
    assert!(second.context().data().is_empty());
}

#[test]
fn test_register_then_unregister_leaves_no_handlers() {
    let root = TempDir::new().unwrap();

    for count in [0usize, 1, 5] {
        let bus = new_bus();
        let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();

        for priority in 0..count {
            plugin
                .context_mut()
                .register_handler("message", |_event| Ok(Value::Null), priority as i32);
        }
        assert_eq!(bus.total_handlers(), count);
        assert_eq!(plugin.context().handler_ids().len(), count);

        plugin.context_mut().unregister_handlers();
        assert_eq!(bus.total_handlers(), 0);
        assert!(plugin.context().handler_ids().is_empty());
    }
}

#[test]
fn test_duplicate_registration_fires_twice() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();

    let handler = |event: &Event| -> std::result::Result<Value, EventError> { Ok(event.data.clone()) };
    plugin.context_mut().register_handler("message", handler, 0);
    plugin.context_mut().register_handler("message", handler, 0);

    let results = plugin
        .context()
        .publish_sync(&Event::new("message", json!("ping")))
        .unwrap();
    assert_eq!(results, vec![json!("ping"), json!("ping")]);
}

#[test]
fn test_unregister_twice_is_a_noop() {
    let root = TempDir::new().unwrap();
    let bus = Arc::new(CountingBus::default());
    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();

    plugin.context_mut().register_handler("a", |_event| Ok(Value::Null), 0);
    plugin.context_mut().register_handler("b", |_event| Ok(Value::Null), 0);

    plugin.context_mut().unregister_handlers();
    assert_eq!(bus.unsubscribes.load(Ordering::SeqCst), 2);

    plugin.context_mut().unregister_handlers();
    assert_eq!(bus.unsubscribes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unregister_skips_ids_the_bus_forgot() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();

    let stale = plugin.context_mut().register_handler("a", |_event| Ok(Value::Null), 0);
    plugin.context_mut().register_handler("b", |_event| Ok(Value::Null), 0);
    bus.unsubscribe(stale).unwrap();

    plugin.context_mut().unregister_handlers();
    assert_eq!(bus.total_handlers(), 0);
    assert!(plugin.context().handler_ids().is_empty());
}

#[test]
fn test_publish_sync_preserves_bus_priority_order() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus, echo_config(root.path()), NoopHooks).unwrap();

    plugin.context_mut().register_handler("message", |_event| Ok(json!(5)), 5);
    plugin.context_mut().register_handler("message", |_event| Ok(json!(10)), 10);

    let results = plugin
        .context()
        .publish_sync(&Event::new("message", Value::Null))
        .unwrap();
    assert_eq!(results, vec![json!(10), json!(5)]);
}

#[tokio::test]
async fn test_publish_async_yields_sync_results() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus, echo_config(root.path()), NoopHooks).unwrap();

    plugin.context_mut().register_handler("message", |_event| Ok(json!("b")), 1);
    plugin.context_mut().register_handler("message", |_event| Ok(json!("a")), 2);

    let event = Event::new("message", Value::Null);
    let sync_results = plugin.context().publish_sync(&event).unwrap();
    let async_results = plugin.context().publish_async(event).await.unwrap();
    assert_eq!(sync_results, async_results);
}

#[tokio::test]
async fn test_load_and_unload_sequence_order() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let log = Log::default();
    let hooks = RecordingHooks {
        log: log.clone(),
        handlers_on_load: 3,
        ..Default::default()
    };

    let mut plugin =
        PluginLifecycle::with_store(bus.clone(), echo_config(root.path()), hooks, recording_store(log.clone(), false))
            .unwrap();

    plugin.load().await.unwrap();
    assert_eq!(plugin.state(), LifecycleState::Active);
    assert_eq!(bus.handler_count("message"), 3);

    plugin.unload().await.unwrap();
    assert_eq!(plugin.state(), LifecycleState::Unloaded);
    assert_eq!(entries(&log), vec!["init", "on_load", "close", "on_unload", "save"]);
    assert_eq!(bus.total_handlers(), 0);
}

#[tokio::test]
async fn test_unload_flush_failure_is_wrapped() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let log = Log::default();
    let hooks = RecordingHooks {
        log: log.clone(),
        handlers_on_load: 2,
        ..Default::default()
    };

    let mut plugin =
        PluginLifecycle::with_store(bus.clone(), echo_config(root.path()), hooks, recording_store(log.clone(), true))
            .unwrap();
    plugin.load().await.unwrap();

    let err = plugin.unload().await.unwrap_err();
    match &err {
        PluginError::UnloadFlush { plugin, source } => {
            assert_eq!(plugin, "Echo");
            assert!(matches!(source, StoreError::Save { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("Echo"));
    assert!(err.to_string().contains("No space left on device"));

    assert_eq!(plugin.state(), LifecycleState::Failed);
    assert_eq!(bus.total_handlers(), 0);
}

#[tokio::test]
async fn test_hook_failure_skips_flush_and_passes_through() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let log = Log::default();
    let hooks = RecordingHooks {
        log: log.clone(),
        handlers_on_load: 1,
        fail_close: true,
        ..Default::default()
    };

    let mut plugin =
        PluginLifecycle::with_store(bus.clone(), echo_config(root.path()), hooks, recording_store(log.clone(), false))
            .unwrap();
    plugin.load().await.unwrap();

    let err = plugin.unload().await.unwrap_err();
    assert!(matches!(err, PluginError::Hook(_)));
    assert_eq!(entries(&log), vec!["init", "on_load", "close"]);
    assert_eq!(plugin.state(), LifecycleState::Failed);
    assert_eq!(bus.total_handlers(), 0);
}

#[tokio::test]
async fn test_unload_only_once() {
    let root = TempDir::new().unwrap();
    let mut plugin = PluginLifecycle::new(new_bus(), echo_config(root.path()), NoopHooks).unwrap();

    plugin.unload().await.unwrap();
    let err = plugin.unload().await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::InvalidState { state: LifecycleState::Unloaded, operation: "unload", .. }
    ));
}

#[tokio::test]
async fn test_load_failure_releases_handlers() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let hooks = RecordingHooks {
        handlers_on_load: 2,
        fail_on_load: true,
        ..Default::default()
    };

    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), hooks).unwrap();
    assert!(plugin.load().await.is_err());
    assert_eq!(plugin.state(), LifecycleState::Failed);
    assert_eq!(bus.total_handlers(), 0);

    assert!(matches!(plugin.load().await, Err(PluginError::InvalidState { .. })));
    assert!(matches!(plugin.unload().await, Err(PluginError::InvalidState { .. })));
}

#[test]
fn test_context_accessors() {
    let root = TempDir::new().unwrap();
    let config = echo_config(root.path())
        .with_metadata("author", "someone")
        .with_dependency("core", ">=1.0");
    let plugin = PluginLifecycle::new(new_bus(), config, NoopHooks).unwrap();
    let ctx = plugin.context();

    assert_eq!(plugin.name(), "Echo");
    assert_eq!(ctx.version(), "1.0");
    assert_eq!(ctx.metadata("author"), Some(&json!("someone")));
    assert_eq!(ctx.metadata("missing"), None);
    assert_eq!(ctx.config().dependencies.len(), 1);
    assert_eq!(ctx.resolve_path("notes.txt"), root.path().join("Echo").join("notes.txt"));
    assert_eq!(
        ctx.data().store().path(),
        root.path().join("Echo").join("Echo.json").as_path()
    );
}

#[tokio::test]
async fn test_lock_is_shared_and_not_held_by_lifecycle() {
    let root = TempDir::new().unwrap();
    let mut plugin = PluginLifecycle::new(new_bus(), echo_config(root.path()), NoopHooks).unwrap();

    let lock = plugin.context().lock();
    assert!(Arc::ptr_eq(&lock, &plugin.context().lock()));

    let guard = lock.lock().await;
    plugin.context_mut().data_mut().set("k", "v");
    drop(guard);

    plugin.unload().await.unwrap();
    assert!(lock.try_lock().is_ok());
}

/// Store that never has data and delegates saving to another store
struct FreshStore(FileStore);

impl PersistentStore for FreshStore {
    fn path(&self) -> &Path {
        self.0.path()
    }

    fn load(&self) -> std::result::Result<LoadOutcome, StoreError> {
        Ok(LoadOutcome::NotFound)
    }

    fn save(&self, document: &Document) -> std::result::Result<(), StoreError> {
        self.0.save(document)
    }
}

#[test]
fn test_directory_failure_fails_construction() {
    let root = TempDir::new().unwrap();
    let blocker = root.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let err = PluginLifecycle::with_store(new_bus(), echo_config(&blocker), NoopHooks, |path| {
        FreshStore(FileStore::new(path))
    })
    .unwrap_err();

    match err {
        PluginError::Directory { path, .. } => assert_eq!(path, blocker.join("Echo")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unload_into_removed_work_dir_is_wrapped() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), NoopHooks).unwrap();
    plugin.context_mut().register_handler("message", |_event| Ok(Value::Null), 0);

    std::fs::remove_dir(root.path().join("Echo")).unwrap();

    let err = plugin.unload().await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::UnloadFlush { source: StoreError::PathNotFound(_), .. }
    ));
    assert_eq!(plugin.state(), LifecycleState::Failed);
    assert_eq!(bus.total_handlers(), 0);
}

#[tokio::test]
async fn test_unload_with_unknown_format_is_wrapped() {
    let root = TempDir::new().unwrap();
    let mut plugin = PluginLifecycle::with_store(new_bus(), echo_config(root.path()), NoopHooks, |path| {
        FreshStore(FileStore::new(path.with_extension("bin")))
    })
    .unwrap();

    let err = plugin.unload().await.unwrap_err();
    match err {
        PluginError::UnloadFlush { plugin, source: StoreError::FileTypeUnknown(path) } => {
            assert_eq!(plugin, "Echo");
            assert_eq!(path, root.path().join("Echo").join("Echo.bin"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Hooks whose unload never finishes
struct StalledHooks;

#[async_trait]
impl PluginHooks for StalledHooks {
    async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<()> {
        ctx.register_handler("message", |_event| Ok(Value::Null), 0);
        Ok(())
    }

    async fn on_unload(&mut self, _ctx: &mut PluginContext) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_unload_releases_handlers_on_drop() {
    let root = TempDir::new().unwrap();
    let bus = new_bus();
    let mut plugin = PluginLifecycle::new(bus.clone(), echo_config(root.path()), StalledHooks).unwrap();
    plugin.load().await.unwrap();

    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), plugin.unload()).await;
    assert!(timed_out.is_err());
    assert_eq!(plugin.state(), LifecycleState::Unloading);
    assert_eq!(bus.total_handlers(), 1);
    assert!(matches!(plugin.unload().await, Err(PluginError::InvalidState { .. })));

    drop(plugin);
    assert_eq!(bus.total_handlers(), 0);
}

#[tokio::test]
async fn test_hooks_are_reachable_between_steps() {
    let root = TempDir::new().unwrap();
    let log = Log::default();
    let hooks = RecordingHooks {
        log: log.clone(),
        ..Default::default()
    };

    let mut plugin = PluginLifecycle::new(new_bus(), echo_config(root.path()), hooks).unwrap();
    plugin.load().await.unwrap();

    plugin.hooks_mut().fail_close = true;
    assert!(matches!(plugin.unload().await, Err(PluginError::Hook(_))));
    assert_eq!(plugin.hooks().log.lock().unwrap().last().map(String::as_str), Some("close"));
}
