//! Control-loop scenarios exercised through [`LifecycleHandle`].
//!
//! A. Launches requested by page scripts during a broadcast are queued
//! B. Running-apps listener sees every registry change
//! C. Crash notifications and device info through the handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use wam_core::engine::PageSignal;
use wam_core::instance::{ApplicationInfo, InstanceId};
use wam_core::manager::{KillTarget, RunningAppsListener};
use wam_core::testing::{EngineCall, RecordingFactory};
use wam_core::{LifecycleHandle, WamConfig, spawn};

const A: &str = r#"{"id":"com.example.a","main":"file:///apps/a/index.html"}"#;
const B: &str = r#"{"id":"com.example.b","main":"file:///apps/b/index.html"}"#;
const C: &str = r#"{"id":"com.example.c","main":"file:///apps/c/index.html"}"#;

// =============================================================================
// Mock infrastructure
// =============================================================================

#[derive(Clone, Default)]
struct SnapshotLog(Arc<Mutex<Vec<Vec<InstanceId>>>>);

impl SnapshotLog {
    fn snapshots(&self) -> Vec<Vec<InstanceId>> {
        self.0.lock().unwrap().clone()
    }
}

impl RunningAppsListener for SnapshotLog {
    fn on_running_apps_changed(&mut self, apps: &[ApplicationInfo]) {
        self.0
            .lock()
            .unwrap()
            .push(apps.iter().map(|a| a.instance_id).collect());
    }
}

fn locale_events(factory: &RecordingFactory, app_id: &str) -> usize {
    factory
        .engine(app_id)
        .map(|e| {
            e.scripts()
                .iter()
                .filter(|s| s.contains("webOSLocaleChange"))
                .count()
        })
        .unwrap_or(0)
}

// =============================================================================
// A. Re-entrant launch during broadcast
// =============================================================================

#[tokio::test(start_paused = true)]
async fn launch_from_page_script_is_deferred_past_broadcast() {
    let factory = RecordingFactory::new();
    let slot: Arc<OnceLock<LifecycleHandle>> = Arc::new(OnceLock::new());
    let fired = Arc::new(AtomicBool::new(false));

    let hook_slot = Arc::clone(&slot);
    let hook_fired = Arc::clone(&fired);
    factory.set_script_hook(Arc::new(move |code: &str| {
        if code.contains("webOSLocaleChange") && !hook_fired.swap(true, Ordering::SeqCst) {
            if let Some(handle) = hook_slot.get() {
                handle.submit_launch(B, "{}", "com.example.a").unwrap();
            }
        }
    }));

    let (handle, task) = spawn(WamConfig::default(), Box::new(factory.clone()), None);
    assert!(slot.set(handle.clone()).is_ok());

    handle.launch(A, "{}", "").await.unwrap();
    handle.launch(C, "{}", "").await.unwrap();
    assert!(handle.broadcast_message("DeviceInfoChanged", "SystemLanguage").await.unwrap());

    // The queued launch runs before this request.
    let apps = handle.list(true).await.unwrap();
    let ids: Vec<_> = apps.iter().map(|a| a.app_id.as_str()).collect();
    assert_eq!(ids, vec!["com.example.a", "com.example.c", "com.example.b"]);

    assert_eq!(locale_events(&factory, "com.example.a"), 1);
    assert_eq!(locale_events(&factory, "com.example.c"), 1);
    assert_eq!(locale_events(&factory, "com.example.b"), 0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

// =============================================================================
// B. Running-apps listener
// =============================================================================

#[tokio::test(start_paused = true)]
async fn listener_sees_launch_and_close() {
    let log = SnapshotLog::default();
    let factory = RecordingFactory::new();
    let (handle, _task) = spawn(
        WamConfig::default(),
        Box::new(factory),
        Some(Box::new(log.clone())),
    );

    let a = handle.launch(A, "{}", "").await.unwrap().instance_id();
    let b = handle.launch(B, "{}", "").await.unwrap().instance_id();
    assert!(handle.kill(KillTarget::Instance(a), true).await.unwrap());

    assert_eq!(log.snapshots(), vec![vec![a], vec![a, b], vec![b]]);
}

// =============================================================================
// C. Crash notifications and device info
// =============================================================================

#[tokio::test(start_paused = true)]
async fn crash_notifications_through_handle() {
    let factory = RecordingFactory::new();
    let (handle, _task) = spawn(WamConfig::default(), Box::new(factory.clone()), None);
    let id = handle.launch(A, "{}", "").await.unwrap().instance_id();
    handle
        .page_signal(
            id,
            PageSignal::LoadFinished {
                url: "file:///apps/a/index.html".into(),
            },
        )
        .unwrap();
    handle.page_signal(id, PageSignal::FirstVisualCommit).unwrap();

    handle.notify_crash("com.example.a", Some(id)).unwrap();
    assert_eq!(handle.list(true).await.unwrap().len(), 1);
    handle.notify_crash("com.example.a", Some(id)).unwrap();
    assert!(handle.list(true).await.unwrap().is_empty());
    assert!(factory.engine("com.example.a").unwrap().is_dropped());
}

#[tokio::test(start_paused = true)]
async fn unchanged_language_is_not_rebroadcast() {
    let factory = RecordingFactory::new();
    let (handle, _task) = spawn(WamConfig::default(), Box::new(factory.clone()), None);
    handle.launch(A, "{}", "").await.unwrap();

    handle.set_system_language("en-US").unwrap();
    handle.set_system_language("en-US").unwrap();
    handle.set_system_language("de-DE").unwrap();
    handle.list(true).await.unwrap();

    assert_eq!(locale_events(&factory, "com.example.a"), 2);
    let engine = factory.engine("com.example.a").unwrap();
    assert_eq!(engine.count(&EngineCall::Dropped), 0);
}
