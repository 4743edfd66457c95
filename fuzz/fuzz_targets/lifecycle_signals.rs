#![no_main]

use std::collections::HashSet;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use wam_core::config::WamConfig;
use wam_core::engine::{MemoryPressureLevel, PageSignal, ShellSignal, WindowHostState};
use wam_core::instance::InstanceId;
use wam_core::manager::{KillTarget, LifecycleManager};
use wam_core::testing::{RecordingFactory, advance};
use wam_core::timer::ManualClock;

const APPS: [&str; 4] = [
    r#"{"id":"app.card","main":"file:///apps/card/index.html","version":"1"}"#,
    r#"{"id":"app.overlay","main":"file:///apps/overlay/index.html","defaultWindowType":"overlay"}"#,
    r#"{"id":"app.float","main":"file:///apps/float/index.html","defaultWindowType":"floating","enableBackgroundRun":true}"#,
    r#"{"id":"app.keep","main":"https://example.com/","keepAlive":true,"handlesDeeplinking":true}"#,
];

const PARAMS: [&str; 4] = [
    "{}",
    r#"{"preload":"minimal"}"#,
    r#"{"contentTarget":"https://example.com/x","handledBy":"platform"}"#,
    r#"{"launchedHidden":true}"#,
];

fn host_state(tag: u8) -> WindowHostState {
    match tag % 4 {
        0 => WindowHostState::Default,
        1 => WindowHostState::Maximized,
        2 => WindowHostState::Fullscreen,
        _ => WindowHostState::Minimized,
    }
}

fn page_signal(tag: u8, arg: u8) -> PageSignal {
    match tag % 7 {
        0 => PageSignal::LoadStarted,
        1 => PageSignal::LoadFinished {
            url: "file:///apps/card/index.html".to_string(),
        },
        2 => PageSignal::LoadFailed {
            code: i32::from(arg) + 200,
            description: "fuzz".to_string(),
        },
        3 => PageSignal::FirstVisualCommit,
        4 => PageSignal::ProcessCrashed,
        5 => PageSignal::CloseCallbackRegistered {
            registered: arg & 1 == 0,
        },
        _ => PageSignal::CloseCallbackInvoked,
    }
}

fn check_invariants(manager: &LifecycleManager) {
    let listed = manager.list(true);
    let mut apps = HashSet::new();
    for (n, info) in listed.iter().enumerate() {
        if n > 0 {
            assert!(listed[n - 1].instance_id < info.instance_id, "list not ordered by id");
        }
        assert!(
            !manager.is_closing(info.instance_id),
            "instance {} both running and closing",
            info.instance_id
        );
        assert!(apps.insert(info.app_id.clone()), "duplicate app {}", info.app_id);
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 65_536 {
        return;
    }

    let factory = RecordingFactory::new();
    let clock = ManualClock::new();
    let config = WamConfig {
        suspend_delay_ms: 50,
        close_callback_timeout_ms: 200,
        ..WamConfig::default()
    };
    let mut manager =
        LifecycleManager::new(config, Box::new(factory), Box::new(clock.clone()));
    let mut issued: Vec<InstanceId> = Vec::new();

    for chunk in data.chunks_exact(3) {
        let (op, target, arg) = (chunk[0], chunk[1], chunk[2]);
        let id = issued
            .get(usize::from(target) % issued.len().max(1))
            .copied()
            .unwrap_or(InstanceId::new(1000));

        match op % 10 {
            0 | 1 => {
                let desc = APPS[usize::from(target) % APPS.len()];
                let params = PARAMS[usize::from(arg) % PARAMS.len()];
                if let Ok(outcome) = manager.launch(desc, params, "fuzz") {
                    if !issued.contains(&outcome.instance_id()) {
                        if let Some(last) = issued.last() {
                            assert!(*last < outcome.instance_id(), "instance id reused");
                        }
                        issued.push(outcome.instance_id());
                    }
                }
            }
            2 => {
                manager.handle_page_signal(id, page_signal(arg, target));
            }
            3 => {
                manager.handle_shell_signal(id, ShellSignal::ActivationChanged(arg & 1 == 0));
            }
            4 => {
                manager.handle_shell_signal(id, ShellSignal::HostStateChanged(host_state(arg)));
            }
            5 => manager.handle_shell_signal(id, ShellSignal::CloseRequested),
            6 => {
                manager.kill(&KillTarget::Instance(id), arg & 1 == 0);
            }
            7 => {
                advance(&mut manager, &clock, Duration::from_millis(u64::from(arg) * 4));
            }
            8 => match arg % 4 {
                0 => {
                    manager.broadcast_message("DeviceInfoChanged", "SystemLanguage");
                }
                1 => manager.notify_memory_pressure(MemoryPressureLevel::Critical),
                2 => {
                    manager.pause(id);
                }
                _ => {
                    manager.close_all(None);
                }
            },
            _ => {
                let app_id = manager.instance(id).map(|app| app.app_id().to_string());
                if let Some(app_id) = app_id {
                    manager.notify_crash(&app_id, Some(id));
                }
            }
        }
        check_invariants(&manager);
    }

    advance(&mut manager, &clock, Duration::from_secs(60));
    check_invariants(&manager);
});
