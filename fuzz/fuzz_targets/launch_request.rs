#![no_main]

use libfuzzer_sys::fuzz_target;
use wam_core::config::WamConfig;
use wam_core::descriptor::{AppDescriptor, LaunchParams};
use wam_core::manager::LifecycleManager;
use wam_core::testing::RecordingFactory;
use wam_core::timer::ManualClock;

fuzz_target!(|data: &[u8]| {
    if data.len() > 16_384 {
        return;
    }
    let text = String::from_utf8_lossy(data);
    let (descriptor, params) = text.split_once('\u{0}').unwrap_or((text.as_ref(), "{}"));

    let params_parsed = LaunchParams::parse(params);
    let _ = params_parsed.to_json();
    let _ = params_parsed.instance_id();

    let parsed = AppDescriptor::from_json(descriptor);
    let mut manager = LifecycleManager::new(
        WamConfig::default(),
        Box::new(RecordingFactory::new()),
        Box::new(ManualClock::new()),
    );
    let launched = manager.launch(descriptor, params, "fuzz");
    if parsed.is_err() {
        assert!(launched.is_err(), "invalid descriptor launched");
    }
    if let Ok(outcome) = launched {
        assert!(manager.instance(outcome.instance_id()).is_some());
    }
});
