//! The lifecycle manager.
//!
//! [`LifecycleManager`] is the single owner of all lifecycle state: the
//! registry of running instances, instances parked mid-close, crash counters,
//! version records and device info. It runs on one control thread; engine and
//! compositor callbacks reach it as [`PageSignal`]s and [`ShellSignal`]s and
//! timer expiries as [`TimerFired`]. Nothing here is lock-protected.
//!
//! # Entry points
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`launch`](LifecycleManager::launch) | create an instance, or relaunch the running one |
//! | [`kill`](LifecycleManager::kill) | close by app id or instance id |
//! | [`pause`](LifecycleManager::pause) | hide and suspend |
//! | [`close_all`](LifecycleManager::close_all) | close everything, or one render process |
//! | [`list`](LifecycleManager::list) | running-app snapshot |
//! | [`broadcast_message`](LifecycleManager::broadcast_message) | fan a host message out to every app |
//!
//! Fan-out operations walk a snapshot of instance ids taken up front, so an
//! instance closed mid-walk is skipped and one created afterwards is not
//! visited.

use tracing::{debug, error, info, warn};

use crate::close::{ClosingSet, CloseSequencer, deactivate_stage, force_hide};
use crate::config::{InstancePolicy, WamConfig};
use crate::crash::{CrashDecision, CrashTracker};
use crate::descriptor::{AppDescriptor, LaunchParams, LoadErrorPolicy};
use crate::device_info::{DeviceInfo, SYSTEM_LANGUAGE, WebAppMessage};
use crate::engine::{
    EngineFactory, EngineResult, KeyInputRegion, MemoryPressureLevel, PageSignal, ShellSignal,
    ShellSurface, WindowHostState,
};
use crate::error::LaunchError;
use crate::instance::{
    AppInstance, ApplicationInfo, InstanceId, load_error_event_script, locale_change_event_script,
};
use crate::launch::{AppVersionRecord, LaunchCoordinator};
use crate::registry::AppRegistry;
use crate::suspend::SuspendController;
use crate::timer::{Scheduler, TimerFired, TimerKind};

/// Load-failure codes that are not real failures (no content, redirect).
const IGNORED_LOAD_ERROR_CODES: [i32; 2] = [204, 301];

/// Receives the running-app list after every registry change.
pub trait RunningAppsListener: Send {
    fn on_running_apps_changed(&mut self, apps: &[ApplicationInfo]);
}

/// Result of a successful [`LifecycleManager::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched(InstanceId),
    /// The app was already running. `accepted` is false when the relaunch was
    /// suppressed or refused.
    Relaunched {
        instance_id: InstanceId,
        accepted: bool,
    },
}

impl LaunchOutcome {
    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        match self {
            Self::Launched(id) | Self::Relaunched { instance_id: id, .. } => *id,
        }
    }
}

/// What [`LifecycleManager::kill`] closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    App(String),
    Instance(InstanceId),
}

impl std::fmt::Display for KillTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::App(app_id) => write!(f, "app {app_id}"),
            Self::Instance(id) => write!(f, "instance {id}"),
        }
    }
}

pub struct LifecycleManager {
    config: WamConfig,
    registry: AppRegistry,
    closing: ClosingSet,
    crashes: CrashTracker,
    suspend: SuspendController,
    closer: CloseSequencer,
    launcher: LaunchCoordinator,
    scheduler: Box<dyn Scheduler>,
    device_info: DeviceInfo,
    accessibility_enabled: bool,
    listener: Option<Box<dyn RunningAppsListener>>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("registry", &self.registry)
            .field("closing", &self.closing)
            .field("crashes", &self.crashes)
            .field("launcher", &self.launcher)
            .field("device_info", &self.device_info)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        config: WamConfig,
        factory: Box<dyn EngineFactory>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            registry: AppRegistry::new(),
            closing: ClosingSet::new(config.instance_policy),
            crashes: CrashTracker::new(config.crash_reset_policy),
            suspend: SuspendController::from_config(&config),
            closer: CloseSequencer::new(config.close_callback_timeout()),
            launcher: LaunchCoordinator::new(config.instance_id_base, factory),
            scheduler,
            device_info: DeviceInfo::new(),
            accessibility_enabled: false,
            listener: None,
            config,
        }
    }

    pub fn set_running_apps_listener(&mut self, listener: Box<dyn RunningAppsListener>) {
        self.listener = Some(listener);
    }

    // -- Accessors --

    #[must_use]
    pub const fn config(&self) -> &WamConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&AppInstance> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn find_by_app_id(&self, app_id: &str) -> Option<&AppInstance> {
        self.registry.find_by_app_id(app_id)
    }

    /// Instances parked mid-close.
    #[must_use]
    pub fn closing_count(&self) -> usize {
        self.closing.len()
    }

    #[must_use]
    pub fn is_closing(&self, id: InstanceId) -> bool {
        self.closing.contains(id)
    }

    #[must_use]
    pub fn crash_count(&self, app_id: &str) -> u32 {
        self.crashes.count(app_id)
    }

    #[must_use]
    pub const fn versions(&self) -> &AppVersionRecord {
        self.launcher.versions()
    }

    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    #[must_use]
    pub const fn accessibility_enabled(&self) -> bool {
        self.accessibility_enabled
    }

    // =========================================================================
    // Launch
    // =========================================================================

    /// Launch an app, or relaunch the running instance the instance policy
    /// selects.
    pub fn launch(
        &mut self,
        descriptor_json: &str,
        params_json: &str,
        launching_app_id: &str,
    ) -> Result<LaunchOutcome, LaunchError> {
        let descriptor = AppDescriptor::from_json(descriptor_json).inspect_err(|err| {
            warn!(code = err.code(), error = %err, "launch rejected");
        })?;
        let params = LaunchParams::parse(params_json);

        if let Some(id) = self.running_target(&descriptor, &params) {
            return Ok(self.relaunch(id, &descriptor, params, launching_app_id));
        }

        let mut app = self
            .launcher
            .create_instance(descriptor, params, launching_app_id)
            .inspect_err(|err| {
                warn!(code = err.code(), error = %err, "launch failed");
            })?;
        if self.accessibility_enabled {
            app.engine("set_accessibility_enabled", |page| {
                page.set_accessibility_enabled(true)
            });
        }

        let id = app.instance_id();
        if let Err(err) = self.registry.insert(app) {
            error!(instance_id = %id, error = %err, "instance id reused");
            debug_assert!(false, "instance id {id} reused");
            return Err(err);
        }
        if let Some(app) = self.registry.get_mut(id) {
            self.launcher.initial_load(app);
            info!(
                app_id = %app.app_id(),
                instance_id = %id,
                launching_app_id,
                "launched"
            );
        }
        self.publish_running_apps();
        Ok(LaunchOutcome::Launched(id))
    }

    /// The running instance a launch should relaunch: the app's instance
    /// under the single-instance policy, or the instance named by the
    /// `instanceId` param under the multi-instance policy.
    fn running_target(&self, descriptor: &AppDescriptor, params: &LaunchParams) -> Option<InstanceId> {
        match self.config.instance_policy {
            InstancePolicy::Single => self
                .registry
                .find_by_app_id(&descriptor.id)
                .map(AppInstance::instance_id),
            InstancePolicy::Multi => {
                let requested = params.instance_id()?;
                let Ok(id) = requested.parse::<InstanceId>() else {
                    warn!(app_id = %descriptor.id, requested = %requested, "unparsable instance id; launching new instance");
                    return None;
                };
                let running = self
                    .registry
                    .get(id)
                    .is_some_and(|app| app.app_id() == descriptor.id);
                if !running {
                    debug!(app_id = %descriptor.id, instance_id = %id, "named instance not running; launching new instance");
                }
                running.then_some(id)
            }
        }
    }

    fn relaunch(
        &mut self,
        id: InstanceId,
        descriptor: &AppDescriptor,
        params: LaunchParams,
        launching_app_id: &str,
    ) -> LaunchOutcome {
        let Some(app) = self.registry.get_mut(id) else {
            return LaunchOutcome::Relaunched {
                instance_id: id,
                accepted: false,
            };
        };

        if let Some(requested) = params.instance_id() {
            if requested != id.to_string() {
                warn!(
                    app_id = %app.app_id(),
                    requested = %requested,
                    instance_id = %id,
                    "relaunch names a stale instance id; using the running instance"
                );
            }
        }

        // The running instance keeps its descriptor apart from the version.
        app.descriptor.version.clone_from(&descriptor.version);
        self.launcher.check_version(app);

        if params.preload().is_some() || params.launched_hidden() {
            info!(
                app_id = %app.app_id(),
                instance_id = %id,
                "preload/hidden relaunch of running app; relaunch event suppressed"
            );
            return LaunchOutcome::Relaunched {
                instance_id: id,
                accepted: false,
            };
        }

        // A foreground relaunch ends preload and hidden state. An instance
        // without a first frame yet is shown by its first visual commit.
        let was_hidden = app.flags.hidden_window || app.is_preloaded();
        if was_hidden {
            app.preload = None;
            app.flags.hidden_window = false;
        }

        let accepted = self.launcher.relaunch(
            app,
            params,
            launching_app_id,
            &self.suspend,
            self.scheduler.as_mut(),
        );
        if was_hidden && app.flags.has_been_shown {
            activate_stage(app, &self.suspend, self.scheduler.as_mut());
            info!(app_id = %app.app_id(), instance_id = %id, "hidden instance brought to front");
        }
        LaunchOutcome::Relaunched {
            instance_id: id,
            accepted,
        }
    }

    // =========================================================================
    // Close, kill, pause
    // =========================================================================

    /// Close by app id or instance id. `force` skips the close callback and
    /// unload navigation.
    pub fn kill(&mut self, target: &KillTarget, force: bool) -> bool {
        let id = match target {
            KillTarget::App(app_id) => self.registry.find_by_app_id(app_id).map(AppInstance::instance_id),
            KillTarget::Instance(id) => self.registry.contains(*id).then_some(*id),
        };
        let Some(id) = id else {
            warn!(kill_target = %target, "kill: no running instance");
            return false;
        };
        info!(kill_target = %target, instance_id = %id, force, "kill");
        self.close_instance(id, force)
    }

    /// Hide an instance and start its suspend.
    pub fn pause(&mut self, id: InstanceId) -> bool {
        let Some(app) = self.registry.get_mut(id) else {
            warn!(instance_id = %id, "pause: no running instance");
            return false;
        };
        force_hide(app, &self.suspend, self.scheduler.as_mut());
        info!(app_id = %app.app_id(), instance_id = %id, "paused");
        true
    }

    /// Close every instance, or only those in render process `pid`.
    /// Keep-alive is overridden.
    pub fn close_all(&mut self, pid: Option<u32>) -> bool {
        let ids = match pid {
            Some(pid) => self.registry.running_for_process(pid),
            None => self.registry.ids(),
        };
        info!(pid = ?pid, count = ids.len(), "closing all apps");
        for id in ids {
            if let Some(app) = self.registry.get_mut(id) {
                app.keep_alive = false;
            }
            self.close_instance(id, false);
        }
        true
    }

    /// Run the close sequence for a registered instance.
    fn close_instance(&mut self, id: InstanceId, ignore_clean_resource: bool) -> bool {
        let Some(app) = self.registry.remove(id) else {
            debug!(instance_id = %id, "close: not registered");
            return false;
        };
        if app.flags.closing {
            error!(instance_id = %id, "registered instance already closing");
            debug_assert!(false, "registered instance {id} already closing");
            return false;
        }
        self.publish_running_apps();
        self.crashes.on_close(app.app_id());
        let progress = self.closer.begin(
            app,
            ignore_clean_resource,
            &mut self.closing,
            &self.suspend,
            self.scheduler.as_mut(),
        );
        debug!(instance_id = %id, progress = ?progress, "close started");
        true
    }

    /// Shell request to close a keep-alive app immediately, or mark it to be
    /// closed on its next close request.
    pub fn set_force_close(&mut self, app_id: &str) -> bool {
        let Some(app) = self.registry.find_by_app_id_mut(app_id) else {
            return false;
        };
        if app.is_windowed() && app.keep_alive && app.flags.hidden_window {
            app.keep_alive = false;
            let id = app.instance_id();
            info!(app_id, instance_id = %id, "force closing hidden keep-alive app");
            return self.close_instance(id, false);
        }
        app.flags.force_close = true;
        true
    }

    // =========================================================================
    // Crashes
    // =========================================================================

    /// External crash report. The instance id wins; the app id is the
    /// fallback for a stale id.
    pub fn notify_crash(&mut self, app_id: &str, instance_id: Option<InstanceId>) {
        let id = instance_id
            .filter(|id| self.registry.contains(*id) || self.closing.contains(*id))
            .or_else(|| {
                if instance_id.is_some() {
                    warn!(app_id, instance_id = ?instance_id, "crash report names a stale instance");
                }
                self.registry.find_by_app_id(app_id).map(AppInstance::instance_id)
            });
        match id {
            Some(id) => self.handle_page_signal(id, PageSignal::ProcessCrashed),
            None => warn!(app_id, "crash report for an app that is not running"),
        }
    }

    fn on_process_crashed(&mut self, id: InstanceId) {
        let Some(app) = self.registry.get_mut(id) else {
            return;
        };
        self.suspend.reset_after_crash(app, self.scheduler.as_mut());

        if !app.is_windowed() {
            warn!(app_id = %app.app_id(), instance_id = %id, "headless instance crashed");
            return;
        }

        match self
            .crashes
            .on_crash(&app.descriptor.id, app.flags.activated, app.is_normal())
        {
            CrashDecision::Deferred => app.flags.crashed = true,
            CrashDecision::Reload => app.load_default_url(),
            CrashDecision::Close => {
                self.close_instance(id, true);
            }
        }
    }

    // =========================================================================
    // Page signals
    // =========================================================================

    pub fn handle_page_signal(&mut self, id: InstanceId, signal: PageSignal) {
        if self.closing.contains(id) {
            self.handle_closing_signal(id, signal);
            return;
        }
        let Some(app) = self.registry.get_mut(id) else {
            debug!(instance_id = %id, signal = ?signal, "signal for unknown instance");
            return;
        };

        match signal {
            PageSignal::LoadStarted => {
                app.flags.loading = true;
                app.flags.close_callback_registered = false;
            }
            PageSignal::LoadFinished { url } => {
                app.current_url = url;
                app.flags.loading = false;
                self.suspend.on_load_finished(app);
                if app.flags.needs_reload && !app.flags.hidden_window {
                    info!(app_id = %app.app_id(), "new app version; reloading");
                    app.flags.needs_reload = false;
                    app.reload();
                }
            }
            PageSignal::LoadFailed { code, description } => {
                app.flags.loading = false;
                self.on_load_failed(id, code, &description);
            }
            PageSignal::FirstVisualCommit => {
                app.flags.has_been_shown = true;
                if !app.flags.hidden_window && !app.is_preloaded() {
                    app.show_window();
                    activate_stage(app, &self.suspend, self.scheduler.as_mut());
                }
            }
            PageSignal::ProcessCrashed => self.on_process_crashed(id),
            PageSignal::TitleChanged { title } => {
                debug!(app_id = %app.app_id(), title = %title, "title changed");
            }
            PageSignal::CloseCallbackRegistered { registered } => {
                app.flags.close_callback_registered = registered;
            }
            PageSignal::CloseCallbackInvoked => {
                debug!(app_id = %app.app_id(), "close callback finished outside close");
            }
        }
    }

    fn handle_closing_signal(&mut self, id: InstanceId, signal: PageSignal) {
        let scheduler = self.scheduler.as_mut();
        match signal {
            PageSignal::LoadFinished { .. } => {
                self.closer.on_unload_finished(id, &mut self.closing, scheduler);
            }
            PageSignal::CloseCallbackInvoked => {
                self.closer.on_callback_finished(id, &mut self.closing, scheduler);
            }
            PageSignal::ProcessCrashed => {
                self.closer.on_process_crashed(id, &mut self.closing, scheduler);
            }
            other => debug!(instance_id = %id, signal = ?other, "closing; signal ignored"),
        }
    }

    fn on_load_failed(&mut self, id: InstanceId, code: i32, description: &str) {
        let Some(app) = self.registry.get_mut(id) else {
            return;
        };
        warn!(app_id = %app.app_id(), instance_id = %id, code, description, "load failed");

        if app.is_preloaded() {
            info!(app_id = %app.app_id(), "preloaded app failed to load; closing");
            self.close_instance(id, false);
            return;
        }
        if IGNORED_LOAD_ERROR_CODES.contains(&code) {
            return;
        }
        if app.descriptor.load_error_policy() == LoadErrorPolicy::Event {
            app.run_script(&load_error_event_script(true, code));
            return;
        }
        if let Some(page) = &self.config.error_page_url {
            let url = format!("{page}?errorCode={code}");
            app.load_url(&url);
            app.flags.error_page_shown = true;
        }
    }

    // =========================================================================
    // Shell signals
    // =========================================================================

    pub fn handle_shell_signal(&mut self, id: InstanceId, signal: ShellSignal) {
        let Some(app) = self.registry.get_mut(id) else {
            debug!(instance_id = %id, signal = ?signal, "shell signal for unknown or closing instance");
            return;
        };
        if app.flags.closing {
            return;
        }

        match signal {
            ShellSignal::ActivationChanged(true) => {
                activate_stage(app, &self.suspend, self.scheduler.as_mut());
            }
            ShellSignal::ActivationChanged(false) => {
                deactivate_stage(app, &self.suspend, self.scheduler.as_mut());
            }
            ShellSignal::HostStateChanged(state) => {
                app.host_state = state;
                if state == WindowHostState::Minimized {
                    deactivate_stage(app, &self.suspend, self.scheduler.as_mut());
                } else {
                    activate_stage(app, &self.suspend, self.scheduler.as_mut());
                }
            }
            ShellSignal::CloseRequested => self.on_close_requested(id),
        }
    }

    fn on_close_requested(&mut self, id: InstanceId) {
        let Some(app) = self.registry.get_mut(id) else {
            return;
        };
        if app.flags.force_close {
            self.close_instance(id, false);
        } else if app.keep_alive && !app.flags.error_page_shown {
            info!(app_id = %app.app_id(), instance_id = %id, "keep-alive app hidden instead of closed");
            app.hide_window();
            app.destroy_surface_group();
        } else {
            self.close_instance(id, false);
        }
    }

    // -- Window forwarding --

    pub fn raise(&mut self, id: InstanceId) -> bool {
        self.with_shell(id, "raise", |s| s.raise())
    }

    pub fn lower(&mut self, id: InstanceId) -> bool {
        self.with_shell(id, "lower", |s| s.lower())
    }

    pub fn set_opacity(&mut self, id: InstanceId, opacity: f32) -> bool {
        self.with_shell(id, "set_opacity", |s| s.set_opacity(opacity))
    }

    pub fn set_key_input_mask(&mut self, id: InstanceId, region: KeyInputRegion) -> bool {
        self.with_shell(id, "set_key_input_mask", |s| s.set_key_input_mask(region))
    }

    fn with_shell(
        &mut self,
        id: InstanceId,
        op: &'static str,
        call: impl FnOnce(&mut dyn ShellSurface) -> EngineResult,
    ) -> bool {
        match self.registry.get_mut(id) {
            Some(app) if !app.flags.closing => {
                app.shell(op, call);
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    pub fn on_timer_fired(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::DomSuspend => {
                if let Some(app) = self.registry.get_mut(fired.instance_id) {
                    self.suspend.on_timer_fired(app, fired.token);
                }
            }
            TimerKind::CloseCallback => {
                self.closer.on_timeout(
                    fired.instance_id,
                    fired.token,
                    &mut self.closing,
                    self.scheduler.as_mut(),
                );
            }
        }
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Deliver a host message given as its wire `(type, payload)` pair.
    pub fn broadcast_message(&mut self, kind: &str, payload: &str) -> bool {
        match WebAppMessage::parse(kind, payload) {
            Some(message) => {
                self.broadcast(&message);
                true
            }
            None => {
                warn!(kind, "unknown broadcast message");
                false
            }
        }
    }

    pub fn broadcast(&mut self, message: &WebAppMessage) {
        info!(message = %message, apps = self.registry.len(), "broadcast");
        match message {
            WebAppMessage::DeviceInfoChanged(name) if name == SYSTEM_LANGUAGE => {
                self.for_each_app(|app| app.run_script(locale_change_event_script()));
            }
            WebAppMessage::DeviceInfoChanged(name) => {
                debug!(name = %name, "device info change has no page event");
            }
        }
    }

    /// Run `script` in every running app.
    pub fn send_event_to_all_apps(&mut self, script: &str) {
        self.for_each_app(|app| app.run_script(script));
    }

    /// Store a device property; apps are told when it changes.
    pub fn set_device_info(&mut self, name: &str, value: &str) -> bool {
        if !self.device_info.set(name, value) {
            return false;
        }
        self.broadcast(&WebAppMessage::DeviceInfoChanged(name.to_string()));
        true
    }

    pub fn set_system_language(&mut self, language: &str) -> bool {
        self.set_device_info(SYSTEM_LANGUAGE, language)
    }

    pub fn set_accessibility_enabled(&mut self, enabled: bool) {
        if self.accessibility_enabled == enabled {
            return;
        }
        self.accessibility_enabled = enabled;
        self.for_each_app(|app| {
            app.engine("set_accessibility_enabled", |page| {
                page.set_accessibility_enabled(enabled)
            });
        });
    }

    /// Forwarded to activated apps; preloaded apps are spared at `Critical`.
    pub fn notify_memory_pressure(&mut self, level: MemoryPressureLevel) {
        self.for_each_app(|app| {
            if !app.flags.activated {
                return;
            }
            if app.is_preloaded() && level == MemoryPressureLevel::Critical {
                return;
            }
            app.engine("notify_memory_pressure", |page| {
                page.notify_memory_pressure(level)
            });
        });
    }

    fn for_each_app(&mut self, mut f: impl FnMut(&mut AppInstance)) {
        for id in self.registry.ids() {
            if let Some(app) = self.registry.get_mut(id) {
                f(app);
            }
        }
    }

    // =========================================================================
    // Listing
    // =========================================================================

    #[must_use]
    pub fn list(&self, include_system_apps: bool) -> Vec<ApplicationInfo> {
        self.registry
            .iter()
            .filter(|app| include_system_apps || !app.is_system_app())
            .map(AppInstance::info)
            .collect()
    }

    fn publish_running_apps(&mut self) {
        if self.listener.is_none() {
            return;
        }
        let apps = self.list(true);
        if let Some(listener) = self.listener.as_mut() {
            listener.on_running_apps_changed(&apps);
        }
    }
}

/// Bring an instance to the front: recover a background crash, resume,
/// focus and show.
fn activate_stage(app: &mut AppInstance, suspend: &SuspendController, scheduler: &mut dyn Scheduler) {
    if app.flags.closing {
        return;
    }
    if app.flags.crashed {
        info!(app_id = %app.app_id(), "activating crashed instance; reloading default page");
        app.load_default_url();
        app.flags.crashed = false;
    }
    suspend.request_resume_all(app, scheduler);
    app.focus();
    app.show_window();
    app.flags.activated = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::UNLOAD_URL;
    use crate::testing::{EngineCall, RecordingEngine, RecordingFactory, advance};
    use crate::timer::ManualClock;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const A: &str = r#"{"id":"com.example.a","main":"file:///apps/a/index.html","version":"1"}"#;
    const B: &str = r#"{"id":"com.example.b","main":"file:///apps/b/index.html"}"#;

    struct Harness {
        manager: LifecycleManager,
        factory: RecordingFactory,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(WamConfig::default())
        }

        fn with_config(config: WamConfig) -> Self {
            let factory = RecordingFactory::new();
            let clock = ManualClock::new();
            let manager = LifecycleManager::new(
                config,
                Box::new(factory.clone()),
                Box::new(clock.clone()),
            );
            Self {
                manager,
                factory,
                clock,
            }
        }

        fn launch(&mut self, desc: &str, params: &str) -> InstanceId {
            self.manager.launch(desc, params, "launcher").unwrap().instance_id()
        }

        /// Launch, finish the first load and commit a frame.
        fn launch_shown(&mut self, desc: &str) -> InstanceId {
            self.launch_shown_with(desc, "{}")
        }

        fn launch_shown_with(&mut self, desc: &str, params: &str) -> InstanceId {
            let id = self.launch(desc, params);
            let url = self.manager.instance(id).unwrap().default_url().to_string();
            self.page(id, PageSignal::LoadFinished { url });
            self.page(id, PageSignal::FirstVisualCommit);
            id
        }

        fn page(&mut self, id: InstanceId, signal: PageSignal) {
            self.manager.handle_page_signal(id, signal);
        }

        fn shell(&mut self, id: InstanceId, signal: ShellSignal) {
            self.manager.handle_shell_signal(id, signal);
        }

        fn engine(&self, app_id: &str) -> RecordingEngine {
            self.factory.engine(app_id).unwrap()
        }

        fn advance(&mut self, ms: u64) -> usize {
            advance(&mut self.manager, &self.clock, Duration::from_millis(ms))
        }
    }

    // =========================================================================
    // Launch
    // =========================================================================

    #[test]
    fn launch_returns_increasing_ids() {
        let mut h = Harness::new();
        let a = h.launch(A, "{}");
        let b = h.launch(B, "{}");
        assert_eq!(a, InstanceId::new(1000));
        assert_eq!(b, InstanceId::new(1001));
        assert_eq!(h.manager.list(true).len(), 2);
    }

    #[test]
    fn second_launch_relaunches_in_single_mode() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        let outcome = h.manager.launch(A, r#"{"x":1}"#, "home").unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::Relaunched {
                instance_id: a,
                accepted: true
            }
        );
        assert_eq!(h.manager.registry().len(), 1);
        assert_eq!(h.factory.created(), 1);
    }

    #[test]
    fn multi_mode_launches_fresh_instances() {
        let mut h = Harness::with_config(WamConfig {
            instance_policy: InstancePolicy::Multi,
            ..WamConfig::default()
        });
        h.launch(A, "{}");
        h.launch(A, "{}");
        assert_eq!(h.manager.registry().len(), 2);
    }

    #[test]
    fn multi_mode_relaunches_named_instance() {
        let mut h = Harness::with_config(WamConfig {
            instance_policy: InstancePolicy::Multi,
            ..WamConfig::default()
        });
        let a = h.launch_shown(A);
        let outcome = h.manager.launch(A, r#"{"instanceId":"1000"}"#, "home").unwrap();
        assert_eq!(
            outcome,
            LaunchOutcome::Relaunched {
                instance_id: a,
                accepted: true
            }
        );
        assert_eq!(h.manager.registry().len(), 1);
        assert_eq!(h.factory.created(), 1);
        assert!(h.engine("com.example.a").scripts().iter().any(|s| s.contains("webOSRelaunch")));
    }

    #[test]
    fn multi_mode_unknown_or_foreign_id_launches_fresh() {
        let mut h = Harness::with_config(WamConfig {
            instance_policy: InstancePolicy::Multi,
            ..WamConfig::default()
        });
        h.launch_shown(A);
        let b = h.launch(B, "{}");

        let stale = h.manager.launch(A, r#"{"instanceId":"4242"}"#, "").unwrap();
        assert_eq!(stale, LaunchOutcome::Launched(InstanceId::new(1002)));

        let foreign = format!(r#"{{"instanceId":{}}}"#, b.get());
        let outcome = h.manager.launch(A, &foreign, "").unwrap();
        assert_eq!(outcome, LaunchOutcome::Launched(InstanceId::new(1003)));
        assert_eq!(h.manager.registry().len(), 4);
    }

    #[test]
    fn preloaded_instance_comes_forward_on_relaunch() {
        let mut h = Harness::new();
        let a = h.launch_shown_with(A, r#"{"preload":"full"}"#);
        assert!(!h.manager.instance(a).unwrap().flags().activated);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Show), 0);

        let outcome = h.manager.launch(A, "{}", "home").unwrap();
        assert!(matches!(outcome, LaunchOutcome::Relaunched { accepted: true, .. }));
        let app = h.manager.instance(a).unwrap();
        assert!(!app.is_preloaded());
        assert!(!app.flags().hidden_window);
        assert!(app.flags().activated);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Show), 1);

        // No longer treated as a preload: a load failure keeps it running.
        h.page(a, PageSignal::LoadFailed { code: -2, description: String::new() });
        assert!(h.manager.instance(a).is_some());
    }

    #[test]
    fn hidden_instance_relaunched_before_first_frame_shows_on_commit() {
        let mut h = Harness::new();
        let a = h.launch(A, r#"{"launchedHidden":true}"#);
        let outcome = h.manager.launch(A, "{}", "home").unwrap();
        assert!(matches!(outcome, LaunchOutcome::Relaunched { accepted: false, .. }));
        assert!(!h.manager.instance(a).unwrap().flags().hidden_window);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Show), 0);

        h.page(a, PageSignal::FirstVisualCommit);
        assert!(h.manager.instance(a).unwrap().flags().activated);
        assert!(h.engine("com.example.a").count(&EngineCall::Show) >= 1);
    }

    #[test]
    fn paused_instance_comes_forward_on_relaunch() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.manager.pause(a);
        h.advance(1);
        h.manager.launch(A, "{}", "home").unwrap();
        let app = h.manager.instance(a).unwrap();
        assert!(!app.flags().hidden_window);
        assert!(app.flags().activated);
        h.advance(1);
        assert!(!h.manager.instance(a).unwrap().suspend_state().is_suspended());
    }

    #[test]
    fn exhausted_id_space_fails_launch() {
        let mut h = Harness::with_config(WamConfig {
            instance_id_base: u64::MAX,
            ..WamConfig::default()
        });
        assert_eq!(h.launch(A, "{}"), InstanceId::new(u64::MAX));
        let err = h.manager.launch(B, "{}", "").unwrap_err();
        assert_eq!(err, LaunchError::IdsExhausted);
        assert_eq!(err.code(), -5);
        assert_eq!(h.manager.registry().len(), 1);
    }

    #[test]
    fn failed_launch_leaves_nothing_behind() {
        let mut h = Harness::new();
        h.factory.fail_create_for("com.example.a");
        let err = h.manager.launch(A, "{}", "").unwrap_err();
        assert!(matches!(err, LaunchError::EngineCreateFailed { .. }));
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.manager.versions().get("com.example.a"), None);

        let err = h.manager.launch("not json", "{}", "").unwrap_err();
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn version_change_on_relaunch_reloads_after_load() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        let v2 = A.replace(r#""version":"1""#, r#""version":"2""#);
        h.manager.launch(&v2, "{}", "").unwrap();

        let app = h.manager.instance(a).unwrap();
        assert!(app.flags().needs_reload);
        assert_eq!(h.manager.versions().get("com.example.a"), Some("2"));

        h.page(a, PageSignal::LoadFinished { url: "file:///apps/a/index.html".into() });
        assert!(!h.manager.instance(a).unwrap().flags().needs_reload);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Reload), 1);
    }

    #[test]
    fn preload_relaunch_is_suppressed() {
        let mut h = Harness::new();
        h.launch_shown(A);
        let outcome = h.manager.launch(A, r#"{"preload":"partial"}"#, "").unwrap();
        assert!(matches!(outcome, LaunchOutcome::Relaunched { accepted: false, .. }));
        assert!(h.engine("com.example.a").scripts().is_empty());
    }

    #[test]
    fn accessibility_applies_to_new_instances() {
        let mut h = Harness::new();
        h.manager.set_accessibility_enabled(true);
        h.launch(A, "{}");
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Accessibility(true)), 1);
    }

    // =========================================================================
    // Kill and close
    // =========================================================================

    #[test]
    fn forced_kill_removes_synchronously() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        assert!(h.manager.kill(&KillTarget::Instance(a), true));
        assert!(h.manager.list(true).is_empty());
        assert_eq!(h.manager.closing_count(), 0);
        assert!(h.engine("com.example.a").is_dropped());
        assert!(!h.manager.kill(&KillTarget::Instance(a), true));
    }

    #[test]
    fn normal_kill_waits_for_unload() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        assert!(h.manager.kill(&KillTarget::App("com.example.a".into()), false));
        assert!(h.manager.list(true).is_empty());
        assert!(h.manager.is_closing(a));
        let engine = h.engine("com.example.a");
        assert_eq!(engine.loads().last().map(String::as_str), Some(UNLOAD_URL));

        h.page(a, PageSignal::LoadFinished { url: UNLOAD_URL.into() });
        assert_eq!(h.manager.closing_count(), 0);
        assert_eq!(engine.count(&EngineCall::Dropped), 1);
    }

    #[test]
    fn close_callback_timeout_destroys_once() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.page(a, PageSignal::CloseCallbackRegistered { registered: true });
        h.manager.kill(&KillTarget::Instance(a), false);
        assert!(h.manager.is_closing(a));

        h.advance(9_999);
        assert!(h.manager.is_closing(a));
        h.advance(1);
        assert!(!h.manager.is_closing(a));

        h.page(a, PageSignal::CloseCallbackInvoked);
        h.page(a, PageSignal::LoadFinished { url: UNLOAD_URL.into() });
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Dropped), 1);
    }

    #[test]
    fn load_started_clears_close_callback() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.page(a, PageSignal::CloseCallbackRegistered { registered: true });
        h.page(a, PageSignal::LoadStarted);
        assert!(!h.manager.instance(a).unwrap().flags().close_callback_registered);
    }

    #[test]
    fn close_all_filters_by_process() {
        let mut h = Harness::new();
        h.factory.set_next_pid(10);
        h.launch(A, "{}");
        h.factory.set_next_pid(20);
        let b = h.launch(B, "{}");
        assert!(h.manager.close_all(Some(10)));
        let left: Vec<_> = h.manager.list(true).into_iter().map(|i| i.instance_id).collect();
        assert_eq!(left, vec![b]);
        h.manager.close_all(None);
        assert!(h.manager.list(true).is_empty());
    }

    #[test]
    fn keep_alive_close_request_only_hides() {
        let mut h = Harness::new();
        let desc = r#"{"id":"k","main":"file:///k.html","keepAlive":true}"#;
        let k = h.launch_shown(desc);
        h.shell(k, ShellSignal::CloseRequested);
        let app = h.manager.instance(k).unwrap();
        assert!(app.flags().hidden_window);
        assert_eq!(h.engine("k").count(&EngineCall::DestroySurfaceGroup), 1);

        assert!(h.manager.set_force_close("k"));
        assert!(h.manager.instance(k).is_none());
    }

    #[test]
    fn force_close_flag_closes_on_next_request() {
        let mut h = Harness::new();
        let desc = r#"{"id":"k","main":"file:///k.html","keepAlive":true}"#;
        let k = h.launch_shown(desc);
        h.manager.set_force_close("k");
        assert!(h.manager.instance(k).unwrap().flags().force_close);
        h.shell(k, ShellSignal::CloseRequested);
        assert!(h.manager.instance(k).is_none());
    }

    #[test]
    fn pause_hides_and_suspends() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        assert!(h.manager.pause(a));
        assert!(h.manager.instance(a).unwrap().flags().hidden_window);
        h.advance(1);
        assert!(h.manager.instance(a).unwrap().suspend_state().dom_suspended());
        assert!(!h.manager.pause(InstanceId::new(1)));
    }

    // =========================================================================
    // Page signals
    // =========================================================================

    #[test]
    fn first_frame_shows_and_activates() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        let app = h.manager.instance(a).unwrap();
        assert!(app.flags().has_been_shown);
        assert!(app.flags().activated);
        let engine = h.engine("com.example.a");
        assert!(engine.count(&EngineCall::Show) >= 1);
        assert_eq!(engine.count(&EngineCall::Focus), 1);
    }

    #[test]
    fn hidden_launch_stays_hidden_after_first_frame() {
        let mut h = Harness::new();
        let a = h.launch(A, r#"{"launchedHidden":true}"#);
        h.page(a, PageSignal::FirstVisualCommit);
        assert!(!h.manager.instance(a).unwrap().flags().activated);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Show), 0);
    }

    #[test]
    fn load_error_shows_error_page() {
        let mut h = Harness::with_config(WamConfig {
            error_page_url: Some("file:///usr/share/wam/loaderror.html".into()),
            ..WamConfig::default()
        });
        let a = h.launch(A, "{}");
        h.page(a, PageSignal::LoadFailed { code: 204, description: String::new() });
        h.page(a, PageSignal::LoadFailed { code: -105, description: "name not resolved".into() });
        assert_eq!(
            h.engine("com.example.a").loads().last().map(String::as_str),
            Some("file:///usr/share/wam/loaderror.html?errorCode=-105")
        );
        assert!(h.manager.instance(a).unwrap().flags().error_page_shown);
    }

    #[test]
    fn load_error_event_policy_runs_script() {
        let mut h = Harness::with_config(WamConfig {
            error_page_url: Some("file:///err.html".into()),
            ..WamConfig::default()
        });
        let desc = r#"{"id":"e","main":"file:///e.html","loadErrorPolicy":"event"}"#;
        let e = h.launch(desc, "{}");
        h.page(e, PageSignal::LoadFailed { code: -2, description: String::new() });
        let engine = h.engine("e");
        assert_eq!(engine.loads().len(), 1);
        assert!(engine.scripts()[0].contains("webOSLoadError"));
    }

    #[test]
    fn preloaded_load_failure_closes() {
        let mut h = Harness::new();
        let a = h.launch(A, r#"{"preload":"full"}"#);
        h.page(a, PageSignal::LoadFailed { code: -2, description: String::new() });
        assert!(h.manager.instance(a).is_none());
    }

    #[test]
    fn signals_for_unknown_instances_are_ignored() {
        let mut h = Harness::new();
        h.page(InstanceId::new(42), PageSignal::FirstVisualCommit);
        h.shell(InstanceId::new(42), ShellSignal::ActivationChanged(true));
        assert!(h.manager.registry().is_empty());
    }

    // =========================================================================
    // Crashes
    // =========================================================================

    #[test]
    fn foreground_crash_loop_closes_normal_window_on_second_crash() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.page(a, PageSignal::ProcessCrashed);
        assert!(h.manager.instance(a).is_some());
        assert_eq!(h.manager.crash_count("com.example.a"), 1);
        h.page(a, PageSignal::ProcessCrashed);
        assert!(h.manager.instance(a).is_none());
        assert_eq!(h.manager.crash_count("com.example.a"), 0);
    }

    #[test]
    fn fullscreen_window_tolerates_two_crashes() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.shell(a, ShellSignal::HostStateChanged(WindowHostState::Fullscreen));
        h.page(a, PageSignal::ProcessCrashed);
        h.page(a, PageSignal::ProcessCrashed);
        assert!(h.manager.instance(a).is_some());
        h.page(a, PageSignal::ProcessCrashed);
        assert!(h.manager.instance(a).is_none());
    }

    #[test]
    fn background_crash_recovers_on_activation() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.shell(a, ShellSignal::ActivationChanged(false));
        h.manager.notify_crash("com.example.a", Some(a));
        assert!(h.manager.instance(a).unwrap().flags().crashed);
        assert_eq!(h.manager.crash_count("com.example.a"), 0);

        let engine = h.engine("com.example.a");
        engine.clear();
        h.shell(a, ShellSignal::ActivationChanged(true));
        assert!(!h.manager.instance(a).unwrap().flags().crashed);
        assert_eq!(engine.loads(), vec!["file:///apps/a/index.html".to_string()]);
    }

    #[test]
    fn crash_while_closing_destroys() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.page(a, PageSignal::CloseCallbackRegistered { registered: true });
        h.manager.kill(&KillTarget::Instance(a), false);
        h.page(a, PageSignal::ProcessCrashed);
        assert_eq!(h.manager.closing_count(), 0);
        assert_eq!(h.clock.pending(), 0);
    }

    // =========================================================================
    // Stage
    // =========================================================================

    #[test]
    fn minimize_deactivates_and_restore_activates() {
        let mut h = Harness::new();
        let a = h.launch_shown(A);
        h.shell(a, ShellSignal::HostStateChanged(WindowHostState::Minimized));
        let app = h.manager.instance(a).unwrap();
        assert!(!app.flags().activated);
        assert_eq!(app.host_state(), WindowHostState::Minimized);

        h.shell(a, ShellSignal::HostStateChanged(WindowHostState::Maximized));
        assert!(h.manager.instance(a).unwrap().flags().activated);
    }

    #[test]
    fn window_calls_forward_to_surface() {
        let mut h = Harness::new();
        let a = h.launch(A, "{}");
        assert!(h.manager.raise(a));
        assert!(h.manager.lower(a));
        assert!(h.manager.set_opacity(a, 0.5));
        assert!(h.manager.set_key_input_mask(a, KeyInputRegion::default()));
        let engine = h.engine("com.example.a");
        assert_eq!(engine.count(&EngineCall::Raise), 1);
        assert_eq!(engine.count(&EngineCall::Opacity(0.5)), 1);
        assert!(!h.manager.raise(InstanceId::new(7)));
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    #[test]
    fn system_language_change_reaches_every_app_once() {
        let mut h = Harness::new();
        h.launch(A, "{}");
        h.launch(B, "{}");
        assert!(h.manager.set_system_language("ko-KR"));
        assert!(!h.manager.set_system_language("ko-KR"));
        for app_id in ["com.example.a", "com.example.b"] {
            let locale = h
                .engine(app_id)
                .scripts()
                .iter()
                .filter(|s| s.contains("webOSLocaleChange"))
                .count();
            assert_eq!(locale, 1);
        }
    }

    #[test]
    fn unknown_broadcast_is_rejected() {
        let mut h = Harness::new();
        assert!(!h.manager.broadcast_message("bogus", ""));
        assert!(h.manager.broadcast_message("DeviceInfoChanged", "ModelName"));
    }

    #[test]
    fn memory_pressure_goes_to_activated_apps() {
        let mut h = Harness::new();
        h.launch_shown(A);
        h.launch(B, "{}");
        h.manager.notify_memory_pressure(MemoryPressureLevel::Low);
        assert_eq!(
            h.engine("com.example.a")
                .count(&EngineCall::MemoryPressure(MemoryPressureLevel::Low)),
            1
        );
        assert_eq!(
            h.engine("com.example.b")
                .count(&EngineCall::MemoryPressure(MemoryPressureLevel::Low)),
            0
        );
    }

    #[test]
    fn accessibility_only_applied_on_change() {
        let mut h = Harness::new();
        h.launch(A, "{}");
        h.manager.set_accessibility_enabled(false);
        h.manager.set_accessibility_enabled(true);
        h.manager.set_accessibility_enabled(true);
        assert_eq!(h.engine("com.example.a").count(&EngineCall::Accessibility(true)), 1);
    }

    #[test]
    fn system_apps_hidden_from_default_list() {
        let mut h = Harness::new();
        h.launch(A, "{}");
        h.launch(r#"{"id":"bar","main":"file:///bar.html","defaultWindowType":"system_ui"}"#, "{}");
        assert_eq!(h.manager.list(false).len(), 1);
        assert_eq!(h.manager.list(true).len(), 2);
    }

    struct Recorder(Arc<Mutex<Vec<usize>>>);

    impl RunningAppsListener for Recorder {
        fn on_running_apps_changed(&mut self, apps: &[ApplicationInfo]) {
            self.0.lock().unwrap().push(apps.len());
        }
    }

    #[test]
    fn listener_sees_every_registry_change() {
        let mut h = Harness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        h.manager.set_running_apps_listener(Box::new(Recorder(Arc::clone(&seen))));
        let a = h.launch(A, "{}");
        h.launch(B, "{}");
        h.manager.kill(&KillTarget::Instance(a), true);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1]);
    }
}
