//! Running app instances.
//!
//! An [`AppInstance`] is one launch of a web app: its descriptor, launch
//! parameters, lifecycle flags and the engine/surface handles it exclusively
//! owns. Engine and surface calls made through the instance never fail
//! outward; errors are logged with the instance's correlation fields.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::descriptor::{AppDescriptor, LaunchParams, WindowType};
use crate::engine::{EngineResult, PageEngine, PageEngineKind, ShellSurface, WindowHostState};
use crate::suspend::SuspendState;

/// URL loaded to run a page's unload handlers before teardown.
pub const UNLOAD_URL: &str = "about:blank";

// =============================================================================
// Instance ids
// =============================================================================

/// Identifier of one launch, unique for the lifetime of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Monotonic id source. Ids are handed out once and never reused; once
/// `u64::MAX` has been issued the generator is exhausted.
#[derive(Debug, Clone)]
pub struct InstanceIdGenerator {
    next: Option<u64>,
}

impl InstanceIdGenerator {
    #[must_use]
    pub const fn new(base: u64) -> Self {
        Self { next: Some(base) }
    }

    /// `None` once every id has been handed out.
    pub fn next_id(&mut self) -> Option<InstanceId> {
        let raw = self.next?;
        self.next = raw.checked_add(1);
        Some(InstanceId(raw))
    }

    /// The id the next call will return.
    #[must_use]
    pub fn peek(&self) -> Option<InstanceId> {
        self.next.map(InstanceId)
    }
}

// =============================================================================
// Listing
// =============================================================================

/// One row of `list()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub instance_id: InstanceId,
    pub app_id: String,
    pub pid: u32,
}

// =============================================================================
// Flags
// =============================================================================

/// Lifecycle flags of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFlags {
    /// Stage is active (window shown and in front).
    pub activated: bool,
    /// Set once the close sequence starts; never cleared.
    pub closing: bool,
    /// Render process crashed while in the background; recovered on the next
    /// activation or relaunch.
    pub crashed: bool,
    /// First frame has been visually committed.
    pub has_been_shown: bool,
    /// Window hidden by a pause, a keep-alive close or a hidden launch.
    pub hidden_window: bool,
    pub focused: bool,
    /// A newer descriptor version was seen; reload on the next load finish.
    pub needs_reload: bool,
    /// Close as soon as the shell asks, even if keep-alive.
    pub force_close: bool,
    /// The page has an `onclose` handler.
    pub close_callback_registered: bool,
    /// A navigation is in progress.
    pub loading: bool,
    /// Unload navigation dispatched as part of teardown.
    pub cleaning_resources: bool,
    /// The platform error page is currently displayed.
    pub error_page_shown: bool,
}

// =============================================================================
// AppInstance
// =============================================================================

/// One running web application.
pub struct AppInstance {
    pub(crate) instance_id: InstanceId,
    pub(crate) descriptor: AppDescriptor,
    pub(crate) window_type: WindowType,
    pub(crate) launch_params: LaunchParams,
    pub(crate) launching_app_id: String,
    pub(crate) preload: Option<String>,
    pub(crate) keep_alive: bool,
    pub(crate) background_run: bool,
    pub(crate) host_state: WindowHostState,
    pub(crate) current_url: String,
    pub(crate) flags: InstanceFlags,
    pub(crate) suspend: SuspendState,
    page: Box<dyn PageEngine>,
    surface: Option<Box<dyn ShellSurface>>,
}

impl std::fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppInstance")
            .field("instance_id", &self.instance_id)
            .field("app_id", &self.descriptor.id)
            .field("window_type", &self.window_type)
            .field("windowed", &self.surface.is_some())
            .field("flags", &self.flags)
            .field("suspend", &self.suspend)
            .finish_non_exhaustive()
    }
}

impl AppInstance {
    pub(crate) fn new(
        instance_id: InstanceId,
        descriptor: AppDescriptor,
        launch_params: LaunchParams,
        launching_app_id: &str,
        page: Box<dyn PageEngine>,
        surface: Option<Box<dyn ShellSurface>>,
    ) -> Self {
        let window_type = descriptor.window_type();
        let background_run = descriptor.background_run();
        let keep_alive = descriptor.keep_alive;
        let preload = launch_params.preload().map(str::to_string);
        let hidden_window = launch_params.launched_hidden() || preload.is_some();
        Self {
            instance_id,
            window_type,
            launch_params,
            launching_app_id: launching_app_id.to_string(),
            preload,
            keep_alive,
            background_run,
            host_state: WindowHostState::Default,
            current_url: String::new(),
            flags: InstanceFlags {
                hidden_window,
                ..InstanceFlags::default()
            },
            suspend: SuspendState::default(),
            descriptor,
            page,
            surface,
        }
    }

    // -- Accessors --

    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.descriptor.id
    }

    #[must_use]
    pub const fn descriptor(&self) -> &AppDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn window_type(&self) -> WindowType {
        self.window_type
    }

    #[must_use]
    pub fn trust_level(&self) -> &str {
        &self.descriptor.trust_level
    }

    #[must_use]
    pub const fn launch_params(&self) -> &LaunchParams {
        &self.launch_params
    }

    #[must_use]
    pub fn launching_app_id(&self) -> &str {
        &self.launching_app_id
    }

    /// Engine backing the page, as reported by the page itself.
    #[must_use]
    pub fn engine_kind(&self) -> PageEngineKind {
        self.page.kind()
    }

    #[must_use]
    pub const fn is_windowed(&self) -> bool {
        self.surface.is_some()
    }

    #[must_use]
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[must_use]
    pub const fn is_preloaded(&self) -> bool {
        self.preload.is_some()
    }

    #[must_use]
    pub const fn background_run(&self) -> bool {
        self.background_run
    }

    #[must_use]
    pub const fn host_state(&self) -> WindowHostState {
        self.host_state
    }

    /// Regular window state; crash recovery gives these a lower reload limit.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.host_state == WindowHostState::Default
    }

    #[must_use]
    pub const fn flags(&self) -> &InstanceFlags {
        &self.flags
    }

    #[must_use]
    pub const fn suspend_state(&self) -> &SuspendState {
        &self.suspend
    }

    #[must_use]
    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    #[must_use]
    pub fn default_url(&self) -> &str {
        &self.descriptor.main
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.page.process_id()
    }

    /// System apps are hidden from `list(false)`.
    #[must_use]
    pub fn is_system_app(&self) -> bool {
        self.window_type == WindowType::SystemUi
    }

    #[must_use]
    pub fn info(&self) -> ApplicationInfo {
        ApplicationInfo {
            instance_id: self.instance_id,
            app_id: self.descriptor.id.clone(),
            pid: self.pid(),
        }
    }

    // -- Absorbing call wrappers --

    pub(crate) fn engine(
        &mut self,
        op: &'static str,
        call: impl FnOnce(&mut dyn PageEngine) -> EngineResult,
    ) {
        if let Err(err) = call(&mut *self.page) {
            warn!(
                app_id = %self.descriptor.id,
                instance_id = %self.instance_id,
                op,
                error = %err,
                "page engine call failed"
            );
        }
    }

    /// No-op for headless instances.
    pub(crate) fn shell(
        &mut self,
        op: &'static str,
        call: impl FnOnce(&mut dyn ShellSurface) -> EngineResult,
    ) {
        let Some(surface) = self.surface.as_mut() else {
            debug!(app_id = %self.descriptor.id, op, "headless; shell call skipped");
            return;
        };
        if let Err(err) = call(&mut **surface) {
            warn!(
                app_id = %self.descriptor.id,
                instance_id = %self.instance_id,
                op,
                error = %err,
                "shell surface call failed"
            );
        }
    }

    // -- Page operations --

    pub(crate) fn load_url(&mut self, url: &str) {
        self.current_url = url.to_string();
        self.flags.loading = true;
        self.flags.error_page_shown = false;
        self.engine("load", |page| page.load(url));
    }

    pub(crate) fn load_default_url(&mut self) {
        let url = self.descriptor.main.clone();
        self.load_url(&url);
    }

    pub(crate) fn reload(&mut self) {
        self.flags.loading = true;
        self.engine("reload", |page| page.reload());
    }

    pub(crate) fn run_script(&mut self, script: &str) {
        self.engine("run_script", |page| page.run_script(script));
    }

    /// Stop the current navigation and load the unload URL.
    pub(crate) fn dispatch_unload(&mut self) {
        self.flags.cleaning_resources = true;
        self.engine("stop_loading", |page| page.stop_loading());
        self.load_url(UNLOAD_URL);
    }

    pub(crate) fn setup_launch_event(&mut self) {
        let script = launch_event_script(&self.launch_params.to_json());
        self.engine("add_user_script", |page| page.add_user_script(&script));
    }

    pub(crate) fn send_relaunch_event(&mut self) {
        self.engine("set_visible", |page| page.set_visible(true));
        let script = relaunch_event_script(&self.launch_params.to_json());
        self.run_script(&script);
    }

    pub(crate) fn execute_close_callback(&mut self) {
        self.run_script(CLOSE_CALLBACK_SCRIPT);
    }

    // -- Window operations --

    pub(crate) fn show_window(&mut self) {
        self.flags.hidden_window = false;
        self.shell("show", |s| s.show());
    }

    pub(crate) fn hide_window(&mut self) {
        self.flags.hidden_window = true;
        self.shell("hide", |s| s.hide());
    }

    pub(crate) fn focus(&mut self) {
        self.flags.focused = true;
        self.shell("focus", |s| s.focus());
    }

    pub(crate) fn unfocus(&mut self) {
        self.flags.focused = false;
        self.shell("unfocus", |s| s.unfocus());
    }

    pub(crate) fn destroy_surface_group(&mut self) {
        self.shell("destroy_surface_group", |s| s.destroy_surface_group());
    }
}

// =============================================================================
// Page event scripts
// =============================================================================

const CLOSE_CALLBACK_SCRIPT: &str = "window.webOSSystem._onCloseWithNotify_('normal');";

/// `webOSLaunch` fired once the document is ready.
#[must_use]
pub fn launch_event_script(detail: &str) -> String {
    format!(
        "(function() {{\
         var launchEvent = new CustomEvent('webOSLaunch', {{ detail: {detail} }});\
         if (document.readyState === 'complete') {{\
         setTimeout(function() {{ document.dispatchEvent(launchEvent); }}, 1);\
         }} else {{\
         document.addEventListener('DOMContentLoaded', function() {{\
         setTimeout(function() {{ document.dispatchEvent(launchEvent); }}, 1);\
         }});\
         }}\
         }})();"
    )
}

#[must_use]
pub fn relaunch_event_script(detail: &str) -> String {
    format!(
        "setTimeout(function () {{\
         var launchEvent = new CustomEvent('webOSRelaunch', {{ detail: {detail} }});\
         document.dispatchEvent(launchEvent);\
         }}, 1);"
    )
}

#[must_use]
pub fn load_error_event_script(generic_error: bool, error_code: i32) -> String {
    format!(
        "{{\
         var launchEvent = new CustomEvent('webOSLoadError', \
         {{ detail: {{ genericError: {generic_error}, errorCode: {error_code} }} }});\
         document.dispatchEvent(launchEvent);\
         }}"
    )
}

#[must_use]
pub fn locale_change_event_script() -> &'static str {
    "setTimeout(function () {\
     var localeEvent = new CustomEvent('webOSLocaleChange');\
     document.dispatchEvent(localeEvent);\
     }, 1);"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, RecordingEngine, RecordingSurface};

    fn instance(desc_json: &str, params: &str, windowed: bool) -> (AppInstance, RecordingEngine) {
        let desc = AppDescriptor::from_json(desc_json).unwrap();
        let engine = RecordingEngine::new(4242);
        let surface: Option<Box<dyn ShellSurface>> = if windowed {
            Some(Box::new(RecordingSurface::new(engine.log())))
        } else {
            None
        };
        let app = AppInstance::new(
            InstanceId::new(1000),
            desc,
            LaunchParams::parse(params),
            "com.example.launcher",
            Box::new(engine.clone()),
            surface,
        );
        (app, engine)
    }

    const DESC: &str = r#"{"id":"com.example.a","main":"file:///usr/apps/a/index.html"}"#;

    // =========================================================================
    // Ids
    // =========================================================================

    #[test]
    fn generator_is_monotonic_from_base() {
        let mut ids = InstanceIdGenerator::new(1000);
        assert_eq!(ids.peek(), Some(InstanceId::new(1000)));
        let a = ids.next_id().unwrap();
        let b = ids.next_id().unwrap();
        assert_eq!(a.to_string(), "1000");
        assert_eq!(b.to_string(), "1001");
        assert!(b > a);
    }

    #[test]
    fn generator_stops_at_u64_max() {
        let mut ids = InstanceIdGenerator::new(u64::MAX - 1);
        assert_eq!(ids.next_id(), Some(InstanceId::new(u64::MAX - 1)));
        assert_eq!(ids.next_id(), Some(InstanceId::new(u64::MAX)));
        assert_eq!(ids.peek(), None);
        assert_eq!(ids.next_id(), None);
        assert_eq!(ids.next_id(), None);
    }

    #[test]
    fn instance_id_parse_and_serde() {
        let id: InstanceId = " 1042 ".parse().unwrap();
        assert_eq!(id.get(), 1042);
        assert!("abc".parse::<InstanceId>().is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "1042");
    }

    #[test]
    fn application_info_serializes_camel_case() {
        let info = ApplicationInfo {
            instance_id: InstanceId::new(1000),
            app_id: "a".into(),
            pid: 7,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["instanceId"], 1000);
        assert_eq!(json["appId"], "a");
        assert_eq!(json["pid"], 7);
    }

    // =========================================================================
    // Instance
    // =========================================================================

    #[test]
    fn new_instance_defaults() {
        let (app, _) = instance(DESC, "{}", true);
        assert!(app.is_windowed());
        assert!(!app.flags().closing);
        assert!(!app.flags().hidden_window);
        assert!(app.is_normal());
        assert_eq!(app.pid(), 4242);
        assert_eq!(app.engine_kind(), PageEngineKind::Blink);
        assert_eq!(app.launching_app_id(), "com.example.launcher");
        assert_eq!(app.info().app_id, "com.example.a");
    }

    #[test]
    fn preload_and_hidden_launch_start_hidden() {
        let (app, _) = instance(DESC, r#"{"preload":"full"}"#, true);
        assert!(app.is_preloaded());
        assert!(app.flags().hidden_window);

        let (app, _) = instance(DESC, r#"{"launchedHidden":true}"#, true);
        assert!(!app.is_preloaded());
        assert!(app.flags().hidden_window);
    }

    #[test]
    fn dispatch_unload_loads_blank() {
        let (mut app, engine) = instance(DESC, "{}", false);
        app.dispatch_unload();
        assert!(app.flags().cleaning_resources);
        assert_eq!(app.current_url(), UNLOAD_URL);
        let calls = engine.calls();
        assert_eq!(
            calls,
            vec![EngineCall::StopLoading, EngineCall::Load(UNLOAD_URL.to_string())]
        );
    }

    #[test]
    fn engine_failures_are_absorbed() {
        let (mut app, engine) = instance(DESC, "{}", false);
        engine.fail_next("load");
        app.load_default_url();
        assert!(app.flags().loading);
        assert_eq!(app.current_url(), "file:///usr/apps/a/index.html");
    }

    #[test]
    fn headless_shell_calls_are_noops() {
        let (mut app, engine) = instance(DESC, "{}", false);
        app.show_window();
        app.destroy_surface_group();
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn relaunch_event_makes_page_visible() {
        let (mut app, engine) = instance(DESC, r#"{"x":1}"#, false);
        app.send_relaunch_event();
        let calls = engine.calls();
        assert_eq!(calls[0], EngineCall::SetVisible(true));
        assert!(matches!(&calls[1], EngineCall::RunScript(s) if s.contains("webOSRelaunch") && s.contains(r#"{"x":1}"#)));
    }

    #[test]
    fn scripts_embed_detail() {
        assert!(launch_event_script("{}").contains("webOSLaunch"));
        let err = load_error_event_script(true, -105);
        assert!(err.contains("genericError: true"));
        assert!(err.contains("errorCode: -105"));
        assert!(locale_change_event_script().contains("webOSLocaleChange"));
    }
}
