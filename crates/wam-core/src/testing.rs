//! Recording fakes for the engine and shell capabilities.
//!
//! A [`RecordingEngine`] and the [`RecordingSurface`] built from its log
//! append every call to one shared [`CallLog`], so a test can assert the
//! exact interleaving of page and window operations for an instance.
//! [`RecordingFactory`] hands out such pairs and keeps a handle to each so
//! tests can inspect instances the manager created.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::descriptor::{AppDescriptor, LaunchParams, DEFAULT_APP_TYPE};
use crate::engine::{
    EngineFactory, EngineResult, KeyInputRegion, MemoryPressureLevel, PageEngine, PageEngineKind,
    ShellSurface, SurfaceSpec,
};
use crate::error::EngineError;
use crate::manager::LifecycleManager;
use crate::timer::ManualClock;

/// Called with every script a [`RecordingEngine`] runs.
pub type ScriptHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Pid given to pages when a test doesn't pick one.
pub const DEFAULT_TEST_PID: u32 = 100;

/// One recorded engine or surface call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Load(String),
    Reload,
    StopLoading,
    RunScript(String),
    AddUserScript(String),
    SetVisible(bool),
    SuspendRendering,
    ResumeRendering,
    SuspendScriptExecution,
    ResumeScriptExecution,
    SuspendMedia,
    ResumeMedia,
    DropPeerConnections,
    MemoryPressure(MemoryPressureLevel),
    Accessibility(bool),
    // Shell surface
    Show,
    Hide,
    Focus,
    Unfocus,
    Raise,
    Lower,
    Opacity(f32),
    KeyMask(KeyInputRegion),
    DestroySurfaceGroup,
    /// The instance released its page handle.
    Dropped,
}

#[derive(Debug, Default)]
struct LogState {
    calls: Vec<EngineCall>,
    fail_next: HashSet<&'static str>,
}

/// Call log shared by an engine and its surface.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<LogState>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: &'static str, call: EngineCall) -> EngineResult {
        let mut state = self.lock();
        state.calls.push(call);
        if state.fail_next.remove(op) {
            return Err(EngineError::CallFailed {
                op,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn count(&self, call: &EngineCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call named `op` fail (it is still recorded).
    pub fn fail_next(&self, op: &'static str) {
        self.lock().fail_next.insert(op);
    }
}

// =============================================================================
// RecordingEngine
// =============================================================================

/// Fake page engine.
///
/// Clones share the log. A clone is the handle given to an instance:
/// dropping it records [`EngineCall::Dropped`]; dropping the original does
/// not.
pub struct RecordingEngine {
    log: CallLog,
    pid: u32,
    owned_by_instance: bool,
    script_hook: Option<ScriptHook>,
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingEngine")
            .field("pid", &self.pid)
            .field("owned_by_instance", &self.owned_by_instance)
            .field("script_hook", &self.script_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Clone for RecordingEngine {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            pid: self.pid,
            owned_by_instance: true,
            script_hook: self.script_hook.clone(),
        }
    }
}

impl RecordingEngine {
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            log: CallLog::default(),
            pid,
            owned_by_instance: false,
            script_hook: None,
        }
    }

    /// Run `hook` after every recorded `run_script`, outside the log lock.
    #[must_use]
    pub fn with_script_hook(mut self, hook: ScriptHook) -> Self {
        self.script_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.calls()
    }

    #[must_use]
    pub fn count(&self, call: &EngineCall) -> usize {
        self.log.count(call)
    }

    pub fn clear(&self) {
        self.log.clear();
    }

    pub fn fail_next(&self, op: &'static str) {
        self.log.fail_next(op);
    }

    /// Scripts run via `run_script`, in order.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::RunScript(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// URLs passed to `load`, in order.
    #[must_use]
    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Load(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.count(&EngineCall::Dropped) > 0
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        if self.owned_by_instance {
            self.log.lock().calls.push(EngineCall::Dropped);
        }
    }
}

impl PageEngine for RecordingEngine {
    fn kind(&self) -> PageEngineKind {
        PageEngineKind::Blink
    }

    fn process_id(&self) -> u32 {
        self.pid
    }

    fn load(&mut self, url: &str) -> EngineResult {
        self.log.record("load", EngineCall::Load(url.to_string()))
    }

    fn reload(&mut self) -> EngineResult {
        self.log.record("reload", EngineCall::Reload)
    }

    fn stop_loading(&mut self) -> EngineResult {
        self.log.record("stop_loading", EngineCall::StopLoading)
    }

    fn run_script(&mut self, code: &str) -> EngineResult {
        let result = self
            .log
            .record("run_script", EngineCall::RunScript(code.to_string()));
        if let Some(hook) = &self.script_hook {
            hook(code);
        }
        result
    }

    fn add_user_script(&mut self, code: &str) -> EngineResult {
        self.log
            .record("add_user_script", EngineCall::AddUserScript(code.to_string()))
    }

    fn set_visible(&mut self, visible: bool) -> EngineResult {
        self.log.record("set_visible", EngineCall::SetVisible(visible))
    }

    fn suspend_rendering(&mut self) -> EngineResult {
        self.log
            .record("suspend_rendering", EngineCall::SuspendRendering)
    }

    fn resume_rendering(&mut self) -> EngineResult {
        self.log.record("resume_rendering", EngineCall::ResumeRendering)
    }

    fn suspend_script_execution(&mut self) -> EngineResult {
        self.log.record(
            "suspend_script_execution",
            EngineCall::SuspendScriptExecution,
        )
    }

    fn resume_script_execution(&mut self) -> EngineResult {
        self.log
            .record("resume_script_execution", EngineCall::ResumeScriptExecution)
    }

    fn suspend_media(&mut self) -> EngineResult {
        self.log.record("suspend_media", EngineCall::SuspendMedia)
    }

    fn resume_media(&mut self) -> EngineResult {
        self.log.record("resume_media", EngineCall::ResumeMedia)
    }

    fn drop_peer_connections(&mut self) -> EngineResult {
        self.log
            .record("drop_peer_connections", EngineCall::DropPeerConnections)
    }

    fn notify_memory_pressure(&mut self, level: MemoryPressureLevel) -> EngineResult {
        self.log
            .record("notify_memory_pressure", EngineCall::MemoryPressure(level))
    }

    fn set_accessibility_enabled(&mut self, enabled: bool) -> EngineResult {
        self.log
            .record("set_accessibility_enabled", EngineCall::Accessibility(enabled))
    }
}

// =============================================================================
// RecordingSurface
// =============================================================================

/// Fake shell surface writing into an engine's log.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    log: CallLog,
}

impl RecordingSurface {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl ShellSurface for RecordingSurface {
    fn show(&mut self) -> EngineResult {
        self.log.record("show", EngineCall::Show)
    }

    fn hide(&mut self) -> EngineResult {
        self.log.record("hide", EngineCall::Hide)
    }

    fn focus(&mut self) -> EngineResult {
        self.log.record("focus", EngineCall::Focus)
    }

    fn unfocus(&mut self) -> EngineResult {
        self.log.record("unfocus", EngineCall::Unfocus)
    }

    fn raise(&mut self) -> EngineResult {
        self.log.record("raise", EngineCall::Raise)
    }

    fn lower(&mut self) -> EngineResult {
        self.log.record("lower", EngineCall::Lower)
    }

    fn set_opacity(&mut self, opacity: f32) -> EngineResult {
        self.log.record("set_opacity", EngineCall::Opacity(opacity))
    }

    fn set_key_input_mask(&mut self, region: KeyInputRegion) -> EngineResult {
        self.log.record("set_key_input_mask", EngineCall::KeyMask(region))
    }

    fn destroy_surface_group(&mut self) -> EngineResult {
        self.log
            .record("destroy_surface_group", EngineCall::DestroySurfaceGroup)
    }
}

// =============================================================================
// RecordingFactory
// =============================================================================

struct FactoryState {
    supported_types: HashSet<String>,
    failing_apps: HashSet<String>,
    headless: bool,
    next_pid: u32,
    script_hook: Option<ScriptHook>,
    created: Vec<(String, RecordingEngine)>,
    surfaces: Vec<SurfaceSpec>,
}

impl std::fmt::Debug for FactoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryState")
            .field("supported_types", &self.supported_types)
            .field("headless", &self.headless)
            .field("next_pid", &self.next_pid)
            .field("created", &self.created.len())
            .finish_non_exhaustive()
    }
}

/// Fake factory. Clones share state, so a test keeps one clone while the
/// manager owns another.
#[derive(Debug, Clone)]
pub struct RecordingFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl Default for RecordingFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingFactory {
    /// Supports the `web` app type, windowed, pid [`DEFAULT_TEST_PID`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FactoryState {
                supported_types: HashSet::from([DEFAULT_APP_TYPE.to_string()]),
                failing_apps: HashSet::new(),
                headless: false,
                next_pid: DEFAULT_TEST_PID,
                script_hook: None,
                created: Vec::new(),
                surfaces: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn support_type(&self, app_type: &str) {
        self.lock().supported_types.insert(app_type.to_string());
    }

    /// Page creation for `app_id` fails from now on.
    pub fn fail_create_for(&self, app_id: &str) {
        self.lock().failing_apps.insert(app_id.to_string());
    }

    /// Surface creation returns `None` from now on.
    pub fn set_headless(&self, headless: bool) {
        self.lock().headless = headless;
    }

    /// Pid given to pages created from now on.
    pub fn set_next_pid(&self, pid: u32) {
        self.lock().next_pid = pid;
    }

    /// Install `hook` on pages created from now on.
    pub fn set_script_hook(&self, hook: ScriptHook) {
        self.lock().script_hook = Some(hook);
    }

    /// Number of pages created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.lock().created.len()
    }

    /// Surfaces requested so far, in order.
    #[must_use]
    pub fn surfaces(&self) -> Vec<SurfaceSpec> {
        self.lock().surfaces.clone()
    }

    /// Engine of the most recent page created for `app_id`.
    #[must_use]
    pub fn engine(&self, app_id: &str) -> Option<RecordingEngine> {
        self.engines(app_id).pop()
    }

    /// Engines of every page created for `app_id`, oldest first.
    #[must_use]
    pub fn engines(&self, app_id: &str) -> Vec<RecordingEngine> {
        self.lock()
            .created
            .iter()
            .filter(|(id, _)| id == app_id)
            .map(|(_, engine)| RecordingEngine {
                log: engine.log(),
                pid: engine.pid,
                owned_by_instance: false,
                script_hook: None,
            })
            .collect()
    }
}

impl EngineFactory for RecordingFactory {
    fn engine_kind(&self, app_type: &str) -> Option<PageEngineKind> {
        self.lock()
            .supported_types
            .contains(app_type)
            .then_some(PageEngineKind::Blink)
    }

    fn create_page(
        &mut self,
        _kind: PageEngineKind,
        descriptor: &AppDescriptor,
        _params: &LaunchParams,
    ) -> Result<Box<dyn PageEngine>, EngineError> {
        let mut state = self.lock();
        if state.failing_apps.contains(&descriptor.id) {
            return Err(EngineError::Unavailable(format!(
                "render process for {} refused to start",
                descriptor.id
            )));
        }
        let mut engine = RecordingEngine::new(state.next_pid);
        if let Some(hook) = &state.script_hook {
            engine = engine.with_script_hook(Arc::clone(hook));
        }
        let page = Box::new(engine.clone());
        state.created.push((descriptor.id.clone(), engine));
        Ok(page)
    }

    fn create_surface(&mut self, spec: &SurfaceSpec) -> Option<Box<dyn ShellSurface>> {
        let mut state = self.lock();
        state.surfaces.push(spec.clone());
        if state.headless {
            return None;
        }
        // The page for this app was created just before its surface.
        let log = state
            .created
            .iter()
            .rev()
            .find(|(id, _)| *id == spec.app_id)
            .map(|(_, engine)| engine.log())?;
        Some(Box::new(RecordingSurface::new(log)))
    }
}

/// Advance `clock` and deliver every timer that fires to `manager`.
pub fn advance(manager: &mut LifecycleManager, clock: &ManualClock, by: Duration) -> usize {
    let fired = clock.advance(by);
    let count = fired.len();
    for timer in fired {
        manager.on_timer_fired(timer);
    }
    count
}
