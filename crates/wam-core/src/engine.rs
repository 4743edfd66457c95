//! Capabilities consumed from the browser engine and the compositor.
//!
//! The lifecycle layer never talks to a concrete engine. Each instance owns
//! one [`PageEngine`] and, when windowed, one [`ShellSurface`]; both are built
//! by the host-supplied [`EngineFactory`]. Engine callbacks come back as
//! [`PageSignal`]s and [`ShellSignal`]s delivered on the control thread.

use serde::{Deserialize, Serialize};

use crate::descriptor::{AppDescriptor, LaunchParams, WindowType};
use crate::error::EngineError;

/// Engine call result; failures are absorbed by the caller with a diagnostic.
pub type EngineResult = Result<(), EngineError>;

// =============================================================================
// Engine kinds and levels
// =============================================================================

/// Closed set of page engine variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageEngineKind {
    Blink,
}

impl std::fmt::Display for PageEngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blink => write!(f, "blink"),
        }
    }
}

/// System memory pressure forwarded to engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressureLevel {
    Normal,
    Low,
    Critical,
}

impl std::fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Compositor window state of a windowed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowHostState {
    /// Regular (non-fullscreen) window. Crash recovery treats this as normal
    /// priority.
    #[default]
    Default,
    Maximized,
    Fullscreen,
    Minimized,
}

/// Input region in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyInputRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Everything the compositor needs to create an app surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub app_id: String,
    pub window_type: WindowType,
    pub width: u32,
    pub height: u32,
    pub role: u32,
    pub panel_type: u32,
}

impl SurfaceSpec {
    #[must_use]
    pub fn for_descriptor(desc: &AppDescriptor) -> Self {
        Self {
            app_id: desc.id.clone(),
            window_type: desc.window_type(),
            width: desc.width,
            height: desc.height,
            role: desc.surface_role,
            panel_type: desc.panel_type,
        }
    }
}

// =============================================================================
// Capability traits
// =============================================================================

/// One browser page.
pub trait PageEngine: Send {
    fn kind(&self) -> PageEngineKind;
    /// Render process id, `0` when unknown.
    fn process_id(&self) -> u32;

    fn load(&mut self, url: &str) -> EngineResult;
    fn reload(&mut self) -> EngineResult;
    fn stop_loading(&mut self) -> EngineResult;
    fn run_script(&mut self, code: &str) -> EngineResult;
    /// Script injected into every subsequent document load.
    fn add_user_script(&mut self, code: &str) -> EngineResult;
    fn set_visible(&mut self, visible: bool) -> EngineResult;

    fn suspend_rendering(&mut self) -> EngineResult;
    fn resume_rendering(&mut self) -> EngineResult;
    fn suspend_script_execution(&mut self) -> EngineResult;
    fn resume_script_execution(&mut self) -> EngineResult;
    fn suspend_media(&mut self) -> EngineResult;
    fn resume_media(&mut self) -> EngineResult;
    fn drop_peer_connections(&mut self) -> EngineResult;

    fn notify_memory_pressure(&mut self, level: MemoryPressureLevel) -> EngineResult;
    fn set_accessibility_enabled(&mut self, enabled: bool) -> EngineResult;
}

/// Compositor surface of a windowed app.
pub trait ShellSurface: Send {
    fn show(&mut self) -> EngineResult;
    fn hide(&mut self) -> EngineResult;
    fn focus(&mut self) -> EngineResult;
    fn unfocus(&mut self) -> EngineResult;
    fn raise(&mut self) -> EngineResult;
    fn lower(&mut self) -> EngineResult;
    fn set_opacity(&mut self, opacity: f32) -> EngineResult;
    fn set_key_input_mask(&mut self, region: KeyInputRegion) -> EngineResult;
    fn destroy_surface_group(&mut self) -> EngineResult;
}

/// Builds engines and surfaces for new instances.
pub trait EngineFactory: Send {
    /// Engine kind serving `app_type`, `None` when unsupported.
    fn engine_kind(&self, app_type: &str) -> Option<PageEngineKind>;

    fn create_page(
        &mut self,
        kind: PageEngineKind,
        descriptor: &AppDescriptor,
        params: &LaunchParams,
    ) -> Result<Box<dyn PageEngine>, EngineError>;

    /// `None` runs the instance headless.
    fn create_surface(&mut self, spec: &SurfaceSpec) -> Option<Box<dyn ShellSurface>>;
}

// =============================================================================
// Signals
// =============================================================================

/// Callbacks raised by a page engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    LoadStarted,
    LoadFinished { url: String },
    LoadFailed { code: i32, description: String },
    FirstVisualCommit,
    ProcessCrashed,
    TitleChanged { title: String },
    /// The page registered (or cleared) an `onclose` handler.
    CloseCallbackRegistered { registered: bool },
    /// The `onclose` handler finished.
    CloseCallbackInvoked,
}

/// Callbacks raised by the compositor for one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSignal {
    ActivationChanged(bool),
    HostStateChanged(WindowHostState),
    CloseRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display() {
        assert_eq!(PageEngineKind::Blink.to_string(), "blink");
    }

    #[test]
    fn pressure_levels_are_ordered() {
        assert!(MemoryPressureLevel::Critical > MemoryPressureLevel::Low);
        assert!(MemoryPressureLevel::Low > MemoryPressureLevel::Normal);
        assert_eq!(MemoryPressureLevel::Critical.to_string(), "critical");
    }

    #[test]
    fn surface_spec_from_descriptor() {
        let desc = AppDescriptor::from_json(
            r#"{"id":"a","main":"file:///a","defaultWindowType":"overlay","width":640,"height":480,"surfaceRole":2}"#,
        )
        .unwrap();
        let spec = SurfaceSpec::for_descriptor(&desc);
        assert_eq!(spec.app_id, "a");
        assert_eq!(spec.window_type, WindowType::Overlay);
        assert_eq!((spec.width, spec.height), (640, 480));
        assert_eq!(spec.role, 2);
    }

    #[test]
    fn host_state_serde() {
        let json = serde_json::to_string(&WindowHostState::Fullscreen).unwrap();
        assert_eq!(json, "\"fullscreen\"");
    }
}
