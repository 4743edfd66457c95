//! Suspend/resume of rendering, media and script execution.
//!
//! ```text
//!            request_suspend_all                 timer fires
//!   Active ───────────────────────► PendingSuspend ─────────► Suspended
//!     ▲  hide, stop media + RTC,        │  (loading: defer      │
//!     │  pause rendering, arm timer     │   until load finish)  │
//!     │                                 │                       │
//!     └──────── request_resume_all ◄────┴───────────────────────┘
//!              (cancel timer, or resume DOM + rendering)
//! ```
//!
//! Hiding, media and peer-connection teardown happen synchronously; DOM and
//! script suspension waits for the suspend delay so a quick hide/show pair
//! never pauses scripts. Apps allowed to run in the background only have
//! their visibility toggled. No operation here fails outward: engine errors
//! are absorbed by [`AppInstance`].

use std::time::Duration;

use tracing::{debug, info};

use crate::config::WamConfig;
use crate::instance::AppInstance;
use crate::timer::{Scheduler, TimerKind, TimerToken};

/// Where an instance is in the suspend cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendPhase {
    #[default]
    Active,
    /// Hidden; DOM suspension armed behind `token`.
    PendingSuspend { token: TimerToken },
    /// Timer fired. `dom_suspended` is false while a load in progress defers
    /// the DOM suspension.
    Suspended { dom_suspended: bool },
}

/// Per-instance suspend bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuspendState {
    pub phase: SuspendPhase,
    pub media_suspended: bool,
    /// DOM suspension was requested during a load; perform it on load finish.
    pub suspend_at_load: bool,
}

impl SuspendState {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.phase != SuspendPhase::Active
    }

    #[must_use]
    pub fn dom_suspended(&self) -> bool {
        matches!(
            self.phase,
            SuspendPhase::Suspended {
                dom_suspended: true
            }
        )
    }

    #[must_use]
    pub fn pending_token(&self) -> Option<TimerToken> {
        match self.phase {
            SuspendPhase::PendingSuspend { token } => Some(token),
            _ => None,
        }
    }
}

/// Stateless suspend policy applied to one instance at a time.
#[derive(Debug, Clone)]
pub struct SuspendController {
    delay: Duration,
    keep_rtc_connections: bool,
}

impl SuspendController {
    #[must_use]
    pub fn new(delay: Duration, keep_rtc_connections: bool) -> Self {
        Self {
            delay: delay.max(Duration::from_millis(crate::config::MIN_SUSPEND_DELAY_MS)),
            keep_rtc_connections,
        }
    }

    #[must_use]
    pub fn from_config(config: &WamConfig) -> Self {
        Self::new(config.suspend_delay(), config.keep_rtc_connections_on_suspend)
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Hide now; suspend DOM and scripts after the delay.
    pub fn request_suspend_all(&self, app: &mut AppInstance, scheduler: &mut dyn Scheduler) {
        app.engine("set_visible", |page| page.set_visible(false));

        if app.suspend.is_suspended() || app.background_run() {
            debug!(
                app_id = %app.app_id(),
                background_run = app.background_run(),
                "suspend requested; nothing further to do"
            );
            return;
        }

        if !self.keep_rtc_connections {
            app.engine("drop_peer_connections", |page| page.drop_peer_connections());
        }
        self.suspend_media(app);
        app.engine("suspend_rendering", |page| page.suspend_rendering());

        if app.flags.closing {
            info!(app_id = %app.app_id(), "closing; DOM suspend timer not armed");
            return;
        }

        let token = scheduler.schedule(app.instance_id(), TimerKind::DomSuspend, self.delay);
        app.suspend.phase = SuspendPhase::PendingSuspend { token };
        info!(
            app_id = %app.app_id(),
            instance_id = %app.instance_id(),
            delay_ms = self.delay.as_millis() as u64,
            "DOM suspend timer armed"
        );
    }

    /// Symmetric to [`request_suspend_all`](Self::request_suspend_all);
    /// idempotent.
    pub fn request_resume_all(&self, app: &mut AppInstance, scheduler: &mut dyn Scheduler) {
        self.resume_painting_and_script(app, scheduler);
        self.resume_media(app);
        app.engine("set_visible", |page| page.set_visible(true));
    }

    /// Undo rendering/DOM suspension without touching media or visibility.
    pub fn resume_painting_and_script(&self, app: &mut AppInstance, scheduler: &mut dyn Scheduler) {
        app.suspend.suspend_at_load = false;
        match app.suspend.phase {
            SuspendPhase::Active => return,
            SuspendPhase::PendingSuspend { token } => {
                scheduler.cancel(token);
                app.engine("resume_rendering", |page| page.resume_rendering());
                info!(app_id = %app.app_id(), "DOM suspend timer cancelled by resume");
            }
            SuspendPhase::Suspended { dom_suspended } => {
                if dom_suspended {
                    app.engine("resume_script_execution", |page| {
                        page.resume_script_execution()
                    });
                }
                app.engine("resume_rendering", |page| page.resume_rendering());
                info!(app_id = %app.app_id(), "resumed");
            }
        }
        app.suspend.phase = SuspendPhase::Active;
    }

    pub fn suspend_media(&self, app: &mut AppInstance) {
        if app.suspend.media_suspended || app.background_run() {
            return;
        }
        app.engine("suspend_media", |page| page.suspend_media());
        app.suspend.media_suspended = true;
    }

    pub fn resume_media(&self, app: &mut AppInstance) {
        if !app.suspend.media_suspended {
            return;
        }
        app.engine("resume_media", |page| page.resume_media());
        app.suspend.media_suspended = false;
    }

    /// DOM-suspend timer expiry. Returns false for stale tokens.
    pub fn on_timer_fired(&self, app: &mut AppInstance, token: TimerToken) -> bool {
        if app.suspend.pending_token() != Some(token) {
            debug!(app_id = %app.app_id(), token = token.get(), "stale DOM suspend timer");
            return false;
        }
        app.suspend.phase = SuspendPhase::Suspended {
            dom_suspended: false,
        };
        if app.flags.closing {
            info!(app_id = %app.app_id(), "closing; DOM suspend skipped");
            return true;
        }
        self.suspend_dom(app);
        true
    }

    /// Perform a DOM suspension that was deferred by a load.
    pub fn on_load_finished(&self, app: &mut AppInstance) {
        if !app.suspend.suspend_at_load {
            return;
        }
        app.suspend.suspend_at_load = false;
        let deferred = app.suspend.phase
            == SuspendPhase::Suspended {
                dom_suspended: false,
            };
        if deferred && !app.flags.closing {
            info!(app_id = %app.app_id(), "load finished; performing deferred DOM suspend");
            self.suspend_dom(app);
        }
    }

    /// Teardown needs a running page for unload handlers and `onclose`.
    pub fn prepare_for_close(&self, app: &mut AppInstance, scheduler: &mut dyn Scheduler) {
        match app.suspend.phase {
            SuspendPhase::Active => {}
            SuspendPhase::PendingSuspend { token } => scheduler.cancel(token),
            SuspendPhase::Suspended { dom_suspended } => {
                if dom_suspended {
                    app.engine("resume_script_execution", |page| {
                        page.resume_script_execution()
                    });
                }
            }
        }
        app.suspend.phase = SuspendPhase::Active;
        app.suspend.suspend_at_load = false;
    }

    /// A recreated render process starts unsuspended.
    pub fn reset_after_crash(&self, app: &mut AppInstance, scheduler: &mut dyn Scheduler) {
        if let Some(token) = app.suspend.pending_token() {
            scheduler.cancel(token);
        }
        app.suspend.phase = SuspendPhase::Active;
        app.suspend.suspend_at_load = false;
    }

    fn suspend_dom(&self, app: &mut AppInstance) {
        if app.background_run() {
            return;
        }
        if app.flags.loading {
            info!(app_id = %app.app_id(), url = %app.current_url(), "loading; DOM suspend deferred");
            app.suspend.suspend_at_load = true;
            return;
        }
        app.engine("suspend_rendering", |page| page.suspend_rendering());
        app.engine("suspend_script_execution", |page| page.suspend_script_execution());
        app.suspend.phase = SuspendPhase::Suspended {
            dom_suspended: true,
        };
        info!(app_id = %app.app_id(), "DOM suspended");
    }
}
