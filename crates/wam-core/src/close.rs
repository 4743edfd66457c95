//! Close sequencing.
//!
//! The manager removes an instance from the registry first, so lookups during
//! teardown miss. [`CloseSequencer::begin`] then runs the synchronous part of
//! the close and parks the instance in the [`ClosingSet`] until its `onclose`
//! callback finishes (bounded by a timeout) or its unload navigation
//! completes. Removal from the set is the only path to destruction, so an
//! instance is destroyed exactly once.
//!
//! 1. mark `closing`, release any pending suspend
//! 2. drop the surface group association
//! 3. overlays are force-hidden; other windows deactivate their stage
//! 4. `ignore_clean_resource`: destroy now
//! 5. otherwise park in the closing set and either run the close callback
//!    (armed with the timeout) or dispatch the unload navigation

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::InstancePolicy;
use crate::descriptor::WindowType;
use crate::instance::{AppInstance, InstanceId};
use crate::suspend::SuspendController;
use crate::timer::{Scheduler, TimerKind, TimerToken};

/// Key of a pending close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClosingKey {
    App(String),
    Instance(InstanceId),
}

/// Instance parked until its teardown completes.
#[derive(Debug)]
pub struct ClosingEntry {
    pub app: AppInstance,
    /// Close-callback timeout, if one is armed.
    pub timer: Option<TimerToken>,
}

/// Instances waiting on close-callback completion or unload.
#[derive(Debug)]
pub struct ClosingSet {
    policy: InstancePolicy,
    entries: HashMap<ClosingKey, ClosingEntry>,
}

impl ClosingSet {
    #[must_use]
    pub fn new(policy: InstancePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn key_for(&self, app: &AppInstance) -> ClosingKey {
        match self.policy {
            InstancePolicy::Single => ClosingKey::App(app.app_id().to_string()),
            InstancePolicy::Multi => ClosingKey::Instance(app.instance_id()),
        }
    }

    /// Park `entry`. An older entry under the same key is handed back so the
    /// caller can finalize it.
    pub fn insert(&mut self, entry: ClosingEntry) -> Option<ClosingEntry> {
        let key = self.key_for(&entry.app);
        self.entries.insert(key, entry)
    }

    fn key_of_instance(&self, id: InstanceId) -> Option<ClosingKey> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.app.instance_id() == id)
            .map(|(key, _)| key.clone())
    }

    pub fn take(&mut self, id: InstanceId) -> Option<ClosingEntry> {
        let key = self.key_of_instance(id)?;
        self.entries.remove(&key)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut ClosingEntry> {
        self.entries
            .values_mut()
            .find(|entry| entry.app.instance_id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries.values().any(|entry| entry.app.instance_id() == id)
    }

    #[must_use]
    pub fn contains_app(&self, app_id: &str) -> bool {
        self.entries.values().any(|entry| entry.app.app_id() == app_id)
    }

    #[must_use]
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.entries.values().map(|e| e.app.instance_id()).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What happened to an instance handed to [`CloseSequencer::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseProgress {
    Destroyed,
    AwaitingCallback,
    AwaitingUnload,
}

/// Drives the close protocol for one instance at a time.
#[derive(Debug, Clone)]
pub struct CloseSequencer {
    callback_timeout: Duration,
}

impl CloseSequencer {
    #[must_use]
    pub const fn new(callback_timeout: Duration) -> Self {
        Self { callback_timeout }
    }

    #[must_use]
    pub const fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    /// Run the synchronous part of the close for an instance already removed
    /// from the registry.
    pub fn begin(
        &self,
        mut app: AppInstance,
        ignore_clean_resource: bool,
        closing: &mut ClosingSet,
        suspend: &SuspendController,
        scheduler: &mut dyn Scheduler,
    ) -> CloseProgress {
        app.flags.closing = true;
        suspend.prepare_for_close(&mut app, scheduler);
        app.destroy_surface_group();

        if app.window_type() == WindowType::Overlay {
            force_hide(&mut app, suspend, scheduler);
        } else {
            deactivate_stage(&mut app, suspend, scheduler);
        }

        if ignore_clean_resource {
            info!(app_id = %app.app_id(), instance_id = %app.instance_id(), "destroyed without cleanup");
            return CloseProgress::Destroyed;
        }

        let (progress, timer) = if app.flags.close_callback_registered {
            info!(app_id = %app.app_id(), "running close callback");
            app.execute_close_callback();
            let token = scheduler.schedule(
                app.instance_id(),
                TimerKind::CloseCallback,
                self.callback_timeout,
            );
            (CloseProgress::AwaitingCallback, Some(token))
        } else {
            info!(app_id = %app.app_id(), "no close callback; dispatching unload");
            app.dispatch_unload();
            (CloseProgress::AwaitingUnload, None)
        };

        if let Some(older) = closing.insert(ClosingEntry { app, timer }) {
            warn!(
                app_id = %older.app.app_id(),
                instance_id = %older.app.instance_id(),
                "closing entry replaced; finalizing previous instance"
            );
            finalize(older, scheduler);
        }
        progress
    }

    /// The page's `onclose` handler finished.
    pub fn on_callback_finished(
        &self,
        id: InstanceId,
        closing: &mut ClosingSet,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        match closing.take(id) {
            Some(entry) => {
                info!(app_id = %entry.app.app_id(), instance_id = %id, "close callback done");
                finalize(entry, scheduler);
                true
            }
            None => false,
        }
    }

    /// The close-callback timeout fired. Stale tokens are ignored.
    pub fn on_timeout(
        &self,
        id: InstanceId,
        token: TimerToken,
        closing: &mut ClosingSet,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        let armed = closing.get_mut(id).and_then(|entry| entry.timer);
        if armed != Some(token) {
            return false;
        }
        let Some(mut entry) = closing.take(id) else {
            return false;
        };
        warn!(
            app_id = %entry.app.app_id(),
            instance_id = %id,
            timeout_ms = self.callback_timeout.as_millis() as u64,
            "close callback timed out; forcing unload"
        );
        entry.timer = None;
        entry.app.dispatch_unload();
        finalize(entry, scheduler);
        true
    }

    /// The unload navigation finished.
    pub fn on_unload_finished(
        &self,
        id: InstanceId,
        closing: &mut ClosingSet,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        let unloading = closing
            .get_mut(id)
            .is_some_and(|entry| entry.app.flags.cleaning_resources);
        if !unloading {
            return false;
        }
        closing
            .take(id)
            .map(|entry| finalize(entry, scheduler))
            .is_some()
    }

    /// The render process of a closing instance died; nothing left to wait on.
    pub fn on_process_crashed(
        &self,
        id: InstanceId,
        closing: &mut ClosingSet,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        match closing.take(id) {
            Some(entry) => {
                info!(app_id = %entry.app.app_id(), instance_id = %id, "crashed while closing");
                finalize(entry, scheduler);
                true
            }
            None => false,
        }
    }
}

/// Stage deactivation: pause media, drop focus, hide and suspend.
pub(crate) fn deactivate_stage(
    app: &mut AppInstance,
    suspend: &SuspendController,
    scheduler: &mut dyn Scheduler,
) {
    suspend.suspend_media(app);
    app.unfocus();
    app.flags.activated = false;
    suspend.request_suspend_all(app, scheduler);
    app.flags.hidden_window = true;
}

/// Deactivate and hide the surface outright.
pub(crate) fn force_hide(
    app: &mut AppInstance,
    suspend: &SuspendController,
    scheduler: &mut dyn Scheduler,
) {
    deactivate_stage(app, suspend, scheduler);
    app.hide_window();
}

fn finalize(entry: ClosingEntry, scheduler: &mut dyn Scheduler) {
    if let Some(token) = entry.timer {
        scheduler.cancel(token);
    }
    info!(
        app_id = %entry.app.app_id(),
        instance_id = %entry.app.instance_id(),
        "instance destroyed"
    );
    drop(entry);
}
