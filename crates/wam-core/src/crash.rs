//! Crash-loop detection.
//!
//! Each crash of a foreground app's render process bumps a per-app counter.
//! Below the reload limit the default page is reloaded in place; at the limit
//! the app is force-closed. Counts are not cleared by successful loads, only
//! when an app closes, as selected by [`CrashResetPolicy`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Consecutive foreground crashes tolerated by non-normal windows.
pub const CONTINUOUS_RELOAD_LIMIT: u32 = 3;

/// Crash count at which the app is closed instead of reloaded.
#[must_use]
pub const fn reload_limit(is_normal: bool) -> u32 {
    if is_normal {
        CONTINUOUS_RELOAD_LIMIT - 1
    } else {
        CONTINUOUS_RELOAD_LIMIT
    }
}

/// Which counters a close clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashResetPolicy {
    /// Any close clears every app's counter.
    #[default]
    GlobalOnClose,
    /// A close clears only the closing app's counter.
    PerApp,
}

/// What the caller does about a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    /// Background crash; mark the instance and recover when it is next shown.
    Deferred,
    /// Reload the default URL, keeping the instance.
    Reload,
    /// Crash loop: close without cleanup ceremony.
    Close,
}

#[derive(Debug, Default)]
pub struct CrashTracker {
    counts: HashMap<String, u32>,
    policy: CrashResetPolicy,
}

impl CrashTracker {
    #[must_use]
    pub fn new(policy: CrashResetPolicy) -> Self {
        Self {
            counts: HashMap::new(),
            policy,
        }
    }

    pub fn on_crash(&mut self, app_id: &str, is_foreground: bool, is_normal: bool) -> CrashDecision {
        if !is_foreground {
            info!(app_id, "render process crashed in background; recover on next show");
            return CrashDecision::Deferred;
        }

        let count = self.counts.entry(app_id.to_string()).or_insert(0);
        *count += 1;
        let limit = reload_limit(is_normal);

        if *count >= limit {
            info!(app_id, crashes = *count, limit, "crash loop; closing app");
            CrashDecision::Close
        } else {
            info!(app_id, crashes = *count, limit, "render process crashed; reloading default page");
            CrashDecision::Reload
        }
    }

    /// Called whenever an app enters its close sequence.
    pub fn on_close(&mut self, app_id: &str) {
        match self.policy {
            CrashResetPolicy::GlobalOnClose => self.counts.clear(),
            CrashResetPolicy::PerApp => {
                self.counts.remove(app_id);
            }
        }
    }

    #[must_use]
    pub fn count(&self, app_id: &str) -> u32 {
        self.counts.get(app_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub const fn policy(&self) -> CrashResetPolicy {
        self.policy
    }
}
