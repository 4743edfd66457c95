//! Single-shot, cancellable lifecycle timers.
//!
//! The lifecycle manager arms two kinds of per-instance timers: the deferred
//! DOM-suspend timer and the close-callback timeout. A [`Scheduler`] arms them
//! and later reports a [`TimerFired`] back to the control thread; the manager
//! compares the token against the one it armed, so a firing that raced with a
//! cancel is ignored.
//!
//! - [`TokioScheduler`]: spawned `tokio::time::sleep` tasks posting into an
//!   mpsc channel.
//! - [`ManualClock`]: a fake clock advanced by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::instance::InstanceId;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    DomSuspend,
    CloseCallback,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DomSuspend => write!(f, "dom_suspend"),
            Self::CloseCallback => write!(f, "close_callback"),
        }
    }
}

/// Generation token identifying one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A timer expiry posted back to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub instance_id: InstanceId,
    pub kind: TimerKind,
    pub token: TimerToken,
}

/// Arms and cancels single-shot timers.
pub trait Scheduler: Send {
    fn schedule(&mut self, instance_id: InstanceId, kind: TimerKind, delay: Duration)
    -> TimerToken;

    /// Cancelling an unknown or already-fired token is a no-op.
    fn cancel(&mut self, token: TimerToken);
}

// =============================================================================
// Tokio scheduler
// =============================================================================

/// Production scheduler: one sleeping task per armed timer.
///
/// Must be used from within a tokio runtime.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_token: u64,
    tasks: HashMap<TimerToken, JoinHandle<()>>,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tx,
            next_token: 1,
            tasks: HashMap::new(),
        }
    }

    /// Timers armed and not yet finished or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &mut self,
        instance_id: InstanceId,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerToken {
        self.tasks.retain(|_, task| !task.is_finished());

        let token = TimerToken(self.next_token);
        self.next_token += 1;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired {
                instance_id,
                kind,
                token,
            });
        });
        self.tasks.insert(token, task);
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(task) = self.tasks.remove(&token) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

// =============================================================================
// Manual clock
// =============================================================================

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    next_token: u64,
    armed: Vec<(Duration, TimerFired)>,
}

/// Deterministic fake clock.
///
/// Clones share state, so a test keeps one handle while the manager owns
/// another as its scheduler.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ClockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.with_state(|s| s.now)
    }

    /// Number of armed, uncancelled timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.with_state(|s| s.armed.len())
    }

    /// Pending timers of one kind.
    #[must_use]
    pub fn pending_of(&self, kind: TimerKind) -> usize {
        self.with_state(|s| s.armed.iter().filter(|(_, t)| t.kind == kind).count())
    }

    /// Move time forward and return every timer that expired, in deadline
    /// order.
    pub fn advance(&self, by: Duration) -> Vec<TimerFired> {
        self.with_state(|s| {
            s.now += by;
            let now = s.now;
            let (mut due, keep): (Vec<_>, Vec<_>) =
                s.armed.drain(..).partition(|(deadline, _)| *deadline <= now);
            s.armed = keep;
            due.sort_by_key(|(deadline, fired)| (*deadline, fired.token));
            due.into_iter().map(|(_, fired)| fired).collect()
        })
    }
}

impl Scheduler for ManualClock {
    fn schedule(
        &mut self,
        instance_id: InstanceId,
        kind: TimerKind,
        delay: Duration,
    ) -> TimerToken {
        self.with_state(|s| {
            s.next_token += 1;
            let token = TimerToken(s.next_token);
            let deadline = s.now + delay;
            s.armed.push((
                deadline,
                TimerFired {
                    instance_id,
                    kind,
                    token,
                },
            ));
            token
        })
    }

    fn cancel(&mut self, token: TimerToken) {
        self.with_state(|s| s.armed.retain(|(_, fired)| fired.token != token));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> InstanceId {
        InstanceId::new(n)
    }

    // =========================================================================
    // ManualClock
    // =========================================================================

    #[test]
    fn manual_clock_fires_at_deadline() {
        let mut clock = ManualClock::new();
        let token = clock.schedule(id(1000), TimerKind::DomSuspend, Duration::from_millis(50));

        assert!(clock.advance(Duration::from_millis(49)).is_empty());
        let fired = clock.advance(Duration::from_millis(1));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].token, token);
        assert_eq!(fired[0].kind, TimerKind::DomSuspend);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn manual_clock_cancel() {
        let mut clock = ManualClock::new();
        let token = clock.schedule(id(1000), TimerKind::CloseCallback, Duration::from_secs(10));
        clock.cancel(token);
        assert!(clock.advance(Duration::from_secs(60)).is_empty());
        clock.cancel(token);
    }

    #[test]
    fn manual_clock_orders_by_deadline() {
        let mut clock = ManualClock::new();
        let late = clock.schedule(id(1), TimerKind::CloseCallback, Duration::from_millis(30));
        let early = clock.schedule(id(2), TimerKind::DomSuspend, Duration::from_millis(10));
        let fired = clock.advance(Duration::from_millis(100));
        let tokens: Vec<_> = fired.iter().map(|f| f.token).collect();
        assert_eq!(tokens, vec![early, late]);
    }

    #[test]
    fn manual_clock_clones_share_state() {
        let clock = ManualClock::new();
        let mut handle = clock.clone();
        handle.schedule(id(1), TimerKind::DomSuspend, Duration::from_millis(5));
        assert_eq!(clock.pending_of(TimerKind::DomSuspend), 1);
        assert_eq!(clock.advance(Duration::from_millis(5)).len(), 1);
        assert_eq!(handle.now(), Duration::from_millis(5));
    }

    #[test]
    fn tokens_are_unique() {
        let mut clock = ManualClock::new();
        let a = clock.schedule(id(1), TimerKind::DomSuspend, Duration::ZERO);
        let b = clock.schedule(id(1), TimerKind::DomSuspend, Duration::ZERO);
        assert_ne!(a, b);
    }

    // =========================================================================
    // TokioScheduler
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_posts_on_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);
        let token = scheduler.schedule(id(1000), TimerKind::DomSuspend, Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.token, token);
        assert_eq!(fired.instance_id, id(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_cancel_suppresses_post() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(tx);
        let token =
            scheduler.schedule(id(1000), TimerKind::CloseCallback, Duration::from_millis(100));
        scheduler.cancel(token);
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
