//! Tokio control loop.
//!
//! ```text
//!   LifecycleHandle ──Command──┐
//!   (clonable, any task)       ▼
//!                       ┌─────────────┐      ┌────────────────┐
//!                       │ control loop│◄─────│ TokioScheduler │
//!                       │ (one task,  │Timer │ sleep tasks    │
//!                       │  owns the   │Fired └────────────────┘
//!                       │  manager)   │
//!                       └─────────────┘
//! ```
//!
//! One task owns the [`LifecycleManager`] and processes commands and timer
//! expiries one at a time. Requests that return a value carry a `oneshot`
//! reply; engine and compositor signals are fire-and-forget. A command
//! submitted while another is being processed (for example by a page script
//! reacting to a broadcast) is handled after it.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::WamConfig;
use crate::engine::{EngineFactory, MemoryPressureLevel, PageSignal, ShellSignal};
use crate::error::{Error, LaunchError, Result};
use crate::instance::{ApplicationInfo, InstanceId};
use crate::manager::{KillTarget, LaunchOutcome, LifecycleManager, RunningAppsListener};
use crate::timer::{TimerFired, TokioScheduler};

/// Requests accepted by the control loop.
#[derive(Debug)]
pub enum Command {
    Launch {
        descriptor: String,
        params: String,
        launching_app_id: String,
        reply: Option<oneshot::Sender<std::result::Result<LaunchOutcome, LaunchError>>>,
    },
    Kill {
        target: KillTarget,
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    Pause {
        instance_id: InstanceId,
        reply: oneshot::Sender<bool>,
    },
    CloseAll {
        pid: Option<u32>,
        reply: oneshot::Sender<bool>,
    },
    List {
        include_system_apps: bool,
        reply: oneshot::Sender<Vec<ApplicationInfo>>,
    },
    NotifyCrash {
        app_id: String,
        instance_id: Option<InstanceId>,
    },
    Broadcast {
        kind: String,
        payload: String,
        reply: Option<oneshot::Sender<bool>>,
    },
    SendEventToAllApps(String),
    SetDeviceInfo {
        name: String,
        value: String,
    },
    SetSystemLanguage(String),
    SetAccessibilityEnabled(bool),
    MemoryPressure(MemoryPressureLevel),
    SetForceClose(String),
    Page {
        instance_id: InstanceId,
        signal: PageSignal,
    },
    Shell {
        instance_id: InstanceId,
        signal: ShellSignal,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "launch",
            Self::Kill { .. } => "kill",
            Self::Pause { .. } => "pause",
            Self::CloseAll { .. } => "close_all",
            Self::List { .. } => "list",
            Self::NotifyCrash { .. } => "notify_crash",
            Self::Broadcast { .. } => "broadcast",
            Self::SendEventToAllApps(_) => "send_event_to_all_apps",
            Self::SetDeviceInfo { .. } => "set_device_info",
            Self::SetSystemLanguage(_) => "set_system_language",
            Self::SetAccessibilityEnabled(_) => "set_accessibility_enabled",
            Self::MemoryPressure(_) => "memory_pressure",
            Self::SetForceClose(_) => "set_force_close",
            Self::Page { .. } => "page_signal",
            Self::Shell { .. } => "shell_signal",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Clonable front door to a running control loop.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<Command>,
}

fn stopped() -> Error {
    Error::Runtime("lifecycle service stopped".to_string())
}

impl LifecycleHandle {
    /// Queue a command without waiting.
    pub fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| stopped())
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.submit(build(reply))?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn launch(
        &self,
        descriptor: &str,
        params: &str,
        launching_app_id: &str,
    ) -> Result<LaunchOutcome> {
        let outcome = self
            .request(|reply| Command::Launch {
                descriptor: descriptor.to_string(),
                params: params.to_string(),
                launching_app_id: launching_app_id.to_string(),
                reply: Some(reply),
            })
            .await?;
        Ok(outcome?)
    }

    /// Queue a launch whose outcome nobody waits for.
    pub fn submit_launch(&self, descriptor: &str, params: &str, launching_app_id: &str) -> Result<()> {
        self.submit(Command::Launch {
            descriptor: descriptor.to_string(),
            params: params.to_string(),
            launching_app_id: launching_app_id.to_string(),
            reply: None,
        })
    }

    pub async fn kill(&self, target: KillTarget, force: bool) -> Result<bool> {
        self.request(|reply| Command::Kill {
            target,
            force,
            reply,
        })
        .await
    }

    pub async fn pause(&self, instance_id: InstanceId) -> Result<bool> {
        self.request(|reply| Command::Pause { instance_id, reply })
            .await
    }

    pub async fn close_all(&self, pid: Option<u32>) -> Result<bool> {
        self.request(|reply| Command::CloseAll { pid, reply }).await
    }

    pub async fn list(&self, include_system_apps: bool) -> Result<Vec<ApplicationInfo>> {
        self.request(|reply| Command::List {
            include_system_apps,
            reply,
        })
        .await
    }

    pub async fn broadcast_message(&self, kind: &str, payload: &str) -> Result<bool> {
        self.request(|reply| Command::Broadcast {
            kind: kind.to_string(),
            payload: payload.to_string(),
            reply: Some(reply),
        })
        .await
    }

    pub fn notify_crash(&self, app_id: &str, instance_id: Option<InstanceId>) -> Result<()> {
        self.submit(Command::NotifyCrash {
            app_id: app_id.to_string(),
            instance_id,
        })
    }

    pub fn send_event_to_all_apps(&self, script: &str) -> Result<()> {
        self.submit(Command::SendEventToAllApps(script.to_string()))
    }

    pub fn set_device_info(&self, name: &str, value: &str) -> Result<()> {
        self.submit(Command::SetDeviceInfo {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    pub fn set_system_language(&self, language: &str) -> Result<()> {
        self.submit(Command::SetSystemLanguage(language.to_string()))
    }

    pub fn set_accessibility_enabled(&self, enabled: bool) -> Result<()> {
        self.submit(Command::SetAccessibilityEnabled(enabled))
    }

    pub fn notify_memory_pressure(&self, level: MemoryPressureLevel) -> Result<()> {
        self.submit(Command::MemoryPressure(level))
    }

    pub fn set_force_close(&self, app_id: &str) -> Result<()> {
        self.submit(Command::SetForceClose(app_id.to_string()))
    }

    /// Deliver an engine callback.
    pub fn page_signal(&self, instance_id: InstanceId, signal: PageSignal) -> Result<()> {
        self.submit(Command::Page {
            instance_id,
            signal,
        })
    }

    /// Deliver a compositor callback.
    pub fn shell_signal(&self, instance_id: InstanceId, signal: ShellSignal) -> Result<()> {
        self.submit(Command::Shell {
            instance_id,
            signal,
        })
    }

    /// Stop the loop after the commands already queued.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

// =============================================================================
// Control loop
// =============================================================================

/// Start the control loop on the current tokio runtime.
pub fn spawn(
    config: WamConfig,
    factory: Box<dyn EngineFactory>,
    listener: Option<Box<dyn RunningAppsListener>>,
) -> (LifecycleHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let mut manager =
        LifecycleManager::new(config, factory, Box::new(TokioScheduler::new(timer_tx)));
    if let Some(listener) = listener {
        manager.set_running_apps_listener(listener);
    }

    let task = tokio::spawn(run(manager, command_rx, timer_rx));
    (LifecycleHandle { tx: command_tx }, task)
}

async fn run(
    mut manager: LifecycleManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut timers: mpsc::UnboundedReceiver<TimerFired>,
) {
    info!(
        instance_policy = %manager.config().instance_policy,
        suspend_delay_ms = manager.config().suspend_delay().as_millis() as u64,
        "lifecycle service started"
    );

    loop {
        tokio::select! {
            biased;

            Some(fired) = timers.recv() => {
                debug!(instance_id = %fired.instance_id, kind = %fired.kind, "timer fired");
                manager.on_timer_fired(fired);
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("all handles dropped");
                    break;
                };
                if let Some(reply) = dispatch(&mut manager, command) {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    info!(running = manager.registry().len(), "lifecycle service stopped");
}

/// Apply one command. Returns the shutdown reply when the loop should stop.
fn dispatch(manager: &mut LifecycleManager, command: Command) -> Option<oneshot::Sender<()>> {
    debug!(command = command.name(), "command");
    match command {
        Command::Launch {
            descriptor,
            params,
            launching_app_id,
            reply,
        } => {
            let outcome = manager.launch(&descriptor, &params, &launching_app_id);
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        }
        Command::Kill {
            target,
            force,
            reply,
        } => {
            let _ = reply.send(manager.kill(&target, force));
        }
        Command::Pause { instance_id, reply } => {
            let _ = reply.send(manager.pause(instance_id));
        }
        Command::CloseAll { pid, reply } => {
            let _ = reply.send(manager.close_all(pid));
        }
        Command::List {
            include_system_apps,
            reply,
        } => {
            let _ = reply.send(manager.list(include_system_apps));
        }
        Command::NotifyCrash {
            app_id,
            instance_id,
        } => manager.notify_crash(&app_id, instance_id),
        Command::Broadcast {
            kind,
            payload,
            reply,
        } => {
            let delivered = manager.broadcast_message(&kind, &payload);
            if let Some(reply) = reply {
                let _ = reply.send(delivered);
            }
        }
        Command::SendEventToAllApps(script) => manager.send_event_to_all_apps(&script),
        Command::SetDeviceInfo { name, value } => {
            manager.set_device_info(&name, &value);
        }
        Command::SetSystemLanguage(language) => {
            manager.set_system_language(&language);
        }
        Command::SetAccessibilityEnabled(enabled) => manager.set_accessibility_enabled(enabled),
        Command::MemoryPressure(level) => manager.notify_memory_pressure(level),
        Command::SetForceClose(app_id) => {
            manager.set_force_close(&app_id);
        }
        Command::Page {
            instance_id,
            signal,
        } => manager.handle_page_signal(instance_id, signal),
        Command::Shell {
            instance_id,
            signal,
        } => manager.handle_shell_signal(instance_id, signal),
        Command::Shutdown { reply } => return Some(reply),
    }
    None
}
