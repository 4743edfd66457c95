//! wam-core: lifecycle core for a multi-app web runtime host
//!
//! A host runs many web apps, each in its own browser page and (usually) its
//! own compositor surface. This crate owns the lifecycle of those instances:
//! launching and relaunching them, suspending and resuming them as they leave
//! and return to the foreground, recovering from render-process crashes, and
//! tearing them down through the close-callback/unload protocol.
//!
//! # Architecture
//!
//! ```text
//! launch / kill / pause / broadcast        PageSignal / ShellSignal
//!              │                                    │
//!              ▼                                    ▼
//!       LifecycleHandle ──Command──► control loop (service) ◄── TimerFired
//!                                          │
//!                                   LifecycleManager
//!              ┌──────────────┬────────────┼─────────────┬──────────────┐
//!              ▼              ▼            ▼             ▼              ▼
//!        LaunchCoordinator AppRegistry SuspendController CloseSequencer CrashTracker
//!              │                                         │
//!              ▼                                         ▼
//!        EngineFactory ──► PageEngine + ShellSurface   ClosingSet
//! ```
//!
//! # Modules
//!
//! - `error`: error types and `Result` alias
//! - `logging`: tracing subscriber setup
//! - `config`: TOML + environment configuration
//! - `descriptor`: app descriptors and launch parameters
//! - `engine`: page engine / shell surface capability traits and signals
//! - `timer`: cancellable single-shot timers (tokio and fake clock)
//! - `instance`: one running app instance and its lifecycle flags
//! - `registry`: running instances keyed by instance id
//! - `crash`: crash-loop detection
//! - `suspend`: suspend/resume of rendering, media and scripts
//! - `close`: close sequencing and the closing set
//! - `launch`: instance creation, version checks and relaunch
//! - `device_info`: device properties and broadcast messages
//! - `manager`: the lifecycle manager tying the above together
//! - `service`: tokio control loop and its handle
//! - `testing`: recording fakes for engines, surfaces and factories (feature
//!   `testing`)
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod close;
pub mod config;
pub mod crash;
pub mod descriptor;
pub mod device_info;
pub mod engine;
pub mod error;
pub mod instance;
pub mod launch;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod service;
pub mod suspend;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timer;

pub use config::WamConfig;
pub use descriptor::{AppDescriptor, LaunchParams, WindowType};
pub use engine::{EngineFactory, PageEngine, PageSignal, ShellSignal, ShellSurface};
pub use error::{ConfigError, EngineError, Error, LaunchError, Result};
pub use instance::{AppInstance, ApplicationInfo, InstanceId};
pub use manager::{KillTarget, LaunchOutcome, LifecycleManager, RunningAppsListener};
pub use service::{LifecycleHandle, spawn};
