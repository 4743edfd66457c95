//! Instance creation and relaunch.
//!
//! [`LaunchCoordinator`] owns the pieces a launch needs beyond the registry:
//! the id generator, the per-app version record and the engine factory.
//! Creating an instance either yields a complete [`AppInstance`] or an error
//! with nothing allocated besides the burned id.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::descriptor::{AppDescriptor, DeepLinkHandler, LaunchParams, is_file_url};
use crate::engine::{EngineFactory, SurfaceSpec};
use crate::error::LaunchError;
use crate::instance::{AppInstance, InstanceIdGenerator};
use crate::suspend::SuspendController;
use crate::timer::Scheduler;

/// Last descriptor version seen per app id.
#[derive(Debug, Default, Clone)]
pub struct AppVersionRecord {
    versions: HashMap<String, String>,
}

impl AppVersionRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `version` for `app_id`. True when a different version was
    /// already on record.
    pub fn record(&mut self, app_id: &str, version: &str) -> bool {
        match self.versions.get_mut(app_id) {
            Some(known) if known == version => false,
            Some(known) => {
                info!(app_id, from = %known, to = version, "app version changed");
                *known = version.to_string();
                true
            }
            None => {
                self.versions.insert(app_id.to_string(), version.to_string());
                false
            }
        }
    }

    #[must_use]
    pub fn get(&self, app_id: &str) -> Option<&str> {
        self.versions.get(app_id).map(String::as_str)
    }
}

pub struct LaunchCoordinator {
    ids: InstanceIdGenerator,
    versions: AppVersionRecord,
    factory: Box<dyn EngineFactory>,
}

impl std::fmt::Debug for LaunchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchCoordinator")
            .field("next_id", &self.ids.peek())
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl LaunchCoordinator {
    #[must_use]
    pub fn new(id_base: u64, factory: Box<dyn EngineFactory>) -> Self {
        Self {
            ids: InstanceIdGenerator::new(id_base),
            versions: AppVersionRecord::new(),
            factory,
        }
    }

    #[must_use]
    pub const fn versions(&self) -> &AppVersionRecord {
        &self.versions
    }

    /// Build a new instance. The caller registers it and then calls
    /// [`initial_load`](Self::initial_load).
    pub fn create_instance(
        &mut self,
        descriptor: AppDescriptor,
        params: LaunchParams,
        launching_app_id: &str,
    ) -> Result<AppInstance, LaunchError> {
        let Some(kind) = self.factory.engine_kind(&descriptor.app_type) else {
            return Err(LaunchError::UnsupportedType(descriptor.app_type.clone()));
        };

        let Some(id) = self.ids.next_id() else {
            return Err(LaunchError::IdsExhausted);
        };
        let page = self
            .factory
            .create_page(kind, &descriptor, &params)
            .map_err(|err| LaunchError::EngineCreateFailed {
                app_id: descriptor.id.clone(),
                reason: err.to_string(),
            })?;

        let surface = self
            .factory
            .create_surface(&SurfaceSpec::for_descriptor(&descriptor));
        if surface.is_none() {
            warn!(app_id = %descriptor.id, instance_id = %id, "no surface; running headless");
        }

        let mut app = AppInstance::new(id, descriptor, params, launching_app_id, page, surface);
        self.check_version(&mut app);
        info!(
            app_id = %app.app_id(),
            instance_id = %id,
            engine = %app.engine_kind(),
            window_type = %app.window_type(),
            pid = app.pid(),
            "instance created"
        );
        Ok(app)
    }

    /// Mark `app` for reload if its descriptor version differs from the
    /// recorded one.
    pub fn check_version(&mut self, app: &mut AppInstance) {
        let changed = self
            .versions
            .record(&app.descriptor.id, &app.descriptor.version);
        if changed {
            app.flags.needs_reload = true;
        }
    }

    /// First navigation: expose the launch params, then load the deep-link
    /// target or the default page.
    pub fn initial_load(&self, app: &mut AppInstance) {
        app.setup_launch_event();
        let target = match (app.launch_params.content_target(), app.launch_params.handled_by()) {
            (Some(target), DeepLinkHandler::Platform) => Some(target.to_string()),
            _ => None,
        };
        match target {
            Some(url) => {
                info!(app_id = %app.app_id(), url = %url, "deep link handled by platform");
                app.load_url(&url);
            }
            None => app.load_default_url(),
        }
    }

    /// Relaunch a running instance. False when the page has not been shown
    /// yet; the instance's params are left untouched in that case.
    pub fn relaunch(
        &self,
        app: &mut AppInstance,
        params: LaunchParams,
        launching_app_id: &str,
        suspend: &SuspendController,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        suspend.resume_painting_and_script(app, scheduler);

        if app.flags.crashed {
            info!(app_id = %app.app_id(), "relaunching crashed instance; reloading default page");
            app.load_default_url();
            app.flags.crashed = false;
        }

        if is_hosted_deep_link(app, &params) {
            let handler = params.handled_by();
            let target = params.content_target().map(str::to_string);
            app.launch_params = params.clone();
            app.launching_app_id = launching_app_id.to_string();
            match (handler, target) {
                (DeepLinkHandler::Platform, Some(url)) => {
                    info!(app_id = %app.app_id(), url = %url, "deep link handled by platform");
                    app.load_url(&url);
                    return true;
                }
                (DeepLinkHandler::App, _) => {}
                _ => {
                    info!(app_id = %app.app_id(), "deep link; reloading default page");
                    app.load_default_url();
                    return true;
                }
            }
        }

        if !app.flags.has_been_shown {
            warn!(
                app_id = %app.app_id(),
                instance_id = %app.instance_id(),
                "relaunch before first visual commit; ignored"
            );
            return false;
        }

        app.launch_params = params;
        app.launching_app_id = launching_app_id.to_string();
        app.send_relaunch_event();
        info!(app_id = %app.app_id(), instance_id = %app.instance_id(), "relaunch event sent");
        true
    }
}

fn is_hosted_deep_link(app: &AppInstance, params: &LaunchParams) -> bool {
    !is_file_url(app.current_url())
        && is_file_url(app.default_url())
        && params.content_target().is_some()
        && app.descriptor.handles_deeplinking
}
