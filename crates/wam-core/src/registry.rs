//! The set of running app instances.
//!
//! Instances are keyed by [`InstanceId`]. Ids are allocated monotonically, so
//! ascending id order is insertion order, which is the order `find_by_app_id`
//! and the snapshots report.

use std::collections::BTreeMap;

use crate::error::LaunchError;
use crate::instance::{AppInstance, ApplicationInfo, InstanceId};

#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: BTreeMap<InstanceId, AppInstance>,
}

impl AppRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance. The id must be fresh.
    pub fn insert(&mut self, app: AppInstance) -> Result<(), LaunchError> {
        let id = app.instance_id();
        if self.apps.contains_key(&id) {
            return Err(LaunchError::DuplicateInstance(id));
        }
        self.apps.insert(id, app);
        Ok(())
    }

    /// Remove and hand back ownership; `None` if absent.
    pub fn remove(&mut self, id: InstanceId) -> Option<AppInstance> {
        self.apps.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&AppInstance> {
        self.apps.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut AppInstance> {
        self.apps.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.apps.contains_key(&id)
    }

    /// Oldest running instance of `app_id`.
    #[must_use]
    pub fn find_by_app_id(&self, app_id: &str) -> Option<&AppInstance> {
        self.apps.values().find(|app| app.app_id() == app_id)
    }

    pub fn find_by_app_id_mut(&mut self, app_id: &str) -> Option<&mut AppInstance> {
        self.apps.values_mut().find(|app| app.app_id() == app_id)
    }

    /// Snapshot of every instance id.
    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        self.apps.keys().copied().collect()
    }

    /// Snapshot of every running instance.
    #[must_use]
    pub fn all_running(&self) -> Vec<ApplicationInfo> {
        self.apps.values().map(AppInstance::info).collect()
    }

    /// Instances whose page lives in render process `pid`.
    #[must_use]
    pub fn running_for_process(&self, pid: u32) -> Vec<InstanceId> {
        self.apps
            .values()
            .filter(|app| app.pid() == pid)
            .map(AppInstance::instance_id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppInstance> {
        self.apps.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
