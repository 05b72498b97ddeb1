use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::group::GroupController;

#[derive(Clone)]
pub struct AppState {
    conf: Arc<AppConfig>,
    groups: Arc<BTreeMap<String, Arc<GroupController>>>,
}

impl AppState {
    #[must_use]
    pub fn new(conf: Arc<AppConfig>, groups: BTreeMap<String, Arc<GroupController>>) -> Self {
        Self {
            conf,
            groups: Arc::new(groups),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        self.conf.clone()
    }

    #[must_use]
    pub fn groups(&self) -> &BTreeMap<String, Arc<GroupController>> {
        &self.groups
    }

    pub fn group(&self, id: &str) -> ApiResult<Arc<GroupController>> {
        self.groups
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::group_not_found(id))
    }
}
