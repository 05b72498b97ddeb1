pub mod aggregate;
pub mod cache;
pub mod color_mode;
mod dispatch;
pub mod redistribute;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::GroupConfig;
use crate::device::{CommandSink, DeviceDirectory};
use crate::group::aggregate::GroupState;
use crate::group::cache::BrightnessCache;
use crate::model::light::MemberState;

/// Time given to members to settle before their states are re-read.
const REFRESH_SETTLE: Duration = Duration::from_secs(1);

/// Hold-down after an event-driven refresh, so a burst of member events
/// collapses into one refresh.
const EVENT_HOLD: Duration = Duration::from_millis(200);

/// One virtual light over a fixed set of member entities.
///
/// The controller owns the aggregate state, the brightness cache and the
/// currently running adjustment, and serializes refreshes through a
/// single guard.
pub struct GroupController {
    id: String,
    name: String,
    members: Vec<String>,
    directory: Arc<dyn DeviceDirectory>,
    sink: Arc<dyn CommandSink>,
    state: Mutex<GroupState>,
    cache: BrightnessCache,
    refresh_guard: Mutex<()>,
    adjust_task: Mutex<Option<JoinHandle<()>>>,
}

impl GroupController {
    #[must_use]
    pub fn new(
        id: &str,
        config: &GroupConfig,
        cache_delay: Duration,
        directory: Arc<dyn DeviceDirectory>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: config.display_name(id),
            members: config.entities.clone(),
            directory,
            sink,
            state: Mutex::new(GroupState::default()),
            cache: BrightnessCache::new(id, cache_delay),
            refresh_guard: Mutex::new(()),
            adjust_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub async fn state(&self) -> GroupState {
        self.state.lock().await.clone()
    }

    /// Spawn the member-event listener. Performs one initial refresh, then
    /// refreshes whenever a member of this group changes.
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.directory.subscribe();

        tokio::spawn(async move {
            self.refresh().await;

            loop {
                match events.recv().await {
                    Ok(event) if self.is_member(&event.member_id) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.handle_member_event(&event.member_id).await;
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        log::debug!("[{}] Member event stream lagged by {count}", self.id);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Refresh the aggregate in the background, once in-flight commands
    /// have been delivered.
    fn spawn_refresh(self: Arc<Self>) {
        tokio::spawn(async move {
            self.refresh().await;
        });
    }

    /// Re-read every member and rebuild the aggregate state.
    pub async fn refresh(&self) {
        let _guard = self.refresh_guard.lock().await;
        self.refresh_members().await;
    }

    fn is_member(&self, member_id: &str) -> bool {
        self.members.iter().any(|member| member == member_id)
    }

    /// A member changed. Refresh unless a refresh is already running; an
    /// in-flight refresh will pick up the change anyway, since it re-reads
    /// every member after the settle delay.
    async fn handle_member_event(&self, member_id: &str) {
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            log::debug!(
                "[{}] Refresh in progress, dropping event from {member_id}",
                self.id
            );
            return;
        };

        log::debug!("[{}] Member {member_id} changed, refreshing", self.id);
        self.refresh_members().await;

        // keep the guard through the hold-down
        tokio::time::sleep(EVENT_HOLD).await;
    }

    async fn refresh_members(&self) {
        tokio::time::sleep(REFRESH_SETTLE).await;

        let mut states = Vec::with_capacity(self.members.len());
        for (member_id, state) in self.member_states().await {
            match state {
                Some(state) => states.push(state),
                None => log::debug!("[{}] Member {member_id} has no state yet", self.id),
            }
        }

        let group_state = aggregate::aggregate(&states);
        log::trace!(
            "[{}] Aggregate: on={} brightness={}",
            self.id,
            group_state.is_on,
            group_state.brightness
        );
        *self.state.lock().await = group_state;
    }

    /// Fetch the live state of every member. Read failures degrade to
    /// missing members, so one unreachable lamp cannot wedge the group.
    async fn member_states(&self) -> Vec<(String, Option<MemberState>)> {
        let mut result = Vec::with_capacity(self.members.len());
        for member_id in &self.members {
            let state = match self.directory.get_state(member_id).await {
                Ok(state) => state,
                Err(err) => {
                    log::warn!("[{}] Failed to read member {member_id}: {err}", self.id);
                    None
                }
            };
            result.push((member_id.clone(), state));
        }
        result
    }
}
