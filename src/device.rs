use async_trait::async_trait;
use tokio::sync::broadcast::Receiver;

use crate::error::ApiResult;
use crate::model::light::{CommandAttributes, MemberState, PowerCommand};

/// Change notification for a single member device.
///
/// Carries only the id; consumers re-read live state from the directory,
/// so stale or sparse event payloads cannot leak into the aggregate.
#[derive(Clone, Debug)]
pub struct MemberEvent {
    pub member_id: String,
}

/// Read access to member device state.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Current state of a member, or `None` when the directory has no
    /// entry for it.
    async fn get_state(&self, member_id: &str) -> ApiResult<Option<MemberState>>;

    /// Subscribe to member change notifications.
    fn subscribe(&self) -> Receiver<MemberEvent>;
}

/// Command delivery to member devices.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(
        &self,
        member_id: &str,
        power: PowerCommand,
        attributes: CommandAttributes,
    ) -> ApiResult<()>;
}
