mod client;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::{Receiver, Sender, channel};
use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::config::HassConfig;
use crate::device::{CommandSink, DeviceDirectory, MemberEvent};
use crate::error::ApiResult;
use crate::model::light::{CommandAttributes, MemberState, PowerCommand};

use self::client::{HassClient, HassWs, parse_member_state};

/// Fan-out capacity for member change notifications.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Probe interval for reopening a lost websocket.
const WS_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Shared read/command handle for group controllers, backed by the rest
/// api of one Home Assistant instance.
#[derive(Clone)]
pub struct HassDirectory {
    client: Arc<HassClient>,
    events: Sender<MemberEvent>,
}

#[async_trait]
impl DeviceDirectory for HassDirectory {
    async fn get_state(&self, member_id: &str) -> ApiResult<Option<MemberState>> {
        let Some(state) = self.client.get_state(member_id).await? else {
            return Ok(None);
        };
        log::trace!("Fetched {}: {}", state.entity_id, state.state);
        Ok(Some(parse_member_state(&state)))
    }

    fn subscribe(&self) -> Receiver<MemberEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl CommandSink for HassDirectory {
    async fn send(
        &self,
        member_id: &str,
        power: PowerCommand,
        attributes: CommandAttributes,
    ) -> ApiResult<()> {
        let data = match power {
            PowerCommand::On => service_data(&attributes),
            PowerCommand::Off => Map::new(),
        };
        self.client
            .call_service("light", power.service(), member_id, data)
            .await
    }
}

/// Owns the websocket lifecycle and fans entity change notifications out
/// to the group controllers.
pub struct HassBackend {
    name: String,
    client: Arc<HassClient>,
    events: Sender<MemberEvent>,
    ws: Option<HassWs>,
}

impl HassBackend {
    pub fn new(name: &str, config: &HassConfig) -> ApiResult<Self> {
        let mut client = HassClient::new(name, config)?;
        client.load_token_from_env(config)?;
        let (events, _) = channel(EVENT_CHANNEL_SIZE);

        Ok(Self {
            name: name.to_string(),
            client: Arc::new(client),
            events,
            ws: None,
        })
    }

    /// Directory handle sharing this backend's client and event stream.
    #[must_use]
    pub fn directory(&self) -> HassDirectory {
        HassDirectory {
            client: Arc::clone(&self.client),
            events: self.events.clone(),
        }
    }

    async fn ensure_ws_connected(&mut self) {
        if self.ws.is_some() {
            return;
        }

        match self.client.subscribe_state_changed().await {
            Ok(ws) => {
                log::info!("[{}] Realtime state sync connected", self.name);
                self.ws = Some(ws);
            }
            Err(err) => {
                log::debug!("[{}] WS connect failed: {}", self.name, err);
            }
        }
    }

    fn forward_event(&self, entity_id: String) {
        log::trace!("[{}] state_changed: {entity_id}", self.name);
        // No receivers is fine; controllers re-read state on their own.
        let _ = self.events.send(MemberEvent {
            member_id: entity_id,
        });
    }

    /// Keep the websocket alive and forward entity changes until the
    /// task is aborted.
    pub async fn run(mut self) {
        self.ensure_ws_connected().await;

        let mut ws_tick = interval(WS_RETRY_INTERVAL);
        ws_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if let Some(ws) = &mut self.ws {
                tokio::select! {
                    _ = ws_tick.tick() => {
                        self.ensure_ws_connected().await;
                    }
                    ev = ws.next_state_changed() => {
                        match ev {
                            Ok(Some(entity_id)) => self.forward_event(entity_id),
                            Ok(None) => {
                                // websocket closed, reconnect later
                                self.ws = None;
                            }
                            Err(err) => {
                                log::debug!("[{}] WS error: {}", self.name, err);
                                self.ws = None;
                            }
                        }
                    }
                }
            } else {
                ws_tick.tick().await;
                self.ensure_ws_connected().await;
            }
        }
    }
}

fn service_data(attributes: &CommandAttributes) -> Map<String, Value> {
    let mut data = Map::new();
    if let Some(brightness) = attributes.brightness {
        data.insert("brightness".to_string(), json!(brightness));
    }
    if let Some(hs) = attributes.hs_color {
        data.insert("hs_color".to_string(), json!([hs.hue, hs.sat]));
    }
    if let Some(xy) = attributes.xy_color {
        data.insert("xy_color".to_string(), json!([xy.x, xy.y]));
    }
    if let Some(mired) = attributes.color_temp {
        data.insert("color_temp".to_string(), json!(mired));
    }
    if let Some(effect) = &attributes.effect {
        data.insert("effect".to_string(), json!(effect));
    }
    data
}
