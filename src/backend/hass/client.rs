use std::collections::BTreeSet;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use url::Url;

use crate::config::HassConfig;
use crate::error::{ApiError, ApiResult};
use crate::model::light::{ColorMode, HsColor, MemberState, RgbColor, XyColor};

/// Entity state as served by `/api/states/{entity_id}`.
#[derive(Clone, Debug, Deserialize)]
pub struct HassState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Rest and websocket transport towards one Home Assistant instance.
pub struct HassClient {
    backend_name: String,
    base_url: Url,
    http: reqwest::Client,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HassWsEventEnvelope {
    #[serde(default)]
    pub event_type: String,
    pub data: HassWsEventData,
}

#[derive(Debug, Deserialize)]
struct HassWsEventData {
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HassWsIncoming {
    AuthRequired,
    AuthOk,
    AuthInvalid,
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    Event { event: HassWsEventEnvelope },
    #[serde(other)]
    Other,
}

/// An authenticated websocket with a running `state_changed` subscription.
pub struct HassWs {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl HassWs {
    async fn send_json(&mut self, payload: &Value) -> ApiResult<()> {
        self.socket
            .send(Message::Text(payload.to_string().into()))
            .await?;
        Ok(())
    }

    async fn recv_json(&mut self) -> ApiResult<Option<HassWsIncoming>> {
        let Some(msg) = self.socket.next().await else {
            return Ok(None);
        };
        let msg = msg.map_err(ApiError::from)?;
        let Message::Text(text) = msg else {
            return Ok(Some(HassWsIncoming::Other));
        };
        Ok(Some(serde_json::from_str::<HassWsIncoming>(&text)?))
    }

    /// Entity id of the next state change, or `None` when the peer
    /// closes the connection.
    pub async fn next_state_changed(&mut self) -> ApiResult<Option<String>> {
        while let Some(msg) = self.recv_json().await? {
            if let HassWsIncoming::Event { event } = msg {
                if event.event_type == "state_changed" {
                    return Ok(Some(event.data.entity_id));
                }
            }
        }
        Ok(None)
    }
}

impl HassClient {
    const DEFAULT_TOKEN_ENV: &'static str = "HASS_TOKEN";
    const DEFAULT_TIMEOUT_SECS: u64 = 10;

    pub fn new(backend_name: &str, config: &HassConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            backend_name: backend_name.to_string(),
            base_url: config.url.clone(),
            http,
            token: None,
        })
    }

    pub fn load_token_from_env(&mut self, config: &HassConfig) -> ApiResult<()> {
        let token_env = config.token_env.as_deref().unwrap_or(Self::DEFAULT_TOKEN_ENV);
        let token = std::env::var(token_env).map_err(|_| {
            ApiError::service_error(format!(
                "[{}] Missing Home Assistant token env var {}",
                self.backend_name, token_env
            ))
        })?;
        if token.trim().is_empty() {
            return Err(ApiError::service_error(format!(
                "[{}] Empty Home Assistant token in env var {}",
                self.backend_name, token_env
            )));
        }
        self.token = Some(token);
        Ok(())
    }

    fn endpoint_url(&self, endpoint: &str) -> ApiResult<Url> {
        // Url::join drops the last path segment of a base without a
        // trailing slash, so normalize first.
        let mut base = self.base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?.join(endpoint.trim_start_matches('/'))?)
    }

    fn token(&self) -> ApiResult<&str> {
        self.token.as_deref().ok_or_else(|| {
            ApiError::service_error(format!(
                "[{}] No Home Assistant token loaded",
                self.backend_name
            ))
        })
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        action: &str,
    ) -> ApiResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let details = if body.is_empty() {
            format!("{status}")
        } else {
            format!("{status}: {body}")
        };

        let err = if status == StatusCode::UNAUTHORIZED {
            format!(
                "[{}] Home Assistant unauthorized during {}. Verify the access token",
                self.backend_name, action
            )
        } else {
            format!(
                "[{}] Home Assistant error during {}: {}",
                self.backend_name, action, details
            )
        };

        Err(ApiError::service_error(err))
    }

    /// Fetch one entity state. `None` when Home Assistant does not know
    /// the entity.
    pub async fn get_state(&self, entity_id: &str) -> ApiResult<Option<HassState>> {
        let url = self.endpoint_url(&format!("/api/states/{entity_id}"))?;
        let response = self.http.get(url).bearer_auth(self.token()?).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = self
            .check_status(response, &format!("GET /api/states/{entity_id}"))
            .await?;
        Ok(Some(response.json().await?))
    }

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        mut data: Map<String, Value>,
    ) -> ApiResult<()> {
        let url = self.endpoint_url(&format!("/api/services/{domain}/{service}"))?;
        if !entity_id.trim().is_empty() {
            data.insert("entity_id".to_string(), entity_id.into());
        }
        let payload = Value::Object(data);

        log::trace!(
            "[{}] Calling {domain}.{service} with {payload}",
            self.backend_name
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token()?)
            .json(&payload)
            .send()
            .await?;
        let _response = self
            .check_status(response, &format!("POST /api/services/{domain}/{service}"))
            .await?;
        Ok(())
    }

    fn ws_endpoint_url(&self) -> ApiResult<Url> {
        let mut url = self.endpoint_url("/api/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            ApiError::service_error(format!(
                "[{}] Failed to convert HA url scheme for websocket",
                self.backend_name
            ))
        })?;
        Ok(url)
    }

    fn ws_error(&self, detail: &str) -> ApiError {
        ApiError::service_error(format!(
            "[{}] Home Assistant websocket: {detail}",
            self.backend_name
        ))
    }

    /// Open the websocket, authenticate, and subscribe to `state_changed`.
    pub async fn subscribe_state_changed(&self) -> ApiResult<HassWs> {
        const SUBSCRIBE_ID: u64 = 1;

        let ws_url = self.ws_endpoint_url()?;
        let (socket, _response) = connect_async(ws_url.as_str()).await?;
        let mut ws = HassWs { socket };

        // The server opens with an auth challenge; consume it.
        ws.recv_json().await?;

        ws.send_json(&serde_json::json!({
            "type": "auth",
            "access_token": self.token()?,
        }))
        .await?;

        loop {
            match ws.recv_json().await? {
                None => return Err(self.ws_error("closed during auth")),
                Some(HassWsIncoming::AuthOk) => break,
                Some(HassWsIncoming::AuthInvalid) => {
                    return Err(self.ws_error("auth rejected (check token)"));
                }
                Some(_) => {}
            }
        }

        ws.send_json(&serde_json::json!({
            "id": SUBSCRIBE_ID,
            "type": "subscribe_events",
            "event_type": "state_changed",
        }))
        .await?;

        loop {
            match ws.recv_json().await? {
                None => return Err(self.ws_error("closed during subscribe")),
                Some(HassWsIncoming::Result { id, success: true, .. })
                    if id == SUBSCRIBE_ID =>
                {
                    break;
                }
                Some(HassWsIncoming::Result { id, error, .. }) if id == SUBSCRIBE_ID => {
                    return Err(self.ws_error(&format!(
                        "subscribe_events failed: {}",
                        error.unwrap_or(Value::Null)
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(ws)
    }
}

/// Map a raw entity state onto the member model.
///
/// `unavailable` and `unknown` both count as unreachable, and an
/// unreachable member is never "on". Attribute parsing is tolerant:
/// integrations disagree about number types and drop attributes entirely
/// while a light is off.
pub fn parse_member_state(state: &HassState) -> MemberState {
    let available = !matches!(state.state.as_str(), "unavailable" | "unknown");
    let attributes = &state.attributes;

    MemberState {
        available,
        on: available && state.state == "on",
        brightness: attributes
            .get("brightness")
            .and_then(value_to_f64)
            .map(|value| value.clamp(0.0, 255.0)),
        hs_color: attributes.get("hs_color").and_then(parse_hs_color),
        rgb_color: attributes.get("rgb_color").and_then(parse_rgb_color),
        xy_color: attributes.get("xy_color").and_then(parse_xy_color),
        color_temp: attributes.get("color_temp").and_then(value_to_u16),
        effect: attributes
            .get("effect")
            .and_then(Value::as_str)
            .map(str::to_string),
        effect_list: parse_string_list(attributes.get("effect_list")),
        supported_color_modes: parse_supported_color_modes(
            attributes.get("supported_color_modes"),
        ),
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn value_to_u8(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|v| u8::try_from(v).ok())
}

fn value_to_u16(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|v| u16::try_from(v).ok())
}

fn parse_hs_color(value: &Value) -> Option<HsColor> {
    let [hue, sat] = value.as_array()?.as_slice() else {
        return None;
    };
    Some(HsColor {
        hue: value_to_f64(hue)?.clamp(0.0, 360.0),
        sat: value_to_f64(sat)?.clamp(0.0, 100.0),
    })
}

fn parse_xy_color(value: &Value) -> Option<XyColor> {
    let [x, y] = value.as_array()?.as_slice() else {
        return None;
    };
    Some(XyColor {
        x: value_to_f64(x)?.clamp(0.0, 1.0),
        y: value_to_f64(y)?.clamp(0.0, 1.0),
    })
}

fn parse_rgb_color(value: &Value) -> Option<RgbColor> {
    let [r, g, b] = value.as_array()?.as_slice() else {
        return None;
    };
    Some(RgbColor {
        r: value_to_u8(r)?,
        g: value_to_u8(g)?,
        b: value_to_u8(b)?,
    })
}

fn parse_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_supported_color_modes(value: Option<&Value>) -> BTreeSet<ColorMode> {
    value
        .and_then(Value::as_array)
        .map(|modes| {
            modes
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|mode| {
                    serde_json::from_value(Value::String(mode.to_ascii_lowercase())).ok()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hass_state(state: &str, attributes: Value) -> HassState {
        serde_json::from_value(json!({
            "entity_id": "light.kitchen_spot_1",
            "state": state,
            "attributes": attributes,
        }))
        .unwrap()
    }

    #[test]
    fn parses_a_full_light_state() {
        let state = hass_state(
            "on",
            json!({
                "brightness": 203,
                "hs_color": [27.028, 18.905],
                "rgb_color": [255, 229, 207],
                "xy_color": [0.37, 0.35],
                "color_temp": 366,
                "effect": "candle",
                "effect_list": ["candle", "fire"],
                "supported_color_modes": ["color_temp", "hs"],
            }),
        );

        let member = parse_member_state(&state);
        assert!(member.available);
        assert!(member.on);
        assert_eq!(member.brightness, Some(203.0));
        assert_eq!(
            member.hs_color,
            Some(HsColor {
                hue: 27.028,
                sat: 18.905
            })
        );
        assert_eq!(
            member.rgb_color,
            Some(RgbColor {
                r: 255,
                g: 229,
                b: 207
            })
        );
        assert_eq!(member.xy_color, Some(XyColor { x: 0.37, y: 0.35 }));
        assert_eq!(member.color_temp, Some(366));
        assert_eq!(member.effect.as_deref(), Some("candle"));
        assert_eq!(member.effect_list, vec!["candle", "fire"]);
        assert_eq!(
            member.supported_color_modes,
            [ColorMode::ColorTemp, ColorMode::Hs].into_iter().collect()
        );
    }

    #[test]
    fn unavailable_member_is_neither_reachable_nor_on() {
        for raw in ["unavailable", "unknown"] {
            let member = parse_member_state(&hass_state(raw, json!({})));
            assert!(!member.available);
            assert!(!member.on);
        }
    }

    #[test]
    fn off_member_is_still_reachable() {
        let member = parse_member_state(&hass_state("off", json!({})));
        assert!(member.available);
        assert!(!member.on);
    }

    #[test]
    fn sparse_attributes_parse_to_defaults() {
        let member = parse_member_state(&hass_state("on", json!({})));
        assert_eq!(member.brightness, None);
        assert_eq!(member.hs_color, None);
        assert!(member.effect_list.is_empty());
        assert!(member.supported_color_modes.is_empty());
    }

    #[test]
    fn out_of_range_readings_are_clamped() {
        let member = parse_member_state(&hass_state(
            "on",
            json!({
                "brightness": 300,
                "hs_color": [400.0, 120.0],
                "xy_color": [1.4, -0.2],
            }),
        ));
        assert_eq!(member.brightness, Some(255.0));
        assert_eq!(
            member.hs_color,
            Some(HsColor {
                hue: 360.0,
                sat: 100.0
            })
        );
        assert_eq!(member.xy_color, Some(XyColor { x: 1.0, y: 0.0 }));
    }

    #[test]
    fn unknown_color_modes_are_dropped() {
        let member = parse_member_state(&hass_state(
            "on",
            json!({"supported_color_modes": ["hs", "laser", "color_temp"]}),
        ));
        assert_eq!(
            member.supported_color_modes,
            [ColorMode::Hs, ColorMode::ColorTemp].into_iter().collect()
        );
    }

    #[test]
    fn malformed_color_arrays_are_ignored() {
        let member = parse_member_state(&hass_state(
            "on",
            json!({
                "hs_color": [10.0],
                "rgb_color": "red",
                "xy_color": [0.3, "y"],
            }),
        ));
        assert_eq!(member.hs_color, None);
        assert_eq!(member.rgb_color, None);
        assert_eq!(member.xy_color, None);
    }

    #[test]
    fn null_effect_is_absent() {
        let member = parse_member_state(&hass_state("on", json!({"effect": null})));
        assert_eq!(member.effect, None);
    }
}
