use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::num::NonZeroU32;

use camino::Utf8Path;
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub hass: HassConfig,
    pub dimmer: DimmerConfig,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ServerConfig {
    pub listen_address: Ipv4Addr,
    pub listen_port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HassConfig {
    /// Base url of the Home Assistant instance, e.g. `http://hass.local:8123/`
    pub url: Url,

    /// Name of the environment variable holding the long-lived access token.
    pub token_env: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DimmerConfig {
    /// Seconds a brightness snapshot stays valid after the last change.
    pub delay: NonZeroU32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct GroupConfig {
    /// Display name; falls back to the group id.
    pub name: Option<String>,

    /// Member light entities, e.g. `light.kitchen_spot_1`.
    #[serde(default)]
    pub entities: Vec<String>,
}

impl AppConfig {
    #[must_use]
    pub fn has_groups(&self) -> bool {
        !self.groups.is_empty()
    }
}

impl GroupConfig {
    #[must_use]
    pub fn display_name(&self, id: &str) -> String {
        self.name.clone().unwrap_or_else(|| id.to_string())
    }
}

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("server.listen_address", "0.0.0.0")?
        .set_default("server.listen_port", 8440)?
        .set_default("hass.url", "http://127.0.0.1:8123/")?
        .set_default("dimmer.delay", 5)?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    settings.try_deserialize()
}
