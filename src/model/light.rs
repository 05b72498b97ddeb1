use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Widest color temperature range advertised for a group, in kelvin.
///
/// Individual members may support less; out-of-range requests are pulled
/// into range by the member itself.
pub const MIN_COLOR_TEMP_KELVIN: u32 = 2000;
pub const MAX_COLOR_TEMP_KELVIN: u32 = 6500;

/// Color rendering modes a light can report or accept.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    #[serde(rename = "onoff")]
    OnOff,
    Brightness,
    ColorTemp,
    Hs,
    Rgb,
    Rgbw,
    Rgbww,
    White,
    Xy,
}

impl ColorMode {
    /// True for modes that carry chromaticity, as opposed to
    /// white-spectrum or brightness-only modes.
    #[must_use]
    pub const fn is_color(self) -> bool {
        matches!(self, Self::Hs | Self::Rgb | Self::Rgbw | Self::Rgbww | Self::Xy)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HsColor {
    /// Hue angle in degrees (0..=360)
    pub hue: f64,
    /// Saturation in percent (0..=100)
    pub sat: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct XyColor {
    pub x: f64,
    pub y: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Point-in-time view of one member light, as read from the device directory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemberState {
    pub available: bool,
    pub on: bool,
    /// Brightness 0..=255, when the member reports one.
    pub brightness: Option<f64>,
    pub hs_color: Option<HsColor>,
    pub rgb_color: Option<RgbColor>,
    pub xy_color: Option<XyColor>,
    /// Color temperature in mired.
    pub color_temp: Option<u16>,
    pub effect: Option<String>,
    pub effect_list: Vec<String>,
    pub supported_color_modes: BTreeSet<ColorMode>,
}

impl MemberState {
    /// A member counts as dimmable when it reports a brightness level or
    /// advertises a brightness-capable color mode.
    #[must_use]
    pub fn is_dimmable(&self) -> bool {
        self.brightness.is_some() || self.supported_color_modes.contains(&ColorMode::Brightness)
    }

    #[must_use]
    pub fn supports(&self, mode: ColorMode) -> bool {
        self.supported_color_modes.contains(&mode)
    }

    #[must_use]
    pub fn has_effects(&self) -> bool {
        !self.effect_list.is_empty()
    }
}

/// Attributes accepted by a group turn-on request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnOnRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<HsColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<XyColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

impl TurnOnRequest {
    /// True when the request carries a brightness and nothing else.
    #[must_use]
    pub const fn brightness_only(&self) -> bool {
        self.brightness.is_some()
            && self.hs_color.is_none()
            && self.xy_color.is_none()
            && self.color_temp_kelvin.is_none()
            && self.effect.is_none()
    }

    #[must_use]
    pub const fn has_color_or_effect(&self) -> bool {
        self.hs_color.is_some()
            || self.xy_color.is_some()
            || self.color_temp_kelvin.is_some()
            || self.effect.is_some()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerCommand {
    On,
    Off,
}

impl PowerCommand {
    /// Home Assistant light service implementing this command.
    #[must_use]
    pub const fn service(self) -> &'static str {
        match self {
            Self::On => "turn_on",
            Self::Off => "turn_off",
        }
    }
}

/// Attribute payload attached to a member power command.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CommandAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<HsColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<XyColor>,
    /// Color temperature in mired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

impl CommandAttributes {
    #[must_use]
    pub fn brightness(value: u8) -> Self {
        Self {
            brightness: Some(value),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.brightness.is_none()
            && self.hs_color.is_none()
            && self.xy_color.is_none()
            && self.color_temp.is_none()
            && self.effect.is_none()
    }
}

/// Convert kelvin to mired, rounding to the nearest whole mired.
#[must_use]
pub fn kelvin_to_mired(kelvin: u32) -> u16 {
    let mired = (1_000_000.0 / f64::from(kelvin.max(1))).round();
    round_u16(mired.max(1.0))
}

/// Convert mired to kelvin, clamped to the range lights actually produce.
#[must_use]
pub fn mired_to_kelvin(mired: u16) -> u32 {
    if mired == 0 {
        return MAX_COLOR_TEMP_KELVIN;
    }
    let kelvin = (1_000_000.0 / f64::from(mired)).round();
    round_u32(kelvin.clamp(1000.0, 10_000.0))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_u16(value: f64) -> u16 {
    value.round().clamp(0.0, 65_535.0) as u16
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_u32(value: f64) -> u32 {
    value.round().clamp(0.0, 4_294_967_295.0) as u32
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn color_mode_wire_names() {
        assert_eq!(json!(ColorMode::OnOff), json!("onoff"));
        assert_eq!(json!(ColorMode::ColorTemp), json!("color_temp"));
        assert_eq!(json!(ColorMode::Hs), json!("hs"));

        let mode: ColorMode = serde_json::from_value(json!("xy")).unwrap();
        assert_eq!(mode, ColorMode::Xy);
    }

    #[test]
    fn kelvin_mired_conversions() {
        assert_eq!(kelvin_to_mired(6500), 154);
        assert_eq!(kelvin_to_mired(4000), 250);
        assert_eq!(kelvin_to_mired(2000), 500);

        assert_eq!(mired_to_kelvin(154), 6494);
        assert_eq!(mired_to_kelvin(250), 4000);
        assert_eq!(mired_to_kelvin(500), 2000);
    }

    #[test]
    fn mired_conversion_is_clamped() {
        // 10 mired is nominally 100_000 K
        assert_eq!(mired_to_kelvin(10), 10_000);
        assert_eq!(mired_to_kelvin(0), MAX_COLOR_TEMP_KELVIN);
        // 1 mired per kelvin at the top of the u16 range
        assert_eq!(kelvin_to_mired(2_000_000), 1);
    }

    #[test]
    fn brightness_only_request_detection() {
        let req = TurnOnRequest {
            brightness: Some(128),
            ..TurnOnRequest::default()
        };
        assert!(req.brightness_only());
        assert!(!req.has_color_or_effect());

        let req = TurnOnRequest {
            brightness: Some(128),
            color_temp_kelvin: Some(4000),
            ..TurnOnRequest::default()
        };
        assert!(!req.brightness_only());
        assert!(req.has_color_or_effect());

        assert!(!TurnOnRequest::default().brightness_only());
    }

    #[test]
    fn dimmable_probe() {
        let state = MemberState {
            brightness: Some(12.0),
            ..MemberState::default()
        };
        assert!(state.is_dimmable());

        let state = MemberState {
            supported_color_modes: [ColorMode::Brightness].into(),
            ..MemberState::default()
        };
        assert!(state.is_dimmable());

        assert!(!MemberState::default().is_dimmable());
    }
}
