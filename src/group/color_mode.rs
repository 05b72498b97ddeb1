use std::collections::BTreeSet;

use crate::model::light::{ColorMode, HsColor, XyColor};

/// Normalize the raw union of member color modes into the set the group
/// advertises.
///
/// Dashboards choke on contradictory mode sets (`onoff` next to `hs`,
/// `brightness` next to `color_temp`), so the union is reduced to the
/// most capable consistent subset. A group mixing xy-only and
/// temperature-only members is advertised as hs + color_temp, since hs
/// is the representation every color member accepts.
#[must_use]
pub fn normalize_supported_modes(modes: &BTreeSet<ColorMode>) -> BTreeSet<ColorMode> {
    let mut result = modes.clone();

    if result.len() > 1 {
        result.remove(&ColorMode::OnOff);
    }

    if result.contains(&ColorMode::Xy) && result.contains(&ColorMode::ColorTemp) {
        result.remove(&ColorMode::Xy);
        result.insert(ColorMode::Hs);
    }

    if result.contains(&ColorMode::ColorTemp) || result.iter().any(|mode| mode.is_color()) {
        result.remove(&ColorMode::Brightness);
    }

    if result.is_empty() {
        result.insert(ColorMode::OnOff);
    }

    result
}

/// Pick the color mode the group reports as active, given its aggregate
/// attributes. Most specific supported representation wins.
#[must_use]
pub fn resolve_active_mode(
    supported: &BTreeSet<ColorMode>,
    kelvin: Option<u32>,
    hs_color: Option<HsColor>,
    xy_color: Option<XyColor>,
    brightness: u8,
) -> ColorMode {
    if kelvin.is_some() && supported.contains(&ColorMode::ColorTemp) {
        return ColorMode::ColorTemp;
    }
    if hs_color.is_some() && supported.contains(&ColorMode::Hs) {
        return ColorMode::Hs;
    }
    if xy_color.is_some() && supported.contains(&ColorMode::Xy) {
        return ColorMode::Xy;
    }
    if brightness > 0 && supported.contains(&ColorMode::Brightness) {
        return ColorMode::Brightness;
    }
    if supported.contains(&ColorMode::OnOff) {
        return ColorMode::OnOff;
    }
    if supported.contains(&ColorMode::Brightness) {
        return ColorMode::Brightness;
    }
    supported
        .iter()
        .next()
        .copied()
        .unwrap_or(ColorMode::OnOff)
}
