use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::group::color_mode;
use crate::model::light::{
    ColorMode, HsColor, MemberState, RgbColor, XyColor, mired_to_kelvin,
};

/// Aggregate view over all members, refreshed after commands and on
/// member change events.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GroupState {
    pub is_on: bool,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<HsColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<RgbColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<XyColor>,
    /// Mean color temperature over reporting members, in mired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp_kelvin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    pub effect_list: Vec<String>,
    pub supported_color_modes: BTreeSet<ColorMode>,
    pub color_mode: ColorMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Collapse the members' states into one group state.
///
/// On/off is an any-on; brightness and color temperature are means over
/// the members that report them; color readings come from the first lit
/// member carrying one. The effect list and supported modes are unions
/// over every member, lit or not, so capabilities stay stable while
/// parts of the group are off.
#[must_use]
pub fn aggregate(members: &[MemberState]) -> GroupState {
    let lit: Vec<&MemberState> = members.iter().filter(|member| member.on).collect();

    let levels: Vec<f64> = lit.iter().filter_map(|member| member.brightness).collect();
    let brightness = if levels.is_empty() {
        0
    } else {
        round_u8(mean(&levels))
    };

    let mut hs_color = lit.iter().find_map(|member| member.hs_color);
    let mut rgb_color = lit.iter().find_map(|member| member.rgb_color);
    let mut xy_color = lit.iter().find_map(|member| member.xy_color);
    apply_display_calibration(&mut hs_color, &mut rgb_color, &mut xy_color);

    let mireds: Vec<f64> = lit
        .iter()
        .filter_map(|member| member.color_temp)
        .map(f64::from)
        .collect();
    let color_temp = if mireds.is_empty() {
        None
    } else {
        Some(round_u16(mean(&mireds)))
    };
    let kelvins: Vec<f64> = lit
        .iter()
        .filter_map(|member| member.color_temp)
        .map(|mired| f64::from(mired_to_kelvin(mired)))
        .collect();
    let color_temp_kelvin = if kelvins.is_empty() {
        None
    } else {
        Some(round_u32(mean(&kelvins)))
    };

    let effect = lit.iter().find_map(|member| member.effect.clone());
    let effect_list: Vec<String> = members
        .iter()
        .flat_map(|member| member.effect_list.iter().cloned())
        .unique()
        .sorted()
        .collect();

    let mode_union: BTreeSet<ColorMode> = members
        .iter()
        .flat_map(|member| member.supported_color_modes.iter().copied())
        .collect();
    let supported_color_modes = color_mode::normalize_supported_modes(&mode_union);

    let color_mode = color_mode::resolve_active_mode(
        &supported_color_modes,
        color_temp_kelvin,
        hs_color,
        xy_color,
        brightness,
    );

    GroupState {
        is_on: !lit.is_empty(),
        brightness,
        hs_color,
        rgb_color,
        xy_color,
        color_temp,
        color_temp_kelvin,
        effect,
        effect_list,
        supported_color_modes,
        color_mode,
        last_update: Some(Utc::now()),
    }
}

/// One widespread warm-white preset reports rgb `[255, 255, 251]`, which
/// dashboards render as plain white. Substitute the measured tint for
/// display. Exact match only; never fed back into commands.
fn apply_display_calibration(
    hs: &mut Option<HsColor>,
    rgb: &mut Option<RgbColor>,
    xy: &mut Option<XyColor>,
) {
    if *rgb == Some(RgbColor { r: 255, g: 255, b: 251 }) {
        *hs = Some(HsColor {
            hue: 27.028,
            sat: 18.905,
        });
        *rgb = Some(RgbColor {
            r: 255,
            g: 229,
            b: 207,
        });
        *xy = Some(XyColor { x: 0.37, y: 0.35 });
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / u32::try_from(values.len()).map_or(1.0, f64::from)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
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
    use super::*;

    fn lit(brightness: Option<f64>) -> MemberState {
        MemberState {
            available: true,
            on: true,
            brightness,
            ..MemberState::default()
        }
    }

    fn dark() -> MemberState {
        MemberState {
            available: true,
            ..MemberState::default()
        }
    }

    #[test]
    fn empty_group_is_off() {
        let state = aggregate(&[]);
        assert!(!state.is_on);
        assert_eq!(state.brightness, 0);
        assert_eq!(state.color_mode, ColorMode::OnOff);
        assert_eq!(
            state.supported_color_modes,
            [ColorMode::OnOff].into_iter().collect()
        );
    }

    #[test]
    fn any_lit_member_turns_the_group_on() {
        let state = aggregate(&[dark(), lit(Some(80.0))]);
        assert!(state.is_on);
    }

    #[test]
    fn brightness_is_the_mean_over_lit_members() {
        let mut sleeping = dark();
        sleeping.brightness = Some(50.0);

        let state = aggregate(&[lit(Some(100.0)), lit(Some(200.0)), sleeping]);
        assert_eq!(state.brightness, 150);
    }

    #[test]
    fn brightness_zero_when_nobody_reports() {
        let state = aggregate(&[lit(None), lit(None)]);
        assert!(state.is_on);
        assert_eq!(state.brightness, 0);
    }

    #[test]
    fn first_lit_member_provides_the_color() {
        let mut ignored = dark();
        ignored.hs_color = Some(HsColor { hue: 1.0, sat: 1.0 });

        let mut first = lit(Some(120.0));
        first.hs_color = Some(HsColor {
            hue: 120.0,
            sat: 50.0,
        });
        let mut second = lit(Some(120.0));
        second.hs_color = Some(HsColor {
            hue: 240.0,
            sat: 20.0,
        });

        let state = aggregate(&[ignored, first, second]);
        assert_eq!(
            state.hs_color,
            Some(HsColor {
                hue: 120.0,
                sat: 50.0
            })
        );
    }

    #[test]
    fn color_temp_means_are_computed_per_member() {
        let mut warm = lit(Some(100.0));
        warm.color_temp = Some(500); // 2000 K
        let mut cold = lit(Some(100.0));
        cold.color_temp = Some(250); // 4000 K

        let state = aggregate(&[warm, cold]);
        assert_eq!(state.color_temp, Some(375));
        // mean of the converted values, not the conversion of the mean
        assert_eq!(state.color_temp_kelvin, Some(3000));
    }

    #[test]
    fn effect_list_is_a_sorted_union_over_all_members() {
        let mut first = lit(Some(10.0));
        first.effect_list = vec!["colorloop".to_string(), "fire".to_string()];
        let mut second = dark();
        second.effect_list = vec!["candle".to_string(), "fire".to_string()];

        let state = aggregate(&[first, second]);
        assert_eq!(
            state.effect_list,
            vec![
                "candle".to_string(),
                "colorloop".to_string(),
                "fire".to_string()
            ]
        );
    }

    #[test]
    fn supported_modes_union_is_normalized() {
        let mut xy_only = lit(Some(10.0));
        xy_only.supported_color_modes = [ColorMode::Xy].into();
        let mut temp_only = dark();
        temp_only.supported_color_modes = [ColorMode::ColorTemp].into();

        let state = aggregate(&[xy_only, temp_only]);
        assert_eq!(
            state.supported_color_modes,
            [ColorMode::Hs, ColorMode::ColorTemp].into_iter().collect()
        );
    }

    #[test]
    fn warm_white_reading_is_calibrated_for_display() {
        let mut member = lit(Some(200.0));
        member.rgb_color = Some(RgbColor {
            r: 255,
            g: 255,
            b: 251,
        });

        let state = aggregate(&[member]);
        assert_eq!(
            state.rgb_color,
            Some(RgbColor {
                r: 255,
                g: 229,
                b: 207
            })
        );
        assert_eq!(
            state.hs_color,
            Some(HsColor {
                hue: 27.028,
                sat: 18.905
            })
        );
        assert_eq!(state.xy_color, Some(XyColor { x: 0.37, y: 0.35 }));
    }

    #[test]
    fn near_miss_rgb_is_left_alone() {
        let mut member = lit(Some(200.0));
        member.rgb_color = Some(RgbColor {
            r: 255,
            g: 255,
            b: 250,
        });

        let state = aggregate(&[member]);
        assert_eq!(
            state.rgb_color,
            Some(RgbColor {
                r: 255,
                g: 255,
                b: 250
            })
        );
        assert_eq!(state.hs_color, None);
    }

    #[test]
    fn active_mode_tracks_the_temperature_reading() {
        let mut member = lit(Some(100.0));
        member.color_temp = Some(250);
        member.supported_color_modes = [ColorMode::ColorTemp, ColorMode::Hs].into();

        let state = aggregate(&[member]);
        assert_eq!(state.color_mode, ColorMode::ColorTemp);
    }
}
