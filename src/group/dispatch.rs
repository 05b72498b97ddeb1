use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};

use crate::group::GroupController;
use crate::group::cache::BrightnessSnapshot;
use crate::group::redistribute::redistribute;
use crate::model::light::{
    ColorMode, CommandAttributes, MemberState, PowerCommand, TurnOnRequest, kelvin_to_mired,
};

/// Requests at or below this level skip redistribution and land verbatim
/// on every member. Scaling near the bottom of the range just flickers.
const BRIGHTNESS_FLOOR: u8 = 3;

type MemberStates = [(String, Option<MemberState>)];
type CommandSet<'a> = Vec<BoxFuture<'a, ()>>;

impl GroupController {
    /// Turn the group on.
    ///
    /// Brightness changes against a lit, dimmable group run as a spawned
    /// adjustment that spreads the new mean over the members in
    /// proportion to their cached levels; everything else is dispatched
    /// inline. The aggregate is refreshed once the commands land.
    pub async fn turn_on(self: Arc<Self>, request: TurnOnRequest) {
        log::debug!("[{}] turn_on: {request:?}", self.id);
        self.state.lock().await.is_on = true;

        let members = self.member_states().await;

        if let Some(value) = request.brightness {
            if request.brightness_only() && !any_dimmable_lit(&members) {
                self.direct_brightness(&members, value).await;
            } else if value <= BRIGHTNESS_FLOOR {
                self.floor_brightness(&members, value).await;
            } else {
                // the adjustment refreshes the aggregate itself
                self.spawn_adjustment(value, request, &members).await;
                return;
            }
            self.spawn_refresh();
            return;
        }

        let commands = if request.has_color_or_effect() {
            self.color_commands(&members, &request)
        } else {
            self.bare_turn_on(&members)
        };
        join_all(commands).await;

        self.spawn_refresh();
    }

    /// Turn every lit member off.
    pub async fn turn_off(self: Arc<Self>) {
        log::debug!("[{}] turn_off", self.id);
        self.state.lock().await.is_on = false;

        let members = self.member_states().await;
        let mut commands = CommandSet::new();
        for (member_id, state) in &members {
            let Some(state) = state else { continue };
            if !state.available || !state.on {
                continue;
            }
            commands.push(
                self.send_command(member_id.clone(), PowerCommand::Off, CommandAttributes::default())
                    .boxed(),
            );
        }
        join_all(commands).await;

        self.spawn_refresh();
    }

    /// The whole group is dark (or nothing lit can dim): no levels to
    /// preserve, so the requested brightness goes out as-is.
    async fn direct_brightness(&self, members: &MemberStates, value: u8) {
        log::debug!("[{}] Direct turn-on at brightness {value}", self.id);

        let mut commands = CommandSet::new();
        for (member_id, state) in members {
            let Some(state) = state else { continue };
            if !state.available {
                continue;
            }
            let attributes = if state.is_dimmable() {
                CommandAttributes::brightness(value)
            } else {
                CommandAttributes::default()
            };
            commands.push(
                self.send_command(member_id.clone(), PowerCommand::On, attributes)
                    .boxed(),
            );
        }

        join_all(commands).await;
    }

    /// Near-dark override: every member gets the exact requested value.
    /// The brightness cache is left alone, so a dip to minimum and back
    /// does not erase the remembered spread.
    async fn floor_brightness(&self, members: &MemberStates, value: u8) {
        log::debug!("[{}] Brightness {value} at or below floor, applying verbatim", self.id);

        let mut commands = CommandSet::new();
        for (member_id, state) in members {
            let Some(state) = state else { continue };
            if !state.available {
                continue;
            }
            commands.push(
                self.send_command(
                    member_id.clone(),
                    PowerCommand::On,
                    CommandAttributes::brightness(value),
                )
                .boxed(),
            );
        }

        join_all(commands).await;
    }

    /// Seed or extend the brightness cache, then hand the request to a
    /// background adjustment, superseding any adjustment still running.
    async fn spawn_adjustment(
        self: Arc<Self>,
        target: u8,
        request: TurnOnRequest,
        members: &MemberStates,
    ) {
        if !self.cache.reset_timer().await {
            self.cache.store(snapshot_levels(members)).await;
        }

        let mut slot = self.adjust_task.lock().await;
        if let Some(previous) = slot.take() {
            log::debug!("[{}] Superseding running adjustment", self.id);
            previous.abort();
        }
        let this = Arc::clone(&self);
        *slot = Some(tokio::spawn(async move {
            this.run_adjustment(target, &request).await;
        }));
    }

    async fn run_adjustment(&self, target: u8, request: &TurnOnRequest) {
        let Some(snapshot) = self.cache.snapshot().await else {
            log::warn!("[{}] Brightness cache expired before adjustment ran", self.id);
            return;
        };

        let values = redistribute(&snapshot.member_levels, f64::from(target));
        log::debug!(
            "[{}] Adjusting {} members towards mean {target}",
            self.id,
            values.len()
        );

        let members = self.member_states().await;
        let mut commands = CommandSet::new();
        for (member_id, state) in &members {
            let Some(value) = values.get(member_id) else {
                continue;
            };
            if snapshot
                .member_levels
                .get(member_id)
                .is_none_or(|seed| *seed <= 0.0)
            {
                continue;
            }
            let Some(state) = state else { continue };
            if !state.available || !state.on {
                log::debug!(
                    "[{}] Skipping {member_id}: not on or not available",
                    self.id
                );
                continue;
            }
            commands.push(
                self.send_command(
                    member_id.clone(),
                    PowerCommand::On,
                    CommandAttributes::brightness(*value),
                )
                .boxed(),
            );
        }

        if request.has_color_or_effect() {
            commands.extend(self.color_commands(&members, request));
        }

        join_all(commands).await;
        self.refresh().await;
    }

    /// Build the color/effect commands for a request.
    ///
    /// One color representation is chosen per request (hs over xy over
    /// temperature); a member not supporting it receives no color. With
    /// the group dark, every reachable member is addressed so the group
    /// lights up; with it lit, only lit members with something to change
    /// are touched.
    fn color_commands<'a>(
        &'a self,
        members: &MemberStates,
        request: &TurnOnRequest,
    ) -> CommandSet<'a> {
        let group_lit = members
            .iter()
            .any(|(_, state)| state.as_ref().is_some_and(|state| state.on));

        let mut commands = CommandSet::new();
        for (member_id, state) in members {
            let Some(state) = state else { continue };
            if !state.available {
                continue;
            }
            if group_lit && !state.on {
                continue;
            }

            let attributes = color_attributes_for(request, state);
            if group_lit && attributes.is_empty() {
                continue;
            }
            commands.push(
                self.send_command(member_id.clone(), PowerCommand::On, attributes)
                    .boxed(),
            );
        }

        commands
    }

    fn bare_turn_on<'a>(&'a self, members: &MemberStates) -> CommandSet<'a> {
        let mut commands = CommandSet::new();
        for (member_id, state) in members {
            let Some(state) = state else { continue };
            if !state.available {
                continue;
            }
            commands.push(
                self.send_command(member_id.clone(), PowerCommand::On, CommandAttributes::default())
                    .boxed(),
            );
        }
        commands
    }

    /// Deliver one command. Failures are logged and swallowed, so a dead
    /// member cannot abort the rest of the dispatch.
    async fn send_command(&self, member_id: String, power: PowerCommand, attributes: CommandAttributes) {
        log::trace!("[{}] {} -> {member_id}: {attributes:?}", self.id, power.service());
        if let Err(err) = self.sink.send(&member_id, power, attributes).await {
            log::warn!("[{}] Command to {member_id} failed: {err}", self.id);
        }
    }
}

fn any_dimmable_lit(members: &MemberStates) -> bool {
    members.iter().any(|(_, state)| {
        state
            .as_ref()
            .is_some_and(|state| state.on && state.is_dimmable())
    })
}

fn snapshot_levels(members: &MemberStates) -> BrightnessSnapshot {
    let mut levels = HashMap::new();
    for (member_id, state) in members {
        let Some(state) = state else { continue };
        if state.on {
            levels.insert(member_id.clone(), state.brightness.unwrap_or(0.0));
        }
    }
    BrightnessSnapshot::from_levels(levels)
}

/// Attributes a single member should receive for the request's color and
/// effect, honoring the member's capabilities.
fn color_attributes_for(request: &TurnOnRequest, member: &MemberState) -> CommandAttributes {
    let mut attributes = CommandAttributes::default();

    if let Some(hs) = request.hs_color {
        if member.supports(ColorMode::Hs) {
            attributes.hs_color = Some(hs);
        }
    } else if let Some(xy) = request.xy_color {
        if member.supports(ColorMode::Xy) {
            attributes.xy_color = Some(xy);
        }
    } else if let Some(kelvin) = request.color_temp_kelvin {
        if member.supports(ColorMode::ColorTemp) {
            attributes.color_temp = Some(kelvin_to_mired(kelvin));
        }
    }

    if let Some(effect) = &request.effect {
        if member.has_effects() {
            attributes.effect = Some(effect.clone());
        }
    }

    attributes
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn member(on: bool, brightness: Option<f64>) -> MemberState {
        MemberState {
            available: true,
            on,
            brightness,
            ..MemberState::default()
        }
    }

    #[test]
    fn snapshot_only_captures_lit_members() {
        let members = vec![
            ("a".to_string(), Some(member(true, Some(100.0)))),
            ("b".to_string(), Some(member(false, Some(40.0)))),
            ("c".to_string(), Some(member(true, None))),
            ("d".to_string(), None),
        ];

        let snapshot = snapshot_levels(&members);
        assert_eq!(snapshot.member_levels.len(), 2);
        assert!((snapshot.member_levels["a"] - 100.0).abs() < f64::EPSILON);
        assert!(snapshot.member_levels["c"].abs() < f64::EPSILON);
        assert!((snapshot.group_brightness - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dimmable_lit_probe() {
        let dim = member(true, Some(80.0));
        let plain = member(true, None);

        assert!(any_dimmable_lit(&[("a".to_string(), Some(dim))]));
        assert!(!any_dimmable_lit(&[("a".to_string(), Some(plain))]));
        assert!(!any_dimmable_lit(&[("a".to_string(), None)]));
    }

    #[test]
    fn one_color_representation_per_request() {
        let mut capable = member(true, Some(10.0));
        capable.supported_color_modes =
            [ColorMode::Hs, ColorMode::Xy, ColorMode::ColorTemp].into();

        let request = TurnOnRequest {
            hs_color: Some(crate::model::light::HsColor {
                hue: 100.0,
                sat: 50.0,
            }),
            xy_color: Some(crate::model::light::XyColor { x: 0.3, y: 0.3 }),
            color_temp_kelvin: Some(4000),
            ..TurnOnRequest::default()
        };

        let attributes = color_attributes_for(&request, &capable);
        assert!(attributes.hs_color.is_some());
        assert!(attributes.xy_color.is_none());
        assert!(attributes.color_temp.is_none());
    }

    #[test]
    fn unsupported_representation_is_not_translated() {
        let mut temp_only = member(true, Some(10.0));
        temp_only.supported_color_modes =
            [ColorMode::ColorTemp].into_iter().collect::<BTreeSet<_>>();

        let request = TurnOnRequest {
            hs_color: Some(crate::model::light::HsColor {
                hue: 100.0,
                sat: 50.0,
            }),
            ..TurnOnRequest::default()
        };

        // hs was chosen for the request; a temperature-only member gets nothing
        let attributes = color_attributes_for(&request, &temp_only);
        assert!(attributes.is_empty());
    }

    #[test]
    fn effect_requires_an_effect_list() {
        let mut fancy = member(true, Some(10.0));
        fancy.effect_list = vec!["colorloop".to_string()];
        let plain = member(true, Some(10.0));

        let request = TurnOnRequest {
            effect: Some("colorloop".to_string()),
            ..TurnOnRequest::default()
        };

        assert_eq!(
            color_attributes_for(&request, &fancy).effect.as_deref(),
            Some("colorloop")
        );
        assert!(color_attributes_for(&request, &plain).effect.is_none());
    }

    #[test]
    fn kelvin_is_dispatched_as_mired() {
        let mut temp_only = member(true, Some(10.0));
        temp_only.supported_color_modes = [ColorMode::ColorTemp].into();

        let request = TurnOnRequest {
            color_temp_kelvin: Some(4000),
            ..TurnOnRequest::default()
        };

        let attributes = color_attributes_for(&request, &temp_only);
        assert_eq!(attributes.color_temp, Some(250));
    }
}
