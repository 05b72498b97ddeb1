use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, put};
use serde::Serialize;

use crate::group::aggregate::GroupState;
use crate::model::light::{MAX_COLOR_TEMP_KELVIN, MIN_COLOR_TEMP_KELVIN, TurnOnRequest};
use crate::routes::ControllerApiResult;
use crate::server::appstate::AppState;

#[derive(Debug, Serialize)]
struct GroupSummary {
    id: String,
    name: String,
    is_on: bool,
    brightness: u8,
}

#[derive(Debug, Serialize)]
struct GroupDetail {
    id: String,
    name: String,
    members: Vec<String>,
    min_color_temp_kelvin: u32,
    max_color_temp_kelvin: u32,
    #[serde(flatten)]
    state: GroupState,
}

async fn get_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    let mut summaries = Vec::with_capacity(state.groups().len());
    for (id, group) in state.groups() {
        let group_state = group.state().await;
        summaries.push(GroupSummary {
            id: id.clone(),
            name: group.name().to_string(),
            is_on: group_state.is_on,
            brightness: group_state.brightness,
        });
    }
    Json(summaries)
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ControllerApiResult<Json<GroupDetail>> {
    let group = state.group(&id)?;

    Ok(Json(GroupDetail {
        id,
        name: group.name().to_string(),
        members: group.members().to_vec(),
        min_color_temp_kelvin: MIN_COLOR_TEMP_KELVIN,
        max_color_temp_kelvin: MAX_COLOR_TEMP_KELVIN,
        state: group.state().await,
    }))
}

#[axum::debug_handler]
async fn put_group_turn_on(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TurnOnRequest>,
) -> ControllerApiResult<Json<()>> {
    state.group(&id)?.turn_on(request).await;

    Ok(Json(()))
}

#[axum::debug_handler]
async fn put_group_turn_off(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ControllerApiResult<Json<()>> {
    state.group(&id)?.turn_off().await;

    Ok(Json(()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", get(get_groups))
        .route("/groups/{id}", get(get_group))
        .route("/groups/{id}/turn_on", put(put_group_turn_on))
        .route("/groups/{id}/turn_off", put(put_group_turn_off))
}
