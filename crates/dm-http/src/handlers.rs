//! REST handlers mirroring `dm-grpc`'s `DeviceService` RPCs one for one,
//! built directly on `axum::extract`/`axum::response` rather than a
//! controller-macro layer (there is no per-request DI container here, just
//! a shared `AppState`).

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode as HttpStatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::select_all;
use tokio_stream::StreamExt;

use dm_core::error::DmStatus;
use dm_core::events::DeviceEvent;
use dm_core::param::Param;
use dm_core::serializer;
use dm_core::Authorizer;
use dm_proto::{
    CommandResponse, ComponentLanguagePack, DetailLevel, ExecuteCommandPayload, GetParamPayload,
    GetValuePayload, LanguageList, ParamComponent, ParamInfoResponse, PushUpdates,
    SingleSetValuePayload, SlotList, SlottedAddLanguagePayload, SlottedMultiSetValuePayload,
    UpdateSubscriptionsPayload, Value, ValueUpdate,
};

use crate::auth::authorizer_from_headers;
use crate::error::{HttpError, HttpResult};
use crate::sse::json_event;
use crate::AppState;

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Authorizer, HttpError> {
    Ok(authorizer_from_headers(headers, state.authz_disabled)?)
}

fn parse_detail_level(value: Option<&str>) -> DetailLevel {
    match value.unwrap_or("full") {
        "subscriptions" => DetailLevel::Subscriptions,
        "minimal" => DetailLevel::Minimal,
        "commands" => DetailLevel::Commands,
        "none" => DetailLevel::None,
        _ => DetailLevel::Full,
    }
}

pub async fn get_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GetValuePayload>,
) -> HttpResult<Json<Value>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let value = device.get_value(&payload.oid, &authz).await?;
    Ok(Json(value))
}

pub async fn set_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SingleSetValuePayload>,
) -> HttpResult<HttpStatusCode> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let value = payload
        .value
        .ok_or_else(|| DmStatus::invalid_argument("Missing value"))?;
    device.set_value(&payload.oid, value, &authz).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

pub async fn multi_set_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SlottedMultiSetValuePayload>,
) -> HttpResult<HttpStatusCode> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let entries = payload
        .values
        .into_iter()
        .map(|v| {
            let value = v
                .value
                .ok_or_else(|| DmStatus::invalid_argument("Missing value in multi-set entry"))?;
            Ok((v.oid, value))
        })
        .collect::<Result<Vec<_>, DmStatus>>()?;
    device.commit_multi_set_value(entries, &authz).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

pub async fn get_param(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GetParamPayload>,
) -> HttpResult<Json<ParamComponent>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let param = device.get_param(&payload.oid, &authz).await?;
    let component = serializer::to_param_component(&payload.oid, &param, &authz)?;
    Ok(Json(component))
}

#[derive(serde::Deserialize)]
pub struct DeviceRequestQuery {
    slot: u32,
    #[serde(default)]
    detail_level: Option<String>,
    #[serde(default)]
    subscribed_oids: Option<String>,
    #[serde(default)]
    shallow: bool,
}

pub async fn device_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DeviceRequestQuery>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(query.slot)?;
    let detail_level = parse_detail_level(query.detail_level.as_deref());
    let subscribed_oids: Vec<String> = query
        .subscribed_oids
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let stream = serializer::serialize(device, detail_level, subscribed_oids, query.shallow, authz)
        .map(|item| match item {
            Ok(component) => json_event(&component),
            Err(err) => Ok(Event::default().event("error").data(err.message)),
        });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(serde::Deserialize)]
pub struct ParamInfoQuery {
    slot: u32,
    #[serde(default)]
    oid_prefix: String,
    #[serde(default)]
    recursive: bool,
}

fn param_info_entries(
    device: &dm_core::Device,
    prefix: &str,
    recursive: bool,
    include_value: bool,
    authz: &Authorizer,
) -> HttpResult<Vec<ParamInfoResponse>> {
    let mut entries = Vec::new();
    for (oid, param) in device.params() {
        let matches = if prefix.is_empty() {
            true
        } else if recursive {
            oid == prefix || oid.starts_with(&format!("{prefix}/"))
        } else {
            oid == prefix
        };
        if !matches {
            continue;
        }
        if !authz.read_authz(param) {
            continue;
        }
        entries.push(param_info_entry(oid, param, include_value, authz)?);
    }
    Ok(entries)
}

fn param_info_entry(
    oid: &str,
    param: &Param,
    include_value: bool,
    authz: &Authorizer,
) -> HttpResult<ParamInfoResponse> {
    let mut info = serializer::to_param_component(oid, param, authz)?;
    if !include_value {
        info.value = None;
    }
    let array_lengths = info.array_lengths.clone();
    Ok(ParamInfoResponse {
        info: Some(info),
        array_lengths,
    })
}

async fn param_info_stream(
    state: AppState,
    headers: HeaderMap,
    query: ParamInfoQuery,
    include_value: bool,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(query.slot)?;
    let entries = param_info_entries(&device, &query.oid_prefix, query.recursive, include_value, &authz)?;
    let stream = async_stream::stream! {
        for entry in entries {
            yield json_event(&entry);
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn param_info_request(
    state: State<AppState>,
    headers: HeaderMap,
    query: Query<ParamInfoQuery>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    param_info_stream(state.0, headers, query.0, true).await
}

pub async fn basic_param_info_request(
    state: State<AppState>,
    headers: HeaderMap,
    query: Query<ParamInfoQuery>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    param_info_stream(state.0, headers, query.0, false).await
}

pub async fn execute_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExecuteCommandPayload>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let command = device.get_command(&payload.oid)?.clone();
    let arg = payload.value.unwrap_or(Value { kind: None });
    let respond = payload.respond;
    let stream = async_stream::stream! {
        if !respond {
            yield json_event(&CommandResponse {
                kind: Some(dm_proto::command_response::Kind::NoResponse(true)),
            });
            return;
        }
        let response = match command.execute(arg, &authz) {
            Ok(value) => CommandResponse {
                kind: Some(dm_proto::command_response::Kind::Response(value)),
            },
            Err(status) => CommandResponse {
                kind: Some(dm_proto::command_response::Kind::Exception(
                    dm_proto::CommandResponseException {
                        r#type: format!("{:?}", status.code),
                        details: status.message,
                    },
                )),
            },
        };
        yield json_event(&response);
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(serde::Deserialize)]
pub struct LanguagePackQuery {
    slot: u32,
    id: String,
}

pub async fn language_pack_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LanguagePackQuery>,
) -> HttpResult<Json<ComponentLanguagePack>> {
    authorize(&state, &headers)?;
    let device = state.registry.get(query.slot)?;
    let pack = device.get_language_pack(&query.id)?;
    Ok(Json(ComponentLanguagePack {
        id: query.id,
        language_pack: Some(pack.into()),
    }))
}

pub async fn add_language(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SlottedAddLanguagePayload>,
) -> HttpResult<HttpStatusCode> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let pack: dm_core::language::LanguagePack = payload
        .language_pack
        .ok_or_else(|| DmStatus::invalid_argument("Missing language_pack"))?
        .into();
    device.add_language(&payload.id, pack, &authz).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

#[derive(serde::Deserialize)]
pub struct RemoveLanguageQuery {
    slot: u32,
    id: String,
}

pub async fn remove_language(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RemoveLanguageQuery>,
) -> HttpResult<HttpStatusCode> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(query.slot)?;
    device.remove_language(&query.id, &authz).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

#[derive(serde::Deserialize)]
pub struct SlotQuery {
    slot: u32,
}

pub async fn languages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SlotQuery>,
) -> HttpResult<Json<LanguageList>> {
    authorize(&state, &headers)?;
    let device = state.registry.get(query.slot)?;
    Ok(Json(LanguageList {
        languages: device.list_languages(),
    }))
}

pub async fn populated_slots(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HttpResult<Json<SlotList>> {
    authorize(&state, &headers)?;
    Ok(Json(SlotList {
        slots: state.registry.populated_slots(),
    }))
}

pub async fn update_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateSubscriptionsPayload>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    let authz = authorize(&state, &headers)?;
    let device = state.registry.get(payload.slot)?;
    let snapshot = device
        .update_subscriptions(&payload.add_oids, &payload.remove_oids, &authz)
        .await?;
    let stream = async_stream::stream! {
        for (oid, value) in snapshot {
            yield json_event(&ParamComponent {
                oid,
                value: Some(value),
                r#type: 0,
                scope: String::new(),
                read_only: false,
                is_command: false,
                max_length: 0,
                total_length: 0,
                array_lengths: HashMap::new(),
            });
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(serde::Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    detail_level: Option<String>,
    #[serde(default)]
    force_connection: bool,
}

fn device_event_stream(
    slot: u32,
    device: std::sync::Arc<dm_core::Device>,
    authz: Authorizer,
) -> std::pin::Pin<Box<dyn futures_core::Stream<Item = PushUpdates> + Send>> {
    Box::pin(async_stream::stream! {
        let mut rx = device.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(DeviceEvent::Shutdown) => break,
                Ok(DeviceEvent::ValueSetByClient { oid, element_index, value })
                | Ok(DeviceEvent::ValueSetByServer { oid, element_index, value }) => {
                    if device.should_send(&oid, &authz) {
                        yield PushUpdates {
                            slot,
                            kind: Some(dm_proto::push_updates::Kind::Value(ValueUpdate {
                                oid,
                                element_index: element_index.unwrap_or(dm_core::path::K_END),
                                value: Some(value),
                            })),
                        };
                    }
                }
                Ok(DeviceEvent::LanguageAdded { id }) => {
                    if let Ok(pack) = device.get_language_pack(&id) {
                        yield PushUpdates {
                            slot,
                            kind: Some(dm_proto::push_updates::Kind::LanguagePack(ComponentLanguagePack {
                                id,
                                language_pack: Some(pack.into()),
                            })),
                        };
                    }
                }
                Ok(DeviceEvent::LanguageRemoved { .. }) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

pub async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(_query): Query<ConnectQuery>,
) -> HttpResult<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    let authz = authorize(&state, &headers)?;
    let devices = state.registry.as_map();
    let streams: Vec<_> = devices
        .into_iter()
        .map(|(slot, device)| device_event_stream(slot, device, authz.clone()))
        .collect();
    let merged = select_all(streams).map(|update| json_event(&update));
    Ok(Sse::new(merged).keep_alive(KeepAlive::default()))
}

pub async fn not_found() -> impl IntoResponse {
    HttpError(DmStatus::not_found("No route matches this request"))
}
